//! # Shop Repository
//!
//! Tenants and the payment methods each one has enabled.
//!
//! Every other repository takes a `shop_id` from the caller and filters on
//! it; nothing here resolves tenancy from a request.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::new_id;
use zdrink_core::catalog::Shop;
use zdrink_core::payment::{PaymentMethod, PaymentMethodCode};
use zdrink_core::validation::{validate_name, validate_price};
use zdrink_core::CoreError;

/// Repository for shops and payment methods.
#[derive(Debug, Clone)]
pub struct ShopRepository {
    pool: SqlitePool,
}

impl ShopRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ShopRepository { pool }
    }

    /// Inserts a shop.
    pub async fn insert(&self, shop: &Shop) -> DbResult<Shop> {
        validate_name("name", &shop.name)?;
        validate_price("delivery_fee", shop.delivery_fee)?;
        validate_price("minimum_order_amount", shop.minimum_order_amount)?;

        debug!(id = %shop.id, name = %shop.name, "Inserting shop");

        sqlx::query(
            r#"
            INSERT INTO shops (
                id, name, delivery_fee, minimum_order_amount,
                allow_delivery, allow_pickup, allow_dine_in, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&shop.id)
        .bind(&shop.name)
        .bind(shop.delivery_fee)
        .bind(shop.minimum_order_amount)
        .bind(shop.allow_delivery)
        .bind(shop.allow_pickup)
        .bind(shop.allow_dine_in)
        .bind(shop.is_active)
        .bind(shop.created_at)
        .execute(&self.pool)
        .await?;

        Ok(shop.clone())
    }

    pub async fn get(&self, shop_id: &str) -> DbResult<Option<Shop>> {
        let shop = sqlx::query_as::<_, Shop>("SELECT * FROM shops WHERE id = ?1")
            .bind(shop_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(shop)
    }

    /// Enables (or reconfigures) a payment method for a shop.
    pub async fn set_payment_method(
        &self,
        shop_id: &str,
        code: PaymentMethodCode,
        name: &str,
        is_active: bool,
        sort_order: i64,
    ) -> DbResult<PaymentMethod> {
        validate_name("name", name)?;
        debug!(shop_id = %shop_id, code = %code, is_active, "Setting payment method");

        let method = sqlx::query_as::<_, PaymentMethod>(
            r#"
            INSERT INTO payment_methods (id, shop_id, code, name, is_active, sort_order)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (shop_id, code) DO UPDATE SET
                name = excluded.name,
                is_active = excluded.is_active,
                sort_order = excluded.sort_order
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(shop_id)
        .bind(code)
        .bind(name)
        .bind(is_active)
        .bind(sort_order)
        .fetch_one(&self.pool)
        .await?;

        Ok(method)
    }

    /// Active payment methods in display order.
    pub async fn payment_methods(&self, shop_id: &str) -> DbResult<Vec<PaymentMethod>> {
        let methods = sqlx::query_as::<_, PaymentMethod>(
            r#"
            SELECT * FROM payment_methods
            WHERE shop_id = ?1 AND is_active = 1
            ORDER BY sort_order, code
            "#,
        )
        .bind(shop_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(methods)
    }
}

/// Loads an active shop inside a transaction.
pub(crate) async fn fetch_active_shop(conn: &mut SqliteConnection, shop_id: &str) -> DbResult<Shop> {
    sqlx::query_as::<_, Shop>("SELECT * FROM shops WHERE id = ?1 AND is_active = 1")
        .bind(shop_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::from(CoreError::ShopNotFound(shop_id.to_string())))
}

/// Whether `code` is enabled for the shop.
pub(crate) async fn payment_method_enabled(
    conn: &mut SqliteConnection,
    shop_id: &str,
    code: PaymentMethodCode,
) -> DbResult<bool> {
    let enabled: Option<bool> = sqlx::query_scalar(
        "SELECT is_active FROM payment_methods WHERE shop_id = ?1 AND code = ?2",
    )
    .bind(shop_id)
    .bind(code)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(enabled.unwrap_or(false))
}

/// A shop with every order type allowed and no delivery minimum.
pub fn new_shop(name: &str) -> Shop {
    Shop {
        id: new_id(),
        name: name.to_string(),
        delivery_fee: zdrink_core::Money::zero(),
        minimum_order_amount: zdrink_core::Money::zero(),
        allow_delivery: true,
        allow_pickup: true,
        allow_dine_in: true,
        is_active: true,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_insert_and_get_shop() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let shop = db.shops().insert(&new_shop("Tea Corner")).await.unwrap();

        let loaded = db.shops().get(&shop.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Tea Corner");
        assert!(loaded.allow_delivery);
        assert!(db.shops().get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_payment_method_upsert() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let shop = db.shops().insert(&new_shop("Tea Corner")).await.unwrap();
        let shops = db.shops();

        shops
            .set_payment_method(&shop.id, PaymentMethodCode::Cash, "Cash", true, 2)
            .await
            .unwrap();
        shops
            .set_payment_method(&shop.id, PaymentMethodCode::Wechat, "WeChat Pay", true, 1)
            .await
            .unwrap();
        let methods = shops.payment_methods(&shop.id).await.unwrap();
        assert_eq!(methods.len(), 2);
        assert_eq!(methods[0].code, PaymentMethodCode::Wechat);

        // disabling keeps the row but hides it
        shops
            .set_payment_method(&shop.id, PaymentMethodCode::Wechat, "WeChat Pay", false, 1)
            .await
            .unwrap();
        let methods = shops.payment_methods(&shop.id).await.unwrap();
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].code, PaymentMethodCode::Cash);
    }
}
