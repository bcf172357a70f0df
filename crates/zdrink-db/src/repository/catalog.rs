//! # Catalog Repository
//!
//! Products, SKUs and attribute options, as consumed by carts and the order
//! engine.
//!
//! The catalog is read at order time and copied into order item snapshots.
//! Stock is the one catalog column the engines mutate, and only through
//! [`inventory::apply_delta`](crate::repository::inventory::apply_delta).

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use zdrink_core::catalog::{Product, ProductAttributeOption, ProductSku};
use zdrink_core::validation::{validate_code, validate_name, validate_price};
use zdrink_core::{CoreError, ValidationError};

/// Repository for catalog reads and inserts.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    pub async fn insert_product(&self, product: &Product) -> DbResult<Product> {
        validate_name("name", &product.name)?;
        validate_price("base_price", product.base_price)?;
        debug!(id = %product.id, name = %product.name, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, shop_id, category_id, name, image, base_price, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&product.id)
        .bind(&product.shop_id)
        .bind(&product.category_id)
        .bind(&product.name)
        .bind(&product.image)
        .bind(product.base_price)
        .bind(product.is_active)
        .bind(product.created_at)
        .execute(&self.pool)
        .await?;

        Ok(product.clone())
    }

    /// Inserts a SKU. The SKU must belong to a product of the same shop.
    pub async fn insert_sku(&self, sku: &ProductSku) -> DbResult<ProductSku> {
        validate_code("sku_code", &sku.sku_code)?;
        validate_price("price", sku.price)?;
        if sku.stock_quantity < 0 {
            return Err(ValidationError::OutOfRange {
                field: "stock_quantity".into(),
                min: 0,
                max: i64::MAX,
            }
            .into());
        }
        debug!(id = %sku.id, sku_code = %sku.sku_code, stock = sku.stock_quantity, "Inserting SKU");

        let result = sqlx::query(
            r#"
            INSERT INTO product_skus (
                id, shop_id, product_id, sku_code, price, stock_quantity,
                low_stock_threshold, specifications, is_active, created_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10
            WHERE EXISTS (SELECT 1 FROM products WHERE id = ?3 AND shop_id = ?2)
            "#,
        )
        .bind(&sku.id)
        .bind(&sku.shop_id)
        .bind(&sku.product_id)
        .bind(&sku.sku_code)
        .bind(sku.price)
        .bind(sku.stock_quantity)
        .bind(sku.low_stock_threshold)
        .bind(sqlx::types::Json(&sku.specifications))
        .bind(sku.is_active)
        .bind(sku.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, &sku.sku_code),
            other => other,
        })?;

        if result.rows_affected() == 0 {
            return Err(CoreError::ProductNotFound(sku.product_id.clone()).into());
        }
        Ok(sku.clone())
    }

    pub async fn insert_attribute_option(
        &self,
        option: &ProductAttributeOption,
    ) -> DbResult<ProductAttributeOption> {
        validate_name("attribute_name", &option.attribute_name)?;
        validate_name("value", &option.value)?;
        validate_price("additional_price", option.additional_price)?;

        sqlx::query(
            r#"
            INSERT INTO product_attribute_options (
                id, product_id, attribute_name, value, additional_price
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&option.id)
        .bind(&option.product_id)
        .bind(&option.attribute_name)
        .bind(&option.value)
        .bind(option.additional_price)
        .execute(&self.pool)
        .await?;

        Ok(option.clone())
    }

    pub async fn get_product(&self, shop_id: &str, product_id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE id = ?1 AND shop_id = ?2",
        )
        .bind(product_id)
        .bind(shop_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    pub async fn get_sku(&self, shop_id: &str, sku_id: &str) -> DbResult<Option<ProductSku>> {
        let sku = sqlx::query_as::<_, ProductSku>(
            "SELECT * FROM product_skus WHERE id = ?1 AND shop_id = ?2",
        )
        .bind(sku_id)
        .bind(shop_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sku)
    }

    pub async fn options_for(&self, product_id: &str) -> DbResult<Vec<ProductAttributeOption>> {
        let options = sqlx::query_as::<_, ProductAttributeOption>(
            r#"
            SELECT * FROM product_attribute_options
            WHERE product_id = ?1
            ORDER BY attribute_name, value
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(options)
    }

    /// Active SKUs at or below their low-stock threshold, emptiest first.
    pub async fn list_low_stock(&self, shop_id: &str) -> DbResult<Vec<ProductSku>> {
        let skus = sqlx::query_as::<_, ProductSku>(
            r#"
            SELECT * FROM product_skus
            WHERE shop_id = ?1
              AND is_active = 1
              AND stock_quantity <= low_stock_threshold
            ORDER BY stock_quantity, sku_code
            "#,
        )
        .bind(shop_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(skus)
    }
}

// =============================================================================
// In-transaction lookups
// =============================================================================

/// An orderable line resolved against the live catalog.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedLine {
    pub product: Product,
    pub sku: Option<ProductSku>,
    pub options: Vec<ProductAttributeOption>,
}

impl ResolvedLine {
    pub fn unit_price(&self) -> zdrink_core::Money {
        zdrink_core::catalog::unit_price(&self.product, self.sku.as_ref(), &self.options)
    }
}

/// Resolves `(product, sku, options)` for a cart or order line.
///
/// ## Errors
/// - product missing, inactive or in another shop → `ProductNotFound`
/// - sku missing, inactive or of another product → `SkuNotFound`
/// - an option id that is not an option of this product → `Validation`
pub(crate) async fn resolve_line(
    conn: &mut SqliteConnection,
    shop_id: &str,
    product_id: &str,
    sku_id: Option<&str>,
    option_ids: &[String],
) -> DbResult<ResolvedLine> {
    let product = sqlx::query_as::<_, Product>(
        "SELECT * FROM products WHERE id = ?1 AND shop_id = ?2 AND is_active = 1",
    )
    .bind(product_id)
    .bind(shop_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))?;

    let sku = match sku_id {
        Some(sku_id) => Some(
            sqlx::query_as::<_, ProductSku>(
                r#"
                SELECT * FROM product_skus
                WHERE id = ?1 AND shop_id = ?2 AND product_id = ?3 AND is_active = 1
                "#,
            )
            .bind(sku_id)
            .bind(shop_id)
            .bind(product_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| CoreError::SkuNotFound(sku_id.to_string()))?,
        ),
        None => None,
    };

    let mut options = Vec::with_capacity(option_ids.len());
    for option_id in option_ids {
        let option = sqlx::query_as::<_, ProductAttributeOption>(
            "SELECT * FROM product_attribute_options WHERE id = ?1 AND product_id = ?2",
        )
        .bind(option_id)
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ValidationError::InvalidFormat {
            field: "option_ids".into(),
            reason: format!("{option_id} is not an option of product {product_id}"),
        })?;
        options.push(option);
    }

    Ok(ResolvedLine {
        product,
        sku,
        options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::{new_id, shop::new_shop};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use zdrink_core::Money;

    fn product(shop_id: &str) -> Product {
        Product {
            id: new_id(),
            shop_id: shop_id.to_string(),
            category_id: Some("tea".into()),
            name: "Jasmine Milk Tea".into(),
            image: None,
            base_price: Money::from_cents(1500),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn sku(shop_id: &str, product_id: &str, code: &str, stock: i64) -> ProductSku {
        ProductSku {
            id: new_id(),
            shop_id: shop_id.to_string(),
            product_id: product_id.to_string(),
            sku_code: code.to_string(),
            price: Money::from_cents(1800),
            stock_quantity: stock,
            low_stock_threshold: 5,
            specifications: BTreeMap::from([("size".to_string(), "L".to_string())]),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_sku_round_trip_and_low_stock() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let shop = db.shops().insert(&new_shop("Tea Corner")).await.unwrap();
        let catalog = db.catalog();
        let p = catalog.insert_product(&product(&shop.id)).await.unwrap();

        let large = catalog.insert_sku(&sku(&shop.id, &p.id, "JMT-L", 40)).await.unwrap();
        catalog.insert_sku(&sku(&shop.id, &p.id, "JMT-M", 3)).await.unwrap();

        let loaded = catalog.get_sku(&shop.id, &large.id).await.unwrap().unwrap();
        assert_eq!(loaded.specifications.get("size").map(String::as_str), Some("L"));

        let low = catalog.list_low_stock(&shop.id).await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].sku_code, "JMT-M");
    }

    #[tokio::test]
    async fn test_duplicate_sku_code_and_foreign_product() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let shop = db.shops().insert(&new_shop("Tea Corner")).await.unwrap();
        let other = db.shops().insert(&new_shop("Other")).await.unwrap();
        let catalog = db.catalog();
        let p = catalog.insert_product(&product(&shop.id)).await.unwrap();

        catalog.insert_sku(&sku(&shop.id, &p.id, "JMT-L", 1)).await.unwrap();
        let err = catalog
            .insert_sku(&sku(&shop.id, &p.id, "JMT-L", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        // product belongs to another tenant
        let err = catalog
            .insert_sku(&sku(&other.id, &p.id, "JMT-X", 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(CoreError::ProductNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_is_tenant_scoped() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let shop = db.shops().insert(&new_shop("Tea Corner")).await.unwrap();
        let other = db.shops().insert(&new_shop("Other")).await.unwrap();
        let p = db.catalog().insert_product(&product(&shop.id)).await.unwrap();

        assert!(db.catalog().get_product(&shop.id, &p.id).await.unwrap().is_some());
        assert!(db.catalog().get_product(&other.id, &p.id).await.unwrap().is_none());
    }
}
