//! # Inventory Repository
//!
//! Per-SKU stock and the append-only inventory ledger.
//!
//! ## Stock Update Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  ❌ WRONG: read, compute in memory, write back                     │
//! │     SELECT stock_quantity ... → 5                                  │
//! │     UPDATE product_skus SET stock_quantity = 2                     │
//! │     (a concurrent sale between the two statements is lost)         │
//! │                                                                     │
//! │  ✅ CORRECT: conditional delta                                     │
//! │     UPDATE product_skus                                            │
//! │        SET stock_quantity = stock_quantity - 3                     │
//! │      WHERE id = ? AND stock_quantity >= 3                          │
//! │     RETURNING stock_quantity                                       │
//! │     no row back → InsufficientStock, nothing written               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every change writes one [`InventoryLog`] row in the same transaction, so
//! `current stock == initial stock + Σ quantity_change` always holds. The
//! ledger has no update or delete API here, and the schema rejects both.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::DbResult;
use crate::repository::{begin_write, new_id};
use zdrink_core::inventory::{InventoryAction, InventoryLog};
use zdrink_core::CoreError;

/// One stock movement to apply.
#[derive(Debug, Clone, Copy)]
pub struct StockMovement<'a> {
    pub sku_id: &'a str,
    pub action: InventoryAction,
    /// Signed change: negative removes stock.
    pub delta: i64,
    /// Order number for sale / return rows.
    pub reference_id: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub actor: Option<&'a str>,
}

impl<'a> StockMovement<'a> {
    pub fn new(sku_id: &'a str, action: InventoryAction, delta: i64) -> Self {
        StockMovement {
            sku_id,
            action,
            delta,
            reference_id: None,
            notes: None,
            actor: None,
        }
    }

    pub fn reference(mut self, reference_id: &'a str) -> Self {
        self.reference_id = Some(reference_id);
        self
    }

    pub fn notes(mut self, notes: Option<&'a str>) -> Self {
        self.notes = notes;
        self
    }

    pub fn actor(mut self, actor: Option<&'a str>) -> Self {
        self.actor = actor;
        self
    }
}

/// Repository for stock changes.
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

impl InventoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    /// Applies one stock movement and records it.
    ///
    /// ## Errors
    /// - delta sign does not match the action → `Validation`
    /// - SKU not in this shop → `SkuNotFound`
    /// - stock would go negative → `InsufficientStock`
    pub async fn adjust(&self, shop_id: &str, movement: StockMovement<'_>) -> DbResult<InventoryLog> {
        let mut tx = begin_write(&self.pool).await?;
        let log = apply_delta(&mut *tx, shop_id, movement).await?;
        tx.commit().await?;

        info!(
            sku_id = %log.sku_id,
            action = ?log.action,
            delta = log.quantity_change,
            quantity_after = log.quantity_after,
            "Stock adjusted"
        );
        Ok(log)
    }

    /// Ledger rows for a SKU, newest first.
    pub async fn history(&self, shop_id: &str, sku_id: &str) -> DbResult<Vec<InventoryLog>> {
        let logs = sqlx::query_as::<_, InventoryLog>(
            r#"
            SELECT * FROM inventory_logs
            WHERE shop_id = ?1 AND sku_id = ?2
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(shop_id)
        .bind(sku_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    /// Σ quantity_change over the ledger of one SKU.
    pub async fn ledger_total(&self, shop_id: &str, sku_id: &str) -> DbResult<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity_change), 0) FROM inventory_logs
            WHERE shop_id = ?1 AND sku_id = ?2
            "#,
        )
        .bind(shop_id)
        .bind(sku_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }
}

/// Applies a stock movement inside the caller's transaction.
///
/// The conditional UPDATE is the only place stock changes. A zero-row result
/// means the SKU is missing or the stock is short; the follow-up read only
/// decides which error to report.
pub(crate) async fn apply_delta(
    conn: &mut SqliteConnection,
    shop_id: &str,
    movement: StockMovement<'_>,
) -> DbResult<InventoryLog> {
    movement.action.check_delta(movement.delta)?;
    debug!(
        sku_id = %movement.sku_id,
        action = ?movement.action,
        delta = movement.delta,
        "Applying stock movement"
    );

    let quantity_after: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE product_skus
        SET stock_quantity = stock_quantity + ?1
        WHERE id = ?2 AND shop_id = ?3 AND stock_quantity + ?1 >= 0
        RETURNING stock_quantity
        "#,
    )
    .bind(movement.delta)
    .bind(movement.sku_id)
    .bind(shop_id)
    .fetch_optional(&mut *conn)
    .await?;

    let quantity_after = match quantity_after {
        Some(q) => q,
        None => {
            let current: Option<(String, i64)> = sqlx::query_as(
                "SELECT sku_code, stock_quantity FROM product_skus WHERE id = ?1 AND shop_id = ?2",
            )
            .bind(movement.sku_id)
            .bind(shop_id)
            .fetch_optional(&mut *conn)
            .await?;

            return Err(match current {
                Some((sku_code, available)) => CoreError::InsufficientStock {
                    sku: sku_code,
                    available,
                    requested: -movement.delta,
                },
                None => CoreError::SkuNotFound(movement.sku_id.to_string()),
            }
            .into());
        }
    };

    let log = InventoryLog {
        id: new_id(),
        shop_id: shop_id.to_string(),
        sku_id: movement.sku_id.to_string(),
        action: movement.action,
        quantity_change: movement.delta,
        quantity_after,
        reference_id: movement.reference_id.map(str::to_string),
        notes: movement.notes.map(str::to_string),
        actor: movement.actor.map(str::to_string),
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO inventory_logs (
            id, shop_id, sku_id, action, quantity_change, quantity_after,
            reference_id, notes, actor, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&log.id)
    .bind(&log.shop_id)
    .bind(&log.sku_id)
    .bind(log.action)
    .bind(log.quantity_change)
    .bind(log.quantity_after)
    .bind(&log.reference_id)
    .bind(&log.notes)
    .bind(&log.actor)
    .bind(log.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::shop::new_shop;
    use crate::DbError;
    use std::collections::BTreeMap;
    use zdrink_core::catalog::{Product, ProductSku};
    use zdrink_core::{ErrorKind, Money};

    async fn setup(stock: i64) -> (Database, String, String) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let shop = db.shops().insert(&new_shop("Tea Corner")).await.unwrap();
        let product = db
            .catalog()
            .insert_product(&Product {
                id: new_id(),
                shop_id: shop.id.clone(),
                category_id: None,
                name: "Oolong".into(),
                image: None,
                base_price: Money::from_cents(1000),
                is_active: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let sku = db
            .catalog()
            .insert_sku(&ProductSku {
                id: new_id(),
                shop_id: shop.id.clone(),
                product_id: product.id.clone(),
                sku_code: "OOL-R".into(),
                price: Money::from_cents(1000),
                stock_quantity: stock,
                low_stock_threshold: 0,
                specifications: BTreeMap::new(),
                is_active: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        (db, shop.id, sku.id)
    }

    #[tokio::test]
    async fn test_adjust_records_ledger() {
        let (db, shop_id, sku_id) = setup(10).await;
        let inventory = db.inventory();

        let log = inventory
            .adjust(
                &shop_id,
                StockMovement::new(&sku_id, InventoryAction::Purchase, 5).actor(Some("manager")),
            )
            .await
            .unwrap();
        assert_eq!(log.quantity_after, 15);

        inventory
            .adjust(&shop_id, StockMovement::new(&sku_id, InventoryAction::Waste, -3))
            .await
            .unwrap();

        let history = inventory.history(&shop_id, &sku_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, InventoryAction::Waste);
        assert_eq!(history[0].quantity_after, 12);
        assert_eq!(inventory.ledger_total(&shop_id, &sku_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stock_never_negative() {
        let (db, shop_id, sku_id) = setup(2).await;
        let err = db
            .inventory()
            .adjust(&shop_id, StockMovement::new(&sku_id, InventoryAction::Sale, -3))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InsufficientResource);
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock { available: 2, requested: 3, .. })
        ));
        let sku = db.catalog().get_sku(&shop_id, &sku_id).await.unwrap().unwrap();
        assert_eq!(sku.stock_quantity, 2);
        assert!(db.inventory().history(&shop_id, &sku_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delta_sign_checked() {
        let (db, shop_id, sku_id) = setup(2).await;
        let err = db
            .inventory()
            .adjust(&shop_id, StockMovement::new(&sku_id, InventoryAction::Sale, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = db
            .inventory()
            .adjust(&shop_id, StockMovement::new("nope", InventoryAction::Purchase, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_ledger_rows_are_immutable() {
        let (db, shop_id, sku_id) = setup(2).await;
        db.inventory()
            .adjust(&shop_id, StockMovement::new(&sku_id, InventoryAction::Return, 1))
            .await
            .unwrap();

        let update = sqlx::query("UPDATE inventory_logs SET quantity_change = 99")
            .execute(db.pool())
            .await;
        assert!(update.is_err());
        let delete = sqlx::query("DELETE FROM inventory_logs").execute(db.pool()).await;
        assert!(delete.is_err());
    }
}
