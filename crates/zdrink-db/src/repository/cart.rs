//! # Cart Repository
//!
//! One cart per user per shop. Lines are unique by `(cart, product, sku)`:
//! adding the same line again bumps its quantity.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::catalog::resolve_line;
use crate::repository::{begin_write, new_id};
use zdrink_core::cart::{Cart, CartChange, CartItem, CartTotals};
use zdrink_core::validation::{validate_id, validate_text};
use zdrink_core::{CoreError, ValidationError, MAX_ITEM_QUANTITY};

/// A line to add to a cart.
#[derive(Debug, Clone)]
pub struct AddCartItem {
    pub product_id: String,
    pub sku_id: Option<String>,
    pub quantity: i64,
    pub option_ids: Vec<String>,
    pub customization: Option<String>,
}

impl AddCartItem {
    pub fn new(product_id: impl Into<String>, sku_id: Option<&str>, quantity: i64) -> Self {
        AddCartItem {
            product_id: product_id.into(),
            sku_id: sku_id.map(str::to_string),
            quantity,
            option_ids: Vec::new(),
            customization: None,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CartRow {
    id: String,
    shop_id: String,
    user_id: String,
    updated_at: DateTime<Utc>,
}

/// Repository for carts.
#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

impl CartRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CartRepository { pool }
    }

    pub async fn get(&self, shop_id: &str, user_id: &str) -> DbResult<Option<Cart>> {
        let mut conn = self.pool.acquire().await?;
        load_cart(&mut *conn, shop_id, user_id).await
    }

    pub async fn get_or_create(&self, shop_id: &str, user_id: &str) -> DbResult<Cart> {
        let mut tx = begin_write(&self.pool).await?;
        let cart = ensure_cart(&mut *tx, shop_id, user_id).await?;
        tx.commit().await?;
        Ok(cart)
    }

    /// Adds a line, merging into an existing `(product, sku)` line.
    ///
    /// The unit price is snapshotted from the catalog when the line is first
    /// added. The SKU must have enough stock for the resulting quantity.
    pub async fn add_item(&self, shop_id: &str, user_id: &str, item: &AddCartItem) -> DbResult<Cart> {
        validate_id("product_id", &item.product_id)?;
        if let Some(text) = &item.customization {
            validate_text("customization", text, 500)?;
        }

        let mut tx = begin_write(&self.pool).await?;
        let cart = ensure_cart(&mut *tx, shop_id, user_id).await?;
        let line = resolve_line(
            &mut *tx,
            shop_id,
            &item.product_id,
            item.sku_id.as_deref(),
            &item.option_ids,
        )
        .await?;

        let change = cart.plan_add(&item.product_id, item.sku_id.as_deref(), item.quantity)?;
        let new_quantity = match change {
            CartChange::Merge { quantity, .. } => quantity,
            CartChange::Insert => item.quantity,
        };
        if let Some(sku) = &line.sku {
            if sku.stock_quantity < new_quantity {
                return Err(CoreError::InsufficientStock {
                    sku: sku.sku_code.clone(),
                    available: sku.stock_quantity,
                    requested: new_quantity,
                }
                .into());
            }
        }

        let now = Utc::now();
        match change {
            CartChange::Merge { item: existing, quantity } => {
                debug!(cart_id = %cart.id, item_id = %existing.id, quantity, "Merging cart line");
                sqlx::query("UPDATE cart_items SET quantity = ?1 WHERE id = ?2")
                    .bind(quantity)
                    .bind(&existing.id)
                    .execute(&mut *tx)
                    .await?;
            }
            CartChange::Insert => {
                debug!(cart_id = %cart.id, product_id = %item.product_id, "Adding cart line");
                sqlx::query(
                    r#"
                    INSERT INTO cart_items (
                        id, cart_id, product_id, sku_id, quantity, unit_price,
                        option_ids, customization, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                )
                .bind(new_id())
                .bind(&cart.id)
                .bind(&item.product_id)
                .bind(&item.sku_id)
                .bind(item.quantity)
                .bind(line.unit_price())
                .bind(sqlx::types::Json(&item.option_ids))
                .bind(&item.customization)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        touch(&mut *tx, &cart.id, now).await?;
        let cart = reload(&mut *tx, shop_id, user_id).await?;
        tx.commit().await?;
        Ok(cart)
    }

    /// Sets a line's quantity; `0` removes the line.
    pub async fn update_quantity(
        &self,
        shop_id: &str,
        user_id: &str,
        item_id: &str,
        quantity: i64,
    ) -> DbResult<Cart> {
        if !(0..=MAX_ITEM_QUANTITY).contains(&quantity) {
            return Err(ValidationError::OutOfRange {
                field: "quantity".into(),
                min: 0,
                max: MAX_ITEM_QUANTITY,
            }
            .into());
        }

        let mut tx = begin_write(&self.pool).await?;
        let cart = load_cart(&mut *tx, shop_id, user_id)
            .await?
            .ok_or_else(|| CoreError::CartNotFound(user_id.to_string()))?;
        if !cart.items.iter().any(|i| i.id == item_id) {
            return Err(CoreError::ItemNotFound {
                order_id: cart.id.clone(),
                item_id: item_id.to_string(),
            }
            .into());
        }

        if quantity == 0 {
            sqlx::query("DELETE FROM cart_items WHERE id = ?1 AND cart_id = ?2")
                .bind(item_id)
                .bind(&cart.id)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query("UPDATE cart_items SET quantity = ?1 WHERE id = ?2 AND cart_id = ?3")
                .bind(quantity)
                .bind(item_id)
                .bind(&cart.id)
                .execute(&mut *tx)
                .await?;
        }

        touch(&mut *tx, &cart.id, Utc::now()).await?;
        let cart = reload(&mut *tx, shop_id, user_id).await?;
        tx.commit().await?;
        Ok(cart)
    }

    pub async fn remove_item(&self, shop_id: &str, user_id: &str, item_id: &str) -> DbResult<Cart> {
        self.update_quantity(shop_id, user_id, item_id, 0).await
    }

    /// Empties the cart. A user without a cart is a no-op.
    pub async fn clear(&self, shop_id: &str, user_id: &str) -> DbResult<()> {
        let mut tx = begin_write(&self.pool).await?;
        if let Some(cart) = load_cart(&mut *tx, shop_id, user_id).await? {
            clear_items(&mut *tx, &cart.id).await?;
            touch(&mut *tx, &cart.id, Utc::now()).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn totals(&self, shop_id: &str, user_id: &str) -> DbResult<CartTotals> {
        let cart = self.get(shop_id, user_id).await?;
        Ok(cart
            .as_ref()
            .map(CartTotals::from)
            .unwrap_or(CartTotals {
                item_count: 0,
                total_quantity: 0,
                subtotal: zdrink_core::Money::zero(),
            }))
    }
}

// =============================================================================
// In-transaction helpers
// =============================================================================

/// Loads a cart with its lines in insertion order.
pub(crate) async fn load_cart(
    conn: &mut SqliteConnection,
    shop_id: &str,
    user_id: &str,
) -> DbResult<Option<Cart>> {
    let row = sqlx::query_as::<_, CartRow>(
        "SELECT id, shop_id, user_id, updated_at FROM carts WHERE shop_id = ?1 AND user_id = ?2",
    )
    .bind(shop_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let items = sqlx::query_as::<_, CartItem>(
        "SELECT * FROM cart_items WHERE cart_id = ?1 ORDER BY created_at, rowid",
    )
    .bind(&row.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(Cart {
        id: row.id,
        shop_id: row.shop_id,
        user_id: row.user_id,
        items,
        updated_at: row.updated_at,
    }))
}

/// Removes every line of a cart.
pub(crate) async fn clear_items(conn: &mut SqliteConnection, cart_id: &str) -> DbResult<()> {
    sqlx::query("DELETE FROM cart_items WHERE cart_id = ?1")
        .bind(cart_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn ensure_cart(conn: &mut SqliteConnection, shop_id: &str, user_id: &str) -> DbResult<Cart> {
    // user ids come from the identity layer and need not be uuids
    if user_id.trim().is_empty() {
        return Err(ValidationError::required("user_id").into());
    }
    crate::repository::shop::fetch_active_shop(&mut *conn, shop_id).await?;

    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO carts (id, shop_id, user_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?4)
        ON CONFLICT (shop_id, user_id) DO NOTHING
        "#,
    )
    .bind(new_id())
    .bind(shop_id)
    .bind(user_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    reload(conn, shop_id, user_id).await
}

async fn reload(conn: &mut SqliteConnection, shop_id: &str, user_id: &str) -> DbResult<Cart> {
    load_cart(conn, shop_id, user_id)
        .await?
        .ok_or_else(|| CoreError::CartNotFound(user_id.to_string()).into())
}

async fn touch(conn: &mut SqliteConnection, cart_id: &str, now: DateTime<Utc>) -> DbResult<()> {
    sqlx::query("UPDATE carts SET updated_at = ?1 WHERE id = ?2")
        .bind(now)
        .bind(cart_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
