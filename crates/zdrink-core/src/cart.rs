//! # Cart
//!
//! Per-user staging area for an order, one cart per user per shop.
//!
//! ## Cart Operations Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  add_item ─────────► same (product, sku)? ──yes──► quantity += n        │
//! │                             │                                           │
//! │                             no ──► new line, unit price snapshotted     │
//! │                                                                         │
//! │  update_quantity(0) ───────► line removed                              │
//! │                                                                         │
//! │  create_order(Cart) ───────► lines become OrderItems, cart cleared     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;
use crate::validation::{validate_cart_size, validate_quantity};
use crate::MAX_ITEM_QUANTITY;

/// A cart line.
///
/// `unit_price` is frozen when the line is first added (SKU or base price plus
/// option surcharges). Order creation re-prices from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CartItem {
    pub id: String,
    pub cart_id: String,
    pub product_id: String,
    pub sku_id: Option<String>,
    pub quantity: i64,
    pub unit_price: Money,
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub option_ids: Vec<String>,
    pub customization: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl CartItem {
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply_quantity(self.quantity)
    }

    /// Whether this line holds `(product, sku)`.
    pub fn is_line_for(&self, product_id: &str, sku_id: Option<&str>) -> bool {
        self.product_id == product_id && self.sku_id.as_deref() == sku_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Cart {
    pub id: String,
    pub shop_id: String,
    pub user_id: String,
    pub items: Vec<CartItem>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// What adding `quantity` of `(product, sku)` does to a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartChange<'a> {
    /// Bump an existing line to this quantity.
    Merge { item: &'a CartItem, quantity: i64 },
    /// Insert a new line.
    Insert,
}

impl Cart {
    /// Decides how an add merges into the cart and checks the limits.
    ///
    /// ## Invariants
    /// - Lines are unique by `(product, sku)`
    /// - A line's quantity stays within 1..=999
    /// - At most 100 lines
    pub fn plan_add(
        &self,
        product_id: &str,
        sku_id: Option<&str>,
        quantity: i64,
    ) -> Result<CartChange<'_>, ValidationError> {
        validate_quantity(quantity)?;

        if let Some(item) = self.items.iter().find(|i| i.is_line_for(product_id, sku_id)) {
            let merged = item.quantity + quantity;
            if merged > MAX_ITEM_QUANTITY {
                return Err(ValidationError::OutOfRange {
                    field: "quantity".to_string(),
                    min: 1,
                    max: MAX_ITEM_QUANTITY,
                });
            }
            return Ok(CartChange::Merge {
                item,
                quantity: merged,
            });
        }

        validate_cart_size(self.items.len())?;
        Ok(CartChange::Insert)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn total_quantity(&self) -> i64 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    pub fn subtotal(&self) -> Money {
        self.items.iter().map(CartItem::line_total).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Cart totals summary for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartTotals {
    pub item_count: usize,
    pub total_quantity: i64,
    pub subtotal: Money,
}

impl From<&Cart> for CartTotals {
    fn from(cart: &Cart) -> Self {
        CartTotals {
            item_count: cart.item_count(),
            total_quantity: cart.total_quantity(),
            subtotal: cart.subtotal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product: &str, sku: Option<&str>, qty: i64, price: i64) -> CartItem {
        CartItem {
            id: format!("{product}-{sku:?}"),
            cart_id: "c1".into(),
            product_id: product.into(),
            sku_id: sku.map(str::to_string),
            quantity: qty,
            unit_price: Money::from_cents(price),
            option_ids: vec![],
            customization: None,
            created_at: Utc::now(),
        }
    }

    fn cart(items: Vec<CartItem>) -> Cart {
        Cart {
            id: "c1".into(),
            shop_id: "s1".into(),
            user_id: "u1".into(),
            items,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_plan_add_merges_same_line() {
        let c = cart(vec![item("p1", Some("L"), 2, 500)]);
        match c.plan_add("p1", Some("L"), 3) {
            Ok(CartChange::Merge { quantity, .. }) => assert_eq!(quantity, 5),
            other => panic!("expected merge, got {other:?}"),
        }
        // different SKU of the same product is a new line
        assert_eq!(c.plan_add("p1", Some("M"), 1).ok(), Some(CartChange::Insert));
        assert_eq!(c.plan_add("p1", None, 1).ok(), Some(CartChange::Insert));
    }

    #[test]
    fn test_plan_add_limits() {
        let c = cart(vec![item("p1", None, 998, 500)]);
        assert!(c.plan_add("p1", None, 1).is_ok());
        assert!(c.plan_add("p1", None, 2).is_err());
        assert!(c.plan_add("p2", None, 0).is_err());

        let full = cart((0..100).map(|i| item(&format!("p{i}"), None, 1, 100)).collect());
        assert!(full.plan_add("new", None, 1).is_err());
    }

    #[test]
    fn test_totals() {
        let c = cart(vec![item("p1", None, 3, 500), item("p2", None, 1, 1000)]);
        let totals = CartTotals::from(&c);
        assert_eq!(totals.item_count, 2);
        assert_eq!(totals.total_quantity, 4);
        assert_eq!(totals.subtotal.cents(), 2500);
    }
}
