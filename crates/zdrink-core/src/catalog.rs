//! # Catalog Types
//!
//! Shops, products, SKUs and attribute options as the order engine sees them.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Shop (tenant)                                                          │
//! │   ├── delivery_fee / minimum_order_amount                               │
//! │   ├── allow_delivery / allow_pickup / allow_dine_in                     │
//! │   │                                                                     │
//! │   └── Product ──┬── ProductSku (price, stock_quantity, specifications)  │
//! │                 │                                                       │
//! │                 └── ProductAttributeOption (name=value, +price)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The catalog is live and mutable. Orders never hold references into it;
//! they copy what they need into an [`crate::order::OrderItem`] snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::order::OrderType;

// =============================================================================
// Shop
// =============================================================================

/// A tenant. Every operation is scoped to one shop id supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Shop {
    pub id: String,
    pub name: String,
    /// Charged once per delivery order.
    pub delivery_fee: Money,
    /// Delivery orders below this subtotal are rejected.
    pub minimum_order_amount: Money,
    pub allow_delivery: bool,
    pub allow_pickup: bool,
    pub allow_dine_in: bool,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Shop {
    /// Whether the shop accepts orders of this type.
    pub fn accepts(&self, order_type: OrderType) -> bool {
        match order_type {
            OrderType::DineIn => self.allow_dine_in,
            OrderType::Takeaway => self.allow_pickup,
            OrderType::Delivery => self.allow_delivery,
        }
    }

    /// Delivery fee for an order of this type.
    pub fn delivery_fee_for(&self, order_type: OrderType) -> Money {
        match order_type {
            OrderType::Delivery => self.delivery_fee,
            OrderType::DineIn | OrderType::Takeaway => Money::zero(),
        }
    }
}

// =============================================================================
// Product
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    pub shop_id: String,
    /// Used by category-scoped coupons.
    pub category_id: Option<String>,
    pub name: String,
    pub image: Option<String>,
    /// Price used when an order line has no SKU.
    pub base_price: Money,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Product SKU
// =============================================================================

/// A purchasable variant with its own price and stock.
///
/// `stock_quantity` is a shared counter. It is only ever changed through a
/// conditional UPDATE in the inventory ledger, never read-modify-written.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ProductSku {
    pub id: String,
    pub shop_id: String,
    pub product_id: String,
    pub sku_code: String,
    pub price: Money,
    pub stock_quantity: i64,
    pub low_stock_threshold: i64,
    /// e.g. `{"size": "L", "temperature": "iced"}`
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub specifications: BTreeMap<String, String>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl ProductSku {
    pub fn is_in_stock(&self) -> bool {
        self.stock_quantity > 0
    }

    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.low_stock_threshold
    }
}

// =============================================================================
// Attribute Options
// =============================================================================

/// A selectable modifier such as `sugar = half` or `topping = pearls (+¥2)`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ProductAttributeOption {
    pub id: String,
    pub product_id: String,
    pub attribute_name: String,
    pub value: String,
    pub additional_price: Money,
}

/// Unit price of a line: SKU price (or product base price) plus every
/// selected option's surcharge.
pub fn unit_price(
    product: &Product,
    sku: Option<&ProductSku>,
    options: &[ProductAttributeOption],
) -> Money {
    let base = sku.map(|s| s.price).unwrap_or(product.base_price);
    base + options.iter().map(|o| o.additional_price).sum::<Money>()
}

/// Snapshot of the selected options as `attribute name → value`.
pub fn selected_attributes(options: &[ProductAttributeOption]) -> BTreeMap<String, String> {
    options
        .iter()
        .map(|o| (o.attribute_name.clone(), o.value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> Product {
        Product {
            id: "p1".into(),
            shop_id: "s1".into(),
            category_id: Some("tea".into()),
            name: "Milk Tea".into(),
            image: None,
            base_price: Money::from_cents(1200),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn sku(price: i64, stock: i64) -> ProductSku {
        ProductSku {
            id: "k1".into(),
            shop_id: "s1".into(),
            product_id: "p1".into(),
            sku_code: "MT-L".into(),
            price: Money::from_cents(price),
            stock_quantity: stock,
            low_stock_threshold: 5,
            specifications: BTreeMap::from([("size".to_string(), "L".to_string())]),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn option(name: &str, value: &str, extra: i64) -> ProductAttributeOption {
        ProductAttributeOption {
            id: format!("{name}-{value}"),
            product_id: "p1".into(),
            attribute_name: name.into(),
            value: value.into(),
            additional_price: Money::from_cents(extra),
        }
    }

    #[test]
    fn test_unit_price_prefers_sku_and_adds_options() {
        let p = product();
        let k = sku(1500, 10);
        let opts = vec![option("topping", "pearls", 200), option("sugar", "half", 0)];

        assert_eq!(unit_price(&p, None, &[]).cents(), 1200);
        assert_eq!(unit_price(&p, Some(&k), &[]).cents(), 1500);
        assert_eq!(unit_price(&p, Some(&k), &opts).cents(), 1700);

        let attrs = selected_attributes(&opts);
        assert_eq!(attrs.get("topping").map(String::as_str), Some("pearls"));
    }

    #[test]
    fn test_stock_flags() {
        assert!(sku(100, 6).is_in_stock());
        assert!(!sku(100, 6).is_low_stock());
        assert!(sku(100, 5).is_low_stock());
        assert!(!sku(100, 0).is_in_stock());
    }

    #[test]
    fn test_shop_order_type_rules() {
        let shop = Shop {
            id: "s1".into(),
            name: "ZDrink".into(),
            delivery_fee: Money::from_cents(500),
            minimum_order_amount: Money::from_cents(2000),
            allow_delivery: false,
            allow_pickup: true,
            allow_dine_in: true,
            is_active: true,
            created_at: Utc::now(),
        };
        assert!(!shop.accepts(OrderType::Delivery));
        assert!(shop.accepts(OrderType::Takeaway));
        assert_eq!(shop.delivery_fee_for(OrderType::Delivery).cents(), 500);
        assert_eq!(shop.delivery_fee_for(OrderType::DineIn).cents(), 0);
    }
}
