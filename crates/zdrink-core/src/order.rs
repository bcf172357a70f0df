//! # Order Domain
//!
//! Order, order item snapshot, status log and the status state machine.
//!
//! ## Status State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  pending ──► paid ──► confirmed ──► preparing ──► ready ──► completed  │
//! │     │          │          │             │           │                   │
//! │     │          │          │             └───────────┴──► refunded       │
//! │     │          ├──────────┴──────────────────────────────► refunded     │
//! │     └──────────┴──────────┴──► cancelled                                │
//! │                                                                         │
//! │  Forward steps may be skipped, never reversed.                         │
//! │  completed / cancelled / refunded are terminal.                        │
//! │  Every accepted transition writes exactly one OrderStatusLog row.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Totals Invariant
//! `total_amount == subtotal + delivery_fee − discount_amount`, with the
//! discount clamped to the subtotal so the total never goes negative. Every
//! write of an order's money columns goes through [`OrderTotals::compute`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::{Money, Rate};
use crate::payment::PaymentMethodCode;
use crate::validation::{validate_cart_size, validate_id, validate_quantity, validate_text};

// =============================================================================
// Order Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum OrderStatus {
    Pending,
    Paid,
    Confirmed,
    Preparing,
    Ready,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Position on the forward path, `None` for cancelled / refunded.
    fn forward_rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Paid => Some(1),
            OrderStatus::Confirmed => Some(2),
            OrderStatus::Preparing => Some(3),
            OrderStatus::Ready => Some(4),
            OrderStatus::Completed => Some(5),
            OrderStatus::Cancelled | OrderStatus::Refunded => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// `cancel()` is only legal from these states.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Paid | OrderStatus::Confirmed
        )
    }

    /// Whether `self → to` is an edge of the transition graph.
    ///
    /// ```rust
    /// use zdrink_core::order::OrderStatus::*;
    ///
    /// assert!(Pending.can_transition_to(Paid));
    /// assert!(Paid.can_transition_to(Ready));        // skip ahead
    /// assert!(!Ready.can_transition_to(Confirmed));  // never backwards
    /// assert!(!Preparing.can_transition_to(Cancelled));
    /// assert!(!Completed.can_transition_to(Refunded));
    /// ```
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            OrderStatus::Cancelled => self.is_cancellable(),
            OrderStatus::Refunded => matches!(
                self,
                OrderStatus::Paid
                    | OrderStatus::Confirmed
                    | OrderStatus::Preparing
                    | OrderStatus::Ready
            ),
            _ => match (self.forward_rank(), to.forward_rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Order Type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum OrderType {
    DineIn,
    Takeaway,
    Delivery,
}

// =============================================================================
// Order
// =============================================================================

/// An order owned by one shop.
///
/// `order_number` is generated once at creation and never changes.
/// `version` is bumped by every status change and guards concurrent writers.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Order {
    pub id: String,
    pub shop_id: String,
    pub order_number: String,
    pub user_id: Option<String>,
    pub status: OrderStatus,
    pub order_type: OrderType,

    pub subtotal: Money,
    pub delivery_fee: Money,
    pub discount_amount: Money,
    pub total_amount: Money,

    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_notes: Option<String>,
    pub delivery_address: Option<String>,
    #[ts(as = "Option<String>")]
    pub delivery_time: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub pickup_time: Option<DateTime<Utc>>,
    pub table_number: Option<String>,

    pub payment_method: Option<PaymentMethodCode>,
    pub payment_status: bool,
    pub user_coupon_id: Option<String>,
    pub version: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub paid_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn totals(&self) -> OrderTotals {
        OrderTotals {
            subtotal: self.subtotal,
            delivery_fee: self.delivery_fee,
            discount_amount: self.discount_amount,
            total_amount: self.total_amount,
        }
    }
}

// =============================================================================
// Order Item (snapshot)
// =============================================================================

/// Product data frozen at order time.
///
/// Name, image, specifications and price are copied from the catalog once
/// and never refreshed. Only `quantity` / `total_price` change, and only when
/// a split moves part of the line to another order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub sku_id: Option<String>,
    pub category_id: Option<String>,
    pub product_name: String,
    pub product_image: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub specifications: BTreeMap<String, String>,
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub attributes: BTreeMap<String, String>,
    pub customization: Option<String>,
    pub unit_price: Money,
    pub quantity: i64,
    pub total_price: Money,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    /// Line total for a quantity at this item's snapshot price.
    pub fn line_total(&self, quantity: i64) -> Money {
        self.unit_price.multiply_quantity(quantity)
    }
}

// =============================================================================
// Status Log
// =============================================================================

/// Audit row for one status transition (or a split/merge annotation).
/// Insert-only.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderStatusLog {
    pub id: String,
    pub shop_id: String,
    pub order_id: String,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub notes: Option<String>,
    pub actor: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Totals
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub delivery_fee: Money,
    pub discount_amount: Money,
    pub total_amount: Money,
}

impl OrderTotals {
    /// Computes totals from line totals. The discount is clamped to
    /// `[0, subtotal]`.
    ///
    /// ```rust
    /// use zdrink_core::money::Money;
    /// use zdrink_core::order::OrderTotals;
    ///
    /// let t = OrderTotals::compute(
    ///     [Money::from_cents(1500), Money::from_cents(1000)],
    ///     Money::zero(),
    ///     Money::zero(),
    /// );
    /// assert_eq!(t.subtotal.cents(), 2500);
    /// assert_eq!(t.total_amount.cents(), 2500);
    /// ```
    pub fn compute(
        line_totals: impl IntoIterator<Item = Money>,
        delivery_fee: Money,
        discount: Money,
    ) -> Self {
        let subtotal: Money = line_totals.into_iter().sum();
        let discount_amount = discount.clamp_to(subtotal);
        OrderTotals {
            subtotal,
            delivery_fee,
            discount_amount,
            total_amount: subtotal + delivery_fee - discount_amount,
        }
    }

    pub fn holds_invariant(&self) -> bool {
        self.total_amount == self.subtotal + self.delivery_fee - self.discount_amount
    }
}

// =============================================================================
// Requests
// =============================================================================

/// One explicitly listed order line.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderLineRequest {
    pub product_id: String,
    pub sku_id: Option<String>,
    pub quantity: i64,
    #[serde(default)]
    pub option_ids: Vec<String>,
    pub customization: Option<String>,
}

/// Where the order lines come from.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export)]
pub enum OrderSource {
    /// The user's cart. Cleared when the order commits.
    Cart { user_id: String },
    /// Lines supplied directly (POS counter, phone order).
    Items { lines: Vec<OrderLineRequest> },
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreateOrderRequest {
    pub source: OrderSource,
    pub order_type: OrderType,
    pub user_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_notes: Option<String>,
    pub delivery_address: Option<String>,
    #[ts(as = "Option<String>")]
    pub delivery_time: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub pickup_time: Option<DateTime<Utc>>,
    pub table_number: Option<String>,
    pub user_coupon_id: Option<String>,
}

impl CreateOrderRequest {
    /// A dine-in order with no customer details.
    pub fn new(source: OrderSource, order_type: OrderType) -> Self {
        CreateOrderRequest {
            source,
            order_type,
            user_id: None,
            customer_name: None,
            customer_phone: None,
            customer_notes: None,
            delivery_address: None,
            delivery_time: None,
            pickup_time: None,
            table_number: None,
            user_coupon_id: None,
        }
    }

    /// Owner of the order: the explicit user, or the cart's owner.
    pub fn owner(&self) -> Option<&str> {
        self.user_id.as_deref().or(match &self.source {
            OrderSource::Cart { user_id } => Some(user_id.as_str()),
            OrderSource::Items { .. } => None,
        })
    }

    /// Input checks that need no storage access.
    ///
    /// ## Rules
    /// - delivery requires a non-blank `delivery_address`
    /// - takeaway requires `pickup_time`
    /// - explicit item lists are non-empty with valid quantities
    /// - a coupon needs a user to belong to
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.order_type {
            OrderType::Delivery => {
                let blank = self
                    .delivery_address
                    .as_deref()
                    .map(|a| a.trim().is_empty())
                    .unwrap_or(true);
                if blank {
                    return Err(ValidationError::required("delivery_address"));
                }
            }
            OrderType::Takeaway => {
                if self.pickup_time.is_none() {
                    return Err(ValidationError::required("pickup_time"));
                }
            }
            OrderType::DineIn => {}
        }

        if let OrderSource::Items { lines } = &self.source {
            if lines.is_empty() {
                return Err(ValidationError::required("items"));
            }
            validate_cart_size(lines.len() - 1)?;
            for line in lines {
                validate_id("product_id", &line.product_id)?;
                validate_quantity(line.quantity)?;
                if let Some(text) = &line.customization {
                    validate_text("customization", text, 500)?;
                }
            }
        }

        if let Some(notes) = &self.customer_notes {
            validate_text("customer_notes", notes, 500)?;
        }

        if self.user_coupon_id.is_some() && self.owner().is_none() {
            return Err(ValidationError::inconsistent(
                "user_coupon_id",
                "a coupon can only be used by a known user",
            ));
        }

        Ok(())
    }
}

/// Cashier discount applied to a pending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
#[ts(export)]
pub enum ManualDiscount {
    Fixed(Money),
    Percentage(Rate),
}

impl ManualDiscount {
    /// Discount amount for a subtotal, clamped to the subtotal.
    pub fn amount(&self, subtotal: Money) -> Money {
        match self {
            ManualDiscount::Fixed(value) => value.clamp_to(subtotal),
            ManualDiscount::Percentage(rate) => subtotal.percentage(*rate).clamp_to(subtotal),
        }
    }
}

// =============================================================================
// Split / Merge Reports
// =============================================================================

/// Quantity of one source item to move in a split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SplitLine {
    pub item_id: String,
    pub quantity: i64,
}

impl SplitLine {
    pub fn new(item_id: impl Into<String>, quantity: i64) -> Self {
        SplitLine {
            item_id: item_id.into(),
            quantity,
        }
    }
}

/// An id the operation passed over, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Skipped {
    pub id: String,
    pub reason: String,
}

impl Skipped {
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Skipped {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MovedItem {
    /// Item on the source order.
    pub source_item_id: String,
    /// Item now holding the moved quantity on the new order.
    pub new_item_id: String,
    pub quantity: i64,
    /// True when the whole line moved and the source line was deleted.
    pub full_move: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SplitReport {
    pub source_order: Order,
    pub new_order: Order,
    pub moved: Vec<MovedItem>,
    pub skipped: Vec<Skipped>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MergeReport {
    pub order: Order,
    pub merged_order_ids: Vec<String>,
    pub skipped: Vec<Skipped>,
}

/// Per-day dashboard figures for one shop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DailySummary {
    #[ts(as = "String")]
    pub date: NaiveDate,
    pub order_count: i64,
    /// Σ total_amount of orders that were not cancelled.
    pub revenue: Money,
    pub pending_count: i64,
    pub preparing_count: i64,
}

/// Open orders seated at one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TableStatus {
    pub table_number: String,
    /// In the order they were given, oldest first when read from storage.
    pub order_numbers: Vec<String>,
    /// Σ total_amount of those orders.
    pub open_amount: Money,
    /// Creation time of the oldest open order.
    #[ts(as = "String")]
    pub seated_at: DateTime<Utc>,
}

impl TableStatus {
    /// Groups orders by table, sorted by table number. Terminal orders and
    /// orders without a table are left out.
    pub fn group(orders: &[Order]) -> Vec<TableStatus> {
        let mut tables: BTreeMap<&str, TableStatus> = BTreeMap::new();
        for order in orders.iter().filter(|o| !o.status.is_terminal()) {
            let Some(table) = order.table_number.as_deref().filter(|t| !t.trim().is_empty()) else {
                continue;
            };
            let entry = tables.entry(table).or_insert_with(|| TableStatus {
                table_number: table.to_string(),
                order_numbers: Vec::new(),
                open_amount: Money::zero(),
                seated_at: order.created_at,
            });
            entry.order_numbers.push(order.order_number.clone());
            entry.open_amount = entry.open_amount + order.total_amount;
            entry.seated_at = entry.seated_at.min(order.created_at);
        }
        tables.into_values().collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    const ALL: [OrderStatus; 8] = [
        Pending, Paid, Confirmed, Preparing, Ready, Completed, Cancelled, Refunded,
    ];

    #[test]
    fn test_forward_transitions_only() {
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(Preparing));
        assert!(Ready.can_transition_to(Completed));

        assert!(!Paid.can_transition_to(Pending));
        assert!(!Ready.can_transition_to(Preparing));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_cancel_and_refund_edges() {
        for from in ALL {
            assert_eq!(
                from.can_transition_to(Cancelled),
                matches!(from, Pending | Paid | Confirmed),
                "{from} -> cancelled"
            );
            assert_eq!(
                from.can_transition_to(Refunded),
                matches!(from, Paid | Confirmed | Preparing | Ready),
                "{from} -> refunded"
            );
        }
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        for from in [Completed, Cancelled, Refunded] {
            assert!(from.is_terminal());
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_totals_scenario() {
        // 3 × ¥5 + 1 × ¥10, dine in
        let t = OrderTotals::compute(
            [Money::from_cents(500) * 3, Money::from_cents(1000)],
            Money::zero(),
            Money::zero(),
        );
        assert_eq!(t.subtotal.cents(), 2500);
        assert_eq!(t.total_amount.cents(), 2500);
        assert!(t.holds_invariant());
    }

    #[test]
    fn test_totals_clamp_discount() {
        let t = OrderTotals::compute(
            [Money::from_cents(800)],
            Money::from_cents(500),
            Money::from_cents(5000),
        );
        assert_eq!(t.discount_amount.cents(), 800);
        assert_eq!(t.total_amount.cents(), 500);
        assert!(t.holds_invariant());
    }

    #[test]
    fn test_manual_discount() {
        let subtotal = Money::from_cents(2000);
        assert_eq!(
            ManualDiscount::Fixed(Money::from_cents(300)).amount(subtotal).cents(),
            300
        );
        assert_eq!(
            ManualDiscount::Fixed(Money::from_cents(9000)).amount(subtotal).cents(),
            2000
        );
        assert_eq!(
            ManualDiscount::Percentage(Rate::from_percent(15))
                .amount(subtotal)
                .cents(),
            300
        );
    }

    fn line() -> OrderLineRequest {
        OrderLineRequest {
            product_id: "550e8400-e29b-41d4-a716-446655440000".into(),
            sku_id: None,
            quantity: 1,
            option_ids: vec![],
            customization: None,
        }
    }

    #[test]
    fn test_request_type_specific_validation() {
        let items = OrderSource::Items { lines: vec![line()] };

        let mut delivery = CreateOrderRequest::new(items.clone(), OrderType::Delivery);
        assert!(delivery.validate().is_err());
        delivery.delivery_address = Some("   ".into());
        assert!(delivery.validate().is_err());
        delivery.delivery_address = Some("1 Main St".into());
        assert!(delivery.validate().is_ok());

        let mut takeaway = CreateOrderRequest::new(items.clone(), OrderType::Takeaway);
        assert!(takeaway.validate().is_err());
        takeaway.pickup_time = Some(Utc::now());
        assert!(takeaway.validate().is_ok());

        let empty = CreateOrderRequest::new(OrderSource::Items { lines: vec![] }, OrderType::DineIn);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_coupon_requires_owner() {
        let mut req =
            CreateOrderRequest::new(OrderSource::Items { lines: vec![line()] }, OrderType::DineIn);
        req.user_coupon_id = Some("uc".into());
        assert!(req.validate().is_err());

        let mut from_cart = CreateOrderRequest::new(
            OrderSource::Cart {
                user_id: "u1".into(),
            },
            OrderType::DineIn,
        );
        from_cart.user_coupon_id = Some("uc".into());
        assert!(from_cart.validate().is_ok());
        assert_eq!(from_cart.owner(), Some("u1"));
    }
}
