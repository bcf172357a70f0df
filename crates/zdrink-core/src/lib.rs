//! # zdrink-core: Pure Business Logic for ZDrink
//!
//! Domain types and rules for a multi-tenant restaurant ordering backend,
//! with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ZDrink Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          HTTP / admin frontend (outside this workspace)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ shop_id + actor on every call          │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │     zdrink-db: engines, repositories, payment providers         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ zdrink-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐  │   │
//! │  │   │  order  │ │ payment │ │ coupon  │ │ member- │ │  money  │  │   │
//! │  │   │ status  │ │  txn /  │ │ discount│ │  ship   │ │  Rate   │  │   │
//! │  │   │ totals  │ │ refund  │ │  scope  │ │  tiers  │ │         │  │   │
//! │  │   └─────────┘ └─────────┘ └─────────┘ └─────────┘ └─────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Money (integer cents) and Rate (basis points)
//! - [`catalog`] - Shop, Product, ProductSku, attribute options
//! - [`inventory`] - Inventory ledger rows and actions
//! - [`cart`] - Cart lines and merge rules
//! - [`order`] - Order, status state machine, totals, split/merge reports
//! - [`payment`] - Transactions, refund requests, reference numbers
//! - [`coupon`] - Coupons, user claims, discount calculation
//! - [`membership`] - Members, tiers, points ledger, recharge gifts
//! - [`error`] - Error taxonomy
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use zdrink_core::money::Money;
//! use zdrink_core::order::{OrderStatus, OrderTotals};
//!
//! let totals = OrderTotals::compute(
//!     [Money::from_cents(1500), Money::from_cents(1000)],
//!     Money::from_cents(500),
//!     Money::from_cents(300),
//! );
//! assert_eq!(totals.total_amount.cents(), 2700);
//! assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Cancelled));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod catalog;
pub mod coupon;
pub mod error;
pub mod inventory;
pub mod membership;
pub mod money;
pub mod order;
pub mod payment;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use money::{Money, Rate};
pub use order::{Order, OrderItem, OrderStatus, OrderStatusLog, OrderType};
pub use payment::{PaymentMethodCode, PaymentTransaction, RefundRequest, TransactionStatus};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum distinct lines in a cart or an explicit order.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity of a single line.
///
/// Catches typos like 1000 instead of 10.
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Default prefix for order numbers.
pub const ORDER_NUMBER_PREFIX: &str = "ORD";

/// Prefix for orders created by a split.
pub const SPLIT_ORDER_PREFIX: &str = "SPL";
