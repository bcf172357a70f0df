//! # Payment Types
//!
//! Payment methods, transactions, refund requests and reference numbers.
//!
//! ## Transaction Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   create_payment ──► pending ──┬──► paid ──(refund_amount == amount)──► │
//! │                                │     │                       refunded   │
//! │                                │     └── partial refund: stays paid     │
//! │                                ├──► failed     (provider error/timeout) │
//! │                                └──► cancelled  (superseded by a newer   │
//! │                                                 payment attempt)        │
//! │                                                                         │
//! │   Invariant: 0 <= refund_amount <= amount, refund_amount only grows    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Refund Request Lifecycle
//! ```text
//! pending ──► approved ──► completed
//!    │            │
//!    │            └── provider failure: stays approved, approve again to retry
//!    └──► rejected
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Payment Method
// =============================================================================

/// Stable provider key. Adding a provider adds a variant here and an
/// implementation in the storage crate's provider registry, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum PaymentMethodCode {
    Wechat,
    Alipay,
    Cash,
    Balance,
    Points,
}

impl PaymentMethodCode {
    pub const ALL: [PaymentMethodCode; 5] = [
        PaymentMethodCode::Wechat,
        PaymentMethodCode::Alipay,
        PaymentMethodCode::Cash,
        PaymentMethodCode::Balance,
        PaymentMethodCode::Points,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodCode::Wechat => "wechat",
            PaymentMethodCode::Alipay => "alipay",
            PaymentMethodCode::Cash => "cash",
            PaymentMethodCode::Balance => "balance",
            PaymentMethodCode::Points => "points",
        }
    }
}

impl fmt::Display for PaymentMethodCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethodCode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentMethodCode::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "payment_method".to_string(),
                allowed: PaymentMethodCode::ALL
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect(),
            })
    }
}

/// A method a shop has enabled.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PaymentMethod {
    pub id: String,
    pub shop_id: String,
    pub code: PaymentMethodCode,
    pub name: String,
    pub is_active: bool,
    pub sort_order: i64,
}

// =============================================================================
// Payment Transaction
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum TransactionStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Paid => "paid",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    /// States a verified provider callback may still settle.
    ///
    /// A late callback for a failed or superseded attempt still means the
    /// customer's money moved, so it is recorded rather than dropped.
    pub fn accepts_settlement(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Pending | TransactionStatus::Failed | TransactionStatus::Cancelled
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt to collect an order's total through one provider.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PaymentTransaction {
    pub id: String,
    pub shop_id: String,
    pub order_id: String,
    pub transaction_no: String,
    /// The order number, echoed back by providers in callbacks.
    pub out_trade_no: String,
    pub payment_method: PaymentMethodCode,
    pub amount: Money,
    pub status: TransactionStatus,
    pub refund_amount: Money,
    /// Held by refunds whose provider call has not confirmed yet.
    pub refund_reserved: Money,
    pub thirdparty_trade_no: Option<String>,
    /// Provider payload from creation, replaced by the raw callback body.
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    #[ts(type = "unknown")]
    pub payment_data: serde_json::Value,
    /// Payload of the latest provider refund.
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    #[ts(type = "unknown")]
    pub refund_data: serde_json::Value,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub paid_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub refunded_at: Option<DateTime<Utc>>,
}

impl PaymentTransaction {
    /// What can still be refunded: neither refunded nor held by a refund
    /// in flight.
    pub fn refundable(&self) -> Money {
        self.amount - self.refund_amount - self.refund_reserved
    }

    pub fn is_fully_refunded(&self) -> bool {
        self.refund_amount == self.amount
    }
}

// =============================================================================
// Refund Request
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum RefundStatus {
    Pending,
    Approved,
    /// The provider call is in flight and the amount is reserved.
    Processing,
    Rejected,
    Completed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Approved => "approved",
            RefundStatus::Processing => "processing",
            RefundStatus::Rejected => "rejected",
            RefundStatus::Completed => "completed",
        }
    }

    /// Approving a pending request, or re-running an approved one whose
    /// provider call failed.
    pub fn can_approve(&self) -> bool {
        matches!(self, RefundStatus::Pending | RefundStatus::Approved)
    }

    pub fn can_reject(&self) -> bool {
        matches!(self, RefundStatus::Pending)
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct RefundRequest {
    pub id: String,
    pub shop_id: String,
    pub refund_no: String,
    pub transaction_id: String,
    pub order_id: String,
    pub amount: Money,
    pub reason: String,
    pub status: RefundStatus,
    pub requested_by: Option<String>,
    pub handled_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub handled_at: Option<DateTime<Utc>>,
    pub reject_reason: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    #[ts(type = "unknown")]
    pub refund_data: serde_json::Value,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Callback Outcome
// =============================================================================

/// What a verified provider callback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum CallbackOutcome {
    /// Transaction and order both moved to paid.
    Paid,
    /// Replay of a callback that was already applied. Nothing written.
    AlreadyPaid,
    /// Money arrived for an order that is no longer pending (cancelled in
    /// the meantime). The transaction is recorded paid, the order is left
    /// alone and needs a refund.
    PaidOnInactiveOrder,
}

// =============================================================================
// Reference Numbers
// =============================================================================

/// Prefix for transaction numbers.
pub const TRANSACTION_PREFIX: &str = "T";

/// Prefix for refund numbers.
pub const REFUND_PREFIX: &str = "R";

/// Generates a human-facing reference: prefix, unix seconds, 8 uppercase hex
/// characters from a v4 uuid.
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use zdrink_core::payment::generate_number;
///
/// let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
/// let no = generate_number("ORD", now);
/// assert!(no.starts_with("ORD1700000000"));
/// assert_eq!(no.len(), "ORD1700000000".len() + 8);
/// ```
pub fn generate_number(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{}{}{}", prefix, now.timestamp(), &suffix[..8])
}
