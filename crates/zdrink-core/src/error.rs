//! # Domain Errors
//!
//! [`CoreError`] names every business rule an engine can refuse on;
//! [`ValidationError`] covers malformed input and converts into it. Both
//! collapse onto [`ErrorKind`], the taxonomy callers branch on. The storage
//! crate wraps `CoreError` unchanged, so a rule failure reads the same
//! whether it came from pure code or from inside a transaction.
//!
//! Messages carry the identifiers a cashier needs to act on them: order
//! number, SKU code, amounts in cents.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Kind
// =============================================================================

/// Coarse error taxonomy surfaced to callers alongside the message.
///
/// ```text
/// Validation            caller's fault, no side effect
/// NotFound              entity absent in this shop
/// InvalidState          operation illegal for the current status
/// InsufficientResource  stock, points, balance or refundable amount
/// ExternalServiceFailure payment provider failed or timed out
/// ConcurrencyConflict   lost update detected, retry
/// Internal              storage or programming failure
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidState,
    InsufficientResource,
    ExternalServiceFailure,
    ConcurrencyConflict,
    Internal,
}

/// A business rule refused the operation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Shop not found: {0}")]
    ShopNotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("SKU not found: {0}")]
    SkuNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Order item does not belong to the referenced order.
    #[error("Order item {item_id} not found in order {order_id}")]
    ItemNotFound { order_id: String, item_id: String },

    #[error("Cart not found for user {0}")]
    CartNotFound(String),

    #[error("Payment transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Refund request not found: {0}")]
    RefundRequestNotFound(String),

    #[error("Coupon not found: {0}")]
    CouponNotFound(String),

    #[error("User coupon not found: {0}")]
    UserCouponNotFound(String),

    #[error("Member not found: {0}")]
    MemberNotFound(String),

    /// The conditional stock decrement found fewer units than requested.
    /// Raised inside `create_order`, which then rolls back every line.
    #[error("Insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: String,
        available: i64,
        requested: i64,
    },

    #[error("Insufficient points: available {available}, requested {requested}")]
    InsufficientPoints { available: i64, requested: i64 },

    #[error("Insufficient balance: available {available} cents, requested {requested} cents")]
    InsufficientBalance { available: i64, requested: i64 },

    /// Refund larger than what is left on the transaction.
    #[error("Refund of {requested} cents exceeds refundable balance of {refundable} cents")]
    RefundExceedsBalance { requested: i64, refundable: i64 },

    /// Status transition not in the transition graph.
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: String,
        from: String,
        to: String,
    },

    /// Order is not in a status that allows the requested operation.
    #[error("Order {order_id} is {status}: {reason}")]
    InvalidOrderState {
        order_id: String,
        status: String,
        reason: String,
    },

    #[error("Payment transaction {transaction_no} is {status}: {reason}")]
    InvalidTransactionState {
        transaction_no: String,
        status: String,
        reason: String,
    },

    #[error("Refund request {refund_no} is {status}, cannot {action}")]
    InvalidRefundState {
        refund_no: String,
        status: String,
        action: String,
    },

    /// Inactive, sold out, or outside its validity window.
    #[error("Coupon {code} is not available")]
    CouponUnavailable { code: String },

    #[error("Coupon {code} claim limit of {limit} per user reached")]
    ClaimLimitExceeded { code: String, limit: i64 },

    #[error("User coupon {0} is not available for use")]
    UserCouponUnavailable(String),

    #[error("Payment method {0} is not enabled for this shop")]
    PaymentMethodUnavailable(String),

    /// Provider returned an error. The transaction is marked failed.
    #[error("Payment provider {provider} failed: {message}")]
    ProviderFailure { provider: String, message: String },

    #[error("Payment provider {provider} did not answer within {timeout_ms} ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    /// A guarded update lost its race. Caller should retry.
    #[error("Concurrent update on {entity} {id}, retry")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Maps the error onto the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ShopNotFound(_)
            | CoreError::ProductNotFound(_)
            | CoreError::SkuNotFound(_)
            | CoreError::OrderNotFound(_)
            | CoreError::ItemNotFound { .. }
            | CoreError::CartNotFound(_)
            | CoreError::TransactionNotFound(_)
            | CoreError::RefundRequestNotFound(_)
            | CoreError::CouponNotFound(_)
            | CoreError::UserCouponNotFound(_)
            | CoreError::MemberNotFound(_) => ErrorKind::NotFound,

            CoreError::InsufficientStock { .. }
            | CoreError::InsufficientPoints { .. }
            | CoreError::InsufficientBalance { .. }
            | CoreError::RefundExceedsBalance { .. } => ErrorKind::InsufficientResource,

            CoreError::InvalidTransition { .. }
            | CoreError::InvalidOrderState { .. }
            | CoreError::InvalidTransactionState { .. }
            | CoreError::InvalidRefundState { .. }
            | CoreError::CouponUnavailable { .. }
            | CoreError::ClaimLimitExceeded { .. }
            | CoreError::UserCouponUnavailable(_)
            | CoreError::PaymentMethodUnavailable(_) => ErrorKind::InvalidState,

            CoreError::ProviderFailure { .. } | CoreError::ProviderTimeout { .. } => {
                ErrorKind::ExternalServiceFailure
            }

            CoreError::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,

            CoreError::Validation(_) => ErrorKind::Validation,
        }
    }

    pub fn conflict(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::ConcurrencyConflict {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn invalid_order_state(
        order_id: impl Into<String>,
        status: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        CoreError::InvalidOrderState {
            order_id: order_id.into(),
            status: status.to_string(),
            reason: reason.into(),
        }
    }
}

/// Malformed or missing input, caught before anything is written.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, unknown code).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// The value is not one of a closed set (e.g. payment methods a
    /// recharge accepts).
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Two fields contradict each other.
    #[error("{field}: {reason}")]
    Inconsistent { field: String, reason: String },
}

impl ValidationError {
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    pub fn inconsistent(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::Inconsistent {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            sku: "LATTE-L".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for LATTE-L: available 3, requested 5"
        );

        let err = CoreError::RefundExceedsBalance {
            requested: 6000,
            refundable: 5000,
        };
        assert_eq!(
            err.to_string(),
            "Refund of 6000 cents exceeds refundable balance of 5000 cents"
        );
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            CoreError::OrderNotFound("x".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CoreError::InsufficientPoints {
                available: 1,
                requested: 2
            }
            .kind(),
            ErrorKind::InsufficientResource
        );
        assert_eq!(
            CoreError::ClaimLimitExceeded {
                code: "SAVE10".into(),
                limit: 1
            }
            .kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            CoreError::ProviderTimeout {
                provider: "wechat".into(),
                timeout_ms: 10
            }
            .kind(),
            ErrorKind::ExternalServiceFailure
        );
        assert_eq!(
            CoreError::conflict("Order", "1").kind(),
            ErrorKind::ConcurrencyConflict
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::required("delivery_address").into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert_eq!(core_err.kind(), ErrorKind::Validation);
        assert_eq!(
            core_err.to_string(),
            "Validation error: delivery_address is required"
        );
    }
}
