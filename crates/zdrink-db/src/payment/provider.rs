//! # Payment Provider Capability
//!
//! The seam between the reconciliation engine and whatever actually moves
//! the money.
//!
//! ## Dispatch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  PaymentService ──► ProviderRegistry.get(PaymentMethodCode)             │
//! │                              │                                          │
//! │          ┌──────────┬────────┼─────────┬──────────────┐                 │
//! │          ▼          ▼        ▼         ▼              ▼                 │
//! │        wechat     alipay    cash     balance        points              │
//! │     (Gateway)   (Gateway)                                               │
//! │                                                                         │
//! │  Every provider answers three calls:                                    │
//! │    create_payment(order)      → ProviderPayload (pending or settled)   │
//! │    verify_callback(request)   → VerifiedCallback                        │
//! │    refund(txn, amount, why)   → RefundPayload                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Providers never touch the database. When a provider settles against the
//! member ledger (stored value, points) it says so through [`LedgerCharge`]
//! and the engine applies the charge inside the settlement transaction.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use zdrink_core::{Money, Order, PaymentMethodCode, PaymentTransaction};

use super::balance::BalanceProvider;
use super::cash::CashProvider;
use super::points::PointsProvider;

// =============================================================================
// Errors
// =============================================================================

/// What a provider may report. The engine turns every variant into
/// `CoreError::ProviderFailure` for the caller.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider refused the operation (insufficient funds at the
    /// gateway, missing member, closed account).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Callback failed signature or shape checks.
    #[error("invalid callback: {0}")]
    InvalidCallback(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

// =============================================================================
// Requests and Payloads
// =============================================================================

/// What a provider is told about the order it should collect.
#[derive(Debug, Clone)]
pub struct ProviderOrder {
    pub shop_id: String,
    pub order_id: String,
    /// Sent to the provider as out_trade_no, echoed back in callbacks.
    pub order_number: String,
    pub transaction_no: String,
    pub user_id: Option<String>,
    pub amount: Money,
    pub description: String,
}

impl ProviderOrder {
    pub fn new(order: &Order, transaction: &PaymentTransaction) -> Self {
        ProviderOrder {
            shop_id: order.shop_id.clone(),
            order_id: order.id.clone(),
            order_number: order.order_number.clone(),
            transaction_no: transaction.transaction_no.clone(),
            user_id: order.user_id.clone(),
            amount: transaction.amount,
            description: format!("Order {}", order.order_number),
        }
    }
}

/// A movement on the member ledger that accompanies a settlement or refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerCharge {
    /// Stored value, in cents.
    Balance(Money),
    Points(i64),
}

/// The provider collected the money during `create_payment`.
#[derive(Debug, Clone, Default)]
pub struct Settlement {
    pub thirdparty_trade_no: Option<String>,
    pub charge: Option<LedgerCharge>,
}

/// Result of `create_payment`.
#[derive(Debug, Clone)]
pub struct ProviderPayload {
    /// Stored verbatim as the transaction's payment_data.
    pub data: Value,
    /// `Some` when no callback will follow.
    pub settlement: Option<Settlement>,
}

impl ProviderPayload {
    /// Money will arrive later through a callback.
    pub fn pending(data: Value) -> Self {
        ProviderPayload {
            data,
            settlement: None,
        }
    }

    /// Money already moved.
    pub fn settled(data: Value, thirdparty_trade_no: Option<String>, charge: Option<LedgerCharge>) -> Self {
        ProviderPayload {
            data,
            settlement: Some(Settlement {
                thirdparty_trade_no,
                charge,
            }),
        }
    }
}

/// A raw, unverified provider callback.
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

impl CallbackRequest {
    pub fn new(body: impl Into<String>) -> Self {
        CallbackRequest {
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A callback the provider vouched for.
#[derive(Debug, Clone)]
pub struct VerifiedCallback {
    pub out_trade_no: String,
    pub thirdparty_trade_no: Option<String>,
    pub amount: Money,
    /// Persisted as payment_data once the transaction settles.
    pub raw: Value,
}

/// Result of a provider refund.
#[derive(Debug, Clone)]
pub struct RefundPayload {
    pub data: Value,
    /// Ledger credit the engine applies with the refund.
    pub credit: Option<LedgerCharge>,
}

impl RefundPayload {
    pub fn new(data: Value) -> Self {
        RefundPayload { data, credit: None }
    }

    pub fn with_credit(mut self, credit: LedgerCharge) -> Self {
        self.credit = Some(credit);
        self
    }
}

// =============================================================================
// Capability
// =============================================================================

/// One way of collecting money.
///
/// ## Example
/// ```rust,ignore
/// struct Voucher;
///
/// #[async_trait]
/// impl PaymentProvider for Voucher {
///     fn code(&self) -> PaymentMethodCode { ... }
///     async fn create_payment(&self, order: &ProviderOrder) -> Result<ProviderPayload, ProviderError> { ... }
///     ...
/// }
///
/// let registry = ProviderRegistry::builtin().with(Arc::new(Voucher));
/// ```
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn code(&self) -> PaymentMethodCode;

    async fn create_payment(&self, order: &ProviderOrder) -> Result<ProviderPayload, ProviderError>;

    async fn verify_callback(&self, request: &CallbackRequest) -> Result<VerifiedCallback, ProviderError>;

    async fn refund(
        &self,
        transaction: &PaymentTransaction,
        amount: Money,
        reason: &str,
    ) -> Result<RefundPayload, ProviderError>;
}

// =============================================================================
// Registry
// =============================================================================

/// Providers keyed by method code. Registering a code twice replaces the
/// earlier provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<PaymentMethodCode, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cash, stored value and points. Gateways need credentials and are
    /// registered by the caller.
    pub fn builtin() -> Self {
        ProviderRegistry::new()
            .with(Arc::new(CashProvider))
            .with(Arc::new(BalanceProvider))
            .with(Arc::new(PointsProvider::default()))
    }

    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(provider.code(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, code: PaymentMethodCode) -> Option<Arc<dyn PaymentProvider>> {
        self.providers.get(&code).cloned()
    }

    /// Registered codes in declaration order.
    pub fn codes(&self) -> Vec<PaymentMethodCode> {
        let mut codes: Vec<_> = self.providers.keys().copied().collect();
        codes.sort();
        codes
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.codes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = ProviderRegistry::builtin();
        assert_eq!(
            registry.codes(),
            vec![
                PaymentMethodCode::Cash,
                PaymentMethodCode::Balance,
                PaymentMethodCode::Points
            ]
        );
        assert!(registry.get(PaymentMethodCode::Wechat).is_none());
        assert_eq!(
            registry.get(PaymentMethodCode::Cash).map(|p| p.code()),
            Some(PaymentMethodCode::Cash)
        );
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(PointsProvider::new(50)));
        registry.register(Arc::new(PointsProvider::new(200)));
        assert_eq!(registry.codes().len(), 1);
    }

    #[test]
    fn test_callback_request_headers() {
        let request = CallbackRequest::new("{}").header("signature", "abc");
        assert_eq!(request.headers.get("signature").map(String::as_str), Some("abc"));
    }
}
