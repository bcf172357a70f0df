//! Paying with member points.
//!
//! ```text
//! points charged  = ceil(amount_cents × points_per_unit / 100)
//! points refunded = floor(refund_cents × points_per_unit / 100)
//! ```
//! Rounding always favours the shop, so a refund never returns more points
//! than the payment took.

use async_trait::async_trait;
use serde_json::json;
use zdrink_core::{Money, PaymentMethodCode, PaymentTransaction};

use super::provider::{
    CallbackRequest, LedgerCharge, PaymentProvider, ProviderError, ProviderOrder, ProviderPayload,
    RefundPayload, VerifiedCallback,
};

#[derive(Debug, Clone, Copy)]
pub struct PointsProvider {
    /// Points worth one currency unit (100 cents).
    points_per_unit: i64,
}

impl PointsProvider {
    pub const DEFAULT_POINTS_PER_UNIT: i64 = 100;

    pub fn new(points_per_unit: i64) -> Self {
        PointsProvider {
            points_per_unit: points_per_unit.max(1),
        }
    }

    pub fn points_per_unit(&self) -> i64 {
        self.points_per_unit
    }

    /// Points needed to cover `amount`.
    pub fn points_for(&self, amount: Money) -> i64 {
        let scaled = amount.cents() as i128 * self.points_per_unit as i128;
        ((scaled + 99) / 100) as i64
    }

    /// Points returned for refunding `amount`.
    pub fn points_returned(&self, amount: Money) -> i64 {
        (amount.cents() as i128 * self.points_per_unit as i128 / 100) as i64
    }
}

impl Default for PointsProvider {
    fn default() -> Self {
        PointsProvider::new(Self::DEFAULT_POINTS_PER_UNIT)
    }
}

#[async_trait]
impl PaymentProvider for PointsProvider {
    fn code(&self) -> PaymentMethodCode {
        PaymentMethodCode::Points
    }

    async fn create_payment(&self, order: &ProviderOrder) -> Result<ProviderPayload, ProviderError> {
        let Some(user_id) = order.user_id.as_deref() else {
            return Err(ProviderError::Rejected("points payment requires a member".into()));
        };
        let points = self.points_for(order.amount);

        Ok(ProviderPayload::settled(
            json!({
                "method": "points",
                "user_id": user_id,
                "points": points,
                "points_per_unit": self.points_per_unit,
            }),
            None,
            Some(LedgerCharge::Points(points)),
        ))
    }

    async fn verify_callback(&self, _request: &CallbackRequest) -> Result<VerifiedCallback, ProviderError> {
        Err(ProviderError::Unsupported("points payments settle synchronously".into()))
    }

    async fn refund(
        &self,
        transaction: &PaymentTransaction,
        amount: Money,
        reason: &str,
    ) -> Result<RefundPayload, ProviderError> {
        let points = self.points_returned(amount);
        let payload = RefundPayload::new(json!({
            "method": "points",
            "transaction_no": transaction.transaction_no,
            "points": points,
            "reason": reason,
        }));
        if points > 0 {
            Ok(payload.with_credit(LedgerCharge::Points(points)))
        } else {
            Ok(payload)
        }
    }
}
