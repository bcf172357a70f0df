//! Member stored value. Settles during `create_payment`; the debit itself is
//! a [`LedgerCharge`] the engine applies in the settlement transaction, so an
//! insufficient balance rolls the whole settlement back.

use async_trait::async_trait;
use serde_json::json;
use zdrink_core::{Money, PaymentMethodCode, PaymentTransaction};

use super::provider::{
    CallbackRequest, LedgerCharge, PaymentProvider, ProviderError, ProviderOrder, ProviderPayload,
    RefundPayload, VerifiedCallback,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceProvider;

#[async_trait]
impl PaymentProvider for BalanceProvider {
    fn code(&self) -> PaymentMethodCode {
        PaymentMethodCode::Balance
    }

    async fn create_payment(&self, order: &ProviderOrder) -> Result<ProviderPayload, ProviderError> {
        let Some(user_id) = order.user_id.as_deref() else {
            return Err(ProviderError::Rejected(
                "stored value payment requires a member".into(),
            ));
        };

        Ok(ProviderPayload::settled(
            json!({
                "method": "balance",
                "user_id": user_id,
                "debited": order.amount.cents(),
            }),
            None,
            Some(LedgerCharge::Balance(order.amount)),
        ))
    }

    async fn verify_callback(&self, _request: &CallbackRequest) -> Result<VerifiedCallback, ProviderError> {
        Err(ProviderError::Unsupported(
            "stored value payments settle synchronously".into(),
        ))
    }

    async fn refund(
        &self,
        transaction: &PaymentTransaction,
        amount: Money,
        reason: &str,
    ) -> Result<RefundPayload, ProviderError> {
        Ok(RefundPayload::new(json!({
            "method": "balance",
            "transaction_no": transaction.transaction_no,
            "credited": amount.cents(),
            "reason": reason,
        }))
        .with_credit(LedgerCharge::Balance(amount)))
    }
}
