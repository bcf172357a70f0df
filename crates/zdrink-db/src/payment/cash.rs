//! Cash at the counter. The attempt stays pending until staff confirm the
//! money through a callback.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use zdrink_core::{Money, PaymentMethodCode, PaymentTransaction};

use super::provider::{
    CallbackRequest, PaymentProvider, ProviderError, ProviderOrder, ProviderPayload, RefundPayload,
    VerifiedCallback,
};

/// Staff confirmation body: `{"out_trade_no": "...", "amount": 2500}`.
#[derive(Debug, Deserialize)]
struct CashConfirmation {
    out_trade_no: String,
    amount: i64,
    #[serde(default)]
    operator: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CashProvider;

#[async_trait]
impl PaymentProvider for CashProvider {
    fn code(&self) -> PaymentMethodCode {
        PaymentMethodCode::Cash
    }

    async fn create_payment(&self, order: &ProviderOrder) -> Result<ProviderPayload, ProviderError> {
        Ok(ProviderPayload::pending(json!({
            "method": "cash",
            "out_trade_no": order.order_number,
            "amount": order.amount.cents(),
        })))
    }

    async fn verify_callback(&self, request: &CallbackRequest) -> Result<VerifiedCallback, ProviderError> {
        let confirmation: CashConfirmation = serde_json::from_str(&request.body)
            .map_err(|e| ProviderError::InvalidCallback(e.to_string()))?;
        if confirmation.out_trade_no.trim().is_empty() {
            return Err(ProviderError::InvalidCallback("out_trade_no is empty".into()));
        }

        Ok(VerifiedCallback {
            raw: json!({
                "method": "cash",
                "out_trade_no": confirmation.out_trade_no,
                "amount": confirmation.amount,
                "operator": confirmation.operator,
            }),
            out_trade_no: confirmation.out_trade_no,
            thirdparty_trade_no: None,
            amount: Money::from_cents(confirmation.amount),
        })
    }

    async fn refund(
        &self,
        transaction: &PaymentTransaction,
        amount: Money,
        reason: &str,
    ) -> Result<RefundPayload, ProviderError> {
        Ok(RefundPayload::new(json!({
            "method": "cash",
            "transaction_no": transaction.transaction_no,
            "returned": amount.cents(),
            "reason": reason,
        })))
    }
}
