//! Third-party gateways (wechat, alipay).
//!
//! Signing, wire formats and certificates belong to the gateway SDK; the
//! engine only needs the three calls of [`GatewayClient`]. A deployment plugs
//! in its client, tests plug in a fake.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use zdrink_core::{Money, PaymentMethodCode, PaymentTransaction};

use super::provider::{
    CallbackRequest, PaymentProvider, ProviderError, ProviderOrder, ProviderPayload, RefundPayload,
    VerifiedCallback,
};

/// The opaque gateway SDK.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Creates a prepay order. The returned value is handed to the client
    /// app unchanged (QR code url, prepay id, signed form).
    async fn create(&self, order: &ProviderOrder) -> Result<Value, ProviderError>;

    /// Checks the callback signature and extracts the settled trade.
    async fn verify(&self, request: &CallbackRequest) -> Result<VerifiedCallback, ProviderError>;

    async fn refund(
        &self,
        transaction: &PaymentTransaction,
        amount: Money,
        reason: &str,
    ) -> Result<Value, ProviderError>;
}

/// Adapts a [`GatewayClient`] to [`PaymentProvider`] under a method code.
#[derive(Clone)]
pub struct GatewayProvider {
    code: PaymentMethodCode,
    client: Arc<dyn GatewayClient>,
}

impl GatewayProvider {
    pub fn new(code: PaymentMethodCode, client: Arc<dyn GatewayClient>) -> Self {
        GatewayProvider { code, client }
    }

    pub fn wechat(client: Arc<dyn GatewayClient>) -> Self {
        Self::new(PaymentMethodCode::Wechat, client)
    }

    pub fn alipay(client: Arc<dyn GatewayClient>) -> Self {
        Self::new(PaymentMethodCode::Alipay, client)
    }
}

impl fmt::Debug for GatewayProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayProvider").field("code", &self.code).finish()
    }
}

#[async_trait]
impl PaymentProvider for GatewayProvider {
    fn code(&self) -> PaymentMethodCode {
        self.code
    }

    async fn create_payment(&self, order: &ProviderOrder) -> Result<ProviderPayload, ProviderError> {
        let data = self.client.create(order).await?;
        Ok(ProviderPayload::pending(data))
    }

    async fn verify_callback(&self, request: &CallbackRequest) -> Result<VerifiedCallback, ProviderError> {
        self.client.verify(request).await
    }

    async fn refund(
        &self,
        transaction: &PaymentTransaction,
        amount: Money,
        reason: &str,
    ) -> Result<RefundPayload, ProviderError> {
        let data = self.client.refund(transaction, amount, reason).await?;
        Ok(RefundPayload::new(data))
    }
}
