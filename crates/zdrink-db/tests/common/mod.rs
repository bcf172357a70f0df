//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use zdrink_core::catalog::{Product, ProductSku};
use zdrink_core::order::{CreateOrderRequest, OrderLineRequest, OrderSource};
use zdrink_core::{Money, OrderType, PaymentMethodCode, PaymentTransaction};
use zdrink_db::payment::{ProviderOrder, VerifiedCallback};
use zdrink_db::repository::shop::new_shop;
use zdrink_db::{CallbackRequest, Database, DbConfig, EngineSettings, GatewayClient, ProviderError};

pub struct TestShop {
    pub db: Database,
    pub shop_id: String,
}

pub async fn setup() -> TestShop {
    setup_with(EngineSettings::default()).await
}

pub async fn setup_with(settings: EngineSettings) -> TestShop {
    let db = Database::with_settings(DbConfig::in_memory(), settings)
        .await
        .unwrap();
    let shop = db.shops().insert(&new_shop("Tea Corner")).await.unwrap();
    TestShop {
        db,
        shop_id: shop.id,
    }
}

/// Settings with a short provider timeout.
pub fn quick_timeout(millis: u64) -> EngineSettings {
    EngineSettings {
        provider_timeout: Duration::from_millis(millis),
        ..EngineSettings::default()
    }
}

/// A product with one SKU. Returns `(product_id, sku_id)`.
pub async fn add_sku(t: &TestShop, name: &str, price: i64, stock: i64) -> (String, String) {
    add_sku_in_category(t, name, None, price, stock).await
}

pub async fn add_sku_in_category(
    t: &TestShop,
    name: &str,
    category_id: Option<&str>,
    price: i64,
    stock: i64,
) -> (String, String) {
    let product = t
        .db
        .catalog()
        .insert_product(&Product {
            id: Uuid::new_v4().to_string(),
            shop_id: t.shop_id.clone(),
            category_id: category_id.map(str::to_string),
            name: name.to_string(),
            image: None,
            base_price: Money::from_cents(price),
            is_active: true,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    let sku = t
        .db
        .catalog()
        .insert_sku(&ProductSku {
            id: Uuid::new_v4().to_string(),
            shop_id: t.shop_id.clone(),
            product_id: product.id.clone(),
            sku_code: format!("SKU-{}", &Uuid::new_v4().simple().to_string()[..8]),
            price: Money::from_cents(price),
            stock_quantity: stock,
            low_stock_threshold: 0,
            specifications: BTreeMap::new(),
            is_active: true,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    (product.id, sku.id)
}

pub async fn stock_of(t: &TestShop, sku_id: &str) -> i64 {
    t.db
        .catalog()
        .get_sku(&t.shop_id, sku_id)
        .await
        .unwrap()
        .unwrap()
        .stock_quantity
}

pub async fn enable(t: &TestShop, codes: &[PaymentMethodCode]) {
    for (i, code) in codes.iter().enumerate() {
        t.db.shops()
            .set_payment_method(&t.shop_id, *code, code.as_str(), true, i as i64)
            .await
            .unwrap();
    }
}

pub fn line(product_id: &str, sku_id: &str, quantity: i64) -> OrderLineRequest {
    OrderLineRequest {
        product_id: product_id.to_string(),
        sku_id: Some(sku_id.to_string()),
        quantity,
        option_ids: vec![],
        customization: None,
    }
}

pub fn dine_in(lines: Vec<OrderLineRequest>, user_id: Option<&str>) -> CreateOrderRequest {
    let mut request = CreateOrderRequest::new(OrderSource::Items { lines }, OrderType::DineIn);
    request.user_id = user_id.map(str::to_string);
    request
}

// =============================================================================
// Fake gateway
// =============================================================================

/// Callback body the fake gateway accepts.
#[derive(Debug, Deserialize)]
struct GatewayNotice {
    out_trade_no: String,
    trade_no: String,
    amount: i64,
}

/// In-process stand-in for a wechat/alipay SDK.
#[derive(Debug, Default)]
pub struct MockGateway {
    pub fail_create: bool,
    pub fail_refund: bool,
    pub delay: Option<Duration>,
    pub refund_delay: Option<Duration>,
    pub creates: AtomicUsize,
    pub refunds: AtomicUsize,
}

impl MockGateway {
    pub fn failing() -> Self {
        MockGateway {
            fail_create: true,
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        MockGateway {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn slow_refunds(delay: Duration) -> Self {
        MockGateway {
            refund_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn refusing_refunds() -> Self {
        MockGateway {
            fail_refund: true,
            ..Default::default()
        }
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn refunds(&self) -> usize {
        self.refunds.load(Ordering::SeqCst)
    }
}

/// A signed notice as the gateway would post it.
pub fn notice(out_trade_no: &str, trade_no: &str, amount: i64) -> CallbackRequest {
    CallbackRequest::new(
        json!({ "out_trade_no": out_trade_no, "trade_no": trade_no, "amount": amount }).to_string(),
    )
    .header("signature", "valid")
}

#[async_trait]
impl GatewayClient for MockGateway {
    async fn create(&self, order: &ProviderOrder) -> Result<Value, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(ProviderError::Transport("gateway unreachable".into()));
        }
        Ok(json!({ "prepay_id": format!("wx{}", order.transaction_no), "amount": order.amount.cents() }))
    }

    async fn verify(&self, request: &CallbackRequest) -> Result<VerifiedCallback, ProviderError> {
        if request.headers.get("signature").map(String::as_str) != Some("valid") {
            return Err(ProviderError::InvalidCallback("bad signature".into()));
        }
        let notice: GatewayNotice = serde_json::from_str(&request.body)
            .map_err(|e| ProviderError::InvalidCallback(e.to_string()))?;
        Ok(VerifiedCallback {
            raw: serde_json::from_str(&request.body).unwrap_or(Value::Null),
            out_trade_no: notice.out_trade_no,
            thirdparty_trade_no: Some(notice.trade_no),
            amount: Money::from_cents(notice.amount),
        })
    }

    async fn refund(
        &self,
        transaction: &PaymentTransaction,
        amount: Money,
        _reason: &str,
    ) -> Result<Value, ProviderError> {
        self.refunds.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.refund_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_refund {
            return Err(ProviderError::Rejected("refund window closed".into()));
        }
        Ok(json!({ "refund_id": format!("rf-{}", transaction.transaction_no), "amount": amount.cents() }))
    }
}
