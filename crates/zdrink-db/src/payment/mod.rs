//! # Payment Reconciliation
//!
//! Creates payment attempts, dispatches them to providers, reconciles
//! callbacks and runs refunds.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  create_payment                                                        │
//! │   ├── tx: order pending? method enabled? cancel older pending attempts │
//! │   │       insert transaction (pending)                          commit │
//! │   ├── provider.create_payment()        ← outside any transaction,     │
//! │   │                                      bounded by provider_timeout   │
//! │   │     error / timeout → tx: transaction failed, order untouched      │
//! │   └── settled synchronously? → same cascade as a callback              │
//! │                                                                         │
//! │  handle_callback                                                       │
//! │   ├── provider.verify_callback()                                       │
//! │   └── tx: find by out_trade_no → settle CAS → ledger charge →          │
//! │           order pending → paid (CAS on status + version)        commit │
//! │           replay → AlreadyPaid, nothing written                        │
//! │                                                                         │
//! │  refund / approve_refund                                               │
//! │   ├── tx: reserve CAS (refunded + reserved + x <= amount),             │
//! │   │       request → processing                                  commit │
//! │   ├── provider.refund()                                                │
//! │   │     error / timeout → tx: release reservation, request → approved  │
//! │   └── tx: reservation → refunded → ledger credit → request completed → │
//! │           full refund moves the order to refunded               commit │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Provider calls never run while the SQLite write lock is held.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, error, info, warn};

use crate::config::EngineSettings;
use crate::error::{DbError, DbResult};
use crate::repository::membership::{consume_in, credit_balance_in, debit_balance_in, refund_points_in};
use crate::repository::order::{fetch_order, transition_order};
use crate::repository::payment::{
    apply_refund, cancel_pending_for_order, fetch_refund_request, fetch_transaction, find_by_trade,
    insert_refund_request, insert_transaction, mark_failed, release_refund, reserve_refund,
    set_payment_data, settle, update_refund_request, PaymentRepository,
};
use crate::repository::shop::payment_method_enabled;
use crate::repository::{begin_write, new_id};
use zdrink_core::payment::{
    generate_number, CallbackOutcome, RefundStatus, REFUND_PREFIX, TRANSACTION_PREFIX,
};
use zdrink_core::validation::{validate_amount, validate_text};
use zdrink_core::{
    CoreError, Money, Order, OrderStatus, PaymentMethodCode, PaymentTransaction, RefundRequest,
    TransactionStatus, ValidationError,
};

pub mod balance;
pub mod cash;
pub mod gateway;
pub mod points;
pub mod provider;

pub use balance::BalanceProvider;
pub use cash::CashProvider;
pub use gateway::{GatewayClient, GatewayProvider};
pub use points::PointsProvider;
pub use provider::{
    CallbackRequest, LedgerCharge, PaymentProvider, ProviderError, ProviderOrder, ProviderPayload,
    ProviderRegistry, RefundPayload, Settlement, VerifiedCallback,
};

const MAX_REASON_LEN: usize = 500;

/// A finished refund: the transaction after the refund and the completed
/// request that records it.
#[derive(Debug, Clone, Serialize)]
pub struct RefundReceipt {
    pub transaction: PaymentTransaction,
    pub request: RefundRequest,
}

/// The payment reconciliation engine.
#[derive(Debug, Clone)]
pub struct PaymentService {
    pool: SqlitePool,
    settings: Arc<EngineSettings>,
    registry: Arc<ProviderRegistry>,
}

impl PaymentService {
    pub fn new(pool: SqlitePool, settings: Arc<EngineSettings>, registry: Arc<ProviderRegistry>) -> Self {
        PaymentService {
            pool,
            settings,
            registry,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    fn provider(&self, code: PaymentMethodCode) -> DbResult<Arc<dyn PaymentProvider>> {
        self.registry
            .get(code)
            .ok_or_else(|| CoreError::PaymentMethodUnavailable(code.to_string()).into())
    }

    /// Runs one provider call under the configured time bound.
    async fn call<T, F>(&self, code: PaymentMethodCode, call: F) -> DbResult<T>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let timeout = self.settings.provider_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(CoreError::ProviderFailure {
                provider: code.to_string(),
                message: err.to_string(),
            }
            .into()),
            Err(_) => Err(CoreError::ProviderTimeout {
                provider: code.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .into()),
        }
    }

    // =========================================================================
    // Payment
    // =========================================================================

    /// Starts a payment attempt for a pending order.
    ///
    /// Returns the transaction as it stands after the provider answered:
    /// `pending` when a callback will follow, `paid` when the provider
    /// settled on the spot.
    ///
    /// ## Errors
    /// - `InvalidOrderState` - order is not pending
    /// - `PaymentMethodUnavailable` - method disabled for the shop or no
    ///   provider registered
    /// - `ProviderFailure` / `ProviderTimeout` - transaction marked failed,
    ///   order still pending
    /// - `InsufficientBalance` / `InsufficientPoints` - ledger providers only;
    ///   transaction marked failed
    pub async fn create_payment(
        &self,
        shop_id: &str,
        order_id: &str,
        method: PaymentMethodCode,
        actor: Option<&str>,
    ) -> DbResult<PaymentTransaction> {
        let provider = self.provider(method)?;
        let now = Utc::now();

        let mut tx = begin_write(&self.pool).await?;
        let order = fetch_order(&mut *tx, shop_id, order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(CoreError::invalid_order_state(
                &order.id,
                order.status,
                "payment requires a pending order",
            )
            .into());
        }
        if !payment_method_enabled(&mut *tx, shop_id, method).await? {
            return Err(CoreError::PaymentMethodUnavailable(method.to_string()).into());
        }

        let superseded = cancel_pending_for_order(&mut *tx, &order.id).await?;
        let transaction = PaymentTransaction {
            id: new_id(),
            shop_id: shop_id.to_string(),
            order_id: order.id.clone(),
            transaction_no: generate_number(TRANSACTION_PREFIX, now),
            out_trade_no: order.order_number.clone(),
            payment_method: method,
            amount: order.total_amount,
            status: TransactionStatus::Pending,
            refund_amount: Money::zero(),
            refund_reserved: Money::zero(),
            thirdparty_trade_no: None,
            payment_data: serde_json::Value::Null,
            refund_data: serde_json::Value::Null,
            created_at: now,
            paid_at: None,
            refunded_at: None,
        };
        insert_transaction(&mut *tx, &transaction).await?;
        tx.commit().await?;

        info!(
            order_number = %order.order_number,
            transaction_no = %transaction.transaction_no,
            method = %method,
            amount = transaction.amount.cents(),
            superseded,
            "Payment attempt created"
        );

        let request = ProviderOrder::new(&order, &transaction);
        let payload = match self.call(method, provider.create_payment(&request)).await {
            Ok(payload) => payload,
            Err(err) => {
                self.fail_attempt(&transaction, &err).await?;
                return Err(err);
            }
        };

        let Some(settlement) = payload.settlement else {
            let mut tx = begin_write(&self.pool).await?;
            set_payment_data(&mut *tx, &transaction.id, &payload.data).await?;
            let stored = fetch_transaction(&mut *tx, shop_id, &transaction.id).await?;
            tx.commit().await?;
            return Ok(stored);
        };

        match self
            .settle_now(&transaction, &settlement, &payload.data, actor)
            .await
        {
            Ok(settled) => Ok(settled),
            Err(err) => {
                self.fail_attempt(&transaction, &err).await?;
                Err(err)
            }
        }
    }

    async fn settle_now(
        &self,
        transaction: &PaymentTransaction,
        settlement: &Settlement,
        data: &serde_json::Value,
        actor: Option<&str>,
    ) -> DbResult<PaymentTransaction> {
        let mut tx = begin_write(&self.pool).await?;
        let (settled, outcome) = apply_settlement(
            &mut *tx,
            transaction,
            settlement.thirdparty_trade_no.as_deref(),
            data,
            settlement.charge,
            actor,
            Utc::now(),
        )
        .await?;
        tx.commit().await?;
        debug!(transaction_no = %settled.transaction_no, ?outcome, "Payment settled by provider");
        Ok(settled)
    }

    async fn fail_attempt(&self, transaction: &PaymentTransaction, err: &DbError) -> DbResult<()> {
        let mut tx = begin_write(&self.pool).await?;
        mark_failed(&mut *tx, &transaction.id, &err.to_string()).await?;
        tx.commit().await?;
        warn!(
            transaction_no = %transaction.transaction_no,
            method = %transaction.payment_method,
            error = %err,
            "Payment attempt failed"
        );
        Ok(())
    }

    /// Applies a provider callback.
    ///
    /// Safe to call any number of times for the same payment; only the first
    /// verified delivery writes anything.
    ///
    /// ## Errors
    /// - `ProviderFailure` - verification failed
    /// - `TransactionNotFound` - no attempt with that out_trade_no for this
    ///   provider; callbacks never create transactions
    /// - `InvalidTransactionState` - amount differs from the attempt
    pub async fn handle_callback(
        &self,
        shop_id: &str,
        method: PaymentMethodCode,
        request: &CallbackRequest,
    ) -> DbResult<CallbackOutcome> {
        let provider = self.provider(method)?;
        let verified = self.call(method, provider.verify_callback(request)).await?;

        let mut tx = begin_write(&self.pool).await?;
        let transaction = find_by_trade(&mut *tx, shop_id, &verified.out_trade_no, method)
            .await?
            .ok_or_else(|| CoreError::TransactionNotFound(verified.out_trade_no.clone()))?;

        if !transaction.status.accepts_settlement() {
            debug!(
                transaction_no = %transaction.transaction_no,
                status = %transaction.status,
                "Callback replay ignored"
            );
            return Ok(CallbackOutcome::AlreadyPaid);
        }
        if verified.amount != transaction.amount {
            warn!(
                transaction_no = %transaction.transaction_no,
                expected = transaction.amount.cents(),
                received = verified.amount.cents(),
                "Callback amount mismatch"
            );
            return Err(CoreError::InvalidTransactionState {
                transaction_no: transaction.transaction_no.clone(),
                status: transaction.status.to_string(),
                reason: format!(
                    "callback amount {} does not match {}",
                    verified.amount, transaction.amount
                ),
            }
            .into());
        }

        let (settled, outcome) = apply_settlement(
            &mut *tx,
            &transaction,
            verified.thirdparty_trade_no.as_deref(),
            &verified.raw,
            None,
            None,
            Utc::now(),
        )
        .await?;
        tx.commit().await?;

        info!(
            transaction_no = %settled.transaction_no,
            out_trade_no = %settled.out_trade_no,
            ?outcome,
            "Payment callback applied"
        );
        Ok(outcome)
    }

    // =========================================================================
    // Refunds
    // =========================================================================

    /// Refunds part or all of a paid transaction immediately.
    ///
    /// Partial refunds leave the transaction `paid`; it becomes `refunded`
    /// when the refunded total equals the amount exactly, and the order
    /// follows when its state allows.
    ///
    /// The amount is reserved before the provider is called, so concurrent
    /// refunds of one transaction can never send more than it holds.
    pub async fn refund(
        &self,
        shop_id: &str,
        transaction_id: &str,
        amount: Money,
        reason: &str,
        actor: Option<&str>,
    ) -> DbResult<RefundReceipt> {
        validate_amount("amount", amount)?;
        validate_text("reason", reason, MAX_REASON_LEN)?;

        let mut tx = begin_write(&self.pool).await?;
        let transaction = fetch_transaction(&mut *tx, shop_id, transaction_id).await?;
        let transaction = reserve_in(&mut *tx, &transaction, amount).await?;
        tx.commit().await?;
        debug!(
            transaction_no = %transaction.transaction_no,
            amount = amount.cents(),
            "Refund reserved"
        );

        self.execute_refund(&transaction, amount, reason, actor, None).await
    }

    /// Files a refund request for later approval. Nothing moves yet.
    pub async fn request_refund(
        &self,
        shop_id: &str,
        transaction_id: &str,
        amount: Money,
        reason: &str,
        requested_by: Option<&str>,
    ) -> DbResult<RefundRequest> {
        validate_amount("amount", amount)?;
        validate_text("reason", reason, MAX_REASON_LEN)?;
        let now = Utc::now();

        let mut tx = begin_write(&self.pool).await?;
        let transaction = fetch_transaction(&mut *tx, shop_id, transaction_id).await?;
        check_refundable(&transaction, amount)?;

        let request = RefundRequest {
            id: new_id(),
            shop_id: shop_id.to_string(),
            refund_no: generate_number(REFUND_PREFIX, now),
            transaction_id: transaction.id.clone(),
            order_id: transaction.order_id.clone(),
            amount,
            reason: reason.to_string(),
            status: RefundStatus::Pending,
            requested_by: requested_by.map(str::to_string),
            handled_by: None,
            handled_at: None,
            reject_reason: None,
            refund_data: serde_json::Value::Null,
            created_at: now,
            completed_at: None,
        };
        insert_refund_request(&mut *tx, &request).await?;
        tx.commit().await?;

        info!(
            refund_no = %request.refund_no,
            transaction_no = %transaction.transaction_no,
            amount = amount.cents(),
            "Refund requested"
        );
        Ok(request)
    }

    /// Approves a refund request and executes it.
    ///
    /// When the provider fails the request stays `approved` and the error is
    /// returned; approving it again retries the refund.
    pub async fn approve_refund(&self, shop_id: &str, request_id: &str, handler: &str) -> DbResult<RefundReceipt> {
        if handler.trim().is_empty() {
            return Err(ValidationError::required("handler").into());
        }
        let now = Utc::now();

        let mut tx = begin_write(&self.pool).await?;
        let request = fetch_refund_request(&mut *tx, shop_id, request_id).await?;
        if !request.status.can_approve() {
            return Err(CoreError::InvalidRefundState {
                refund_no: request.refund_no.clone(),
                status: request.status.to_string(),
                action: "approve".to_string(),
            }
            .into());
        }
        let transaction = fetch_transaction(&mut *tx, shop_id, &request.transaction_id).await?;
        let transaction = reserve_in(&mut *tx, &transaction, request.amount).await?;

        let request = update_refund_request(
            &mut *tx,
            &request.id,
            request.status,
            RefundStatus::Processing,
            Some(handler),
            None,
            None,
            now,
        )
        .await?
        .ok_or_else(|| CoreError::conflict("refund_request", request_id))?;
        tx.commit().await?;
        info!(refund_no = %request.refund_no, handler, "Refund approved");

        match self
            .execute_refund(&transaction, request.amount, &request.reason, Some(handler), Some(&request))
            .await
        {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                warn!(
                    refund_no = %request.refund_no,
                    error = %err,
                    "Approved refund not executed, request stays approved"
                );
                Err(err)
            }
        }
    }

    /// Rejects a pending refund request.
    pub async fn reject_refund(
        &self,
        shop_id: &str,
        request_id: &str,
        handler: &str,
        reason: &str,
    ) -> DbResult<RefundRequest> {
        if handler.trim().is_empty() {
            return Err(ValidationError::required("handler").into());
        }
        validate_text("reject_reason", reason, MAX_REASON_LEN)?;
        let now = Utc::now();

        let mut tx = begin_write(&self.pool).await?;
        let request = fetch_refund_request(&mut *tx, shop_id, request_id).await?;
        if !request.status.can_reject() {
            return Err(CoreError::InvalidRefundState {
                refund_no: request.refund_no.clone(),
                status: request.status.to_string(),
                action: "reject".to_string(),
            }
            .into());
        }
        let rejected = update_refund_request(
            &mut *tx,
            &request.id,
            RefundStatus::Pending,
            RefundStatus::Rejected,
            Some(handler),
            Some(reason),
            None,
            now,
        )
        .await?
        .ok_or_else(|| CoreError::conflict("refund_request", request_id))?;
        tx.commit().await?;

        info!(refund_no = %rejected.refund_no, handler, "Refund rejected");
        Ok(rejected)
    }

    /// Provider call for a reserved refund, then one transaction for
    /// everything it implies. A failed call releases the reservation.
    async fn execute_refund(
        &self,
        transaction: &PaymentTransaction,
        amount: Money,
        reason: &str,
        actor: Option<&str>,
        processing: Option<&RefundRequest>,
    ) -> DbResult<RefundReceipt> {
        let payload = match self.send_refund(transaction, amount, reason).await {
            Ok(payload) => payload,
            Err(err) => {
                if let Err(release_err) = self.release(transaction, amount, processing).await {
                    error!(
                        transaction_no = %transaction.transaction_no,
                        amount = amount.cents(),
                        error = %release_err,
                        "Refund reservation could not be released"
                    );
                }
                return Err(err);
            }
        };

        let now = Utc::now();
        let refund_no = processing
            .map(|r| r.refund_no.clone())
            .unwrap_or_else(|| generate_number(REFUND_PREFIX, now));

        let mut tx = begin_write(&self.pool).await?;
        let Some(updated) = apply_refund(&mut *tx, &transaction.id, amount, &payload.data, now).await? else {
            let current = fetch_transaction(&mut *tx, &transaction.shop_id, &transaction.id).await?;
            error!(
                transaction_no = %transaction.transaction_no,
                refund_no = %refund_no,
                amount = amount.cents(),
                "Provider refunded but the reservation is gone"
            );
            return Err(CoreError::RefundExceedsBalance {
                requested: amount.cents(),
                refundable: current.refundable().cents(),
            }
            .into());
        };

        let order = fetch_order(&mut *tx, &transaction.shop_id, &transaction.order_id).await?;
        if let Some(credit) = payload.credit {
            apply_credit(&mut *tx, &order, credit, &refund_no, reason, now).await?;
        }

        let request = match processing {
            Some(request) => update_refund_request(
                &mut *tx,
                &request.id,
                RefundStatus::Processing,
                RefundStatus::Completed,
                None,
                None,
                Some(&payload.data),
                now,
            )
            .await?
            .ok_or_else(|| CoreError::conflict("refund_request", &request.id))?,
            None => {
                let request = RefundRequest {
                    id: new_id(),
                    shop_id: transaction.shop_id.clone(),
                    refund_no: refund_no.clone(),
                    transaction_id: transaction.id.clone(),
                    order_id: transaction.order_id.clone(),
                    amount,
                    reason: reason.to_string(),
                    status: RefundStatus::Completed,
                    requested_by: actor.map(str::to_string),
                    handled_by: actor.map(str::to_string),
                    handled_at: Some(now),
                    reject_reason: None,
                    refund_data: payload.data.clone(),
                    created_at: now,
                    completed_at: Some(now),
                };
                insert_refund_request(&mut *tx, &request).await?;
                request
            }
        };

        if updated.is_fully_refunded() {
            if order.status.can_transition_to(OrderStatus::Refunded) {
                transition_order(&mut *tx, &order, OrderStatus::Refunded, Some(reason), actor, now).await?;
            } else {
                debug!(
                    order_number = %order.order_number,
                    status = %order.status,
                    "Order keeps its status after full refund"
                );
            }
        }
        tx.commit().await?;

        info!(
            refund_no = %request.refund_no,
            transaction_no = %updated.transaction_no,
            amount = amount.cents(),
            refunded_total = updated.refund_amount.cents(),
            status = %updated.status,
            "Refund completed"
        );
        Ok(RefundReceipt {
            transaction: updated,
            request,
        })
    }

    async fn send_refund(
        &self,
        transaction: &PaymentTransaction,
        amount: Money,
        reason: &str,
    ) -> DbResult<RefundPayload> {
        let method = transaction.payment_method;
        let provider = self.provider(method)?;
        self.call(method, provider.refund(transaction, amount, reason)).await
    }

    /// Undoes a reservation; a processing request goes back to approved.
    async fn release(
        &self,
        transaction: &PaymentTransaction,
        amount: Money,
        processing: Option<&RefundRequest>,
    ) -> DbResult<()> {
        let mut tx = begin_write(&self.pool).await?;
        release_refund(&mut *tx, &transaction.id, amount).await?;
        if let Some(request) = processing {
            update_refund_request(
                &mut *tx,
                &request.id,
                RefundStatus::Processing,
                RefundStatus::Approved,
                None,
                None,
                None,
                Utc::now(),
            )
            .await?;
        }
        tx.commit().await?;
        debug!(
            transaction_no = %transaction.transaction_no,
            amount = amount.cents(),
            "Refund reservation released"
        );
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn transactions(&self, shop_id: &str, order_id: &str) -> DbResult<Vec<PaymentTransaction>> {
        PaymentRepository::new(self.pool.clone())
            .transactions_for_order(shop_id, order_id)
            .await
    }

    pub async fn list_refund_requests(
        &self,
        shop_id: &str,
        status: Option<RefundStatus>,
    ) -> DbResult<Vec<RefundRequest>> {
        PaymentRepository::new(self.pool.clone())
            .list_refund_requests(shop_id, status)
            .await
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

fn check_refundable(transaction: &PaymentTransaction, amount: Money) -> DbResult<()> {
    if transaction.status != TransactionStatus::Paid {
        return Err(CoreError::InvalidTransactionState {
            transaction_no: transaction.transaction_no.clone(),
            status: transaction.status.to_string(),
            reason: "only paid transactions can be refunded".to_string(),
        }
        .into());
    }
    if amount > transaction.refundable() {
        return Err(CoreError::RefundExceedsBalance {
            requested: amount.cents(),
            refundable: transaction.refundable().cents(),
        }
        .into());
    }
    Ok(())
}

/// Checks and reserves `amount` inside the caller's write transaction.
async fn reserve_in(
    conn: &mut SqliteConnection,
    transaction: &PaymentTransaction,
    amount: Money,
) -> DbResult<PaymentTransaction> {
    check_refundable(transaction, amount)?;
    reserve_refund(conn, &transaction.id, amount)
        .await?
        .ok_or_else(|| CoreError::conflict("payment_transaction", &transaction.id).into())
}

fn order_member(order: &Order) -> DbResult<&str> {
    order
        .user_id
        .as_deref()
        .ok_or_else(|| ValidationError::required("user_id").into())
}

/// Settles a transaction and cascades to its order.
///
/// ```text
/// transaction already paid/refunded      → AlreadyPaid, nothing written
/// settle CAS lost to a concurrent writer → AlreadyPaid
/// ledger charge (balance / points)       → InsufficientX rolls it all back
/// order pending                          → order paid            → Paid
/// order moved on (cancelled meanwhile)   → order left alone      → PaidOnInactiveOrder
/// ```
async fn apply_settlement(
    conn: &mut SqliteConnection,
    transaction: &PaymentTransaction,
    thirdparty_trade_no: Option<&str>,
    raw: &serde_json::Value,
    charge: Option<LedgerCharge>,
    actor: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<(PaymentTransaction, CallbackOutcome)> {
    if !transaction.status.accepts_settlement() {
        return Ok((transaction.clone(), CallbackOutcome::AlreadyPaid));
    }
    let Some(settled) = settle(conn, &transaction.id, thirdparty_trade_no, raw, now).await? else {
        let current = fetch_transaction(conn, &transaction.shop_id, &transaction.id).await?;
        return Ok((current, CallbackOutcome::AlreadyPaid));
    };

    let order = fetch_order(conn, &transaction.shop_id, &transaction.order_id).await?;
    match charge {
        Some(LedgerCharge::Balance(amount)) => {
            debit_balance_in(conn, &order.shop_id, order_member(&order)?, amount, now).await?;
        }
        Some(LedgerCharge::Points(points)) => {
            consume_in(
                conn,
                &order.shop_id,
                order_member(&order)?,
                points,
                Some(&transaction.transaction_no),
                Some("order payment"),
                now,
            )
            .await?;
        }
        None => {}
    }

    if order.status != OrderStatus::Pending {
        warn!(
            order_number = %order.order_number,
            status = %order.status,
            transaction_no = %settled.transaction_no,
            "Payment arrived for an order that is no longer pending, refund required"
        );
        return Ok((settled, CallbackOutcome::PaidOnInactiveOrder));
    }

    let notes = format!("paid via {}", settled.payment_method);
    transition_order(conn, &order, OrderStatus::Paid, Some(&notes), actor, now).await?;
    sqlx::query("UPDATE orders SET payment_method = ?2 WHERE id = ?1")
        .bind(&order.id)
        .bind(settled.payment_method)
        .execute(&mut *conn)
        .await?;
    Ok((settled, CallbackOutcome::Paid))
}

/// Returns ledger value a refund gives back to the member.
async fn apply_credit(
    conn: &mut SqliteConnection,
    order: &Order,
    credit: LedgerCharge,
    refund_no: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let user_id = order_member(order)?;
    match credit {
        LedgerCharge::Balance(amount) if amount.is_positive() => {
            credit_balance_in(conn, &order.shop_id, user_id, amount, now).await?;
        }
        LedgerCharge::Points(points) if points > 0 => {
            refund_points_in(conn, &order.shop_id, user_id, points, Some(refund_no), Some(reason), now).await?;
        }
        _ => {}
    }
    Ok(())
}
