//! # Payment Repository
//!
//! Storage for payment transactions and refund requests. The reconciliation
//! flow itself (provider calls, callbacks, refunds) lives in
//! [`PaymentService`](crate::payment::PaymentService); this module holds the
//! guarded row updates it is built from.
//!
//! ## Guarded Updates
//! ```text
//! settle          status IN (pending, failed, cancelled) → paid
//! reserve_refund  refund_amount + refund_reserved + x <= amount AND status = paid
//! apply_refund    refund_reserved -= x, refund_amount += x
//!                 refund_amount == amount afterwards → refunded
//! release_refund  refund_reserved -= x (provider refused)
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use zdrink_core::payment::{RefundRequest, RefundStatus};
use zdrink_core::{CoreError, Money, PaymentMethodCode, PaymentTransaction};

/// Read access to transactions and refund requests.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    pub async fn get_transaction(&self, shop_id: &str, transaction_id: &str) -> DbResult<Option<PaymentTransaction>> {
        let mut conn = self.pool.acquire().await?;
        find_transaction(&mut *conn, shop_id, transaction_id).await
    }

    /// Every attempt to pay an order, oldest first.
    pub async fn transactions_for_order(&self, shop_id: &str, order_id: &str) -> DbResult<Vec<PaymentTransaction>> {
        let transactions = sqlx::query_as::<_, PaymentTransaction>(
            r#"
            SELECT * FROM payment_transactions
            WHERE shop_id = ?1 AND order_id = ?2
            ORDER BY created_at, rowid
            "#,
        )
        .bind(shop_id)
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(transactions)
    }

    pub async fn get_refund_request(&self, shop_id: &str, request_id: &str) -> DbResult<Option<RefundRequest>> {
        let mut conn = self.pool.acquire().await?;
        find_refund_request(&mut *conn, shop_id, request_id).await
    }

    /// Refund requests, newest first, optionally of one status.
    pub async fn list_refund_requests(
        &self,
        shop_id: &str,
        status: Option<RefundStatus>,
    ) -> DbResult<Vec<RefundRequest>> {
        let requests = sqlx::query_as::<_, RefundRequest>(
            r#"
            SELECT * FROM refund_requests
            WHERE shop_id = ?1 AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(shop_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(requests)
    }
}

// =============================================================================
// Transactions
// =============================================================================

pub(crate) async fn find_transaction(
    conn: &mut SqliteConnection,
    shop_id: &str,
    transaction_id: &str,
) -> DbResult<Option<PaymentTransaction>> {
    let transaction = sqlx::query_as::<_, PaymentTransaction>(
        "SELECT * FROM payment_transactions WHERE id = ?1 AND shop_id = ?2",
    )
    .bind(transaction_id)
    .bind(shop_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(transaction)
}

pub(crate) async fn fetch_transaction(
    conn: &mut SqliteConnection,
    shop_id: &str,
    transaction_id: &str,
) -> DbResult<PaymentTransaction> {
    find_transaction(conn, shop_id, transaction_id)
        .await?
        .ok_or_else(|| CoreError::TransactionNotFound(transaction_id.to_string()).into())
}

/// The attempt a callback refers to: latest one for this order number and
/// provider.
pub(crate) async fn find_by_trade(
    conn: &mut SqliteConnection,
    shop_id: &str,
    out_trade_no: &str,
    method: PaymentMethodCode,
) -> DbResult<Option<PaymentTransaction>> {
    let transaction = sqlx::query_as::<_, PaymentTransaction>(
        r#"
        SELECT * FROM payment_transactions
        WHERE shop_id = ?1 AND out_trade_no = ?2 AND payment_method = ?3
        ORDER BY created_at DESC, rowid DESC
        LIMIT 1
        "#,
    )
    .bind(shop_id)
    .bind(out_trade_no)
    .bind(method)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(transaction)
}

pub(crate) async fn insert_transaction(conn: &mut SqliteConnection, t: &PaymentTransaction) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO payment_transactions (
            id, shop_id, order_id, transaction_no, out_trade_no, payment_method,
            amount, status, refund_amount, thirdparty_trade_no, payment_data,
            refund_data, created_at, paid_at, refunded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
    )
    .bind(&t.id)
    .bind(&t.shop_id)
    .bind(&t.order_id)
    .bind(&t.transaction_no)
    .bind(&t.out_trade_no)
    .bind(t.payment_method)
    .bind(t.amount)
    .bind(t.status)
    .bind(t.refund_amount)
    .bind(&t.thirdparty_trade_no)
    .bind(sqlx::types::Json(&t.payment_data))
    .bind(sqlx::types::Json(&t.refund_data))
    .bind(t.created_at)
    .bind(t.paid_at)
    .bind(t.refunded_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Stores the provider payload of a freshly created attempt.
pub(crate) async fn set_payment_data(
    conn: &mut SqliteConnection,
    transaction_id: &str,
    data: &serde_json::Value,
) -> DbResult<()> {
    sqlx::query("UPDATE payment_transactions SET payment_data = ?2 WHERE id = ?1")
        .bind(transaction_id)
        .bind(sqlx::types::Json(data))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Marks a pending attempt failed, keeping the provider's error message.
pub(crate) async fn mark_failed(conn: &mut SqliteConnection, transaction_id: &str, message: &str) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE payment_transactions
        SET status = 'failed', payment_data = ?2
        WHERE id = ?1 AND status = 'pending'
        "#,
    )
    .bind(transaction_id)
    .bind(sqlx::types::Json(serde_json::json!({ "error": message })))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Cancels every pending attempt of an order. Returns how many changed.
pub(crate) async fn cancel_pending_for_order(conn: &mut SqliteConnection, order_id: &str) -> DbResult<u64> {
    let result = sqlx::query(
        "UPDATE payment_transactions SET status = 'cancelled' WHERE order_id = ?1 AND status = 'pending'",
    )
    .bind(order_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Records a verified payment. `None` when the row was already settled by
/// a concurrent callback.
pub(crate) async fn settle(
    conn: &mut SqliteConnection,
    transaction_id: &str,
    thirdparty_trade_no: Option<&str>,
    raw: &serde_json::Value,
    now: DateTime<Utc>,
) -> DbResult<Option<PaymentTransaction>> {
    let settled = sqlx::query_as::<_, PaymentTransaction>(
        r#"
        UPDATE payment_transactions
        SET status = 'paid',
            thirdparty_trade_no = COALESCE(?2, thirdparty_trade_no),
            payment_data = ?3,
            paid_at = ?4
        WHERE id = ?1 AND status IN ('pending', 'failed', 'cancelled')
        RETURNING *
        "#,
    )
    .bind(transaction_id)
    .bind(thirdparty_trade_no)
    .bind(sqlx::types::Json(raw))
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(settled)
}

/// Holds `amount` for a refund about to be sent to the provider.
///
/// `None` when the transaction is not paid or the amount no longer fits next
/// to what is refunded and already held.
pub(crate) async fn reserve_refund(
    conn: &mut SqliteConnection,
    transaction_id: &str,
    amount: Money,
) -> DbResult<Option<PaymentTransaction>> {
    let reserved = sqlx::query_as::<_, PaymentTransaction>(
        r#"
        UPDATE payment_transactions
        SET refund_reserved = refund_reserved + ?2
        WHERE id = ?1 AND status = 'paid' AND refund_amount + refund_reserved + ?2 <= amount
        RETURNING *
        "#,
    )
    .bind(transaction_id)
    .bind(amount)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(reserved)
}

/// Gives a reservation back after the provider refused the refund.
pub(crate) async fn release_refund(conn: &mut SqliteConnection, transaction_id: &str, amount: Money) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE payment_transactions
        SET refund_reserved = refund_reserved - ?2
        WHERE id = ?1 AND refund_reserved >= ?2
        "#,
    )
    .bind(transaction_id)
    .bind(amount)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Moves a confirmed refund from `refund_reserved` into `refund_amount`.
///
/// The status flips to refunded only when the refunded total equals the
/// amount exactly. `None` when no matching reservation exists.
pub(crate) async fn apply_refund(
    conn: &mut SqliteConnection,
    transaction_id: &str,
    amount: Money,
    refund_data: &serde_json::Value,
    now: DateTime<Utc>,
) -> DbResult<Option<PaymentTransaction>> {
    let updated = sqlx::query_as::<_, PaymentTransaction>(
        r#"
        UPDATE payment_transactions
        SET refund_amount = refund_amount + ?2,
            refund_reserved = refund_reserved - ?2,
            refund_data = ?3,
            status = CASE WHEN refund_amount + ?2 = amount THEN 'refunded' ELSE status END,
            refunded_at = CASE WHEN refund_amount + ?2 = amount THEN ?4 ELSE refunded_at END
        WHERE id = ?1 AND status = 'paid' AND refund_reserved >= ?2
        RETURNING *
        "#,
    )
    .bind(transaction_id)
    .bind(amount)
    .bind(sqlx::types::Json(refund_data))
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(updated)
}

// =============================================================================
// Refund Requests
// =============================================================================

pub(crate) async fn find_refund_request(
    conn: &mut SqliteConnection,
    shop_id: &str,
    request_id: &str,
) -> DbResult<Option<RefundRequest>> {
    let request = sqlx::query_as::<_, RefundRequest>(
        "SELECT * FROM refund_requests WHERE id = ?1 AND shop_id = ?2",
    )
    .bind(request_id)
    .bind(shop_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(request)
}

pub(crate) async fn fetch_refund_request(
    conn: &mut SqliteConnection,
    shop_id: &str,
    request_id: &str,
) -> DbResult<RefundRequest> {
    find_refund_request(conn, shop_id, request_id)
        .await?
        .ok_or_else(|| CoreError::RefundRequestNotFound(request_id.to_string()).into())
}

pub(crate) async fn insert_refund_request(conn: &mut SqliteConnection, r: &RefundRequest) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO refund_requests (
            id, shop_id, refund_no, transaction_id, order_id, amount, reason, status,
            requested_by, handled_by, handled_at, reject_reason, refund_data,
            created_at, completed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
    )
    .bind(&r.id)
    .bind(&r.shop_id)
    .bind(&r.refund_no)
    .bind(&r.transaction_id)
    .bind(&r.order_id)
    .bind(r.amount)
    .bind(&r.reason)
    .bind(r.status)
    .bind(&r.requested_by)
    .bind(&r.handled_by)
    .bind(r.handled_at)
    .bind(&r.reject_reason)
    .bind(sqlx::types::Json(&r.refund_data))
    .bind(r.created_at)
    .bind(r.completed_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Moves a refund request from `from` to `to`, recording the handler.
/// `None` when the request is no longer in `from`.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn update_refund_request(
    conn: &mut SqliteConnection,
    request_id: &str,
    from: RefundStatus,
    to: RefundStatus,
    handled_by: Option<&str>,
    reject_reason: Option<&str>,
    refund_data: Option<&serde_json::Value>,
    now: DateTime<Utc>,
) -> DbResult<Option<RefundRequest>> {
    let completed_at = (to == RefundStatus::Completed).then_some(now);
    let updated = sqlx::query_as::<_, RefundRequest>(
        r#"
        UPDATE refund_requests
        SET status = ?3,
            handled_by = COALESCE(?4, handled_by),
            handled_at = COALESCE(handled_at, ?5),
            reject_reason = COALESCE(?6, reject_reason),
            refund_data = COALESCE(?7, refund_data),
            completed_at = COALESCE(?8, completed_at)
        WHERE id = ?1 AND status = ?2
        RETURNING *
        "#,
    )
    .bind(request_id)
    .bind(from)
    .bind(to)
    .bind(handled_by)
    .bind(now)
    .bind(reject_reason)
    .bind(refund_data.map(sqlx::types::Json))
    .bind(completed_at)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(updated)
}
