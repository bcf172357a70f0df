//! # Order Repository
//!
//! The order engine: creation, status changes, cancellation, cashier
//! discounts, split and merge.
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Order Lifecycle                                   │
//! │                                                                         │
//! │  1. CREATE (one transaction)                                           │
//! │     └── resolve lines → snapshot items → coupon → stock CAS per SKU    │
//! │     └── order + items + inventory logs + status log, cart cleared      │
//! │                                                                         │
//! │  2. ADVANCE                                                            │
//! │     └── update_status() → CAS on (status, version) + status log        │
//! │     └── completed → member points in the same transaction              │
//! │                                                                         │
//! │  3. (OPTIONAL) CANCEL from pending / paid / confirmed                  │
//! │     └── stock returned, coupon released, pending payments cancelled    │
//! │                                                                         │
//! │  4. (OPTIONAL) SPLIT / MERGE while unpaid                              │
//! │     └── items moved, totals recomputed, report of skipped ids          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any error drops the transaction, so a failed call leaves no order row,
//! no stock movement and no log behind.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::error::DbResult;
use crate::repository::cart::{clear_items, load_cart};
use crate::repository::catalog::resolve_line;
use crate::repository::coupon;
use crate::repository::inventory::{apply_delta, StockMovement};
use crate::repository::membership::{award_order_points, member_discount_in};
use crate::repository::shop::fetch_active_shop;
use crate::repository::{begin_write, new_id};
use zdrink_core::catalog::selected_attributes;
use zdrink_core::coupon::CouponLine;
use zdrink_core::inventory::InventoryAction;
use zdrink_core::order::{
    CreateOrderRequest, DailySummary, ManualDiscount, MergeReport, MovedItem, OrderLineRequest,
    OrderSource, OrderTotals, Skipped, SplitLine, SplitReport, TableStatus,
};
use zdrink_core::payment::generate_number;
use zdrink_core::validation::{validate_amount, validate_rate};
use zdrink_core::{
    CoreError, Money, Order, OrderItem, OrderStatus, OrderStatusLog, OrderType, ValidationError,
    SPLIT_ORDER_PREFIX,
};

/// Repository for orders and the order engine.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
    settings: Arc<EngineSettings>,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool, settings: Arc<EngineSettings>) -> Self {
        OrderRepository { pool, settings }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Creates a pending order from a cart or an explicit item list.
    ///
    /// ## Errors
    /// - `Validation` - request fields, disallowed order type, empty cart,
    ///   delivery below the shop minimum
    /// - `ProductNotFound` / `SkuNotFound` - a line no longer orderable
    /// - `InsufficientStock` - any SKU short; nothing is written
    /// - `UserCouponUnavailable` / `CouponUnavailable` - coupon not usable
    ///
    /// Members get their tier's discount on what is left of the subtotal
    /// after the coupon. Both land in `discount_amount`.
    pub async fn create_order(
        &self,
        shop_id: &str,
        request: &CreateOrderRequest,
        actor: Option<&str>,
    ) -> DbResult<Order> {
        request.validate()?;
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;

        let shop = fetch_active_shop(&mut *tx, shop_id).await?;
        if !shop.accepts(request.order_type) {
            return Err(ValidationError::inconsistent(
                "order_type",
                format!("{} does not accept {:?} orders", shop.name, request.order_type),
            )
            .into());
        }

        let (lines, cart_id) = match &request.source {
            OrderSource::Cart { user_id } => {
                let cart = load_cart(&mut *tx, shop_id, user_id)
                    .await?
                    .ok_or_else(|| CoreError::CartNotFound(user_id.clone()))?;
                if cart.is_empty() {
                    return Err(ValidationError::required("items").into());
                }
                let lines = cart
                    .items
                    .iter()
                    .map(|item| OrderLineRequest {
                        product_id: item.product_id.clone(),
                        sku_id: item.sku_id.clone(),
                        quantity: item.quantity,
                        option_ids: item.option_ids.clone(),
                        customization: item.customization.clone(),
                    })
                    .collect::<Vec<_>>();
                (lines, Some(cart.id))
            }
            OrderSource::Items { lines } => (lines.clone(), None),
        };

        let order_id = new_id();
        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let resolved = resolve_line(
                &mut *tx,
                shop_id,
                &line.product_id,
                line.sku_id.as_deref(),
                &line.option_ids,
            )
            .await?;
            let unit_price = resolved.unit_price();
            items.push(OrderItem {
                id: new_id(),
                order_id: order_id.clone(),
                product_id: resolved.product.id.clone(),
                sku_id: resolved.sku.as_ref().map(|s| s.id.clone()),
                category_id: resolved.product.category_id.clone(),
                product_name: resolved.product.name.clone(),
                product_image: resolved.product.image.clone(),
                specifications: resolved
                    .sku
                    .as_ref()
                    .map(|s| s.specifications.clone())
                    .unwrap_or_default(),
                attributes: selected_attributes(&resolved.options),
                customization: line.customization.clone(),
                unit_price,
                quantity: line.quantity,
                total_price: unit_price.multiply_quantity(line.quantity),
                created_at: now,
            });
        }

        let subtotal: Money = items.iter().map(|i| i.total_price).sum();
        let delivery_fee = shop.delivery_fee_for(request.order_type);
        if request.order_type == OrderType::Delivery && subtotal < shop.minimum_order_amount {
            return Err(ValidationError::inconsistent(
                "subtotal",
                format!(
                    "{} is below the delivery minimum of {}",
                    subtotal, shop.minimum_order_amount
                ),
            )
            .into());
        }

        let mut discount = Money::zero();
        if let (Some(user_coupon_id), Some(owner)) = (request.user_coupon_id.as_deref(), request.owner()) {
            let (_, coupon) = coupon::fetch_redeemable(&mut *tx, shop_id, user_coupon_id, owner).await?;
            let coupon_lines: Vec<CouponLine> = items
                .iter()
                .map(|i| CouponLine {
                    product_id: i.product_id.clone(),
                    category_id: i.category_id.clone(),
                })
                .collect();
            discount = coupon.redeem_discount(subtotal, &coupon_lines, now);
            if discount.is_zero() {
                return Err(CoreError::CouponUnavailable { code: coupon.code }.into());
            }
        }
        if let Some(owner) = request.owner() {
            let tier_discount = member_discount_in(&mut *tx, shop_id, owner, subtotal - discount).await?;
            if tier_discount.is_positive() {
                debug!(user_id = %owner, discount = tier_discount.cents(), "Member tier discount");
                discount = discount + tier_discount;
            }
        }

        let totals = OrderTotals::compute(items.iter().map(|i| i.total_price), delivery_fee, discount);
        let order = Order {
            id: order_id,
            shop_id: shop_id.to_string(),
            order_number: generate_number(&self.settings.order_number_prefix, now),
            user_id: request.owner().map(str::to_string),
            status: OrderStatus::Pending,
            order_type: request.order_type,
            subtotal: totals.subtotal,
            delivery_fee: totals.delivery_fee,
            discount_amount: totals.discount_amount,
            total_amount: totals.total_amount,
            customer_name: request.customer_name.clone(),
            customer_phone: request.customer_phone.clone(),
            customer_notes: request.customer_notes.clone(),
            delivery_address: request.delivery_address.clone(),
            delivery_time: request.delivery_time,
            pickup_time: request.pickup_time,
            table_number: request.table_number.clone(),
            payment_method: None,
            payment_status: false,
            user_coupon_id: request.user_coupon_id.clone(),
            version: 0,
            created_at: now,
            updated_at: now,
            paid_at: None,
            completed_at: None,
        };
        debug!(order_number = %order.order_number, lines = items.len(), "Creating order");

        insert_order(&mut *tx, &order).await?;
        for item in &items {
            insert_item(&mut *tx, item).await?;
            if let Some(sku_id) = item.sku_id.as_deref() {
                apply_delta(
                    &mut *tx,
                    shop_id,
                    StockMovement::new(sku_id, InventoryAction::Sale, -item.quantity)
                        .reference(&order.order_number)
                        .actor(actor),
                )
                .await?;
            }
        }

        if let Some(user_coupon_id) = order.user_coupon_id.as_deref() {
            coupon::mark_used(&mut *tx, user_coupon_id, &order.id, now).await?;
        }
        insert_status_log(
            &mut *tx,
            &order,
            OrderStatus::Pending,
            OrderStatus::Pending,
            Some("created"),
            actor,
            now,
        )
        .await?;
        if let Some(cart_id) = cart_id.as_deref() {
            clear_items(&mut *tx, cart_id).await?;
        }

        tx.commit().await?;

        info!(
            shop_id = %shop_id,
            order_number = %order.order_number,
            total = order.total_amount.cents(),
            "Order created"
        );
        Ok(order)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Moves an order along the transition graph.
    ///
    /// `cancelled` runs [`cancel`](Self::cancel). `completed` also books the
    /// order against the member's points in the same transaction.
    pub async fn update_status(
        &self,
        shop_id: &str,
        order_id: &str,
        to: OrderStatus,
        notes: Option<&str>,
        actor: Option<&str>,
    ) -> DbResult<Order> {
        if to == OrderStatus::Cancelled {
            return self.cancel(shop_id, order_id, notes, actor).await;
        }

        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;
        let order = fetch_order(&mut *tx, shop_id, order_id).await?;
        let updated = transition_order(&mut *tx, &order, to, notes, actor, now).await?;
        if to == OrderStatus::Completed {
            award_order_points(&mut *tx, &updated, now).await?;
        }
        tx.commit().await?;

        info!(
            order_number = %updated.order_number,
            from = %order.status,
            to = %to,
            "Order status changed"
        );
        Ok(updated)
    }

    /// Cancels a pending, paid or confirmed order.
    ///
    /// Returns every SKU line to stock, hands the coupon back and cancels
    /// payment attempts still pending. Money already collected is refunded
    /// separately through the payment service.
    pub async fn cancel(
        &self,
        shop_id: &str,
        order_id: &str,
        notes: Option<&str>,
        actor: Option<&str>,
    ) -> DbResult<Order> {
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;
        let order = fetch_order(&mut *tx, shop_id, order_id).await?;
        if !order.status.is_cancellable() {
            return Err(CoreError::InvalidTransition {
                order_id: order.id.clone(),
                from: order.status.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            }
            .into());
        }

        for item in items_in(&mut *tx, &order.id).await? {
            if let Some(sku_id) = item.sku_id.as_deref() {
                apply_delta(
                    &mut *tx,
                    shop_id,
                    StockMovement::new(sku_id, InventoryAction::Return, item.quantity)
                        .reference(&order.order_number)
                        .notes(Some("order cancelled"))
                        .actor(actor),
                )
                .await?;
            }
        }
        if let Some(user_coupon_id) = order.user_coupon_id.as_deref() {
            coupon::release(&mut *tx, user_coupon_id, &order.id).await?;
        }
        let cancelled_payments = crate::repository::payment::cancel_pending_for_order(&mut *tx, &order.id).await?;

        let updated = transition_order(&mut *tx, &order, OrderStatus::Cancelled, notes, actor, now).await?;
        tx.commit().await?;

        if order.status == OrderStatus::Paid {
            warn!(order_number = %order.order_number, "Paid order cancelled, refund required");
        }
        info!(
            order_number = %order.order_number,
            from = %order.status,
            cancelled_payments,
            "Order cancelled"
        );
        Ok(updated)
    }

    /// Applies a cashier discount to a pending order.
    ///
    /// Stacks on top of any coupon discount. The combined discount is clamped
    /// to the subtotal.
    pub async fn apply_manual_discount(
        &self,
        shop_id: &str,
        order_id: &str,
        discount: ManualDiscount,
        actor: Option<&str>,
    ) -> DbResult<Order> {
        match discount {
            ManualDiscount::Fixed(amount) => validate_amount("discount", amount)?,
            ManualDiscount::Percentage(rate) => {
                validate_rate("discount", rate)?;
                if rate.is_zero() {
                    return Err(ValidationError::MustBePositive {
                        field: "discount".into(),
                    }
                    .into());
                }
            }
        }

        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;
        let order = fetch_order(&mut *tx, shop_id, order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(CoreError::invalid_order_state(
                &order.id,
                order.status,
                "discounts apply to pending orders only",
            )
            .into());
        }
        if has_live_transactions(&mut *tx, &order.id).await? {
            return Err(CoreError::invalid_order_state(
                &order.id,
                order.status,
                "a payment is already in progress",
            )
            .into());
        }

        let extra = discount.amount(order.subtotal);
        let items = items_in(&mut *tx, &order.id).await?;
        let totals = OrderTotals::compute(
            items.iter().map(|i| i.total_price),
            order.delivery_fee,
            order.discount_amount + extra,
        );
        let updated = write_totals(&mut *tx, &order, &totals, now).await?;
        let note = format!("manual discount -{}", updated.discount_amount - order.discount_amount);
        insert_status_log(&mut *tx, &updated, order.status, order.status, Some(&note), actor, now).await?;
        tx.commit().await?;

        info!(
            order_number = %updated.order_number,
            discount = updated.discount_amount.cents(),
            total = updated.total_amount.cents(),
            "Manual discount applied"
        );
        Ok(updated)
    }

    // =========================================================================
    // Split / Merge
    // =========================================================================

    /// Moves quantities of items into a new order.
    ///
    /// Lines naming an unknown item, a non-positive quantity or more than the
    /// line holds are skipped and reported. Fails when nothing can be moved
    /// or when the source order would be left without items.
    pub async fn split_order(
        &self,
        shop_id: &str,
        order_id: &str,
        lines: &[SplitLine],
        actor: Option<&str>,
    ) -> DbResult<SplitReport> {
        if lines.is_empty() {
            return Err(ValidationError::required("lines").into());
        }

        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;
        let source = fetch_order(&mut *tx, shop_id, order_id).await?;
        ensure_rearrangeable(&mut *tx, &source).await?;

        let source_items = items_in(&mut *tx, &source.id).await?;
        let mut skipped = Vec::new();
        let mut seen = HashSet::new();
        let mut plan: Vec<(&OrderItem, i64)> = Vec::new();
        for line in lines {
            if !seen.insert(line.item_id.as_str()) {
                skipped.push(Skipped::new(&line.item_id, "item listed more than once"));
                continue;
            }
            let Some(item) = source_items.iter().find(|i| i.id == line.item_id) else {
                skipped.push(Skipped::new(&line.item_id, "item not in order"));
                continue;
            };
            if line.quantity < 1 {
                skipped.push(Skipped::new(&line.item_id, "quantity must be positive"));
                continue;
            }
            if line.quantity > item.quantity {
                skipped.push(Skipped::new(
                    &line.item_id,
                    format!("quantity {} exceeds line quantity {}", line.quantity, item.quantity),
                ));
                continue;
            }
            plan.push((item, line.quantity));
        }

        if plan.is_empty() {
            return Err(ValidationError::inconsistent("lines", "no item could be moved").into());
        }
        let emptied = plan.iter().filter(|(item, q)| *q == item.quantity).count();
        if emptied == source_items.len() {
            return Err(ValidationError::inconsistent(
                "lines",
                "the source order must keep at least one item",
            )
            .into());
        }

        let new_order = Order {
            id: new_id(),
            order_number: generate_number(SPLIT_ORDER_PREFIX, now),
            subtotal: Money::zero(),
            delivery_fee: Money::zero(),
            discount_amount: Money::zero(),
            total_amount: Money::zero(),
            payment_method: None,
            payment_status: false,
            user_coupon_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
            paid_at: None,
            completed_at: None,
            ..source.clone()
        };
        insert_order(&mut *tx, &new_order).await?;

        let mut moved = Vec::with_capacity(plan.len());
        for (item, quantity) in plan {
            let copy = OrderItem {
                id: new_id(),
                order_id: new_order.id.clone(),
                quantity,
                total_price: item.line_total(quantity),
                created_at: now,
                ..item.clone()
            };
            insert_item(&mut *tx, &copy).await?;

            let full_move = quantity == item.quantity;
            if full_move {
                sqlx::query("DELETE FROM order_items WHERE id = ?1")
                    .bind(&item.id)
                    .execute(&mut *tx)
                    .await?;
            } else {
                let remaining = item.quantity - quantity;
                sqlx::query("UPDATE order_items SET quantity = ?2, total_price = ?3 WHERE id = ?1")
                    .bind(&item.id)
                    .bind(remaining)
                    .bind(item.line_total(remaining))
                    .execute(&mut *tx)
                    .await?;
            }
            moved.push(MovedItem {
                source_item_id: item.id.clone(),
                new_item_id: copy.id,
                quantity,
                full_move,
            });
        }

        let source_order = recompute_totals(&mut *tx, &source, now).await?;
        let new_order = recompute_totals(&mut *tx, &new_order, now).await?;
        let note = format!("split: {} line(s) moved to {}", moved.len(), new_order.order_number);
        insert_status_log(&mut *tx, &source_order, source.status, source.status, Some(&note), actor, now).await?;
        let note = format!("split from {}", source.order_number);
        insert_status_log(&mut *tx, &new_order, new_order.status, new_order.status, Some(&note), actor, now).await?;
        tx.commit().await?;

        info!(
            order_number = %source.order_number,
            new_order_number = %new_order.order_number,
            moved = moved.len(),
            skipped = skipped.len(),
            "Order split"
        );
        Ok(SplitReport {
            source_order,
            new_order,
            moved,
            skipped,
        })
    }

    /// Moves every item of `other_ids` onto `main_id` and deletes the emptied
    /// orders.
    ///
    /// Orders that are missing, listed twice, paid, terminal, of another
    /// order type or customer, discounted, or carrying payment attempts are
    /// skipped and reported.
    pub async fn merge_orders(
        &self,
        shop_id: &str,
        main_id: &str,
        other_ids: &[String],
        actor: Option<&str>,
    ) -> DbResult<MergeReport> {
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;
        let main = fetch_order(&mut *tx, shop_id, main_id).await?;
        ensure_rearrangeable(&mut *tx, &main).await?;

        let mut skipped = Vec::new();
        let mut merged = Vec::new();
        let mut merged_numbers = Vec::new();
        let mut seen = HashSet::from([main.id.as_str()]);
        for other_id in other_ids {
            if other_id == &main.id {
                skipped.push(Skipped::new(other_id, "same as the target order"));
                continue;
            }
            if !seen.insert(other_id.as_str()) {
                skipped.push(Skipped::new(other_id, "order listed more than once"));
                continue;
            }
            let Some(other) = find_order(&mut *tx, shop_id, other_id).await? else {
                skipped.push(Skipped::new(other_id, "order not found"));
                continue;
            };
            if let Some(reason) = merge_blocker(&mut *tx, &main, &other).await? {
                skipped.push(Skipped::new(other_id, reason));
                continue;
            }

            sqlx::query("UPDATE order_items SET order_id = ?1 WHERE order_id = ?2")
                .bind(&main.id)
                .bind(&other.id)
                .execute(&mut *tx)
                .await?;
            let note = format!("merged into {}", main.order_number);
            insert_status_log(&mut *tx, &other, other.status, other.status, Some(&note), actor, now).await?;
            sqlx::query("DELETE FROM orders WHERE id = ?1")
                .bind(&other.id)
                .execute(&mut *tx)
                .await?;

            merged_numbers.push(other.order_number.clone());
            merged.push(other.id);
        }

        if merged.is_empty() {
            tx.commit().await?;
            debug!(order_number = %main.order_number, skipped = skipped.len(), "Nothing to merge");
            return Ok(MergeReport {
                order: main,
                merged_order_ids: merged,
                skipped,
            });
        }

        let order = recompute_totals(&mut *tx, &main, now).await?;
        let note = format!("merged {}", merged_numbers.join(", "));
        insert_status_log(&mut *tx, &order, main.status, main.status, Some(&note), actor, now).await?;
        tx.commit().await?;

        info!(
            order_number = %order.order_number,
            merged = merged.len(),
            skipped = skipped.len(),
            total = order.total_amount.cents(),
            "Orders merged"
        );
        Ok(MergeReport {
            order,
            merged_order_ids: merged,
            skipped,
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, shop_id: &str, order_id: &str) -> DbResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        find_order(&mut *conn, shop_id, order_id).await
    }

    pub async fn get_by_number(&self, shop_id: &str, order_number: &str) -> DbResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE shop_id = ?1 AND order_number = ?2",
        )
        .bind(shop_id)
        .bind(order_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    /// Item snapshots of an order.
    pub async fn items(&self, shop_id: &str, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT i.* FROM order_items i
            JOIN orders o ON o.id = i.order_id
            WHERE o.shop_id = ?1 AND i.order_id = ?2
            ORDER BY i.created_at, i.rowid
            "#,
        )
        .bind(shop_id)
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Status log of an order, oldest first. Kept after a merge deletes the
    /// order itself.
    pub async fn status_history(&self, shop_id: &str, order_id: &str) -> DbResult<Vec<OrderStatusLog>> {
        let logs = sqlx::query_as::<_, OrderStatusLog>(
            r#"
            SELECT * FROM order_status_logs
            WHERE shop_id = ?1 AND order_id = ?2
            ORDER BY created_at, rowid
            "#,
        )
        .bind(shop_id)
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    /// Newest orders first, optionally of one status.
    pub async fn list(&self, shop_id: &str, status: Option<OrderStatus>, limit: i64) -> DbResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT * FROM orders
            WHERE shop_id = ?1 AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?3
            "#,
        )
        .bind(shop_id)
        .bind(status)
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    /// Counts and revenue of orders created on `date` (UTC).
    pub async fn daily_summary(&self, shop_id: &str, date: NaiveDate) -> DbResult<DailySummary> {
        let start: DateTime<Utc> = date.and_time(NaiveTime::MIN).and_utc();
        let end = start + Duration::days(1);

        let (order_count, revenue, pending_count, preparing_count): (i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN status <> 'cancelled' THEN total_amount ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'preparing' THEN 1 ELSE 0 END), 0)
                FROM orders
                WHERE shop_id = ?1 AND created_at >= ?2 AND created_at < ?3
                "#,
            )
            .bind(shop_id)
            .bind(start)
            .bind(end)
            .fetch_one(&self.pool)
            .await?;

        Ok(DailySummary {
            date,
            order_count,
            revenue: Money::from_cents(revenue),
            pending_count,
            preparing_count,
        })
    }

    /// Tables that currently have open orders, for the floor view. A table
    /// with no open order is free.
    pub async fn table_status(&self, shop_id: &str) -> DbResult<Vec<TableStatus>> {
        let open = sqlx::query_as::<_, Order>(
            r#"
            SELECT * FROM orders
            WHERE shop_id = ?1
              AND table_number IS NOT NULL
              AND status NOT IN ('completed', 'cancelled', 'refunded')
            ORDER BY created_at, rowid
            "#,
        )
        .bind(shop_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(TableStatus::group(&open))
    }
}

// =============================================================================
// In-transaction helpers
// =============================================================================

pub(crate) async fn find_order(
    conn: &mut SqliteConnection,
    shop_id: &str,
    order_id: &str,
) -> DbResult<Option<Order>> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = ?1 AND shop_id = ?2")
        .bind(order_id)
        .bind(shop_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(order)
}

pub(crate) async fn fetch_order(conn: &mut SqliteConnection, shop_id: &str, order_id: &str) -> DbResult<Order> {
    find_order(conn, shop_id, order_id)
        .await?
        .ok_or_else(|| CoreError::OrderNotFound(order_id.to_string()).into())
}

async fn items_in(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<OrderItem>> {
    let items = sqlx::query_as::<_, OrderItem>(
        "SELECT * FROM order_items WHERE order_id = ?1 ORDER BY created_at, rowid",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(items)
}

async fn insert_order(conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, shop_id, order_number, user_id, status, order_type,
            subtotal, delivery_fee, discount_amount, total_amount,
            customer_name, customer_phone, customer_notes, delivery_address,
            delivery_time, pickup_time, table_number,
            payment_method, payment_status, user_coupon_id, version,
            created_at, updated_at, paid_at, completed_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, ?14,
            ?15, ?16, ?17,
            ?18, ?19, ?20, ?21,
            ?22, ?23, ?24, ?25
        )
        "#,
    )
    .bind(&order.id)
    .bind(&order.shop_id)
    .bind(&order.order_number)
    .bind(&order.user_id)
    .bind(order.status)
    .bind(order.order_type)
    .bind(order.subtotal)
    .bind(order.delivery_fee)
    .bind(order.discount_amount)
    .bind(order.total_amount)
    .bind(&order.customer_name)
    .bind(&order.customer_phone)
    .bind(&order.customer_notes)
    .bind(&order.delivery_address)
    .bind(order.delivery_time)
    .bind(order.pickup_time)
    .bind(&order.table_number)
    .bind(order.payment_method)
    .bind(order.payment_status)
    .bind(&order.user_coupon_id)
    .bind(order.version)
    .bind(order.created_at)
    .bind(order.updated_at)
    .bind(order.paid_at)
    .bind(order.completed_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_item(conn: &mut SqliteConnection, item: &OrderItem) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO order_items (
            id, order_id, product_id, sku_id, category_id, product_name, product_image,
            specifications, attributes, customization, unit_price, quantity, total_price,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
    )
    .bind(&item.id)
    .bind(&item.order_id)
    .bind(&item.product_id)
    .bind(&item.sku_id)
    .bind(&item.category_id)
    .bind(&item.product_name)
    .bind(&item.product_image)
    .bind(sqlx::types::Json(&item.specifications))
    .bind(sqlx::types::Json(&item.attributes))
    .bind(&item.customization)
    .bind(item.unit_price)
    .bind(item.quantity)
    .bind(item.total_price)
    .bind(item.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Appends one status log row. The table has no update or delete path.
pub(crate) async fn insert_status_log(
    conn: &mut SqliteConnection,
    order: &Order,
    old_status: OrderStatus,
    new_status: OrderStatus,
    notes: Option<&str>,
    actor: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO order_status_logs (
            id, shop_id, order_id, old_status, new_status, notes, actor, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(new_id())
    .bind(&order.shop_id)
    .bind(&order.id)
    .bind(old_status)
    .bind(new_status)
    .bind(notes)
    .bind(actor)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Applies one status transition with a compare-and-swap on
/// `(status, version)` and logs it.
///
/// ```text
/// UPDATE orders SET status = 'paid', version = version + 1, ...
///  WHERE id = ? AND status = 'pending' AND version = 3
///     0 rows → someone else moved the order first → ConcurrencyConflict
/// ```
pub(crate) async fn transition_order(
    conn: &mut SqliteConnection,
    order: &Order,
    to: OrderStatus,
    notes: Option<&str>,
    actor: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<Order> {
    if !order.status.can_transition_to(to) {
        return Err(CoreError::InvalidTransition {
            order_id: order.id.clone(),
            from: order.status.to_string(),
            to: to.to_string(),
        }
        .into());
    }

    let entering_paid = to == OrderStatus::Paid;
    let paid_at = if entering_paid { Some(now) } else { order.paid_at };
    let completed_at = if to == OrderStatus::Completed {
        Some(now)
    } else {
        order.completed_at
    };

    let updated = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET status = ?1,
            version = version + 1,
            updated_at = ?2,
            paid_at = ?3,
            payment_status = ?4,
            completed_at = ?5
        WHERE id = ?6 AND status = ?7 AND version = ?8
        RETURNING *
        "#,
    )
    .bind(to)
    .bind(now)
    .bind(paid_at)
    .bind(order.payment_status || entering_paid)
    .bind(completed_at)
    .bind(&order.id)
    .bind(order.status)
    .bind(order.version)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| CoreError::conflict("order", &order.id))?;

    insert_status_log(conn, order, order.status, to, notes, actor, now).await?;
    Ok(updated)
}

/// Writes new money columns, guarded by `version`.
async fn write_totals(
    conn: &mut SqliteConnection,
    order: &Order,
    totals: &OrderTotals,
    now: DateTime<Utc>,
) -> DbResult<Order> {
    debug_assert!(totals.holds_invariant());
    sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET subtotal = ?1,
            delivery_fee = ?2,
            discount_amount = ?3,
            total_amount = ?4,
            version = version + 1,
            updated_at = ?5
        WHERE id = ?6 AND version = ?7
        RETURNING *
        "#,
    )
    .bind(totals.subtotal)
    .bind(totals.delivery_fee)
    .bind(totals.discount_amount)
    .bind(totals.total_amount)
    .bind(now)
    .bind(&order.id)
    .bind(order.version)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| CoreError::conflict("order", &order.id).into())
}

/// Recomputes an order's totals from its current items.
async fn recompute_totals(conn: &mut SqliteConnection, order: &Order, now: DateTime<Utc>) -> DbResult<Order> {
    let items = items_in(conn, &order.id).await?;
    let totals = OrderTotals::compute(
        items.iter().map(|i| i.total_price),
        order.delivery_fee,
        order.discount_amount,
    );
    write_totals(conn, order, &totals, now).await
}

/// Pending or paid transactions exist for the order.
async fn has_live_transactions(conn: &mut SqliteConnection, order_id: &str) -> DbResult<bool> {
    let live: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM payment_transactions
        WHERE order_id = ?1 AND status IN ('pending', 'paid')
        "#,
    )
    .bind(order_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(live > 0)
}

/// Split and merge only rearrange orders nobody has paid for yet.
async fn ensure_rearrangeable(conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
    let reason = if order.status.is_terminal() {
        Some("order is closed")
    } else if order.payment_status {
        Some("order is already paid")
    } else if has_live_transactions(conn, &order.id).await? {
        Some("a payment is in progress")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(CoreError::invalid_order_state(&order.id, order.status, reason).into()),
        None => Ok(()),
    }
}

/// Why `other` cannot be merged into `main`, if it cannot.
async fn merge_blocker(conn: &mut SqliteConnection, main: &Order, other: &Order) -> DbResult<Option<String>> {
    if other.status.is_terminal() || other.payment_status {
        return Ok(Some(format!("order is {}", other.status)));
    }
    if other.order_type != main.order_type {
        return Ok(Some("order type differs".to_string()));
    }
    // points and coupons follow user_id
    if other.user_id != main.user_id {
        return Ok(Some("order belongs to another customer".to_string()));
    }
    if other.discount_amount.is_positive() || other.user_coupon_id.is_some() {
        return Ok(Some("order carries a discount".to_string()));
    }
    let attempts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payment_transactions WHERE order_id = ?1")
        .bind(&other.id)
        .fetch_one(&mut *conn)
        .await?;
    if attempts > 0 {
        return Ok(Some("order has payment attempts".to_string()));
    }
    Ok(None)
}
