//! # Membership Repository
//!
//! Members, the points ledger, tiers, earn rules and stored value.
//!
//! ## Points Movement
//! ```text
//!            total_points   available_points   used_points
//! earn  +p       +p              +p                 -
//! consume p       -              -p                +p     (CAS available >= p)
//! refund  p       -              +p                -p     (CAS used >= p)
//! ```
//! Each movement updates the member row and inserts one [`PointsLog`] in the
//! same transaction. Earning re-resolves the tier from `total_points`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::config::EngineSettings;
use crate::error::DbResult;
use crate::repository::{begin_write, new_id};
use zdrink_core::membership::{
    points_for, resolve_tier, Member, MemberRecharge, MembershipTier, PointsKind, PointsLog,
    PointsRule,
};
use zdrink_core::validation::{validate_amount, validate_code, validate_name, validate_points, validate_rate};
use zdrink_core::{CoreError, Money, Order, PaymentMethodCode, Rate, ValidationError};

/// Repository for members and their points and balance.
#[derive(Debug, Clone)]
pub struct MembershipRepository {
    pool: SqlitePool,
    settings: Arc<EngineSettings>,
}

impl MembershipRepository {
    pub fn new(pool: SqlitePool, settings: Arc<EngineSettings>) -> Self {
        MembershipRepository { pool, settings }
    }

    pub async fn member(&self, shop_id: &str, user_id: &str) -> DbResult<Option<Member>> {
        let member = sqlx::query_as::<_, Member>(
            "SELECT * FROM members WHERE shop_id = ?1 AND user_id = ?2",
        )
        .bind(shop_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(member)
    }

    /// Tier discount `user_id` gets on `amount`. Zero for non-members and
    /// members without a tier.
    pub async fn member_discount(&self, shop_id: &str, user_id: &str, amount: Money) -> DbResult<Money> {
        let mut conn = self.pool.acquire().await?;
        member_discount_in(&mut *conn, shop_id, user_id, amount).await
    }

    /// Returns the member, registering the user first if needed.
    pub async fn ensure_member(&self, shop_id: &str, user_id: &str) -> DbResult<Member> {
        let mut tx = begin_write(&self.pool).await?;
        let member = ensure_member_in(&mut *tx, shop_id, user_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(member)
    }

    /// Adds points to a member and re-resolves the tier.
    pub async fn earn_points(
        &self,
        shop_id: &str,
        user_id: &str,
        points: i64,
        kind: PointsKind,
        reference_id: Option<&str>,
        notes: Option<&str>,
    ) -> DbResult<PointsLog> {
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;
        let member = ensure_member_in(&mut *tx, shop_id, user_id, now).await?;
        let log = earn_in(&mut *tx, &member, points, kind, reference_id, notes, now).await?;
        tx.commit().await?;

        info!(shop_id = %shop_id, user_id = %user_id, points, kind = ?kind, "Points earned");
        Ok(log)
    }

    /// Spends points. Fails with `InsufficientPoints` and changes nothing when
    /// the member has fewer than `points` available.
    pub async fn consume_points(
        &self,
        shop_id: &str,
        user_id: &str,
        points: i64,
        reference_id: Option<&str>,
        notes: Option<&str>,
    ) -> DbResult<PointsLog> {
        let mut tx = begin_write(&self.pool).await?;
        let log = consume_in(&mut *tx, shop_id, user_id, points, reference_id, notes, Utc::now()).await?;
        tx.commit().await?;

        info!(shop_id = %shop_id, user_id = %user_id, points, "Points consumed");
        Ok(log)
    }

    /// Gives previously consumed points back.
    pub async fn refund_points(
        &self,
        shop_id: &str,
        user_id: &str,
        points: i64,
        reference_id: Option<&str>,
        notes: Option<&str>,
    ) -> DbResult<PointsLog> {
        let mut tx = begin_write(&self.pool).await?;
        let log = refund_points_in(&mut *tx, shop_id, user_id, points, reference_id, notes, Utc::now()).await?;
        tx.commit().await?;

        info!(shop_id = %shop_id, user_id = %user_id, points, "Points refunded");
        Ok(log)
    }

    /// Points ledger of a member, newest first.
    pub async fn points_history(&self, shop_id: &str, user_id: &str) -> DbResult<Vec<PointsLog>> {
        let logs = sqlx::query_as::<_, PointsLog>(
            r#"
            SELECT * FROM points_logs
            WHERE shop_id = ?1 AND user_id = ?2
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(shop_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    pub async fn upsert_tier(
        &self,
        shop_id: &str,
        code: &str,
        name: &str,
        min_points: i64,
        discount_rate: Rate,
        is_active: bool,
    ) -> DbResult<MembershipTier> {
        validate_code("code", code)?;
        validate_name("name", name)?;
        validate_rate("discount_rate", discount_rate)?;
        if min_points < 0 {
            return Err(ValidationError::OutOfRange {
                field: "min_points".into(),
                min: 0,
                max: i64::MAX,
            }
            .into());
        }

        let tier = sqlx::query_as::<_, MembershipTier>(
            r#"
            INSERT INTO membership_tiers (id, shop_id, code, name, min_points, discount_rate, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (shop_id, code) DO UPDATE SET
                name = excluded.name,
                min_points = excluded.min_points,
                discount_rate = excluded.discount_rate,
                is_active = excluded.is_active
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(shop_id)
        .bind(code)
        .bind(name)
        .bind(min_points)
        .bind(discount_rate)
        .bind(is_active)
        .fetch_one(&self.pool)
        .await?;

        debug!(shop_id = %shop_id, code = %code, min_points, "Tier saved");
        Ok(tier)
    }

    /// All tiers of a shop by threshold.
    pub async fn tiers(&self, shop_id: &str) -> DbResult<Vec<MembershipTier>> {
        let mut conn = self.pool.acquire().await?;
        tiers_in(&mut *conn, shop_id).await
    }

    pub async fn set_points_rule(&self, shop_id: &str, earn_rate: Rate, is_active: bool) -> DbResult<PointsRule> {
        if earn_rate.bps() < 0 {
            return Err(ValidationError::MustBePositive {
                field: "earn_rate".into(),
            }
            .into());
        }
        let rule = sqlx::query_as::<_, PointsRule>(
            r#"
            INSERT INTO points_rules (shop_id, earn_rate, is_active) VALUES (?1, ?2, ?3)
            ON CONFLICT (shop_id) DO UPDATE SET
                earn_rate = excluded.earn_rate,
                is_active = excluded.is_active
            RETURNING *
            "#,
        )
        .bind(shop_id)
        .bind(earn_rate)
        .bind(is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(rule)
    }

    /// The shop's earn rule, or the default rate when none is configured.
    pub async fn points_rule(&self, shop_id: &str) -> DbResult<PointsRule> {
        let mut conn = self.pool.acquire().await?;
        points_rule_in(&mut *conn, shop_id).await
    }

    /// Tops up stored value, adding gift value and points above the
    /// configured threshold.
    ///
    /// `balance` and `points` cannot pay for a recharge.
    pub async fn recharge(
        &self,
        shop_id: &str,
        user_id: &str,
        amount: Money,
        payment_method: PaymentMethodCode,
    ) -> DbResult<MemberRecharge> {
        validate_amount("amount", amount)?;
        if matches!(payment_method, PaymentMethodCode::Balance | PaymentMethodCode::Points) {
            return Err(ValidationError::NotAllowed {
                field: "payment_method".into(),
                allowed: vec!["wechat".into(), "alipay".into(), "cash".into()],
            }
            .into());
        }

        let (gift_amount, gift_points) = self.settings.recharge_policy.gifts_for(amount);
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;
        let member = ensure_member_in(&mut *tx, shop_id, user_id, now).await?;

        let recharge = MemberRecharge {
            id: new_id(),
            shop_id: shop_id.to_string(),
            member_id: member.id.clone(),
            user_id: user_id.to_string(),
            amount,
            gift_amount,
            gift_points,
            payment_method,
            paid_at: now,
        };
        sqlx::query(
            r#"
            INSERT INTO member_recharges (
                id, shop_id, member_id, user_id, amount, gift_amount, gift_points,
                payment_method, paid_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&recharge.id)
        .bind(&recharge.shop_id)
        .bind(&recharge.member_id)
        .bind(&recharge.user_id)
        .bind(recharge.amount)
        .bind(recharge.gift_amount)
        .bind(recharge.gift_points)
        .bind(recharge.payment_method)
        .bind(recharge.paid_at)
        .execute(&mut *tx)
        .await?;

        credit_balance_in(&mut *tx, shop_id, user_id, amount + gift_amount, now).await?;
        if gift_points > 0 {
            earn_in(
                &mut *tx,
                &member,
                gift_points,
                PointsKind::EarnRecharge,
                Some(&recharge.id),
                Some("recharge gift"),
                now,
            )
            .await?;
        }
        tx.commit().await?;

        info!(
            shop_id = %shop_id,
            user_id = %user_id,
            amount = amount.cents(),
            gift_amount = gift_amount.cents(),
            gift_points,
            "Member recharged"
        );
        Ok(recharge)
    }

    /// Takes stored value. Fails with `InsufficientBalance` when short.
    pub async fn debit_balance(&self, shop_id: &str, user_id: &str, amount: Money) -> DbResult<Member> {
        validate_amount("amount", amount)?;
        let mut tx = begin_write(&self.pool).await?;
        let member = debit_balance_in(&mut *tx, shop_id, user_id, amount, Utc::now()).await?;
        tx.commit().await?;
        Ok(member)
    }

    pub async fn credit_balance(&self, shop_id: &str, user_id: &str, amount: Money) -> DbResult<Member> {
        validate_amount("amount", amount)?;
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;
        ensure_member_in(&mut *tx, shop_id, user_id, now).await?;
        let member = credit_balance_in(&mut *tx, shop_id, user_id, amount, now).await?;
        tx.commit().await?;
        Ok(member)
    }
}

// =============================================================================
// In-transaction helpers
// =============================================================================

pub(crate) async fn ensure_member_in(
    conn: &mut SqliteConnection,
    shop_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> DbResult<Member> {
    if user_id.trim().is_empty() {
        return Err(ValidationError::required("user_id").into());
    }
    sqlx::query(
        r#"
        INSERT INTO members (id, shop_id, user_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?4)
        ON CONFLICT (shop_id, user_id) DO NOTHING
        "#,
    )
    .bind(new_id())
    .bind(shop_id)
    .bind(user_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let member = sqlx::query_as::<_, Member>(
        "SELECT * FROM members WHERE shop_id = ?1 AND user_id = ?2",
    )
    .bind(shop_id)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(member)
}

async fn fetch_member(conn: &mut SqliteConnection, shop_id: &str, user_id: &str) -> DbResult<Member> {
    sqlx::query_as::<_, Member>("SELECT * FROM members WHERE shop_id = ?1 AND user_id = ?2")
        .bind(shop_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CoreError::MemberNotFound(user_id.to_string()).into())
}

async fn tiers_in(conn: &mut SqliteConnection, shop_id: &str) -> DbResult<Vec<MembershipTier>> {
    let tiers = sqlx::query_as::<_, MembershipTier>(
        "SELECT * FROM membership_tiers WHERE shop_id = ?1 ORDER BY min_points, code",
    )
    .bind(shop_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(tiers)
}

pub(crate) async fn member_discount_in(
    conn: &mut SqliteConnection,
    shop_id: &str,
    user_id: &str,
    amount: Money,
) -> DbResult<Money> {
    let tier_code: Option<Option<String>> =
        sqlx::query_scalar("SELECT tier_code FROM members WHERE shop_id = ?1 AND user_id = ?2")
            .bind(shop_id)
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
    let Some(tier_code) = tier_code.flatten() else {
        return Ok(Money::zero());
    };
    let tiers = tiers_in(conn, shop_id).await?;
    Ok(tiers
        .iter()
        .find(|t| t.code == tier_code)
        .map(|t| t.discount_for(amount))
        .unwrap_or_else(Money::zero))
}

pub(crate) async fn points_rule_in(conn: &mut SqliteConnection, shop_id: &str) -> DbResult<PointsRule> {
    let rule = sqlx::query_as::<_, PointsRule>("SELECT * FROM points_rules WHERE shop_id = ?1")
        .bind(shop_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(rule.unwrap_or_else(|| PointsRule {
        shop_id: shop_id.to_string(),
        earn_rate: PointsRule::DEFAULT_EARN_RATE,
        is_active: true,
    }))
}

#[allow(clippy::too_many_arguments)]
async fn insert_points_log(
    conn: &mut SqliteConnection,
    member: &Member,
    kind: PointsKind,
    points: i64,
    balance_after: i64,
    reference_id: Option<&str>,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<PointsLog> {
    let log = PointsLog {
        id: new_id(),
        shop_id: member.shop_id.clone(),
        member_id: member.id.clone(),
        user_id: member.user_id.clone(),
        kind,
        points,
        balance_after,
        reference_id: reference_id.map(str::to_string),
        notes: notes.map(str::to_string),
        created_at: now,
    };
    sqlx::query(
        r#"
        INSERT INTO points_logs (
            id, shop_id, member_id, user_id, kind, points, balance_after,
            reference_id, notes, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&log.id)
    .bind(&log.shop_id)
    .bind(&log.member_id)
    .bind(&log.user_id)
    .bind(log.kind)
    .bind(log.points)
    .bind(log.balance_after)
    .bind(&log.reference_id)
    .bind(&log.notes)
    .bind(log.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(log)
}

/// Re-resolves a member's tier from `total_points`.
async fn refresh_tier(conn: &mut SqliteConnection, member_id: &str) -> DbResult<()> {
    let member = sqlx::query_as::<_, Member>("SELECT * FROM members WHERE id = ?1")
        .bind(member_id)
        .fetch_one(&mut *conn)
        .await?;
    let tiers = tiers_in(conn, &member.shop_id).await?;
    let tier_code = resolve_tier(&tiers, member.total_points).map(|t| t.code.clone());

    if tier_code != member.tier_code {
        sqlx::query("UPDATE members SET tier_code = ?2 WHERE id = ?1")
            .bind(member_id)
            .bind(&tier_code)
            .execute(&mut *conn)
            .await?;
        info!(
            member_id = %member_id,
            from = ?member.tier_code,
            to = ?tier_code,
            "Member tier changed"
        );
    }
    Ok(())
}

pub(crate) async fn earn_in(
    conn: &mut SqliteConnection,
    member: &Member,
    points: i64,
    kind: PointsKind,
    reference_id: Option<&str>,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<PointsLog> {
    validate_points(points)?;
    let available: i64 = sqlx::query_scalar(
        r#"
        UPDATE members
        SET total_points = total_points + ?2,
            available_points = available_points + ?2,
            updated_at = ?3
        WHERE id = ?1
        RETURNING available_points
        "#,
    )
    .bind(&member.id)
    .bind(points)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    let log = insert_points_log(conn, member, kind, points, available, reference_id, notes, now).await?;
    refresh_tier(conn, &member.id).await?;
    Ok(log)
}

pub(crate) async fn consume_in(
    conn: &mut SqliteConnection,
    shop_id: &str,
    user_id: &str,
    points: i64,
    reference_id: Option<&str>,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<PointsLog> {
    validate_points(points)?;
    let member = fetch_member(conn, shop_id, user_id).await?;

    let available: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE members
        SET available_points = available_points - ?2,
            used_points = used_points + ?2,
            updated_at = ?3
        WHERE id = ?1 AND available_points >= ?2
        RETURNING available_points
        "#,
    )
    .bind(&member.id)
    .bind(points)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    let available = available.ok_or(CoreError::InsufficientPoints {
        available: member.available_points,
        requested: points,
    })?;
    insert_points_log(
        conn,
        &member,
        PointsKind::ConsumeOrder,
        -points,
        available,
        reference_id,
        notes,
        now,
    )
    .await
}

pub(crate) async fn refund_points_in(
    conn: &mut SqliteConnection,
    shop_id: &str,
    user_id: &str,
    points: i64,
    reference_id: Option<&str>,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<PointsLog> {
    validate_points(points)?;
    let member = fetch_member(conn, shop_id, user_id).await?;

    let available: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE members
        SET available_points = available_points + ?2,
            used_points = used_points - ?2,
            updated_at = ?3
        WHERE id = ?1 AND used_points >= ?2
        RETURNING available_points
        "#,
    )
    .bind(&member.id)
    .bind(points)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    let available = available.ok_or_else(|| {
        ValidationError::inconsistent(
            "points",
            format!("{points} exceeds the {} points consumed", member.used_points),
        )
    })?;
    insert_points_log(
        conn,
        &member,
        PointsKind::Refund,
        points,
        available,
        reference_id,
        notes,
        now,
    )
    .await
}

pub(crate) async fn debit_balance_in(
    conn: &mut SqliteConnection,
    shop_id: &str,
    user_id: &str,
    amount: Money,
    now: DateTime<Utc>,
) -> DbResult<Member> {
    let member = fetch_member(conn, shop_id, user_id).await?;
    sqlx::query_as::<_, Member>(
        r#"
        UPDATE members SET balance = balance - ?2, updated_at = ?3
        WHERE id = ?1 AND balance >= ?2
        RETURNING *
        "#,
    )
    .bind(&member.id)
    .bind(amount)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| {
        CoreError::InsufficientBalance {
            available: member.balance.cents(),
            requested: amount.cents(),
        }
        .into()
    })
}

pub(crate) async fn credit_balance_in(
    conn: &mut SqliteConnection,
    shop_id: &str,
    user_id: &str,
    amount: Money,
    now: DateTime<Utc>,
) -> DbResult<Member> {
    sqlx::query_as::<_, Member>(
        r#"
        UPDATE members SET balance = balance + ?3, updated_at = ?4
        WHERE shop_id = ?1 AND user_id = ?2
        RETURNING *
        "#,
    )
    .bind(shop_id)
    .bind(user_id)
    .bind(amount)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| CoreError::MemberNotFound(user_id.to_string()).into())
}

/// Books a completed order against its member: consumption stats plus
/// `floor(total × earn rate)` points. Orders without a user are skipped.
pub(crate) async fn award_order_points(
    conn: &mut SqliteConnection,
    order: &Order,
    now: DateTime<Utc>,
) -> DbResult<Option<PointsLog>> {
    let Some(user_id) = order.user_id.as_deref() else {
        return Ok(None);
    };
    let member = ensure_member_in(conn, &order.shop_id, user_id, now).await?;

    sqlx::query(
        r#"
        UPDATE members
        SET total_consumption = total_consumption + ?2,
            consumption_count = consumption_count + 1,
            updated_at = ?3
        WHERE id = ?1
        "#,
    )
    .bind(&member.id)
    .bind(order.total_amount)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let rule = points_rule_in(conn, &order.shop_id).await?;
    let points = if rule.is_active {
        points_for(order.total_amount, rule.earn_rate)
    } else {
        0
    };
    if points == 0 {
        return Ok(None);
    }

    let log = earn_in(
        conn,
        &member,
        points,
        PointsKind::EarnOrder,
        Some(&order.order_number),
        None,
        now,
    )
    .await?;
    debug!(order_number = %order.order_number, user_id = %user_id, points, "Order points awarded");
    Ok(Some(log))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::shop::new_shop;
    use zdrink_core::ErrorKind;

    async fn setup() -> (Database, String) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let shop = db.shops().insert(&new_shop("Tea Corner")).await.unwrap();
        (db, shop.id)
    }

    #[tokio::test]
    async fn test_earn_upgrades_tier() {
        let (db, shop_id) = setup().await;
        let members = db.members();
        members.upsert_tier(&shop_id, "regular", "Regular", 0, Rate::FULL, true).await.unwrap();
        members
            .upsert_tier(&shop_id, "silver", "Silver", 1000, Rate::from_bps(9500), true)
            .await
            .unwrap();

        members
            .earn_points(&shop_id, "user-1", 400, PointsKind::Adjust, None, None)
            .await
            .unwrap();
        let member = members.member(&shop_id, "user-1").await.unwrap().unwrap();
        assert_eq!(member.tier_code.as_deref(), Some("regular"));

        let log = members
            .earn_points(&shop_id, "user-1", 700, PointsKind::Adjust, None, Some("promo"))
            .await
            .unwrap();
        assert_eq!(log.balance_after, 1100);
        let member = members.member(&shop_id, "user-1").await.unwrap().unwrap();
        assert_eq!(member.tier_code.as_deref(), Some("silver"));
        assert_eq!(member.total_points, 1100);
    }

    #[tokio::test]
    async fn test_consume_is_all_or_nothing() {
        let (db, shop_id) = setup().await;
        let members = db.members();
        members
            .earn_points(&shop_id, "user-1", 50, PointsKind::Adjust, None, None)
            .await
            .unwrap();

        let err = members
            .consume_points(&shop_id, "user-1", 80, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientResource);
        let member = members.member(&shop_id, "user-1").await.unwrap().unwrap();
        assert_eq!(member.available_points, 50);
        assert_eq!(members.points_history(&shop_id, "user-1").await.unwrap().len(), 1);

        let log = members
            .consume_points(&shop_id, "user-1", 30, Some("ORD1"), None)
            .await
            .unwrap();
        assert_eq!(log.points, -30);
        assert_eq!(log.balance_after, 20);
    }

    #[tokio::test]
    async fn test_refund_points_restores_available() {
        let (db, shop_id) = setup().await;
        let members = db.members();
        members
            .earn_points(&shop_id, "user-1", 100, PointsKind::Adjust, None, None)
            .await
            .unwrap();
        members.consume_points(&shop_id, "user-1", 60, None, None).await.unwrap();
        members.refund_points(&shop_id, "user-1", 60, None, None).await.unwrap();

        let member = members.member(&shop_id, "user-1").await.unwrap().unwrap();
        assert_eq!(member.available_points, 100);
        assert_eq!(member.used_points, 0);
        assert_eq!(member.total_points, 100);

        // more than was ever consumed
        assert!(members.refund_points(&shop_id, "user-1", 1, None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_recharge_with_gifts() {
        let (db, shop_id) = setup().await;
        let members = db.members();

        let small = members
            .recharge(&shop_id, "user-1", Money::from_cents(5_000), PaymentMethodCode::Cash)
            .await
            .unwrap();
        assert!(small.gift_amount.is_zero());

        let big = members
            .recharge(&shop_id, "user-1", Money::from_cents(10_000), PaymentMethodCode::Wechat)
            .await
            .unwrap();
        assert_eq!(big.gift_amount.cents(), 1000);
        assert_eq!(big.gift_points, 150);

        let member = members.member(&shop_id, "user-1").await.unwrap().unwrap();
        assert_eq!(member.balance.cents(), 16_000);
        assert_eq!(member.available_points, 150);

        let err = members
            .recharge(&shop_id, "user-1", Money::from_cents(100), PaymentMethodCode::Balance)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_debit_balance_guarded() {
        let (db, shop_id) = setup().await;
        let members = db.members();
        members.credit_balance(&shop_id, "user-1", Money::from_cents(500)).await.unwrap();

        let err = members
            .debit_balance(&shop_id, "user-1", Money::from_cents(501))
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(CoreError::InsufficientBalance { available: 500, requested: 501 })
        ));

        let member = members.debit_balance(&shop_id, "user-1", Money::from_cents(500)).await.unwrap();
        assert!(member.balance.is_zero());
    }

    #[tokio::test]
    async fn test_points_rule_default_and_override() {
        let (db, shop_id) = setup().await;
        let members = db.members();
        assert_eq!(
            members.points_rule(&shop_id).await.unwrap().earn_rate,
            PointsRule::DEFAULT_EARN_RATE
        );
        members.set_points_rule(&shop_id, Rate::from_bps(20_000), true).await.unwrap();
        assert_eq!(members.points_rule(&shop_id).await.unwrap().earn_rate.bps(), 20_000);
    }
}
