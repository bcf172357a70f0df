//! # Coupon Repository
//!
//! Coupon definitions, claims and redemption.
//!
//! ## Claim Atomicity
//! ```text
//! claim_coupon("SAVE10", user)
//!   BEGIN (write lock)
//!     coupon exists?                    no → CouponNotFound
//!     active, in window, not exhausted? no → CouponUnavailable
//!     user's claims < limit_per_user?   no → ClaimLimitExceeded
//!     UPDATE coupons SET used_quantity = used_quantity + 1
//!      WHERE id = ? AND used_quantity < total_quantity
//!                                       0 rows → CouponUnavailable
//!     INSERT user_coupons (available)
//!   COMMIT
//! ```
//! `used_quantity` counts claims, so it can never pass `total_quantity`
//! however many requests race for the last unit.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::{begin_write, new_id};
use zdrink_core::coupon::{Coupon, CouponLine, NewCoupon, UserCoupon, UserCouponStatus};
use zdrink_core::{CoreError, Money};

/// Repository for coupons and user coupons.
#[derive(Debug, Clone)]
pub struct CouponRepository {
    pool: SqlitePool,
}

impl CouponRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CouponRepository { pool }
    }

    /// Creates a coupon. Codes are unique per shop.
    pub async fn create_coupon(&self, shop_id: &str, new: &NewCoupon) -> DbResult<Coupon> {
        new.validate()?;

        let coupon = Coupon {
            id: new_id(),
            shop_id: shop_id.to_string(),
            code: new.code.clone(),
            name: new.name.clone(),
            coupon_type: new.coupon_type,
            value: new.value,
            min_order_amount: new.min_order_amount,
            max_discount: new.max_discount,
            apply_to: new.apply_to,
            apply_to_ids: new.apply_to_ids.clone(),
            total_quantity: new.total_quantity,
            used_quantity: 0,
            limit_per_user: new.limit_per_user,
            valid_from: new.valid_from,
            valid_until: new.valid_until,
            is_active: true,
            created_at: Utc::now(),
        };
        debug!(shop_id = %shop_id, code = %coupon.code, "Creating coupon");

        sqlx::query(
            r#"
            INSERT INTO coupons (
                id, shop_id, code, name, coupon_type, value, min_order_amount,
                max_discount, apply_to, apply_to_ids, total_quantity, used_quantity,
                limit_per_user, valid_from, valid_until, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
        )
        .bind(&coupon.id)
        .bind(&coupon.shop_id)
        .bind(&coupon.code)
        .bind(&coupon.name)
        .bind(coupon.coupon_type)
        .bind(coupon.value)
        .bind(coupon.min_order_amount)
        .bind(coupon.max_discount)
        .bind(coupon.apply_to)
        .bind(sqlx::types::Json(&coupon.apply_to_ids))
        .bind(coupon.total_quantity)
        .bind(coupon.used_quantity)
        .bind(coupon.limit_per_user)
        .bind(coupon.valid_from)
        .bind(coupon.valid_until)
        .bind(coupon.is_active)
        .bind(coupon.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("coupon code", &coupon.code),
            other => other,
        })?;

        Ok(coupon)
    }

    pub async fn get_by_code(&self, shop_id: &str, code: &str) -> DbResult<Option<Coupon>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_code(&mut *conn, shop_id, code).await
    }

    /// Claims one instance of a coupon for a user.
    ///
    /// ## Errors
    /// - `CouponNotFound` - no such code in this shop
    /// - `CouponUnavailable` - inactive, outside its window, or exhausted
    /// - `ClaimLimitExceeded` - the user already holds `limit_per_user`
    pub async fn claim_coupon(&self, shop_id: &str, code: &str, user_id: &str) -> DbResult<UserCoupon> {
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;

        let coupon = fetch_by_code(&mut *tx, shop_id, code)
            .await?
            .ok_or_else(|| CoreError::CouponNotFound(code.to_string()))?;
        if !coupon.is_available(now) {
            return Err(unavailable(&coupon));
        }

        let held: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_coupons WHERE coupon_id = ?1 AND user_id = ?2",
        )
        .bind(&coupon.id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if held >= coupon.limit_per_user {
            return Err(CoreError::ClaimLimitExceeded {
                code: coupon.code.clone(),
                limit: coupon.limit_per_user,
            }
            .into());
        }

        let claimed = sqlx::query(
            r#"
            UPDATE coupons SET used_quantity = used_quantity + 1
            WHERE id = ?1 AND used_quantity < total_quantity
            "#,
        )
        .bind(&coupon.id)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            return Err(unavailable(&coupon));
        }

        let user_coupon = UserCoupon {
            id: new_id(),
            shop_id: shop_id.to_string(),
            coupon_id: coupon.id.clone(),
            user_id: user_id.to_string(),
            status: UserCouponStatus::Available,
            used_in_order: None,
            claimed_at: now,
            used_at: None,
        };
        sqlx::query(
            r#"
            INSERT INTO user_coupons (
                id, shop_id, coupon_id, user_id, status, used_in_order, claimed_at, used_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, NULL)
            "#,
        )
        .bind(&user_coupon.id)
        .bind(&user_coupon.shop_id)
        .bind(&user_coupon.coupon_id)
        .bind(&user_coupon.user_id)
        .bind(user_coupon.status)
        .bind(user_coupon.claimed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(shop_id = %shop_id, code = %coupon.code, user_id = %user_id, "Coupon claimed");
        Ok(user_coupon)
    }

    /// A user's coupons that can still be used.
    pub async fn available_coupons(&self, shop_id: &str, user_id: &str) -> DbResult<Vec<UserCoupon>> {
        let coupons = sqlx::query_as::<_, UserCoupon>(
            r#"
            SELECT * FROM user_coupons
            WHERE shop_id = ?1 AND user_id = ?2 AND status = 'available'
            ORDER BY claimed_at
            "#,
        )
        .bind(shop_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(coupons)
    }

    pub async fn user_coupon(&self, shop_id: &str, user_coupon_id: &str) -> DbResult<Option<UserCoupon>> {
        let coupon = sqlx::query_as::<_, UserCoupon>(
            "SELECT * FROM user_coupons WHERE id = ?1 AND shop_id = ?2",
        )
        .bind(user_coupon_id)
        .bind(shop_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(coupon)
    }

    /// Discount a coupon code would give an order amount with these lines.
    pub async fn calculate_discount(
        &self,
        shop_id: &str,
        code: &str,
        order_amount: Money,
        lines: &[CouponLine],
    ) -> DbResult<Money> {
        let coupon = self
            .get_by_code(shop_id, code)
            .await?
            .ok_or_else(|| CoreError::CouponNotFound(code.to_string()))?;
        Ok(coupon.calculate_discount(order_amount, lines, Utc::now()))
    }

    /// Marks available user coupons of coupons past `valid_until` expired.
    ///
    /// Returns how many user coupons changed.
    pub async fn expire_coupons(&self, shop_id: &str, now: DateTime<Utc>) -> DbResult<u64> {
        let mut tx = begin_write(&self.pool).await?;
        let result = sqlx::query(
            r#"
            UPDATE user_coupons SET status = 'expired'
            WHERE shop_id = ?1
              AND status = 'available'
              AND coupon_id IN (
                  SELECT id FROM coupons WHERE shop_id = ?1 AND valid_until < ?2
              )
            "#,
        )
        .bind(shop_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let changed = result.rows_affected();
        if changed > 0 {
            info!(shop_id = %shop_id, count = changed, "Expired user coupons");
        }
        Ok(changed)
    }
}

fn unavailable(coupon: &Coupon) -> DbError {
    CoreError::CouponUnavailable {
        code: coupon.code.clone(),
    }
    .into()
}

// =============================================================================
// In-transaction helpers
// =============================================================================

async fn fetch_by_code(
    conn: &mut SqliteConnection,
    shop_id: &str,
    code: &str,
) -> DbResult<Option<Coupon>> {
    let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE shop_id = ?1 AND code = ?2")
        .bind(shop_id)
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(coupon)
}

pub(crate) async fn fetch_by_id(conn: &mut SqliteConnection, coupon_id: &str) -> DbResult<Coupon> {
    sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE id = ?1")
        .bind(coupon_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CoreError::CouponNotFound(coupon_id.to_string()).into())
}

/// Loads a user coupon the owner can still redeem, with its coupon.
pub(crate) async fn fetch_redeemable(
    conn: &mut SqliteConnection,
    shop_id: &str,
    user_coupon_id: &str,
    user_id: &str,
) -> DbResult<(UserCoupon, Coupon)> {
    let user_coupon = sqlx::query_as::<_, UserCoupon>(
        "SELECT * FROM user_coupons WHERE id = ?1 AND shop_id = ?2 AND user_id = ?3",
    )
    .bind(user_coupon_id)
    .bind(shop_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| CoreError::UserCouponNotFound(user_coupon_id.to_string()))?;

    if user_coupon.status != UserCouponStatus::Available {
        return Err(CoreError::UserCouponUnavailable(user_coupon_id.to_string()).into());
    }
    let coupon = fetch_by_id(conn, &user_coupon.coupon_id).await?;
    Ok((user_coupon, coupon))
}

/// Redeems a user coupon for an order. Fails if it was redeemed meanwhile.
pub(crate) async fn mark_used(
    conn: &mut SqliteConnection,
    user_coupon_id: &str,
    order_id: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE user_coupons
        SET status = 'used', used_in_order = ?2, used_at = ?3
        WHERE id = ?1 AND status = 'available'
        "#,
    )
    .bind(user_coupon_id)
    .bind(order_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::UserCouponUnavailable(user_coupon_id.to_string()).into());
    }
    Ok(())
}

/// Hands a user coupon back after its order was cancelled.
pub(crate) async fn release(conn: &mut SqliteConnection, user_coupon_id: &str, order_id: &str) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE user_coupons
        SET status = 'available', used_in_order = NULL, used_at = NULL
        WHERE id = ?1 AND status = 'used' AND used_in_order = ?2
        "#,
    )
    .bind(user_coupon_id)
    .bind(order_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::shop::new_shop;
    use chrono::Duration;
    use zdrink_core::coupon::{ApplyTo, CouponType};
    use zdrink_core::ErrorKind;

    fn new_coupon(code: &str, total: i64, limit: i64) -> NewCoupon {
        let now = Utc::now();
        NewCoupon {
            code: code.to_string(),
            name: "Ten off".into(),
            coupon_type: CouponType::Fixed,
            value: 1000,
            min_order_amount: Money::from_cents(5000),
            max_discount: None,
            apply_to: ApplyTo::All,
            apply_to_ids: vec![],
            total_quantity: total,
            limit_per_user: limit,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(7),
        }
    }

    async fn setup() -> (Database, String) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let shop = db.shops().insert(&new_shop("Tea Corner")).await.unwrap();
        (db, shop.id)
    }

    #[tokio::test]
    async fn test_claim_twice_hits_limit() {
        let (db, shop_id) = setup().await;
        let coupons = db.coupons();
        coupons.create_coupon(&shop_id, &new_coupon("SAVE10", 100, 1)).await.unwrap();

        coupons.claim_coupon(&shop_id, "SAVE10", "user-1").await.unwrap();
        let err = coupons
            .claim_coupon(&shop_id, "SAVE10", "user-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(CoreError::ClaimLimitExceeded { limit: 1, .. })
        ));

        let coupon = coupons.get_by_code(&shop_id, "SAVE10").await.unwrap().unwrap();
        assert_eq!(coupon.used_quantity, 1);
        assert_eq!(coupons.available_coupons(&shop_id, "user-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_and_unknown() {
        let (db, shop_id) = setup().await;
        let coupons = db.coupons();
        coupons.create_coupon(&shop_id, &new_coupon("ONE", 1, 5)).await.unwrap();

        coupons.claim_coupon(&shop_id, "ONE", "user-1").await.unwrap();
        let err = coupons.claim_coupon(&shop_id, "ONE", "user-2").await.unwrap_err();
        assert!(matches!(err.as_domain(), Some(CoreError::CouponUnavailable { .. })));

        let err = coupons.claim_coupon(&shop_id, "NOPE", "user-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let (db, shop_id) = setup().await;
        let coupons = db.coupons();
        coupons.create_coupon(&shop_id, &new_coupon("SAVE10", 10, 1)).await.unwrap();
        let err = coupons
            .create_coupon(&shop_id, &new_coupon("SAVE10", 10, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_calculate_discount_by_code() {
        let (db, shop_id) = setup().await;
        let coupons = db.coupons();
        coupons.create_coupon(&shop_id, &new_coupon("SAVE10", 10, 1)).await.unwrap();

        let d = coupons
            .calculate_discount(&shop_id, "SAVE10", Money::from_cents(6000), &[])
            .await
            .unwrap();
        assert_eq!(d.cents(), 1000);
        let d = coupons
            .calculate_discount(&shop_id, "SAVE10", Money::from_cents(4999), &[])
            .await
            .unwrap();
        assert!(d.is_zero());
    }

    #[tokio::test]
    async fn test_expire_coupons() {
        let (db, shop_id) = setup().await;
        let coupons = db.coupons();
        coupons.create_coupon(&shop_id, &new_coupon("SOON", 10, 1)).await.unwrap();
        coupons.claim_coupon(&shop_id, "SOON", "user-1").await.unwrap();

        let changed = coupons.expire_coupons(&shop_id, Utc::now()).await.unwrap();
        assert_eq!(changed, 0);

        let changed = coupons
            .expire_coupons(&shop_id, Utc::now() + Duration::days(8))
            .await
            .unwrap();
        assert_eq!(changed, 1);
        assert!(coupons.available_coupons(&shop_id, "user-1").await.unwrap().is_empty());
    }
}
