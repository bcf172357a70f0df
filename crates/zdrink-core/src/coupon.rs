//! # Coupon Domain
//!
//! Coupon definitions, user claims, and the discount calculation.
//!
//! ```text
//! Coupon (capacity counter: used_quantity <= total_quantity)
//!    │ claim_coupon
//!    ▼
//! UserCoupon: available ──► used     (once, in one order)
//!                  └──────► expired  (coupon's valid_until passed)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::{Money, Rate};
use crate::validation::{validate_code, validate_name, validate_price, validate_rate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum CouponType {
    /// `value` is an amount in cents.
    Fixed,
    /// `value` is a rate in basis points.
    Percentage,
    /// Free delivery. Not discounted by this engine.
    Shipping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ApplyTo {
    All,
    Category,
    Product,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Coupon {
    pub id: String,
    pub shop_id: String,
    pub code: String,
    pub name: String,
    pub coupon_type: CouponType,
    pub value: i64,
    pub min_order_amount: Money,
    pub max_discount: Option<Money>,
    pub apply_to: ApplyTo,
    /// Category ids or product ids, depending on `apply_to`.
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub apply_to_ids: Vec<String>,
    pub total_quantity: i64,
    pub used_quantity: i64,
    pub limit_per_user: i64,
    #[ts(as = "String")]
    pub valid_from: DateTime<Utc>,
    #[ts(as = "String")]
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// The parts of an order line a coupon scope looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponLine {
    pub product_id: String,
    pub category_id: Option<String>,
}

impl Coupon {
    /// Active, not exhausted, and `now` inside the validity window.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.is_redeemable(now) && self.used_quantity < self.total_quantity
    }

    /// Whether an already claimed instance can still be spent: active and
    /// `now` inside the validity window. Capacity was taken at claim time,
    /// so `used_quantity` is not consulted.
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.valid_from <= now && now <= self.valid_until
    }

    /// Whether at least one line falls inside the coupon's scope.
    pub fn applies_to(&self, lines: &[CouponLine]) -> bool {
        match self.apply_to {
            ApplyTo::All => true,
            ApplyTo::Product => lines
                .iter()
                .any(|l| self.apply_to_ids.iter().any(|id| *id == l.product_id)),
            ApplyTo::Category => lines.iter().any(|l| {
                l.category_id
                    .as_ref()
                    .map(|c| self.apply_to_ids.contains(c))
                    .unwrap_or(false)
            }),
        }
    }

    /// Discount for an order amount.
    ///
    /// Zero when the coupon is unavailable, the amount is under
    /// `min_order_amount`, or no line is in scope. Otherwise fixed → value,
    /// percentage → amount × rate capped at `max_discount`, shipping → 0.
    /// Never more than `order_amount`.
    ///
    /// ```rust
    /// # use chrono::{Duration, Utc};
    /// # use zdrink_core::coupon::*;
    /// # use zdrink_core::money::Money;
    /// # let now = Utc::now();
    /// # let coupon = Coupon {
    /// #     id: "c".into(), shop_id: "s".into(), code: "SAVE10".into(), name: "10 off".into(),
    /// #     coupon_type: CouponType::Fixed, value: 1000, min_order_amount: Money::from_cents(5000),
    /// #     max_discount: None, apply_to: ApplyTo::All, apply_to_ids: vec![],
    /// #     total_quantity: 10, used_quantity: 0, limit_per_user: 1,
    /// #     valid_from: now - Duration::days(1), valid_until: now + Duration::days(1),
    /// #     is_active: true, created_at: now,
    /// # };
    /// assert_eq!(coupon.calculate_discount(Money::from_cents(6000), &[], now).cents(), 1000);
    /// assert_eq!(coupon.calculate_discount(Money::from_cents(4000), &[], now).cents(), 0);
    /// ```
    pub fn calculate_discount(
        &self,
        order_amount: Money,
        lines: &[CouponLine],
        now: DateTime<Utc>,
    ) -> Money {
        if !self.is_available(now) {
            return Money::zero();
        }
        self.discount_for(order_amount, lines)
    }

    /// Discount a claimed user coupon grants at checkout.
    ///
    /// Same rules as [`calculate_discount`](Self::calculate_discount) except
    /// the capacity check: the last claimed unit leaves
    /// `used_quantity == total_quantity` and must still redeem.
    pub fn redeem_discount(
        &self,
        order_amount: Money,
        lines: &[CouponLine],
        now: DateTime<Utc>,
    ) -> Money {
        if !self.is_redeemable(now) {
            return Money::zero();
        }
        self.discount_for(order_amount, lines)
    }

    fn discount_for(&self, order_amount: Money, lines: &[CouponLine]) -> Money {
        if order_amount < self.min_order_amount || !self.applies_to(lines) {
            return Money::zero();
        }

        let discount = match self.coupon_type {
            CouponType::Fixed => Money::from_cents(self.value),
            CouponType::Percentage => {
                let raw = order_amount.percentage(Rate::from_bps(self.value));
                match self.max_discount {
                    Some(cap) if raw > cap => cap,
                    _ => raw,
                }
            }
            CouponType::Shipping => Money::zero(),
        };

        discount.clamp_to(order_amount)
    }
}

// =============================================================================
// User Coupon
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum UserCouponStatus {
    Available,
    Used,
    Expired,
}

/// One claimed instance of a coupon.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct UserCoupon {
    pub id: String,
    pub shop_id: String,
    pub coupon_id: String,
    pub user_id: String,
    pub status: UserCouponStatus,
    pub used_in_order: Option<String>,
    #[ts(as = "String")]
    pub claimed_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub used_at: Option<DateTime<Utc>>,
}

// =============================================================================
// New Coupon
// =============================================================================

/// Input for creating a coupon.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewCoupon {
    pub code: String,
    pub name: String,
    pub coupon_type: CouponType,
    pub value: i64,
    pub min_order_amount: Money,
    pub max_discount: Option<Money>,
    pub apply_to: ApplyTo,
    pub apply_to_ids: Vec<String>,
    pub total_quantity: i64,
    pub limit_per_user: i64,
    #[ts(as = "String")]
    pub valid_from: DateTime<Utc>,
    #[ts(as = "String")]
    pub valid_until: DateTime<Utc>,
}

impl NewCoupon {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_code("code", &self.code)?;
        validate_name("name", &self.name)?;
        validate_price("min_order_amount", self.min_order_amount)?;

        match self.coupon_type {
            CouponType::Fixed => validate_price("value", Money::from_cents(self.value))?,
            CouponType::Percentage => validate_rate("value", Rate::from_bps(self.value))?,
            CouponType::Shipping => {}
        }
        if let Some(cap) = self.max_discount {
            validate_price("max_discount", cap)?;
        }
        if self.total_quantity < 0 {
            return Err(ValidationError::OutOfRange {
                field: "total_quantity".into(),
                min: 0,
                max: i64::MAX,
            });
        }
        if self.limit_per_user < 1 {
            return Err(ValidationError::MustBePositive {
                field: "limit_per_user".into(),
            });
        }
        if self.valid_until < self.valid_from {
            return Err(ValidationError::inconsistent(
                "valid_until",
                "must not be before valid_from",
            ));
        }
        if self.apply_to != ApplyTo::All && self.apply_to_ids.is_empty() {
            return Err(ValidationError::required("apply_to_ids"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon(coupon_type: CouponType, value: i64) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: "c1".into(),
            shop_id: "s1".into(),
            code: "SAVE10".into(),
            name: "Save".into(),
            coupon_type,
            value,
            min_order_amount: Money::zero(),
            max_discount: None,
            apply_to: ApplyTo::All,
            apply_to_ids: vec![],
            total_quantity: 10,
            used_quantity: 0,
            limit_per_user: 1,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(1),
            is_active: true,
            created_at: now,
        }
    }

    fn line(product: &str, category: Option<&str>) -> CouponLine {
        CouponLine {
            product_id: product.into(),
            category_id: category.map(str::to_string),
        }
    }

    #[test]
    fn test_fixed_and_clamp() {
        let c = coupon(CouponType::Fixed, 1000);
        let now = Utc::now();
        assert_eq!(c.calculate_discount(Money::from_cents(3000), &[], now).cents(), 1000);
        assert_eq!(c.calculate_discount(Money::from_cents(600), &[], now).cents(), 600);
    }

    #[test]
    fn test_percentage_with_cap() {
        let mut c = coupon(CouponType::Percentage, 2000);
        let now = Utc::now();
        assert_eq!(c.calculate_discount(Money::from_cents(5000), &[], now).cents(), 1000);
        c.max_discount = Some(Money::from_cents(500));
        assert_eq!(c.calculate_discount(Money::from_cents(5000), &[], now).cents(), 500);
    }

    #[test]
    fn test_shipping_is_zero() {
        let c = coupon(CouponType::Shipping, 500);
        assert!(c
            .calculate_discount(Money::from_cents(5000), &[], Utc::now())
            .is_zero());
    }

    #[test]
    fn test_unavailable_returns_zero() {
        let now = Utc::now();
        let mut c = coupon(CouponType::Fixed, 1000);
        c.min_order_amount = Money::from_cents(5000);
        assert!(c.calculate_discount(Money::from_cents(4999), &[], now).is_zero());

        let mut exhausted = coupon(CouponType::Fixed, 1000);
        exhausted.used_quantity = exhausted.total_quantity;
        assert!(!exhausted.is_available(now));
        assert!(exhausted.calculate_discount(Money::from_cents(9000), &[], now).is_zero());

        let expired = coupon(CouponType::Fixed, 1000);
        assert!(!expired.is_available(now + Duration::days(2)));
    }

    #[test]
    fn test_last_claimed_unit_still_redeems() {
        let now = Utc::now();
        let mut c = coupon(CouponType::Fixed, 500);
        c.total_quantity = 1;
        c.used_quantity = 1;
        c.min_order_amount = Money::from_cents(1000);

        assert!(!c.is_available(now));
        assert!(c.is_redeemable(now));
        assert!(c.calculate_discount(Money::from_cents(2000), &[], now).is_zero());
        assert_eq!(c.redeem_discount(Money::from_cents(2000), &[], now).cents(), 500);
        assert!(c.redeem_discount(Money::from_cents(999), &[], now).is_zero());

        assert!(!c.is_redeemable(now + Duration::days(2)));
        c.is_active = false;
        assert!(c.redeem_discount(Money::from_cents(2000), &[], now).is_zero());
    }

    #[test]
    fn test_scope_matching() {
        let now = Utc::now();
        let mut c = coupon(CouponType::Fixed, 300);
        c.apply_to = ApplyTo::Category;
        c.apply_to_ids = vec!["tea".into()];

        let coffee = [line("p1", Some("coffee"))];
        let mixed = [line("p1", Some("coffee")), line("p2", Some("tea"))];
        assert!(c.calculate_discount(Money::from_cents(2000), &coffee, now).is_zero());
        assert_eq!(c.calculate_discount(Money::from_cents(2000), &mixed, now).cents(), 300);

        c.apply_to = ApplyTo::Product;
        c.apply_to_ids = vec!["p1".into()];
        assert!(c.applies_to(&coffee));
        assert!(!c.applies_to(&[line("p9", None)]));
    }

    #[test]
    fn test_new_coupon_validation() {
        let now = Utc::now();
        let mut input = NewCoupon {
            code: "SAVE10".into(),
            name: "Save ten".into(),
            coupon_type: CouponType::Percentage,
            value: 1000,
            min_order_amount: Money::zero(),
            max_discount: None,
            apply_to: ApplyTo::All,
            apply_to_ids: vec![],
            total_quantity: 100,
            limit_per_user: 1,
            valid_from: now,
            valid_until: now + Duration::days(7),
        };
        assert!(input.validate().is_ok());

        input.value = 10_001;
        assert!(input.validate().is_err());
        input.value = 1000;

        input.apply_to = ApplyTo::Product;
        assert!(input.validate().is_err());
        input.apply_to = ApplyTo::All;

        input.valid_until = now - Duration::days(1);
        assert!(input.validate().is_err());
    }
}
