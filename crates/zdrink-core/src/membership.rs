//! # Membership & Points
//!
//! Members, tiers, the points ledger and the pure calculations behind them.
//!
//! ## Tier Resolution
//! ```text
//! tiers (active, ascending min_points):
//!   regular 0 ─── silver 1000 ─── gold 5000 ─── platinum 20000
//!
//! total_points = 6200  →  highest threshold <= 6200  →  gold
//! ```
//! The result depends only on `total_points` and the tier table, so
//! recomputing it is idempotent and independent of call order. Total points
//! never decrease, so a member never drops a tier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::{Money, Rate};
use crate::payment::PaymentMethodCode;

// =============================================================================
// Tier
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct MembershipTier {
    pub id: String,
    pub shop_id: String,
    pub code: String,
    pub name: String,
    pub min_points: i64,
    /// Share of the price a member of this tier pays, e.g. 9500 = 95%.
    pub discount_rate: Rate,
    pub is_active: bool,
}

impl MembershipTier {
    /// What a member of this tier saves on `amount`: the part of it above
    /// `amount × discount_rate`. Zero for inactive tiers.
    ///
    /// ```rust
    /// # use zdrink_core::membership::MembershipTier;
    /// # use zdrink_core::money::{Money, Rate};
    /// # let tier = MembershipTier {
    /// #     id: "t".into(), shop_id: "s".into(), code: "silver".into(), name: "Silver".into(),
    /// #     min_points: 1000, discount_rate: Rate::from_bps(9500), is_active: true,
    /// # };
    /// assert_eq!(tier.discount_for(Money::from_cents(2000)).cents(), 100);
    /// ```
    pub fn discount_for(&self, amount: Money) -> Money {
        if !self.is_active || !amount.is_positive() || self.discount_rate.bps() >= Rate::FULL.bps() {
            return Money::zero();
        }
        (amount - amount.percentage(self.discount_rate)).clamp_to(amount)
    }
}

/// Picks the highest active tier whose threshold is at or below
/// `total_points`. Ties on the threshold resolve by code.
pub fn resolve_tier(tiers: &[MembershipTier], total_points: i64) -> Option<&MembershipTier> {
    let mut active: Vec<&MembershipTier> = tiers.iter().filter(|t| t.is_active).collect();
    active.sort_by(|a, b| {
        a.min_points
            .cmp(&b.min_points)
            .then_with(|| a.code.cmp(&b.code))
    });
    active
        .into_iter()
        .take_while(|t| t.min_points <= total_points)
        .last()
}

// =============================================================================
// Member
// =============================================================================

/// A user's membership in one shop.
///
/// `available_points + used_points == total_points` always holds;
/// `total_points` only grows.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Member {
    pub id: String,
    pub shop_id: String,
    pub user_id: String,
    pub tier_code: Option<String>,
    pub total_points: i64,
    pub available_points: i64,
    pub used_points: i64,
    /// Stored value from recharges.
    pub balance: Money,
    pub total_consumption: Money,
    pub consumption_count: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Points Ledger
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum PointsKind {
    EarnOrder,
    EarnRecharge,
    ConsumeOrder,
    Refund,
    Adjust,
}

/// One points movement. Insert-only.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PointsLog {
    pub id: String,
    pub shop_id: String,
    pub member_id: String,
    pub user_id: String,
    pub kind: PointsKind,
    /// Signed: positive for earn / refund, negative for consume.
    pub points: i64,
    /// Available points right after this movement.
    pub balance_after: i64,
    pub reference_id: Option<String>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Rules
// =============================================================================

/// Per-shop earn rule.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PointsRule {
    pub shop_id: String,
    /// Points per currency unit in basis points: 1000 = 0.1 point per ¥1.
    pub earn_rate: Rate,
    pub is_active: bool,
}

impl PointsRule {
    /// Earn rate used when a shop has not configured one.
    pub const DEFAULT_EARN_RATE: Rate = Rate::from_bps(1000);
}

/// Points for an amount at `rate` points per currency unit, rounded down.
///
/// ```rust
/// use zdrink_core::membership::points_for;
/// use zdrink_core::money::{Money, Rate};
///
/// // ¥128.50 at 0.1 point per ¥1 → 12 points
/// assert_eq!(points_for(Money::from_cents(12850), Rate::from_bps(1000)), 12);
/// ```
pub fn points_for(amount: Money, rate: Rate) -> i64 {
    if amount.is_negative() || rate.bps() <= 0 {
        return 0;
    }
    (amount.cents() as i128 * rate.bps() as i128 / (100 * 10_000)) as i64
}

// =============================================================================
// Recharge
// =============================================================================

/// Gift policy for stored-value recharges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RechargePolicy {
    /// Recharges at or above this amount receive gifts.
    pub gift_threshold: Money,
    /// Bonus stored value as a share of the recharge.
    pub gift_rate: Rate,
    /// Bonus points per currency unit recharged.
    pub points_rate: Rate,
}

impl Default for RechargePolicy {
    /// Recharge ¥100 or more: +10% stored value and 1.5 points per ¥1.
    fn default() -> Self {
        RechargePolicy {
            gift_threshold: Money::from_cents(10_000),
            gift_rate: Rate::from_bps(1000),
            points_rate: Rate::from_bps(15_000),
        }
    }
}

impl RechargePolicy {
    /// Gift amount and gift points for a recharge.
    pub fn gifts_for(&self, amount: Money) -> (Money, i64) {
        if amount < self.gift_threshold {
            return (Money::zero(), 0);
        }
        (
            amount.percentage(self.gift_rate),
            points_for(amount, self.points_rate),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct MemberRecharge {
    pub id: String,
    pub shop_id: String,
    pub member_id: String,
    pub user_id: String,
    pub amount: Money,
    pub gift_amount: Money,
    pub gift_points: i64,
    pub payment_method: PaymentMethodCode,
    #[ts(as = "String")]
    pub paid_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(code: &str, min: i64, active: bool) -> MembershipTier {
        MembershipTier {
            id: code.into(),
            shop_id: "s1".into(),
            code: code.into(),
            name: code.into(),
            min_points: min,
            discount_rate: Rate::FULL,
            is_active: active,
        }
    }

    #[test]
    fn test_resolve_tier_picks_highest_reached() {
        // deliberately unsorted
        let tiers = vec![
            tier("gold", 5000, true),
            tier("regular", 0, true),
            tier("platinum", 20000, true),
            tier("silver", 1000, true),
        ];
        let code = |p| resolve_tier(&tiers, p).map(|t| t.code.as_str());
        assert_eq!(code(0), Some("regular"));
        assert_eq!(code(999), Some("regular"));
        assert_eq!(code(1000), Some("silver"));
        assert_eq!(code(6200), Some("gold"));
        assert_eq!(code(1_000_000), Some("platinum"));
    }

    #[test]
    fn test_tier_discount() {
        let mut silver = tier("silver", 1000, true);
        assert!(silver.discount_for(Money::from_cents(2000)).is_zero());

        silver.discount_rate = Rate::from_bps(9500);
        assert_eq!(silver.discount_for(Money::from_cents(2000)).cents(), 100);
        assert_eq!(silver.discount_for(Money::from_cents(1999)).cents(), 100);
        assert!(silver.discount_for(Money::zero()).is_zero());

        silver.discount_rate = Rate::from_bps(0);
        assert_eq!(silver.discount_for(Money::from_cents(800)).cents(), 800);

        silver.is_active = false;
        assert!(silver.discount_for(Money::from_cents(2000)).is_zero());
    }

    #[test]
    fn test_resolve_tier_skips_inactive_and_handles_gaps() {
        let tiers = vec![tier("silver", 1000, true), tier("gold", 5000, false)];
        assert!(resolve_tier(&tiers, 10).is_none());
        assert_eq!(
            resolve_tier(&tiers, 9000).map(|t| t.code.as_str()),
            Some("silver")
        );
    }

    #[test]
    fn test_resolve_tier_is_order_independent() {
        let a = vec![tier("a", 100, true), tier("b", 100, true)];
        let b = vec![tier("b", 100, true), tier("a", 100, true)];
        assert_eq!(
            resolve_tier(&a, 150).map(|t| &t.code),
            resolve_tier(&b, 150).map(|t| &t.code)
        );
    }

    #[test]
    fn test_points_for_floors() {
        assert_eq!(points_for(Money::from_cents(10_000), Rate::from_bps(1000)), 10);
        assert_eq!(points_for(Money::from_cents(999), Rate::from_bps(1000)), 0);
        assert_eq!(points_for(Money::from_cents(10_000), Rate::zero()), 0);
        assert_eq!(points_for(Money::from_cents(-500), Rate::from_bps(1000)), 0);
    }

    #[test]
    fn test_recharge_gifts() {
        let policy = RechargePolicy::default();
        assert_eq!(policy.gifts_for(Money::from_cents(5_000)), (Money::zero(), 0));
        let (gift, points) = policy.gifts_for(Money::from_cents(10_000));
        assert_eq!(gift.cents(), 1000);
        assert_eq!(points, 150);
    }
}
