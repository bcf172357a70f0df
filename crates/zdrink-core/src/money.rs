//! # Money and Rates
//!
//! `Money` is an amount in fen (cents); `Rate` is a ratio in basis points.
//! No floating point anywhere: a refund of 4999 + 1 reaches 5000 exactly, so
//! "fully refunded" is an equality test, and percentages round once, half
//! up, in [`Money::percentage`].
//!
//! ## Usage
//! ```rust
//! use zdrink_core::money::{Money, Rate};
//!
//! let price = Money::from_cents(1500); // ¥15.00
//! let line = price * 3;                // ¥45.00
//! let off = line.percentage(Rate::from_bps(1000)); // 10% of it
//! assert_eq!(off.cents(), 450);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

/// An amount in fen. Signed so deltas can be negative; stored as a plain
/// INTEGER column.
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  ProductSku.price ──► CartItem.unit_price ──► OrderItem.total_price     │
/// │                                                                         │
/// │  Σ items = Order.subtotal ──► + delivery_fee − discount = total_amount │
/// │                                                                         │
/// │  total_amount ──► PaymentTransaction.amount ──► refund_amount ≤ amount │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type), sqlx(transparent))]
#[serde(transparent)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// ```rust
    /// use zdrink_core::money::Money;
    ///
    /// assert_eq!(Money::from_major_minor(10, 99).cents(), 1099);
    /// assert_eq!(Money::from_major_minor(-5, 50).cents(), -550);
    /// ```
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies money by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Returns `rate` of this amount, rounded half up to the nearest cent.
    ///
    /// ## Implementation
    /// Integer math: `(amount * bps + 5000) / 10000`, computed in i128 so large
    /// amounts cannot overflow.
    ///
    /// ```rust
    /// use zdrink_core::money::{Money, Rate};
    ///
    /// // ¥10.00 × 8.25% = ¥0.825 → ¥0.83
    /// let part = Money::from_cents(1000).percentage(Rate::from_bps(825));
    /// assert_eq!(part.cents(), 83);
    /// ```
    pub fn percentage(&self, rate: Rate) -> Money {
        let cents = (self.0 as i128 * rate.bps() as i128 + 5000) / 10000;
        Money(cents as i64)
    }

    /// Clamps the value into `[0, max]`.
    ///
    /// Used for every discount so a total can never go negative.
    pub fn clamp_to(self, max: Money) -> Money {
        if self.0 < 0 {
            Money::zero()
        } else if self > max {
            max.max(Money::zero())
        } else {
            self
        }
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-oriented display, e.g. `¥10.99`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}¥{}.{:02}", sign, self.major().abs(), self.minor())
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

// =============================================================================
// Rate
// =============================================================================

/// A ratio in basis points (1 bps = 0.01%).
///
/// Used for percentage coupons, cashier discounts, tier discount rates and
/// the points earn rate.
///
/// ```text
/// 1000 bps = 10%     percentage coupon "10% off"
///  950 bps = 95%     gold tier pays 95% of the price
/// 1000 bps = 0.1     points rule: 1 point per ¥10
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type), sqlx(transparent))]
#[serde(transparent)]
#[ts(export)]
pub struct Rate(i64);

impl Rate {
    /// 100%.
    pub const FULL: Rate = Rate(10_000);

    #[inline]
    pub const fn from_bps(bps: i64) -> Self {
        Rate(bps)
    }

    /// Whole percent, e.g. `from_percent(10)` = 10%.
    #[inline]
    pub const fn from_percent(pct: i64) -> Self {
        Rate(pct * 100)
    }

    #[inline]
    pub const fn bps(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Rate(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
