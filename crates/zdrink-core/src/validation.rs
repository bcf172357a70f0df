//! # Input Validation
//!
//! Field checks every engine runs before it opens a transaction, so a bad
//! request fails with a [`ValidationError`] and writes nothing. The schema
//! backs the same rules up with NOT NULL, UNIQUE and CHECK constraints
//! (`stock_quantity >= 0`, `refund_amount <= amount`).
//!
//! ```rust
//! use zdrink_core::validation::{validate_code, validate_quantity};
//!
//! assert!(validate_code("coupon code", "SAVE10").is_ok());
//! assert!(validate_quantity(5).is_ok());
//! ```

use crate::error::ValidationError;
use crate::money::{Money, Rate};
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_CODE_LEN: usize = 50;
const MAX_NAME_LEN: usize = 200;

fn too_long(field: &str, text: &str, max: usize) -> ValidationResult<()> {
    if text.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

fn positive(field: &str, value: i64) -> ValidationResult<()> {
    if value <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn within(field: &str, value: i64, min: i64, max: i64) -> ValidationResult<()> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min,
            max,
        });
    }
    Ok(())
}

/// SKU, coupon and tier codes: non-blank, at most 50 characters of letters,
/// digits, `-` and `_`.
///
/// ```rust
/// use zdrink_core::validation::validate_code;
///
/// assert!(validate_code("sku", "LATTE-L").is_ok());
/// assert!(validate_code("sku", "").is_err());
/// assert!(validate_code("sku", "has space").is_err());
/// ```
pub fn validate_code(field: &str, code: &str) -> ValidationResult<()> {
    let code = code.trim();
    if code.is_empty() {
        return Err(ValidationError::required(field));
    }
    too_long(field, code, MAX_CODE_LEN)?;

    if let Some(bad) = code
        .chars()
        .find(|c| !(c.is_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("unexpected character {bad:?}"),
        });
    }
    Ok(())
}

/// Display names: non-blank, at most 200 characters.
pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::required(field));
    }
    too_long(field, name, MAX_NAME_LEN)
}

/// Optional free text (notes, customization, reasons). Only the length is
/// checked.
pub fn validate_text(field: &str, text: &str, max: usize) -> ValidationResult<()> {
    too_long(field, text, max)
}

/// Line quantities: `1..=MAX_ITEM_QUANTITY`.
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    positive("quantity", qty)?;
    within("quantity", qty, 1, MAX_ITEM_QUANTITY)
}

/// Prices may be zero (free toppings) but never negative.
pub fn validate_price(field: &str, price: Money) -> ValidationResult<()> {
    within(field, price.cents(), 0, i64::MAX)
}

/// Payments, refunds and recharges move a strictly positive amount.
pub fn validate_amount(field: &str, amount: Money) -> ValidationResult<()> {
    positive(field, amount.cents())
}

pub fn validate_points(points: i64) -> ValidationResult<()> {
    positive("points", points)
}

/// Rates stay within 0%..=100%.
pub fn validate_rate(field: &str, rate: Rate) -> ValidationResult<()> {
    within(field, rate.bps(), 0, Rate::FULL.bps())
}

/// Whether one more distinct line fits next to `current_items`.
pub fn validate_cart_size(current_items: usize) -> ValidationResult<()> {
    if current_items >= MAX_CART_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "cart items".to_string(),
            min: 0,
            max: MAX_CART_ITEMS as i64,
        });
    }
    Ok(())
}

/// Row ids are v4 uuids.
///
/// ```rust
/// use zdrink_core::validation::validate_id;
///
/// assert!(validate_id("order_id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_id("order_id", "not-a-uuid").is_err());
/// ```
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::required(field));
    }
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "not a uuid".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert!(validate_code("sku", "LATTE-L").is_ok());
        assert!(validate_code("sku", "tea_01").is_ok());
        assert!(validate_code("sku", "   ").is_err());
        assert!(validate_code("sku", &"A".repeat(51)).is_err());

        let err = validate_code("sku", "has space").unwrap_err();
        assert!(err.to_string().contains("sku"));
    }

    #[test]
    fn test_names() {
        assert!(validate_name("name", "珍珠奶茶").is_ok());
        assert!(validate_name("name", "").is_err());
        assert!(validate_name("name", &"茶".repeat(200)).is_ok());
        assert!(validate_name("name", &"茶".repeat(201)).is_err());
    }

    #[test]
    fn test_quantity_bounds() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_ITEM_QUANTITY).is_ok());
        assert!(matches!(
            validate_quantity(0),
            Err(ValidationError::MustBePositive { .. })
        ));
        assert!(matches!(
            validate_quantity(MAX_ITEM_QUANTITY + 1),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_money_and_rates() {
        assert!(validate_price("price", Money::zero()).is_ok());
        assert!(validate_price("price", Money::from_cents(-1)).is_err());
        assert!(validate_amount("amount", Money::from_cents(1)).is_ok());
        assert!(validate_amount("amount", Money::zero()).is_err());
        assert!(validate_rate("rate", Rate::FULL).is_ok());
        assert!(validate_rate("rate", Rate::from_bps(10_001)).is_err());
        assert!(validate_rate("rate", Rate::from_bps(-1)).is_err());
    }

    #[test]
    fn test_cart_size_and_ids() {
        assert!(validate_cart_size(MAX_CART_ITEMS - 1).is_ok());
        assert!(validate_cart_size(MAX_CART_ITEMS).is_err());
        assert!(validate_id("id", "").is_err());
        assert!(validate_id("id", "123").is_err());
    }
}
