//! Integer minor-unit (paise) currency type.
//!
//! All ledger and settlement arithmetic happens on whole paise. Rupee-facing
//! parsing and formatting goes through rust_decimal so no float ever touches
//! an amount.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Paise per rupee.
pub const PAISE_PER_RUPEE: i64 = 100;

/// Amount of money in paise.
///
/// Serializes as a plain integer number of paise.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyParseError {
    #[error("invalid amount: {0}")]
    Invalid(String),
    #[error("amount has more than two decimal places: {0}")]
    TooPrecise(String),
    #[error("amount out of range: {0}")]
    OutOfRange(String),
}

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_paise(paise: i64) -> Self {
        Money(paise)
    }

    pub fn from_rupees(rupees: i64) -> Self {
        Money(rupees * PAISE_PER_RUPEE)
    }

    pub fn paise(&self) -> i64 {
        self.0
    }

    pub fn zero() -> Self {
        Money::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Clamp negative amounts to zero.
    pub fn clamp_non_negative(self) -> Self {
        Money(self.0.max(0))
    }

    /// `max(0, self - rhs)`.
    pub fn saturating_sub_floor_zero(self, rhs: Money) -> Self {
        (self - rhs).clamp_non_negative()
    }

    /// Split this amount into `parts` equal shares, each floored to a whole
    /// rupee. The shares never sum to more than `self`.
    ///
    /// Returns zero when `parts` is zero or the amount is not positive.
    pub fn floor_share_whole_rupees(self, parts: u32) -> Money {
        if parts == 0 || self.0 <= 0 {
            return Money::ZERO;
        }
        let per_part_rupees = self.0 / (i64::from(parts) * PAISE_PER_RUPEE);
        Money::from_rupees(per_part_rupees)
    }

    /// Multiply by a count, `None` on overflow.
    pub fn checked_times(self, count: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(count)).map(Money)
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    /// Rupee value as a decimal with two fractional digits.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    /// Parse a rupee amount such as `"10000"` or `"8889.50"`.
    pub fn from_str_canonical(s: &str) -> Result<Self, MoneyParseError> {
        let value =
            Decimal::from_str(s.trim()).map_err(|_| MoneyParseError::Invalid(s.to_string()))?;
        Self::try_from(value)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = MoneyParseError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        let scaled = value * Decimal::from(PAISE_PER_RUPEE);
        if scaled.fract() != Decimal::ZERO {
            return Err(MoneyParseError::TooPrecise(value.to_string()));
        }
        scaled
            .to_i64()
            .map(Money)
            .ok_or_else(|| MoneyParseError::OutOfRange(value.to_string()))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl FromStr for Money {
    type Err = MoneyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl std::ops::Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_and_fractional_rupees() {
        assert_eq!(Money::from_str_canonical("10000").unwrap(), Money::from_rupees(10_000));
        assert_eq!(Money::from_str_canonical("8889.50").unwrap().paise(), 888_950);
        assert_eq!(Money::from_str_canonical(" 0.01 ").unwrap().paise(), 1);
    }

    #[test]
    fn test_parse_rejects_sub_paise_precision() {
        match Money::from_str_canonical("1.005") {
            Err(MoneyParseError::TooPrecise(_)) => {}
            other => panic!("Expected TooPrecise, got {:?}", other),
        }
        assert!(Money::from_str_canonical("abc").is_err());
    }

    #[test]
    fn test_display_in_rupees() {
        assert_eq!(Money::from_rupees(8889).to_string(), "8889.00");
        assert_eq!(Money::from_paise(-150).to_string(), "-1.50");
    }

    #[test]
    fn test_floor_share_never_exceeds_total() {
        let total = Money::from_rupees(10_000);
        let share = total.floor_share_whole_rupees(9);
        assert_eq!(share, Money::from_rupees(1111));
        assert!(share.checked_times(9).unwrap() <= total);

        // Fractional rupees in the pool are retained, not split.
        let odd = Money::from_paise(1_000_099);
        assert_eq!(odd.floor_share_whole_rupees(1), Money::from_rupees(10_000));
    }

    #[test]
    fn test_floor_share_degenerate_inputs() {
        assert_eq!(Money::from_rupees(500).floor_share_whole_rupees(0), Money::ZERO);
        assert_eq!(Money::from_rupees(-500).floor_share_whole_rupees(3), Money::ZERO);
    }

    #[test]
    fn test_checked_arithmetic_reports_overflow() {
        let huge = Money::from_paise(i64::MAX / 2);
        assert_eq!(huge.checked_times(3), None);
        assert_eq!(huge.checked_times(2), Some(Money::from_paise(i64::MAX - 1)));
        assert_eq!(huge.checked_add(huge), Some(Money::from_paise(i64::MAX - 1)));
        assert_eq!(Money::from_paise(i64::MAX).checked_add(Money::from_paise(1)), None);
    }

    #[test]
    fn test_saturating_sub_floor_zero() {
        let due = Money::from_rupees(100).saturating_sub_floor_zero(Money::from_rupees(250));
        assert_eq!(due, Money::ZERO);
    }

    #[test]
    fn test_json_is_integer_paise() {
        let json = serde_json::to_value(Money::from_rupees(12)).unwrap();
        assert_eq!(json, serde_json::json!(1200));
    }
}
