//! Lossless decimal numeric type backed by rust_decimal.
//!
//! Provides canonical parsing from strings, conversion of raw on-chain integer
//! amounts, and formatting without exponent notation.

use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

/// Largest number of significant digits kept from a raw integer amount.
const MAX_RAW_DIGITS: usize = 28;
/// Largest scale rust_decimal can represent.
const MAX_SCALE: u32 = 28;

/// Errors raised while converting raw on-chain amounts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("raw amount is not an unsigned integer: {0:?}")]
    NotAnInteger(String),
    #[error("raw amount {raw} with {decimals} decimals does not fit a decimal")]
    Overflow { raw: String, decimals: u32 },
}

/// Lossless decimal numeric type for vault accounting.
///
/// Serializes to a JSON string so that no precision is lost on the wire.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::str")] RustDecimal);

impl Decimal {
    /// Create a Decimal from a RustDecimal.
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Decimal)
    }

    /// Convert a raw integer amount (as emitted on-chain) scaled by `decimals`.
    ///
    /// Exact whenever the amount has at most 28 significant digits. Longer
    /// amounts keep their 28 leading digits, rounded half-up, and a warning is
    /// logged when non-zero digits are discarded.
    pub fn from_raw(raw: &str, decimals: u32) -> Result<Self, AmountError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::NotAnInteger(raw.to_string()));
        }
        let digits = trimmed.trim_start_matches('0');
        if digits.is_empty() {
            return Ok(Decimal::zero());
        }

        let overflow = || AmountError::Overflow {
            raw: raw.to_string(),
            decimals,
        };

        let (kept, dropped) = if digits.len() > MAX_RAW_DIGITS {
            digits.split_at(MAX_RAW_DIGITS)
        } else {
            (digits, "")
        };
        let mut mantissa: i128 = kept.parse().map_err(|_| overflow())?;
        if dropped.bytes().next().is_some_and(|b| b >= b'5') {
            mantissa += 1;
        }
        if dropped.bytes().any(|b| b != b'0') {
            tracing::warn!(
                raw,
                decimals,
                "raw amount exceeds decimal precision, trailing digits rounded"
            );
        }

        let exponent = dropped.len() as i64 - i64::from(decimals);
        let value = if exponent >= 0 {
            let factor = power_of_ten(exponent as u32).ok_or_else(overflow)?;
            RustDecimal::from_i128_with_scale(mantissa, 0)
                .checked_mul(factor)
                .ok_or_else(overflow)?
        } else {
            let scale = (-exponent) as u32;
            if scale <= MAX_SCALE {
                RustDecimal::try_from_i128_with_scale(mantissa, scale).map_err(|_| overflow())?
            } else {
                let Some(divisor) = power_of_ten(scale - MAX_SCALE) else {
                    return Ok(Decimal::zero());
                };
                RustDecimal::try_from_i128_with_scale(mantissa, MAX_SCALE)
                    .map_err(|_| overflow())?
                    .checked_div(divisor)
                    .ok_or_else(overflow)?
            }
        };
        Ok(Decimal(value))
    }

    /// Format the Decimal as a canonical string (no exponent notation).
    pub fn to_canonical_string(&self) -> String {
        let normalized = self.0.normalize();
        format!("{}", normalized)
    }

    /// Get the underlying RustDecimal.
    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    /// The additive identity (0).
    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    /// The multiplicative identity (1).
    pub fn one() -> Self {
        Decimal(RustDecimal::ONE)
    }

    /// Returns true if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the value is > 0.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    /// Returns true if the value is < 0.
    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        Decimal(self.0.abs())
    }

    /// Division that returns `None` on a zero divisor or overflow.
    pub fn checked_div(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_div(rhs.0).map(Decimal)
    }

    pub fn checked_mul(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_mul(rhs.0).map(Decimal)
    }
}

fn power_of_ten(exponent: u32) -> Option<RustDecimal> {
    if exponent > MAX_SCALE {
        return None;
    }
    Some(RustDecimal::from_i128_with_scale(10i128.pow(exponent), 0))
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Decimal(RustDecimal::from(value))
    }
}

// Arithmetic operations
impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Decimal {
    fn add_assign(&mut self, rhs: Decimal) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::SubAssign for Decimal {
    fn sub_assign(&mut self, rhs: Decimal) {
        self.0 -= rhs.0;
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Div for Decimal {
    type Output = Decimal;

    fn div(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 / rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

impl Sum for Decimal {
    fn sum<I: Iterator<Item = Decimal>>(iter: I) -> Decimal {
        iter.fold(Decimal::zero(), |acc, d| acc + d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_decimal_parse_roundtrip() {
        let test_cases = vec!["123.456", "0.0001", "1000000", "-123.456", "0"];

        for s in test_cases {
            let decimal = d(s);
            let reparsed = d(&decimal.to_canonical_string());
            assert_eq!(decimal, reparsed, "roundtrip failed for {}", s);
        }
    }

    #[test]
    fn test_decimal_canonical_strips_trailing_zeros() {
        assert_eq!(d("1.500").to_canonical_string(), "1.5");
        assert_eq!(d("2.000").to_canonical_string(), "2");
    }

    #[test]
    fn test_decimal_arithmetic() {
        let a = d("10.5");
        let b = d("2.5");

        assert_eq!((a + b).to_canonical_string(), "13");
        assert_eq!((a - b).to_canonical_string(), "8");
        assert_eq!((a * b).to_canonical_string(), "26.25");

        let mut acc = a;
        acc += b;
        acc -= d("1");
        assert_eq!(acc, d("12"));
    }

    #[test]
    fn test_decimal_json_serialization_is_string() {
        let json = serde_json::to_value(d("123.456")).unwrap();
        assert_eq!(json, serde_json::json!("123.456"));

        let back: Decimal = serde_json::from_value(json).unwrap();
        assert_eq!(back, d("123.456"));
    }

    #[test]
    fn test_checked_div_zero_divisor() {
        assert_eq!(d("1").checked_div(Decimal::zero()), None);
        assert_eq!(d("1").checked_div(d("4")), Some(d("0.25")));
    }

    #[test]
    fn test_from_raw_scales_by_decimals() {
        assert_eq!(Decimal::from_raw("1000000000000000000", 18).unwrap(), d("1"));
        assert_eq!(Decimal::from_raw("2000000", 6).unwrap(), d("2"));
        assert_eq!(Decimal::from_raw("500000000000000000", 18).unwrap(), d("0.5"));
        assert_eq!(Decimal::from_raw("0", 18).unwrap(), Decimal::zero());
        assert_eq!(Decimal::from_raw("42", 0).unwrap(), d("42"));
    }

    #[test]
    fn test_from_raw_large_amount_keeps_leading_digits() {
        // 1234 tokens expressed with 30 decimals: 34 significant digits.
        let raw = format!("1234{}", "0".repeat(30));
        assert_eq!(Decimal::from_raw(&raw, 30).unwrap(), d("1234"));
    }

    #[test]
    fn test_from_raw_rejects_non_integers() {
        assert!(matches!(
            Decimal::from_raw("1.5", 18),
            Err(AmountError::NotAnInteger(_))
        ));
        assert!(matches!(
            Decimal::from_raw("-1", 18),
            Err(AmountError::NotAnInteger(_))
        ));
        assert!(matches!(
            Decimal::from_raw("", 18),
            Err(AmountError::NotAnInteger(_))
        ));
    }

    #[test]
    fn test_decimal_sum() {
        let total: Decimal = vec![d("0.1"), d("0.2"), d("0.7")].into_iter().sum();
        assert_eq!(total, d("1"));
    }

    #[test]
    fn test_decimal_ordering() {
        let a = d("10");
        let b = d("20");
        assert!(a < b);
        assert!(b > a);
        assert!(d("-1").is_negative());
        assert!(d("1").is_positive());
    }
}
