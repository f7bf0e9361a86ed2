use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::Error;

/// Fixed-point amount in minor units (cents).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const SCALE: i64 = 100; // 2 decimal places
    pub const TARGET_DECIMALS: u32 = 2;
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub fn as_minor(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Converts `value * 10^-scale` into minor units.
    ///
    /// Digits beyond the second decimal must be zero; anything finer than a cent is rejected
    /// instead of rounded.
    pub fn from_scaled_i128(value: i128, scale: u32) -> Option<Self> {
        let minor = if scale <= Self::TARGET_DECIMALS {
            let factor = 10i128.checked_pow(Self::TARGET_DECIMALS - scale)?;
            value.checked_mul(factor)?
        } else {
            let factor = 10i128.checked_pow(scale - Self::TARGET_DECIMALS)?;
            if value % factor != 0 {
                return None;
            }
            value / factor
        };
        i64::try_from(minor).ok().map(Self)
    }

    pub fn from_decimal_str(s: &str) -> Option<Self> {
        let s = s.trim();

        if s.is_empty() {
            return None;
        }
        let (neg, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let mut parts = body.split('.');
        let int_part = parts.next()?;
        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let int_val: i128 = int_part.parse().ok()?;
        let frac_opt = parts.next();
        if parts.next().is_some() {
            return None;
        }
        let (raw, scale) = match frac_opt {
            Some(frac) => {
                if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                // Trailing zeros carry no value; only the remaining digits widen the integer.
                let frac = frac.trim_end_matches('0');
                if frac.is_empty() {
                    (int_val, 0)
                } else {
                    let scale = u32::try_from(frac.len()).ok()?;
                    let widened = int_val.checked_mul(10i128.checked_pow(scale)?)?;
                    (widened.checked_add(frac.parse::<i128>().ok()?)?, scale)
                }
            }
            None => (int_val, 0),
        };
        let signed = if neg { -raw } else { raw };
        Money::from_scaled_i128(signed, scale)
    }

    pub fn from_decimal(value: Decimal) -> Option<Self> {
        Money::from_scaled_i128(value.mantissa(), value.scale())
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, Self::TARGET_DECIMALS)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let minor = self.0;
        let neg = minor < 0;
        let abs = minor.unsigned_abs();
        let scale = Self::SCALE.unsigned_abs();
        let int_part = abs / scale;
        let frac_part = abs % scale;
        if neg {
            write!(f, "-{}.{:02}", int_part, frac_part)
        } else {
            write!(f, "{}.{:02}", int_part, frac_part)
        }
    }
}

impl FromStr for Money {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::from_decimal_str(s)
            .ok_or_else(|| Error::Validation(format!("Invalid Money format: {}", s)))
    }
}

impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Money::from_decimal_str(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("Invalid Money format: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::Money;
    use rust_decimal::Decimal;

    #[test]
    fn parses_up_to_two_decimals() {
        assert_eq!(Money::from_decimal_str("100").unwrap().as_minor(), 10_000);
        assert_eq!(Money::from_decimal_str("10.5").unwrap().as_minor(), 1_050);
        assert_eq!(Money::from_decimal_str(" 0.01 ").unwrap().as_minor(), 1);
        assert_eq!(Money::from_decimal_str("10.500").unwrap().as_minor(), 1_050);
        assert_eq!(Money::from_decimal_str("-0.50").unwrap().as_minor(), -50);
        let long_zeros = format!("7.25{}", "0".repeat(60));
        assert_eq!(Money::from_decimal_str(&long_zeros).unwrap().as_minor(), 725);
        assert_eq!(Money::from_decimal_str("3.000").unwrap().as_minor(), 300);
        assert!(Money::from_decimal_str(&format!("7.25{}1", "0".repeat(60))).is_none());
    }

    #[test]
    fn rejects_sub_cent_precision_and_garbage() {
        assert!(Money::from_decimal_str("10.005").is_none());
        assert!(Money::from_decimal_str("").is_none());
        assert!(Money::from_decimal_str(".5").is_none());
        assert!(Money::from_decimal_str("1.2.3").is_none());
        assert!(Money::from_decimal_str("+5").is_none());
        assert!(Money::from_decimal_str("--5").is_none());
        assert!(Money::from_decimal_str("1.").is_none());
        assert!(Money::from_decimal_str("-1.").is_none());
        assert!(Money::from_decimal_str("1.-5").is_none());
        assert!(Money::from_decimal_str("abc").is_none());
    }

    #[test]
    fn displays_two_decimals() {
        assert_eq!(Money::from_minor(10_000).to_string(), "100.00");
        assert_eq!(Money::from_minor(7).to_string(), "0.07");
        assert_eq!(Money::from_minor(-1_050).to_string(), "-10.50");
    }

    #[test]
    fn decimal_round_trip_is_strict() {
        let d = Decimal::new(12_345, 2);
        assert_eq!(Money::from_decimal(d).unwrap().as_minor(), 12_345);
        assert_eq!(Money::from_minor(12_345).to_decimal(), d);
        assert!(Money::from_decimal(Decimal::new(12_345, 3)).is_none());
        assert_eq!(
            Money::from_decimal(Decimal::new(123_450, 3)).unwrap().as_minor(),
            12_345
        );
    }

    #[test]
    fn checked_arithmetic_does_not_wrap() {
        assert!(Money::from_minor(i64::MAX).checked_add(Money::from_minor(1)).is_none());
        assert_eq!(
            Money::from_minor(100).checked_sub(Money::from_minor(30)),
            Some(Money::from_minor(70))
        );
    }
}
