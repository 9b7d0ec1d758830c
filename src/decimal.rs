//! Arbitrary-precision decimal as delivered by the `decimal(p, s)` wire type.
//!
//! A value is kept as an integer part, the magnitude of its fractional digits,
//! and a scale (the number of fractional digits, leading zeros included). The
//! literal `123.00456` is stored as `(123, 456, 5)`.

use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use num_bigint::{BigInt, BigUint, Sign};
use rust_decimal::Decimal;

use crate::TrinoError;

/// Largest digit count a [`Decimal`] holds without losing precision.
pub const MAX_FIXED_PRECISION: u32 = 28;

#[derive(Clone, Debug)]
pub struct BigDecimal {
    integer: BigInt,
    fraction: BigUint,
    scale: u32,
    // Carries the sign when the integer part is zero, as in `-0.5`.
    negative: bool,
}

impl BigDecimal {
    /// Builds a decimal from its parts. The sign of `integer` is the sign of the value.
    pub fn new(integer: BigInt, fraction: BigUint, scale: u32) -> Self {
        let negative = integer.sign() == Sign::Minus;
        Self {
            integer,
            fraction,
            scale,
            negative,
        }
    }

    pub fn integer_part(&self) -> &BigInt {
        &self.integer
    }

    pub fn fractional_part(&self) -> &BigUint {
        &self.fraction
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Total number of significant integer digits plus the scale.
    pub fn precision(&self) -> u32 {
        integer_digits(&self.integer) + self.scale
    }

    pub fn is_negative(&self) -> bool {
        self.negative && !(self.integer.sign() == Sign::NoSign && self.fraction == BigUint::default())
    }

    /// Converts to a fixed-width 96-bit decimal.
    ///
    /// Fails with [`TrinoError::Overflow`] when the value needs more than
    /// [`MAX_FIXED_PRECISION`] digits.
    pub fn to_decimal(&self) -> Result<Decimal, TrinoError> {
        if self.precision() > MAX_FIXED_PRECISION {
            return Err(TrinoError::Overflow(format!(
                "precision of {self} exceeds the {MAX_FIXED_PRECISION} digit limit of a fixed-width decimal"
            )));
        }

        let magnitude = self.integer.magnitude() * pow10(self.scale) + &self.fraction;
        let mantissa = i128::try_from(magnitude).map_err(|_| {
            TrinoError::Overflow(format!("{self} is out of range for a fixed-width decimal"))
        })?;
        let mantissa = if self.is_negative() { -mantissa } else { mantissa };

        Decimal::try_from_i128_with_scale(mantissa, self.scale).map_err(|err| {
            TrinoError::Overflow(format!("{self} is out of range for a fixed-width decimal: {err}"))
        })
    }

    /// Fraction digits and scale with trailing zeros removed.
    fn normalized_fraction(&self) -> (BigUint, u32) {
        let ten = BigUint::from(10u32);
        let zero = BigUint::default();
        let mut fraction = self.fraction.clone();
        let mut scale = self.scale;
        while scale > 0 && fraction != zero && (&fraction % &ten) == zero {
            fraction /= &ten;
            scale -= 1;
        }
        if fraction == zero {
            scale = 0;
        }
        (fraction, scale)
    }
}

impl FromStr for BigDecimal {
    type Err = TrinoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || TrinoError::Conversion(format!("invalid decimal literal '{value}'"));
        let trimmed = value.trim();
        let (integer, fraction) = match trimmed.split_once('.') {
            Some((integer, fraction)) => (integer, Some(fraction)),
            None => (trimmed, None),
        };

        let negative = integer.starts_with('-');
        let integer_digits = integer.trim_start_matches(['-', '+']);
        let integer = if integer_digits.is_empty() {
            BigInt::default()
        } else {
            if !integer_digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            integer.parse::<BigInt>().map_err(|_| invalid())?
        };

        let (fraction, scale) = match fraction {
            Some(digits) if !digits.is_empty() => {
                if !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                let scale = u32::try_from(digits.len()).map_err(|_| invalid())?;
                (digits.parse::<BigUint>().map_err(|_| invalid())?, scale)
            }
            Some(_) if integer_digits.is_empty() => return Err(invalid()),
            _ => (BigUint::default(), 0),
        };

        if integer_digits.is_empty() && scale == 0 {
            return Err(invalid());
        }

        Ok(Self {
            integer,
            fraction,
            scale,
            negative,
        })
    }
}

impl fmt::Display for BigDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative && self.integer.sign() != Sign::Minus {
            f.write_str("-")?;
        }
        write!(f, "{}", self.integer)?;
        if self.scale > 0 {
            write!(
                f,
                ".{:0>width$}",
                self.fraction.to_string(),
                width = self.scale as usize
            )?;
        }
        Ok(())
    }
}

impl PartialEq for BigDecimal {
    fn eq(&self, other: &Self) -> bool {
        if self.integer != other.integer || self.is_negative() != other.is_negative() {
            return false;
        }
        // Align the lower-scale fraction to the higher scale.
        match self.scale.cmp(&other.scale) {
            std::cmp::Ordering::Equal => self.fraction == other.fraction,
            std::cmp::Ordering::Less => {
                &self.fraction * pow10(other.scale - self.scale) == other.fraction
            }
            std::cmp::Ordering::Greater => {
                self.fraction == &other.fraction * pow10(self.scale - other.scale)
            }
        }
    }
}

impl Eq for BigDecimal {}

impl Hash for BigDecimal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let (fraction, scale) = self.normalized_fraction();
        self.integer.hash(state);
        self.is_negative().hash(state);
        fraction.hash(state);
        scale.hash(state);
    }
}

impl TryFrom<&BigDecimal> for Decimal {
    type Error = TrinoError;

    fn try_from(value: &BigDecimal) -> Result<Self, Self::Error> {
        value.to_decimal()
    }
}

fn pow10(exponent: u32) -> BigUint {
    BigUint::from(10u32).pow(exponent)
}

fn integer_digits(value: &BigInt) -> u32 {
    if value.sign() == Sign::NoSign {
        0
    } else {
        value.magnitude().to_string().len() as u32
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::hash_map::DefaultHasher,
        hash::{Hash, Hasher},
        str::FromStr,
    };

    use num_bigint::{BigInt, BigUint};
    use rust_decimal::Decimal;

    use crate::{decimal::BigDecimal, TrinoError};

    fn dec(value: &str) -> BigDecimal {
        value.parse().expect("valid decimal literal")
    }

    fn hash_of(value: &BigDecimal) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn literal_round_trips() {
        assert_eq!(dec("678.12345").to_string(), "678.12345");
        assert_eq!(dec("123.00456").to_string(), "123.00456");
        assert_eq!(dec("-1.5").to_string(), "-1.5");
        assert_eq!(dec("-0.5").to_string(), "-0.5");
        assert_eq!(dec("42").to_string(), "42");
    }

    #[test]
    fn keeps_parts_and_scale() {
        let value = dec("123.00456");
        assert_eq!(value.integer_part(), &BigInt::from(123));
        assert_eq!(value.fractional_part(), &BigUint::from(456u32));
        assert_eq!(value.scale(), 5);
        assert_eq!(value.precision(), 8);
    }

    #[test]
    fn equality_aligns_scales() {
        assert_eq!(dec("1.2"), dec("1.20"));
        assert_eq!(dec("1.20"), dec("1.2"));
        assert_eq!(hash_of(&dec("1.2")), hash_of(&dec("1.200")));
        assert_ne!(dec("1.2"), dec("1.02"));
        assert_ne!(dec("0.5"), dec("-0.5"));
        assert_eq!(dec("-0.0"), dec("0"));
    }

    #[test]
    fn converts_to_fixed_width() {
        assert_eq!(
            dec("678.12345").to_decimal().expect("fits"),
            Decimal::from_str("678.12345").expect("valid")
        );
        assert_eq!(
            dec("-0.25").to_decimal().expect("fits"),
            Decimal::from_str("-0.25").expect("valid")
        );
    }

    #[test]
    fn more_than_28_digits_overflows() {
        let err = dec("123456789000000000.123400500099999999")
            .to_decimal()
            .expect_err("must overflow");
        assert!(matches!(err, TrinoError::Overflow(_)));
    }

    #[test]
    fn constructor_takes_sign_from_integer_part() {
        let value = BigDecimal::new(BigInt::from(-3), BigUint::from(25u32), 2);
        assert_eq!(value.to_string(), "-3.25");
        assert!(value.is_negative());
    }

    #[test]
    fn rejects_malformed_literals() {
        for literal in ["", "abc", "1.2.3", "1.x", ".", "-"] {
            assert!(
                literal.parse::<BigDecimal>().is_err(),
                "'{literal}' must be rejected"
            );
        }
    }
}
