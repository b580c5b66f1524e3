//! Exact decimal values.
//!
//! The server transports decimals either as IEEE 754-2008 decimal128
//! (113-bit coefficient, 14-bit biased exponent) or as fixed-point integers of
//! 8, 12 or 16 bytes with the scale taken from the column. Both are exposed as
//! [`HdbDecimal`], an exact `mantissa * 10^exponent` rational.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::str::FromStr;

use crate::error::TypeError;

const DEC128_BIAS: i32 = 6176;
const DEC128_MIN_EXP: i32 = -6176;
const DEC128_MAX_EXP: i32 = 6111;
const DEC128_MANTISSA_BITS: u32 = 113;
const DEC128_MANTISSA_MASK: u128 = (1 << DEC128_MANTISSA_BITS) - 1;

/// Size in bytes of a decimal128 value.
pub const DECIMAL128_SIZE: usize = 16;

/// Exact decimal number `mantissa * 10^exponent`.
///
/// Equality and hashing are by value: `1.50` equals `1.5`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HdbDecimal {
    mantissa: i128,
    exponent: i32,
}

impl HdbDecimal {
    /// Zero.
    pub const ZERO: Self = Self {
        mantissa: 0,
        exponent: 0,
    };

    /// Create from coefficient and power of ten.
    #[must_use]
    pub const fn new(mantissa: i128, exponent: i32) -> Self {
        Self { mantissa, exponent }
    }

    /// Coefficient.
    #[must_use]
    pub const fn mantissa(&self) -> i128 {
        self.mantissa
    }

    /// Power of ten.
    #[must_use]
    pub const fn exponent(&self) -> i32 {
        self.exponent
    }

    /// Whether the value is negative.
    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.mantissa < 0
    }

    /// Strip trailing zeros from the coefficient.
    #[must_use]
    pub fn normalized(&self) -> Self {
        if self.mantissa == 0 {
            return Self::ZERO;
        }
        let mut m = self.mantissa;
        let mut e = self.exponent;
        while m % 10 == 0 && e < i32::MAX {
            m /= 10;
            e += 1;
        }
        Self::new(m, e)
    }

    /// Coefficient for a fixed scale, rounding half away from zero.
    ///
    /// Returns `None` if the result does not fit in an `i128`.
    #[must_use]
    pub fn rescale(&self, scale: i32) -> Option<i128> {
        let shift = self.exponent.checked_add(scale)?;
        if shift >= 0 {
            pow10(shift).and_then(|p| self.mantissa.checked_mul(p))
        } else {
            let Some(p) = pow10(-shift) else {
                // everything is below half a unit
                return Some(0);
            };
            let q = self.mantissa / p;
            let r = (self.mantissa % p).abs();
            if r.checked_mul(2)? >= p {
                Some(if self.mantissa < 0 { q - 1 } else { q + 1 })
            } else {
                Some(q)
            }
        }
    }

    /// Integer value, if the number has no fractional part.
    #[must_use]
    pub fn to_i128(&self) -> Option<i128> {
        let n = self.normalized();
        if n.exponent < 0 {
            None
        } else {
            pow10(n.exponent).and_then(|p| n.mantissa.checked_mul(p))
        }
    }

    /// Nearest `f64`.
    #[must_use]
    pub fn to_f64(&self) -> f64 {
        // going through the decimal string keeps correct rounding
        self.to_string().parse().unwrap_or(f64::NAN)
    }

    /// Encode as decimal128.
    pub fn to_decimal128(&self) -> Result<[u8; DECIMAL128_SIZE], TypeError> {
        let mut m = self.mantissa.unsigned_abs();
        let mut e = self.exponent;

        while m > DEC128_MANTISSA_MASK || e < DEC128_MIN_EXP {
            if m % 10 != 0 || e == i32::MAX {
                return Err(TypeError::InvalidDecimal(format!(
                    "{self} exceeds decimal128 precision"
                )));
            }
            m /= 10;
            e += 1;
        }
        while e > DEC128_MAX_EXP {
            m = m
                .checked_mul(10)
                .filter(|m| *m <= DEC128_MANTISSA_MASK)
                .ok_or_else(|| TypeError::InvalidDecimal(format!("{self} exceeds decimal128 range")))?;
            e -= 1;
        }

        let mut bits = m | (((e + DEC128_BIAS) as u128) << DEC128_MANTISSA_BITS);
        if self.mantissa < 0 {
            bits |= 1 << 127;
        }
        Ok(bits.to_le_bytes())
    }

    /// Decode a decimal128 value.
    #[must_use]
    pub fn from_decimal128(raw: [u8; DECIMAL128_SIZE]) -> Self {
        let bits = u128::from_le_bytes(raw);
        let exponent = ((bits >> DEC128_MANTISSA_BITS) & 0x3FFF) as i32 - DEC128_BIAS;
        let magnitude = (bits & DEC128_MANTISSA_MASK) as i128;
        let mantissa = if bits >> 127 == 1 { -magnitude } else { magnitude };
        Self { mantissa, exponent }
    }

    /// Whether a raw decimal128 value is the NULL marker.
    #[must_use]
    pub const fn is_null_decimal128(raw: &[u8; DECIMAL128_SIZE]) -> bool {
        raw[15] & 0x70 == 0x70
    }

    /// Encode as a fixed-point little-endian integer of `size` bytes.
    pub fn to_fixed(&self, size: usize, scale: i32) -> Result<Vec<u8>, TypeError> {
        let target = fixed_name(size);
        let v = self
            .rescale(scale)
            .ok_or(TypeError::OutOfRange { target_type: target })?;
        let bits = (size * 8) as u32;
        if bits < 128 {
            let max = (1i128 << (bits - 1)) - 1;
            if v > max || v < -max - 1 {
                return Err(TypeError::OutOfRange { target_type: target });
            }
        }
        Ok(v.to_le_bytes()[..size].to_vec())
    }

    /// Decode a fixed-point little-endian integer.
    #[must_use]
    pub fn from_fixed(raw: &[u8], scale: i32) -> Self {
        let mut buf = if raw.last().is_some_and(|b| b & 0x80 != 0) {
            [0xFFu8; 16]
        } else {
            [0u8; 16]
        };
        let n = raw.len().min(16);
        buf[..n].copy_from_slice(&raw[..n]);
        Self::new(i128::from_le_bytes(buf), -scale)
    }
}

fn fixed_name(size: usize) -> &'static str {
    match size {
        8 => "FIXED8",
        12 => "FIXED12",
        _ => "FIXED16",
    }
}

fn pow10(exp: i32) -> Option<i128> {
    u32::try_from(exp).ok().and_then(|e| 10i128.checked_pow(e))
}

impl PartialEq for HdbDecimal {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.normalized(), other.normalized());
        a.mantissa == b.mantissa && (a.mantissa == 0 || a.exponent == b.exponent)
    }
}

impl Eq for HdbDecimal {}

impl Hash for HdbDecimal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let n = self.normalized();
        n.mantissa.hash(state);
        n.exponent.hash(state);
    }
}

impl From<i64> for HdbDecimal {
    fn from(v: i64) -> Self {
        Self::new(i128::from(v), 0)
    }
}

impl From<i32> for HdbDecimal {
    fn from(v: i32) -> Self {
        Self::new(i128::from(v), 0)
    }
}

impl TryFrom<f64> for HdbDecimal {
    type Error = TypeError;

    fn try_from(v: f64) -> Result<Self, Self::Error> {
        if !v.is_finite() {
            return Err(TypeError::InvalidDecimal(v.to_string()));
        }
        format!("{v:e}").parse()
    }
}

impl FromStr for HdbDecimal {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::InvalidDecimal(s.to_owned());
        let s = s.trim();
        let (body, exp) = match s.find(['e', 'E']) {
            Some(i) => (&s[..i], s[i + 1..].parse::<i32>().map_err(|_| invalid())?),
            None => (s, 0),
        };
        let (negative, digits) = match body.as_bytes().first() {
            Some(b'-') => (true, &body[1..]),
            Some(b'+') => (false, &body[1..]),
            _ => (false, body),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let mut mantissa: i128 = 0;
        for c in int_part.bytes().chain(frac_part.bytes()) {
            if !c.is_ascii_digit() {
                return Err(invalid());
            }
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(c - b'0')))
                .ok_or_else(invalid)?;
        }
        let frac_len = i32::try_from(frac_part.len()).map_err(|_| invalid())?;
        let exponent = exp.checked_sub(frac_len).ok_or_else(invalid)?;
        Ok(Self::new(if negative { -mantissa } else { mantissa }, exponent))
    }
}

impl fmt::Display for HdbDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.unsigned_abs().to_string();
        let sign = if self.mantissa < 0 { "-" } else { "" };
        match self.exponent {
            0 => write!(f, "{sign}{digits}"),
            e if e > 0 && e <= 38 => write!(f, "{sign}{digits}{}", "0".repeat(e as usize)),
            e if e < 0 && e >= -76 => {
                let scale = (-e) as usize;
                if digits.len() > scale {
                    let (int, frac) = digits.split_at(digits.len() - scale);
                    write!(f, "{sign}{int}.{frac}")
                } else {
                    write!(f, "{sign}0.{}{digits}", "0".repeat(scale - digits.len()))
                }
            }
            e => write!(f, "{sign}{digits}E{e}"),
        }
    }
}

#[cfg(feature = "decimal")]
impl From<rust_decimal::Decimal> for HdbDecimal {
    fn from(d: rust_decimal::Decimal) -> Self {
        Self::new(d.mantissa(), -(d.scale() as i32))
    }
}

#[cfg(feature = "decimal")]
impl TryFrom<HdbDecimal> for rust_decimal::Decimal {
    type Error = TypeError;

    fn try_from(v: HdbDecimal) -> Result<Self, Self::Error> {
        let out_of_range = || TypeError::OutOfRange {
            target_type: "rust_decimal::Decimal",
        };
        let v = if v.exponent < -28 { v.normalized() } else { v };
        if v.exponent >= 0 {
            let m = pow10(v.exponent)
                .and_then(|p| v.mantissa.checked_mul(p))
                .ok_or_else(out_of_range)?;
            rust_decimal::Decimal::try_from_i128_with_scale(m, 0).map_err(|_| out_of_range())
        } else {
            rust_decimal::Decimal::try_from_i128_with_scale(v.mantissa, (-v.exponent) as u32)
                .map_err(|_| out_of_range())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_and_display() {
        let d: HdbDecimal = "-123.4500".parse().unwrap();
        assert_eq!(d.mantissa(), -1_234_500);
        assert_eq!(d.exponent(), -4);
        assert_eq!(d.to_string(), "-123.4500");
        assert_eq!("0.001".parse::<HdbDecimal>().unwrap().to_string(), "0.001");
        assert_eq!("1.5e3".parse::<HdbDecimal>().unwrap(), HdbDecimal::from(1500i64));
        assert!("1.2.3".parse::<HdbDecimal>().is_err());
        assert!("".parse::<HdbDecimal>().is_err());
    }

    #[test]
    fn test_value_equality() {
        assert_eq!(HdbDecimal::new(150, -2), HdbDecimal::new(15, -1));
        assert_eq!(HdbDecimal::new(0, 5), HdbDecimal::ZERO);
        assert_ne!(HdbDecimal::new(15, -1), HdbDecimal::new(15, -2));
    }

    #[test]
    fn test_decimal128_known_bytes() {
        // 1 with exponent 0: biased exponent 6176 shifted into bits 113..127
        let raw = HdbDecimal::from(1i64).to_decimal128().unwrap();
        let bits = u128::from_le_bytes(raw);
        assert_eq!(bits & DEC128_MANTISSA_MASK, 1);
        assert_eq!((bits >> 113) as i32 & 0x3FFF, 6176);
        assert!(!HdbDecimal::is_null_decimal128(&raw));
    }

    #[test]
    fn test_decimal128_precision_overflow() {
        let too_precise = HdbDecimal::new(i128::MAX, 0);
        assert!(too_precise.to_decimal128().is_err());
        // trailing zeros can be folded into the exponent
        let folded = HdbDecimal::new(10i128.pow(36), 0);
        let back = HdbDecimal::from_decimal128(folded.to_decimal128().unwrap());
        assert_eq!(back, folded);
    }

    #[test]
    fn test_fixed_rescale_and_rounding() {
        let d: HdbDecimal = "12.345".parse().unwrap();
        let raw = d.to_fixed(8, 2).unwrap();
        assert_eq!(i64::from_le_bytes(raw.clone().try_into().unwrap()), 1235);
        assert_eq!(HdbDecimal::from_fixed(&raw, 2).to_string(), "12.35");

        let neg: HdbDecimal = "-0.005".parse().unwrap();
        assert_eq!(neg.rescale(2), Some(-1));

        let big = HdbDecimal::new(i128::from(i64::MAX), 0);
        assert!(big.to_fixed(8, 1).is_err());
        assert!(big.to_fixed(12, 1).is_ok());
    }

    #[test]
    fn test_fixed12_sign_extension() {
        let d = HdbDecimal::new(-5, 0);
        let raw = d.to_fixed(12, 0).unwrap();
        assert_eq!(raw.len(), 12);
        assert_eq!(HdbDecimal::from_fixed(&raw, 0), d);
    }

    #[test]
    fn test_from_f64() {
        let d = HdbDecimal::try_from(0.1f64).unwrap();
        assert_eq!(d.to_string(), "0.1");
        assert!(HdbDecimal::try_from(f64::NAN).is_err());
        assert!((HdbDecimal::new(25, -1).to_f64() - 2.5).abs() < f64::EPSILON);
    }

    #[cfg(feature = "decimal")]
    #[test]
    fn test_rust_decimal_conversion() {
        use rust_decimal::Decimal;
        let d = Decimal::new(-31415, 4);
        let h = HdbDecimal::from(d);
        assert_eq!(h.to_string(), "-3.1415");
        assert_eq!(Decimal::try_from(h).unwrap(), d);
        assert_eq!(Decimal::try_from(HdbDecimal::new(12, 3)).unwrap(), Decimal::new(12000, 0));
    }

    proptest! {
        #[test]
        fn prop_decimal128_roundtrip(m in -(1i128 << 112)..(1i128 << 112), e in -6176i32..=6111) {
            let d = HdbDecimal::new(m, e);
            let back = HdbDecimal::from_decimal128(d.to_decimal128().unwrap());
            prop_assert_eq!(back, d);
        }

        #[test]
        fn prop_string_roundtrip(m in any::<i64>(), e in -40i32..15) {
            let d = HdbDecimal::new(i128::from(m), e);
            let back: HdbDecimal = d.to_string().parse().unwrap();
            prop_assert_eq!(back, d);
        }
    }
}
