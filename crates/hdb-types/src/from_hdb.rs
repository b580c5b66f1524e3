//! Trait for converting from HDB values to Rust types.

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::decimal::HdbDecimal;
use crate::error::TypeError;
use crate::lob::LobLocator;
use crate::value::HdbValue;

/// Trait for types that can be read from result columns.
pub trait FromHdb: Sized {
    /// Convert from an HDB value to this type.
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError>;

    /// Convert from an optional value; `None` if the value is NULL.
    fn from_hdb_nullable(value: &HdbValue) -> Result<Option<Self>, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            Self::from_hdb(value).map(Some)
        }
    }
}

fn mismatch(expected: &'static str, value: &HdbValue) -> TypeError {
    if value.is_null() {
        TypeError::UnexpectedNull
    } else {
        TypeError::TypeMismatch {
            expected,
            actual: value.kind_name().to_owned(),
        }
    }
}

macro_rules! from_hdb_int {
    ($($ty:ty),*) => {
        $(
            impl FromHdb for $ty {
                fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
                    let v = value.as_i64().ok_or_else(|| mismatch(stringify!($ty), value))?;
                    <$ty>::try_from(v).map_err(|_| TypeError::OutOfRange {
                        target_type: stringify!($ty),
                    })
                }
            }
        )*
    };
}

from_hdb_int!(u8, i16, i32, i64, u32, u64);

impl FromHdb for bool {
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
        match value {
            HdbValue::Bool(v) => Ok(*v),
            other => other.as_i64().map(|v| v != 0).ok_or_else(|| mismatch("bool", value)),
        }
    }
}

impl FromHdb for f32 {
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
        match value {
            HdbValue::Real(v) => Ok(*v),
            other => other.as_f64().map(|v| v as f32).ok_or_else(|| mismatch("f32", value)),
        }
    }
}

impl FromHdb for f64 {
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
        value.as_f64().ok_or_else(|| mismatch("f64", value))
    }
}

impl FromHdb for HdbDecimal {
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
        match value {
            HdbValue::Decimal(d) => Ok(*d),
            HdbValue::Double(v) => HdbDecimal::try_from(*v),
            HdbValue::Real(v) => HdbDecimal::try_from(f64::from(*v)),
            other => other
                .as_i64()
                .map(HdbDecimal::from)
                .ok_or_else(|| mismatch("HdbDecimal", value)),
        }
    }
}

#[cfg(feature = "decimal")]
impl FromHdb for rust_decimal::Decimal {
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
        HdbDecimal::from_hdb(value)?.try_into()
    }
}

impl FromHdb for String {
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
        match value {
            HdbValue::String(s) => Ok(s.clone()),
            HdbValue::Decimal(d) => Ok(d.to_string()),
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromHdb for Bytes {
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
        match value {
            HdbValue::Binary(b) => Ok(b.clone()),
            HdbValue::String(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            HdbValue::Lob(l) if l.is_complete() => Ok(l.data.clone()),
            _ => Err(mismatch("Bytes", value)),
        }
    }
}

impl FromHdb for Vec<u8> {
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
        Bytes::from_hdb(value).map(|b| b.to_vec())
    }
}

impl FromHdb for NaiveDate {
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
        match value {
            HdbValue::Date(d) => Ok(*d),
            HdbValue::Timestamp(ts) => Ok(ts.date()),
            _ => Err(mismatch("NaiveDate", value)),
        }
    }
}

impl FromHdb for NaiveTime {
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
        match value {
            HdbValue::Time(t) => Ok(*t),
            HdbValue::Timestamp(ts) => Ok(ts.time()),
            _ => Err(mismatch("NaiveTime", value)),
        }
    }
}

impl FromHdb for NaiveDateTime {
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
        match value {
            HdbValue::Timestamp(ts) => Ok(*ts),
            HdbValue::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
            _ => Err(mismatch("NaiveDateTime", value)),
        }
    }
}

impl FromHdb for LobLocator {
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
        match value {
            HdbValue::Lob(l) => Ok(l.clone()),
            _ => Err(mismatch("LobLocator", value)),
        }
    }
}

impl FromHdb for HdbValue {
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
        Ok(value.clone())
    }
}

impl<T: FromHdb> FromHdb for Option<T> {
    fn from_hdb(value: &HdbValue) -> Result<Self, TypeError> {
        T::from_hdb_nullable(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_widen_and_check_range() {
        assert_eq!(i64::from_hdb(&HdbValue::TinyInt(5)).unwrap(), 5);
        assert_eq!(u8::from_hdb(&HdbValue::Int(255)).unwrap(), 255);
        assert!(matches!(
            u8::from_hdb(&HdbValue::Int(256)),
            Err(TypeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_null_handling() {
        assert!(matches!(i32::from_hdb(&HdbValue::Null), Err(TypeError::UnexpectedNull)));
        assert_eq!(Option::<i32>::from_hdb(&HdbValue::Null).unwrap(), None);
        assert_eq!(Option::<String>::from_hdb(&HdbValue::from("x")).unwrap(), Some("x".into()));
    }

    #[test]
    fn test_mismatch() {
        let err = NaiveDate::from_hdb(&HdbValue::Int(1)).unwrap_err();
        assert!(err.to_string().contains("INTEGER"));
    }
}
