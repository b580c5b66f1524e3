//! Trait for converting Rust types to HDB values.

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::decimal::HdbDecimal;
use crate::error::TypeError;
use crate::lob::LobSource;
use crate::value::HdbValue;

/// Trait for types that can be bound as statement parameters.
pub trait ToHdb {
    /// Convert this value to an HDB value.
    fn to_hdb(&self) -> Result<HdbValue, TypeError>;
}

macro_rules! to_hdb_copy {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl ToHdb for $ty {
                fn to_hdb(&self) -> Result<HdbValue, TypeError> {
                    Ok(HdbValue::$variant(*self))
                }
            }
        )*
    };
}

to_hdb_copy! {
    bool => Bool,
    u8 => TinyInt,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    f32 => Real,
    f64 => Double,
    HdbDecimal => Decimal,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => Timestamp,
}

impl ToHdb for u32 {
    fn to_hdb(&self) -> Result<HdbValue, TypeError> {
        Ok(HdbValue::BigInt(i64::from(*self)))
    }
}

impl ToHdb for u64 {
    fn to_hdb(&self) -> Result<HdbValue, TypeError> {
        i64::try_from(*self)
            .map(HdbValue::BigInt)
            .map_err(|_| TypeError::OutOfRange { target_type: "BIGINT" })
    }
}

impl ToHdb for str {
    fn to_hdb(&self) -> Result<HdbValue, TypeError> {
        Ok(HdbValue::String(self.to_owned()))
    }
}

impl ToHdb for String {
    fn to_hdb(&self) -> Result<HdbValue, TypeError> {
        Ok(HdbValue::String(self.clone()))
    }
}

impl ToHdb for [u8] {
    fn to_hdb(&self) -> Result<HdbValue, TypeError> {
        Ok(HdbValue::Binary(Bytes::copy_from_slice(self)))
    }
}

impl ToHdb for Vec<u8> {
    fn to_hdb(&self) -> Result<HdbValue, TypeError> {
        Ok(HdbValue::Binary(Bytes::copy_from_slice(self)))
    }
}

impl ToHdb for Bytes {
    fn to_hdb(&self) -> Result<HdbValue, TypeError> {
        Ok(HdbValue::Binary(self.clone()))
    }
}

impl ToHdb for LobSource {
    fn to_hdb(&self) -> Result<HdbValue, TypeError> {
        Ok(HdbValue::LobIn(self.clone()))
    }
}

impl ToHdb for HdbValue {
    fn to_hdb(&self) -> Result<HdbValue, TypeError> {
        Ok(self.clone())
    }
}

#[cfg(feature = "decimal")]
impl ToHdb for rust_decimal::Decimal {
    fn to_hdb(&self) -> Result<HdbValue, TypeError> {
        Ok(HdbValue::Decimal((*self).into()))
    }
}

impl<T: ToHdb> ToHdb for Option<T> {
    fn to_hdb(&self) -> Result<HdbValue, TypeError> {
        match self {
            Some(v) => v.to_hdb(),
            None => Ok(HdbValue::Null),
        }
    }
}

impl<T: ToHdb + ?Sized> ToHdb for &T {
    fn to_hdb(&self) -> Result<HdbValue, TypeError> {
        (*self).to_hdb()
    }
}
