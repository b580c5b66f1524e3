//! HDB value representation.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use hdb_protocol::{Cesu8, Cesu8Transformer};

use crate::decimal::HdbDecimal;
use crate::lob::{LobLocator, LobSource};

/// A value that can represent any HDB data type, including NULL.
///
/// Parameters are converted from a value into the wire encoding selected by
/// the parameter's type code; result columns decode into the variant matching
/// their type code.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HdbValue {
    /// NULL value.
    #[default]
    Null,
    /// BOOLEAN.
    Bool(bool),
    /// TINYINT (unsigned).
    TinyInt(u8),
    /// SMALLINT.
    SmallInt(i16),
    /// INTEGER.
    Int(i32),
    /// BIGINT.
    BigInt(i64),
    /// REAL.
    Real(f32),
    /// DOUBLE.
    Double(f64),
    /// DECIMAL, SMALLDECIMAL and the fixed-point decimals.
    Decimal(HdbDecimal),
    /// Character data (VARCHAR, NVARCHAR, SHORTTEXT, ALPHANUM).
    String(String),
    /// Binary data (VARBINARY, spatial types).
    Binary(Bytes),
    /// DATE and DAYDATE.
    Date(NaiveDate),
    /// TIME and SECONDTIME.
    Time(NaiveTime),
    /// TIMESTAMP, SECONDDATE and LONGDATE.
    Timestamp(NaiveDateTime),
    /// LOB parameter fed from an application reader.
    LobIn(LobSource),
    /// LOB column: locator plus first chunk.
    Lob(LobLocator),
}

impl HdbValue {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the value as an i64, if it is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::TinyInt(v) => Some(i64::from(*v)),
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as an f64, if it is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            Self::Decimal(d) => Some(d.to_f64()),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Get the value as a string slice.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Get the value as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(v) => Some(v),
            Self::String(v) => Some(v.as_bytes()),
            _ => None,
        }
    }

    /// Name of the value kind, used in conversion errors.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::TinyInt(_) => "TINYINT",
            Self::SmallInt(_) => "SMALLINT",
            Self::Int(_) => "INTEGER",
            Self::BigInt(_) => "BIGINT",
            Self::Real(_) => "REAL",
            Self::Double(_) => "DOUBLE",
            Self::Decimal(_) => "DECIMAL",
            Self::String(_) => "NVARCHAR",
            Self::Binary(_) => "VARBINARY",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::Timestamp(_) => "TIMESTAMP",
            Self::LobIn(_) => "LOB source",
            Self::Lob(_) => "LOB",
        }
    }

    /// Whether the value is a LOB fed from a reader.
    #[must_use]
    pub fn is_lob_source(&self) -> bool {
        matches!(self, Self::LobIn(_))
    }
}

/// Session-dependent settings the converters need.
#[derive(Debug, Clone)]
pub struct ConvContext {
    /// Negotiated data format version.
    pub dfv: i32,
    /// Surface the empty date as NULL.
    pub empty_date_as_null: bool,
    /// Transformer for CESU-8 data.
    pub cesu8: Arc<dyn Cesu8Transformer>,
    /// Bytes per LOB chunk.
    pub lob_chunk_size: usize,
}

impl ConvContext {
    /// Context for a data format version with default settings otherwise.
    #[must_use]
    pub fn with_dfv(dfv: i32) -> Self {
        Self {
            dfv,
            ..Self::default()
        }
    }

    /// Whether DFV 1 encodings (calendar dates, plain alphanum) apply.
    #[must_use]
    pub fn is_dfv1(&self) -> bool {
        self.dfv <= 1
    }
}

impl Default for ConvContext {
    fn default() -> Self {
        Self {
            dfv: 8,
            empty_date_as_null: false,
            cesu8: Arc::new(Cesu8),
            lob_chunk_size: 65_536,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for HdbValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    u8 => TinyInt,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    f32 => Real,
    f64 => Double,
    HdbDecimal => Decimal,
    String => String,
    &str => String,
    Bytes => Binary,
    Vec<u8> => Binary,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => Timestamp,
    LobSource => LobIn,
}

impl<T> From<Option<T>> for HdbValue
where
    T: Into<HdbValue>,
{
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(feature = "decimal")]
impl From<rust_decimal::Decimal> for HdbValue {
    fn from(v: rust_decimal::Decimal) -> Self {
        Self::Decimal(v.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_impls() {
        assert_eq!(HdbValue::from(42i32), HdbValue::Int(42));
        assert_eq!(HdbValue::from("hello"), HdbValue::String("hello".into()));
        assert_eq!(HdbValue::from(None::<i64>), HdbValue::Null);
        assert_eq!(HdbValue::from(vec![1u8, 2]).as_bytes(), Some(&[1u8, 2][..]));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(HdbValue::TinyInt(7).as_i64(), Some(7));
        assert_eq!(HdbValue::Real(1.5).as_f64(), Some(1.5));
        assert!(HdbValue::default().is_null());
        assert_eq!(HdbValue::Double(1.0).kind_name(), "DOUBLE");
    }
}
