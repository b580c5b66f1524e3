//! Type conversion error types.

use hdb_protocol::{ProtocolError, TypeCode};
use thiserror::Error;

/// Errors that can occur during type conversion.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TypeError {
    /// Value is null when non-null was expected.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// Type mismatch when reading a value into a Rust type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name.
        expected: &'static str,
        /// Actual type name.
        actual: String,
    },

    /// The converter for a type code does not accept this value.
    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion {
        /// Value kind supplied.
        from: &'static str,
        /// Target type code.
        to: TypeCode,
    },

    /// Value is out of range for the target type.
    #[error("value out of range for {target_type}")]
    OutOfRange {
        /// Target type name.
        target_type: &'static str,
    },

    /// No converter exists for this type code.
    #[error("unsupported type code {0}")]
    UnsupportedTypeCode(TypeCode),

    /// Invalid date/time value.
    #[error("invalid date/time: {0}")]
    InvalidDateTime(String),

    /// Invalid decimal value.
    #[error("invalid decimal: {0}")]
    InvalidDecimal(String),

    /// Reading from a LOB source failed.
    #[error("LOB source error: {0}")]
    LobSource(#[from] std::io::Error),

    /// Wire-level decoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
