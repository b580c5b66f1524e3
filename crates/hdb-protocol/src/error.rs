//! Protocol-level error types.

use thiserror::Error;

/// Errors raised while encoding or decoding HDB wire structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Buffer ended before a complete structure could be read.
    #[error("incomplete data: expected {expected} bytes, {actual} available")]
    Incomplete {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Unknown message kind on the wire.
    #[error("invalid message kind: {0}")]
    InvalidMessageKind(i8),

    /// Unknown segment kind on the wire.
    #[error("invalid segment kind: {0}")]
    InvalidSegmentKind(i8),

    /// Unknown function code in a reply segment.
    #[error("invalid function code: {0}")]
    InvalidFunctionCode(i16),

    /// Unknown part kind where a known kind is required.
    #[error("invalid part kind: {0}")]
    InvalidPartKind(i8),

    /// Unknown type code.
    #[error("invalid type code: {0}")]
    InvalidTypeCode(u8),

    /// A part of one kind was decoded as another kind.
    #[error("part kind mismatch: expected {expected}, got {actual}")]
    PartKindMismatch {
        /// Kind the caller asked for.
        expected: &'static str,
        /// Kind found on the wire.
        actual: String,
    },

    /// Variable-length field larger than the wire format allows.
    #[error("max argument length exceeded: {0} bytes")]
    LengthExceeded(usize),

    /// Invalid length indicator byte.
    #[error("invalid length indicator: {0}")]
    InvalidLengthIndicator(u8),

    /// Invalid CESU-8 sequence.
    #[error("invalid CESU-8 data at byte {0}")]
    InvalidCesu8(usize),

    /// Option value carried a type code the option cannot hold.
    #[error("invalid option value type {type_code} for option {key}")]
    InvalidOptionType {
        /// Option key.
        key: i8,
        /// Type code found.
        type_code: u8,
    },

    /// Message header announced a size that does not match its content.
    #[error("invalid message length: header says {announced}, got {actual}")]
    InvalidMessageLength {
        /// Length from the header.
        announced: usize,
        /// Length actually available.
        actual: usize,
    },

    /// The initial prolog reply could not be understood.
    #[error("invalid prolog reply: {0}")]
    InvalidProlog(String),

    /// Free-form structural error.
    #[error("malformed {0}")]
    Malformed(String),
}

impl ProtocolError {
    /// Shorthand for a truncated-buffer error.
    #[must_use]
    pub const fn incomplete(expected: usize, actual: usize) -> Self {
        Self::Incomplete { expected, actual }
    }
}
