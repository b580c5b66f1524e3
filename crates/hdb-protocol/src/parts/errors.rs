//! `hdb-errors` part: server errors and warnings.

use core::fmt;

use bytes::{BufMut, BytesMut};

use super::PartBody;
use crate::codec::{padding, put_zeroes, ByteReader};
use crate::error::ProtocolError;
use crate::header::PartHeader;
use crate::kinds::PartKind;

/// Severity of a server error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorLevel {
    /// Informational; the statement succeeded.
    Warning,
    /// The statement failed.
    Error,
    /// The session is unusable.
    Fatal,
}

impl ErrorLevel {
    fn from_raw(raw: i8) -> Self {
        match raw {
            0 => Self::Warning,
            1 => Self::Error,
            _ => Self::Fatal,
        }
    }

    const fn raw(self) -> i8 {
        match self {
            Self::Warning => 0,
            Self::Error => 1,
            Self::Fatal => 2,
        }
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal error",
        })
    }
}

/// A single error reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Numeric error code.
    pub code: i32,
    /// Byte position in the SQL text.
    pub position: i32,
    /// Severity.
    pub level: ErrorLevel,
    /// Five-character SQL state.
    pub sql_state: [u8; 5],
    /// Message text.
    pub text: String,
    /// Index of the statement in a batch this error belongs to.
    pub stmt_index: usize,
}

impl ServerError {
    /// Create an error with level `Error` and SQL state `HY000`.
    #[must_use]
    pub fn new(code: i32, text: impl Into<String>) -> Self {
        Self {
            code,
            position: 0,
            level: ErrorLevel::Error,
            sql_state: *b"HY000",
            text: text.into(),
            stmt_index: 0,
        }
    }

    /// SQL state as text.
    #[must_use]
    pub fn sql_state(&self) -> &str {
        core::str::from_utf8(&self.sql_state).unwrap_or("?????")
    }

    /// Whether this is only a warning.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        self.level == ErrorLevel::Warning
    }

    /// Whether the session must be discarded.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.level == ErrorLevel::Fatal
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SQL {} {} - {} (statement {}, position {}, SQLState {})",
            self.level,
            self.code,
            self.text,
            self.stmt_index,
            self.position,
            self.sql_state()
        )
    }
}

/// `hdb-errors` part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerErrors(pub Vec<ServerError>);

impl PartBody for ServerErrors {
    const KIND: PartKind = PartKind::Error;

    fn arg_count(&self) -> i32 {
        self.0.len() as i32
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        let mut written = 0;
        for err in &self.0 {
            let text = err.text.as_bytes();
            dst.put_i32_le(err.code);
            dst.put_i32_le(err.position);
            dst.put_i32_le(text.len() as i32);
            dst.put_i8(err.level.raw());
            dst.put_slice(&err.sql_state);
            dst.put_slice(text);
            let len = 18 + text.len();
            let pad = padding(len);
            put_zeroes(dst, pad);
            written += len + pad;
        }
        Ok(written)
    }

    fn decode(header: &PartHeader, src: &mut ByteReader) -> Result<Self, ProtocolError> {
        let mut errors = Vec::with_capacity(header.arg_count.max(0) as usize);
        for index in 0..header.arg_count.max(0) as usize {
            let code = src.i32()?;
            let position = src.i32()?;
            let text_len = src.i32()?.max(0) as usize;
            let level = ErrorLevel::from_raw(src.i8()?);
            let sql_state = src.array::<5>()?;
            let text = src.bytes(text_len)?;
            // each error record is padded; the last one may not be
            let pad = padding(18 + text_len).min(src.remaining());
            src.skip(pad)?;
            errors.push(ServerError {
                code,
                position,
                level,
                sql_state,
                text: String::from_utf8_lossy(&text).into_owned(),
                stmt_index: index,
            });
        }
        Ok(Self(errors))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_roundtrip_with_padding() {
        let mut warning = ServerError::new(1347, "not recommended");
        warning.level = ErrorLevel::Warning;
        let mut second = ServerError::new(301, "unique constraint violated");
        second.stmt_index = 1;
        second.position = 12;
        let errors = ServerErrors(vec![warning, second]);

        let mut buf = BytesMut::new();
        let written = errors.encode(&mut buf).unwrap();
        assert_eq!(written % 8, 0);

        let header = PartHeader::new(PartKind::Error.raw(), 2, written as i32);
        let decoded = ServerErrors::decode(&header, &mut ByteReader::new(buf.freeze())).unwrap();
        assert_eq!(decoded, errors);
        assert!(decoded.0[0].is_warning());
        assert_eq!(decoded.0[1].sql_state(), "HY000");
    }

    #[test]
    fn test_display() {
        let err = ServerError::new(259, "invalid table name");
        let msg = err.to_string();
        assert!(msg.contains("259"));
        assert!(msg.contains("invalid table name"));
    }
}
