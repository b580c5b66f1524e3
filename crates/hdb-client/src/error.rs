//! Client error types.

use std::fmt;

use hdb_protocol::{ProtocolError, ServerError};
use thiserror::Error;

/// Server code reported when authentication is rejected.
pub const AUTHENTICATION_FAILED: i32 = 10;

/// Server code for "error while parsing protocol", raised when a LOB is
/// read while another statement owns the connection.
pub const WHILE_PARSING_PROTOCOL: i32 = 1033;

/// The errors of one server reply.
///
/// A batch reply may carry several errors; `set_index` selects the one the
/// accessors and `Display` refer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerErrors {
    errors: Vec<ServerError>,
    index: usize,
}

impl ServerErrors {
    /// Wrap a non-empty error list.
    #[must_use]
    pub fn new(errors: Vec<ServerError>) -> Self {
        Self { errors, index: 0 }
    }

    /// Number of errors.
    #[must_use]
    pub fn num_errors(&self) -> usize {
        self.errors.len()
    }

    /// Select the current error; out-of-range indexes are clamped.
    pub fn set_index(&mut self, index: usize) {
        self.index = index.min(self.errors.len().saturating_sub(1));
    }

    /// Error at `index`.
    #[must_use]
    pub fn error_at(&self, index: usize) -> Option<&ServerError> {
        self.errors.get(index)
    }

    /// The currently selected error.
    #[must_use]
    pub fn current(&self) -> Option<&ServerError> {
        self.errors.get(self.index)
    }

    /// Code of the selected error.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.current().map_or(0, |e| e.code)
    }

    /// Whether any error carries `code`.
    #[must_use]
    pub fn has_code(&self, code: i32) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    /// Whether any error is fatal for the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.errors.iter().any(ServerError::is_fatal)
    }

    /// All errors in reply order.
    pub fn iter(&self) -> impl Iterator<Item = &ServerError> {
        self.errors.iter()
    }
}

impl fmt::Display for ServerErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.current() {
            Some(err) => write!(f, "{err}")?,
            None => f.write_str("server error")?,
        }
        if self.errors.len() > 1 {
            write!(f, " (and {} more)", self.errors.len() - 1)?;
        }
        Ok(())
    }
}

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The transport failed, was canceled or the session was closed.
    ///
    /// The session must be discarded.
    #[error("bad connection: {0}")]
    BadConnection(String),

    /// The server rejected the request.
    #[error("{0}")]
    Server(ServerErrors),

    /// A statement was started while a result set is still open, or a LOB
    /// was read while another statement owns the connection.
    #[error("nested query: a result set is still open on this connection")]
    NestedQuery,

    /// A transaction was started while another one is active.
    #[error("nested transactions are not supported")]
    NestedTransaction,

    /// The requested isolation level is not supported.
    #[error("unsupported isolation level: {0}")]
    UnsupportedIsolationLevel(String),

    /// A LOB was read after its result set was closed.
    #[error("scan on closed resultset")]
    ScanOnClosedResultset,

    /// A user switch was requested where it is not allowed.
    #[error("switch user: {0}")]
    SwitchUser(&'static str),

    /// A row producer signaled the end of its rows.
    #[error("end of rows")]
    EndOfRows,

    /// The number of arguments does not fit the statement.
    #[error("invalid number of arguments {got} - {expected} expected")]
    InvalidArgCount {
        /// Arguments supplied.
        got: usize,
        /// Arguments expected.
        expected: usize,
    },

    /// Invalid configuration or DSN.
    #[error("configuration error: {0}")]
    Config(String),

    /// Authentication failed on the client side.
    #[error("authentication error: {0}")]
    Auth(#[from] hdb_auth::AuthError),

    /// A value could not be converted.
    #[error("type error: {0}")]
    Type(#[from] hdb_types::TypeError),

    /// The server sent something the client cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// TLS setup failed.
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] hdb_tls::TlsError),

    /// Dialing the server failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hdb_codec::CodecError> for Error {
    fn from(err: hdb_codec::CodecError) -> Self {
        Self::BadConnection(err.to_string())
    }
}

impl From<ServerErrors> for Error {
    fn from(errors: ServerErrors) -> Self {
        Self::Server(errors)
    }
}

impl Error {
    /// Whether the session that produced this error must be discarded.
    #[must_use]
    pub fn is_bad_connection(&self) -> bool {
        match self {
            Self::BadConnection(_) => true,
            Self::Server(errors) => errors.is_fatal(),
            _ => false,
        }
    }

    /// Whether the credentials were rejected, locally or by the server.
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        match self {
            Self::Auth(err) => err.is_credential_error(),
            Self::Server(errors) => errors.has_code(AUTHENTICATION_FAILED),
            _ => false,
        }
    }

    /// Check if this error is transient and may succeed on retry with a new
    /// connection.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BadConnection(_) | Self::Io(_))
    }

    /// Server errors, if the server rejected the request.
    #[must_use]
    pub fn server_errors(&self) -> Option<&ServerErrors> {
        match self {
            Self::Server(errors) => Some(errors),
            _ => None,
        }
    }

    pub(crate) fn closed() -> Self {
        Self::BadConnection("connection closed".into())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hdb_protocol::ErrorLevel;

    fn server_error(code: i32, text: &str, stmt_index: usize) -> ServerError {
        let mut err = ServerError::new(code, text);
        err.stmt_index = stmt_index;
        err
    }

    #[test]
    fn test_server_errors_index() {
        let mut errors = ServerErrors::new(vec![
            server_error(301, "unique constraint violated", 0),
            server_error(287, "cannot insert NULL", 2),
        ]);
        assert_eq!(errors.num_errors(), 2);
        assert_eq!(errors.code(), 301);
        errors.set_index(1);
        assert_eq!(errors.code(), 287);
        assert_eq!(errors.current().unwrap().stmt_index, 2);
        errors.set_index(9);
        assert_eq!(errors.code(), 287);
        assert!(errors.to_string().contains("cannot insert NULL"));
        assert!(errors.to_string().ends_with("(and 1 more)"));
    }

    #[test]
    fn test_invalid_arg_count_message() {
        let err = Error::InvalidArgCount { got: 3, expected: 2 };
        assert_eq!(err.to_string(), "invalid number of arguments 3 - 2 expected");
    }

    #[test]
    fn test_predicates() {
        assert!(Error::closed().is_bad_connection());
        assert!(Error::closed().is_transient());
        assert!(!Error::NestedQuery.is_bad_connection());

        let auth = Error::Server(ServerErrors::new(vec![ServerError::new(
            AUTHENTICATION_FAILED,
            "authentication failed",
        )]));
        assert!(auth.is_auth_error());
        assert!(!auth.is_bad_connection());

        let mut fatal = ServerError::new(139, "session closed");
        fatal.level = ErrorLevel::Fatal;
        assert!(Error::Server(ServerErrors::new(vec![fatal])).is_bad_connection());

        let local = Error::Auth(hdb_auth::AuthError::InvalidCredentials("none".into()));
        assert!(local.is_auth_error());
    }

    #[test]
    fn test_codec_error_is_bad_connection() {
        let err: Error = hdb_codec::CodecError::Canceled.into();
        assert!(err.is_bad_connection());
    }
}
