//! Authentication error types.

use hdb_protocol::ProtocolError;
use thiserror::Error;

/// Errors that can occur during authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid or missing credentials.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Authentication rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server selected a method that was not offered.
    #[error("unsupported authentication method: {0}")]
    UnsupportedMethod(String),

    /// Client certificate or key could not be used.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// The server proof of a SCRAM exchange did not verify.
    #[error("server proof mismatch")]
    ServerProofMismatch,

    /// Malformed authentication fields.
    #[error("authentication protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A step was called out of order.
    #[error("authentication step out of order: {0}")]
    InvalidState(&'static str),

    /// Signing or key derivation failure.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl AuthError {
    /// Whether refreshing the credentials may make a retry succeed.
    #[must_use]
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials(_)
                | Self::AuthenticationFailed(_)
                | Self::Certificate(_)
                | Self::ServerProofMismatch
        )
    }
}
