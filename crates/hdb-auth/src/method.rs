//! The authentication method trait.

use std::fmt;

use bytes::Bytes;

use crate::error::AuthError;

/// Cookie minted by the server after a successful authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCookie {
    /// Logon name the server resolved for the authenticated identity.
    pub logon_name: String,
    /// Opaque cookie bytes.
    pub cookie: Bytes,
}

impl fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookie")
            .field("logon_name", &self.logon_name)
            .field("cookie", &"[REDACTED]")
            .finish()
    }
}

/// One authentication mechanism of the two round exchange.
///
/// The handler calls the steps strictly in order:
/// `initial_data`, `initial_reply`, `final_data`, `final_reply`.
pub trait AuthMethod: Send + Sync + fmt::Debug {
    /// Method name on the wire, e.g. `SCRAMSHA256`.
    fn name(&self) -> &'static str;

    /// Position in the offered method list (lower first).
    fn order(&self) -> u8;

    /// Payload sent next to the method name in the initial request.
    fn initial_data(&mut self) -> Result<Bytes, AuthError>;

    /// Consume the server challenge of the initial reply.
    fn initial_reply(&mut self, data: Bytes) -> Result<(), AuthError>;

    /// User name of the final request, if it differs from the handler's.
    fn final_username(&self) -> Option<&str> {
        None
    }

    /// Payload of the final request.
    fn final_data(&mut self) -> Result<Bytes, AuthError>;

    /// Validate the final reply.
    fn final_reply(&mut self, data: Bytes) -> Result<(), AuthError>;

    /// Cookie minted by the server, available after `final_reply`.
    fn cookie(&self) -> Option<SessionCookie> {
        None
    }
}
