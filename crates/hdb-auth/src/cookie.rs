//! Session cookie method.
//!
//! Reuses a cookie minted by an earlier authentication. The initial data is
//! the cookie followed by the client id; the user name is the logon name
//! recorded with the cookie.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::AuthError;
use crate::method::{AuthMethod, SessionCookie};

/// Method name of session cookie authentication.
pub const SESSION_COOKIE: &str = "SessionCookie";

/// Session cookie method state.
#[derive(Debug)]
pub struct CookieMethod {
    cookie: SessionCookie,
    client_id: Bytes,
    initial_done: bool,
}

impl CookieMethod {
    /// Reuse `cookie` for the client identified by `client_id`.
    #[must_use]
    pub fn new(cookie: SessionCookie, client_id: impl Into<Bytes>) -> Self {
        Self {
            cookie,
            client_id: client_id.into(),
            initial_done: false,
        }
    }

    /// Logon name to authenticate as.
    #[must_use]
    pub fn logon_name(&self) -> &str {
        &self.cookie.logon_name
    }
}

impl AuthMethod for CookieMethod {
    fn name(&self) -> &'static str {
        SESSION_COOKIE
    }

    fn order(&self) -> u8 {
        0
    }

    fn initial_data(&mut self) -> Result<Bytes, AuthError> {
        let mut data = BytesMut::with_capacity(self.cookie.cookie.len() + self.client_id.len());
        data.put_slice(&self.cookie.cookie);
        data.put_slice(&self.client_id);
        Ok(data.freeze())
    }

    fn initial_reply(&mut self, _data: Bytes) -> Result<(), AuthError> {
        self.initial_done = true;
        Ok(())
    }

    fn final_data(&mut self) -> Result<Bytes, AuthError> {
        if !self.initial_done {
            return Err(AuthError::InvalidState("final request before initial reply"));
        }
        Ok(Bytes::new())
    }

    fn final_reply(&mut self, _data: Bytes) -> Result<(), AuthError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_data_is_cookie_then_client_id() {
        let mut method = CookieMethod::new(
            SessionCookie {
                logon_name: "ALICE".into(),
                cookie: Bytes::from_static(b"\xAA\xBB"),
            },
            Bytes::from_static(b"42@host"),
        );
        assert_eq!(method.initial_data().unwrap().as_ref(), b"\xAA\xBB42@host");
        assert_eq!(method.logon_name(), "ALICE");
        assert!(method.final_data().is_err());
        method.initial_reply(Bytes::new()).unwrap();
        assert!(method.final_data().unwrap().is_empty());
        assert!(method.cookie().is_none());
    }
}
