//! JWT bearer token method.
//!
//! The token travels in the initial request; the initial reply resolves it
//! to a logon name, which becomes the user of the final request. The final
//! reply carries the session cookie.

use bytes::Bytes;

use crate::credentials::Token;
use crate::error::AuthError;
use crate::method::{AuthMethod, SessionCookie};

/// Method name of JWT authentication.
pub const JWT: &str = "JWT";

/// JWT method state.
#[derive(Debug)]
pub struct JwtMethod {
    token: Token,
    logon_name: Option<String>,
    cookie: Option<Bytes>,
}

impl JwtMethod {
    /// Authenticate with `token`.
    #[must_use]
    pub fn new(token: Token) -> Self {
        Self {
            token,
            logon_name: None,
            cookie: None,
        }
    }
}

impl AuthMethod for JwtMethod {
    fn name(&self) -> &'static str {
        JWT
    }

    fn order(&self) -> u8 {
        2
    }

    fn initial_data(&mut self) -> Result<Bytes, AuthError> {
        if self.token.expose().is_empty() {
            return Err(AuthError::InvalidCredentials("empty JWT token".into()));
        }
        Ok(Bytes::copy_from_slice(self.token.expose().as_bytes()))
    }

    fn initial_reply(&mut self, data: Bytes) -> Result<(), AuthError> {
        self.logon_name = Some(String::from_utf8_lossy(&data).into_owned());
        Ok(())
    }

    fn final_username(&self) -> Option<&str> {
        self.logon_name.as_deref()
    }

    fn final_data(&mut self) -> Result<Bytes, AuthError> {
        if self.logon_name.is_none() {
            return Err(AuthError::InvalidState("final request before initial reply"));
        }
        Ok(Bytes::new())
    }

    fn final_reply(&mut self, data: Bytes) -> Result<(), AuthError> {
        self.cookie = Some(data);
        Ok(())
    }

    fn cookie(&self) -> Option<SessionCookie> {
        match (&self.logon_name, &self.cookie) {
            (Some(logon_name), Some(cookie)) if !cookie.is_empty() => Some(SessionCookie {
                logon_name: logon_name.clone(),
                cookie: cookie.clone(),
            }),
            _ => None,
        }
    }
}
