//! Two round authentication exchange.
//!
//! ```text
//! initial request: [user, name_1, data_1, ..., name_n, data_n]
//! initial reply:   [selected name, challenge]
//! final request:   [user, selected name, response]
//! final reply:     [selected name, confirmation]
//! ```

use bytes::Bytes;
use hdb_protocol::AuthFields;

use crate::error::AuthError;
use crate::method::{AuthMethod, SessionCookie};

/// Drives the exchange over a list of offered methods.
#[derive(Debug)]
pub struct AuthHandler {
    username: String,
    methods: Vec<Box<dyn AuthMethod>>,
    selected: Option<usize>,
    finished: bool,
}

impl AuthHandler {
    /// Handler authenticating as `username`.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            methods: Vec::new(),
            selected: None,
            finished: false,
        }
    }

    /// Offer a method.
    pub fn add_method(&mut self, method: Box<dyn AuthMethod>) {
        self.methods.push(method);
        self.methods.sort_by_key(|m| m.order());
    }

    /// Builder-style [`add_method`](Self::add_method).
    #[must_use]
    pub fn with_method(mut self, method: impl AuthMethod + 'static) -> Self {
        self.add_method(Box::new(method));
        self
    }

    /// User name of the initial request.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Offered method names, in wire order.
    #[must_use]
    pub fn method_names(&self) -> Vec<&'static str> {
        self.methods.iter().map(|m| m.name()).collect()
    }

    /// Whether no method is offered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Build the initial request fields.
    pub fn initial_request(&mut self) -> Result<AuthFields, AuthError> {
        if self.methods.is_empty() {
            return Err(AuthError::InvalidCredentials(
                "no authentication method configured".into(),
            ));
        }
        let mut fields = AuthFields::new().with(Bytes::copy_from_slice(self.username.as_bytes()));
        for method in &mut self.methods {
            fields.push(Bytes::from_static(method.name().as_bytes()));
            fields.push(method.initial_data()?);
        }
        Ok(fields)
    }

    /// Select the method named by the server and pass it the challenge.
    pub fn initial_reply(&mut self, reply: &AuthFields) -> Result<(), AuthError> {
        let (name, data) = method_reply(reply)?;
        let index = self
            .methods
            .iter()
            .position(|m| m.name().as_bytes() == name.as_ref())
            .ok_or_else(|| {
                AuthError::UnsupportedMethod(String::from_utf8_lossy(&name).into_owned())
            })?;
        tracing::debug!(method = self.methods[index].name(), "authentication method selected");
        self.methods[index].initial_reply(data)?;
        self.selected = Some(index);
        Ok(())
    }

    /// Build the final request fields.
    pub fn final_request(&mut self) -> Result<AuthFields, AuthError> {
        let method = self.selected_mut()?;
        let username = method
            .final_username()
            .map(|u| Bytes::copy_from_slice(u.as_bytes()));
        let name = method.name();
        let data = method.final_data()?;
        let username = username.unwrap_or_else(|| Bytes::copy_from_slice(self.username.as_bytes()));
        Ok(AuthFields::new()
            .with(username)
            .with(Bytes::from_static(name.as_bytes()))
            .with(data))
    }

    /// Validate the final reply.
    pub fn final_reply(&mut self, reply: &AuthFields) -> Result<(), AuthError> {
        let (name, data) = method_reply(reply)?;
        let method = self.selected_mut()?;
        if method.name().as_bytes() != name.as_ref() {
            return Err(AuthError::AuthenticationFailed(format!(
                "final reply for method {} while {} was selected",
                String::from_utf8_lossy(&name),
                method.name()
            )));
        }
        method.final_reply(data)?;
        self.finished = true;
        Ok(())
    }

    /// User the server authenticated: the logon name the selected method
    /// learned, otherwise the requested user name.
    #[must_use]
    pub fn logon_name(&self) -> String {
        if let Some(cookie) = self.cookie() {
            return cookie.logon_name;
        }
        self.selected
            .and_then(|i| self.methods[i].final_username())
            .unwrap_or(&self.username)
            .to_owned()
    }

    /// Name of the selected method.
    #[must_use]
    pub fn selected_name(&self) -> Option<&'static str> {
        self.selected.map(|i| self.methods[i].name())
    }

    /// Cookie minted by the selected method, after a successful final reply.
    #[must_use]
    pub fn cookie(&self) -> Option<SessionCookie> {
        if !self.finished {
            return None;
        }
        self.selected.and_then(|i| self.methods[i].cookie())
    }

    fn selected_mut(&mut self) -> Result<&mut Box<dyn AuthMethod>, AuthError> {
        let index = self
            .selected
            .ok_or(AuthError::InvalidState("no method selected"))?;
        Ok(&mut self.methods[index])
    }
}

fn method_reply(reply: &AuthFields) -> Result<(Bytes, Bytes), AuthError> {
    match (reply.get(0), reply.get(1)) {
        (Some(name), Some(data)) => Ok((name.clone(), data.clone())),
        _ => Err(AuthError::AuthenticationFailed(format!(
            "authentication reply with {} fields",
            reply.len()
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cookie::CookieMethod;
    use crate::credentials::{Password, Token};
    use crate::jwt::JwtMethod;
    use crate::scram::{self, Scram};

    fn fields(items: &[&[u8]]) -> AuthFields {
        let mut list = AuthFields::new();
        for item in items {
            list.push(Bytes::copy_from_slice(item));
        }
        list
    }

    #[test]
    fn test_methods_are_ordered() {
        let handler = AuthHandler::new("SYSTEM")
            .with_method(Scram::sha256(Password::new("pw")))
            .with_method(Scram::pbkdf2(Password::new("pw")))
            .with_method(JwtMethod::new(Token::new("t")));
        assert_eq!(
            handler.method_names(),
            vec!["JWT", "SCRAMPBKDF2SHA256", "SCRAMSHA256"]
        );
    }

    #[test]
    fn test_initial_request_layout() {
        let mut handler = AuthHandler::new("SYSTEM").with_method(Scram::sha256(Password::new("pw")));
        let request = handler.initial_request().unwrap();
        assert_eq!(request.len(), 3);
        assert_eq!(request.get(0).unwrap().as_ref(), b"SYSTEM");
        assert_eq!(request.get(1).unwrap().as_ref(), b"SCRAMSHA256");
        assert_eq!(request.get(2).unwrap().len(), scram::CLIENT_CHALLENGE_LEN);
    }

    #[test]
    fn test_scram_round_trip() {
        let mut handler = AuthHandler::new("SYSTEM")
            .with_method(Scram::sha256(Password::new("manager")))
            .with_method(Scram::pbkdf2(Password::new("manager")));
        let request = handler.initial_request().unwrap();
        let client_challenge = request.get(4).unwrap().clone();

        let challenge = fields(&[b"salt", b"server"]).to_bytes().unwrap();
        handler
            .initial_reply(&AuthFields::new().with(Bytes::from_static(b"SCRAMSHA256")).with(challenge))
            .unwrap();
        assert_eq!(handler.selected_name(), Some("SCRAMSHA256"));

        let final_request = handler.final_request().unwrap();
        assert_eq!(final_request.get(0).unwrap().as_ref(), b"SYSTEM");
        assert_eq!(final_request.get(1).unwrap().as_ref(), b"SCRAMSHA256");

        let salted = scram::salted_sha256(b"manager", b"salt").unwrap();
        let proof = scram::server_proof(&salted, b"salt", b"server", &client_challenge).unwrap();
        let confirmation = fields(&[&proof]).to_bytes().unwrap();
        handler
            .final_reply(&AuthFields::new().with(Bytes::from_static(b"SCRAMSHA256")).with(confirmation))
            .unwrap();
        assert!(handler.cookie().is_none());
        assert_eq!(handler.logon_name(), "SYSTEM");
    }

    #[test]
    fn test_unknown_method_selected() {
        let mut handler = AuthHandler::new("U").with_method(Scram::sha256(Password::new("pw")));
        handler.initial_request().unwrap();
        let err = handler.initial_reply(&fields(&[b"LDAP", b""])).unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedMethod(name) if name == "LDAP"));
    }

    #[test]
    fn test_jwt_uses_logon_name_and_mints_cookie() {
        let mut handler = AuthHandler::new("").with_method(JwtMethod::new(Token::new("tok")));
        handler.initial_request().unwrap();
        handler.initial_reply(&fields(&[b"JWT", b"BOB"])).unwrap();
        let request = handler.final_request().unwrap();
        assert_eq!(request.get(0).unwrap().as_ref(), b"BOB");
        assert!(handler.cookie().is_none());
        handler.final_reply(&fields(&[b"JWT", b"C00KIE"])).unwrap();
        let cookie = handler.cookie().unwrap();
        assert_eq!(cookie.logon_name, "BOB");
        assert_eq!(handler.logon_name(), "BOB");
    }

    #[test]
    fn test_final_reply_for_other_method() {
        let mut handler = AuthHandler::new("").with_method(JwtMethod::new(Token::new("tok")));
        handler.initial_request().unwrap();
        handler.initial_reply(&fields(&[b"JWT", b"BOB"])).unwrap();
        handler.final_request().unwrap();
        assert!(handler.final_reply(&fields(&[b"X509", b""])).is_err());
    }

    #[test]
    fn test_no_methods() {
        let mut handler = AuthHandler::new("U");
        assert!(handler.is_empty());
        assert!(matches!(
            handler.initial_request(),
            Err(AuthError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_cookie_handler() {
        let cookie = SessionCookie {
            logon_name: "ALICE".into(),
            cookie: Bytes::from_static(b"c"),
        };
        let mut handler =
            AuthHandler::new("ALICE").with_method(CookieMethod::new(cookie, Bytes::from_static(b"1@h")));
        let request = handler.initial_request().unwrap();
        assert_eq!(request.get(1).unwrap().as_ref(), b"SessionCookie");
        assert_eq!(request.get(2).unwrap().as_ref(), b"c1@h");
    }

    #[test]
    fn test_final_request_before_selection() {
        let mut handler = AuthHandler::new("U").with_method(Scram::sha256(Password::new("pw")));
        assert!(matches!(
            handler.final_request(),
            Err(AuthError::InvalidState(_))
        ));
    }
}
