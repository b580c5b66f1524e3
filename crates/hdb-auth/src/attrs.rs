//! Shared authentication attributes.
//!
//! [`AuthAttrs`] holds the credentials of a connector, the cookie of the
//! last successful authentication and optional refresh callbacks. Every
//! credential change bumps a version counter; the connector retries a
//! failed authentication only when a refresh advanced the version.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::cookie::CookieMethod;
use crate::credentials::{ClientCertificate, Password, Token};
use crate::error::AuthError;
use crate::handler::AuthHandler;
use crate::jwt::JwtMethod;
use crate::method::SessionCookie;
use crate::scram::Scram;
use crate::x509::X509Method;

/// Returns a new password given the current one, or `None` to keep it.
pub type RefreshPassword = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Returns new PEM certificate and key given the current ones, or `None`.
pub type RefreshClientCert = Arc<dyn Fn(&[u8], &[u8]) -> Option<(Vec<u8>, Vec<u8>)> + Send + Sync>;

/// Returns a new token given the current one, or `None` to keep it.
pub type RefreshToken = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Default)]
struct State {
    username: String,
    password: Option<Password>,
    certificate: Option<ClientCertificate>,
    token: Option<Token>,
    cookie: Option<SessionCookie>,
    refresh_password: Option<RefreshPassword>,
    refresh_client_cert: Option<RefreshClientCert>,
    refresh_token: Option<RefreshToken>,
    version: u64,
}

/// Credentials, cookie and refresh callbacks of a connector.
///
/// Refresh callbacks run without any lock on the attributes held, so they
/// may read the attributes; they must not call [`AuthAttrs::refresh`].
#[derive(Default)]
pub struct AuthAttrs {
    state: RwLock<State>,
    refresh_lock: Mutex<()>,
}

impl AuthAttrs {
    /// Empty attributes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes for user and password authentication.
    #[must_use]
    pub fn with_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        let attrs = Self::new();
        attrs.set_username(username);
        attrs.set_password(password);
        attrs
    }

    /// Current version; changes whenever a credential changes.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// User name.
    #[must_use]
    pub fn username(&self) -> String {
        self.state.read().username.clone()
    }

    /// Set the user name.
    pub fn set_username(&self, username: impl Into<String>) {
        let username = username.into();
        let mut state = self.state.write();
        if state.username != username {
            state.username = username;
            state.version += 1;
        }
    }

    /// Current password.
    #[must_use]
    pub fn password(&self) -> Option<Password> {
        self.state.read().password.clone()
    }

    /// Set the password.
    pub fn set_password(&self, password: impl Into<String>) {
        let password = Password::new(password.into());
        let mut state = self.state.write();
        if state.password.as_ref() != Some(&password) {
            state.password = Some(password);
            state.version += 1;
        }
    }

    /// Set the client certificate chain and RSA key from PEM.
    pub fn set_client_cert(&self, cert_pem: &[u8], key_pem: &[u8]) -> Result<(), AuthError> {
        let certificate = ClientCertificate::from_pem(cert_pem, key_pem)?;
        let mut state = self.state.write();
        if state.certificate.as_ref() != Some(&certificate) {
            state.certificate = Some(certificate);
            state.version += 1;
        }
        Ok(())
    }

    /// Current client certificate.
    #[must_use]
    pub fn client_cert(&self) -> Option<ClientCertificate> {
        self.state.read().certificate.clone()
    }

    /// Set the JWT token.
    pub fn set_token(&self, token: impl Into<String>) {
        let token = Token::new(token.into());
        let mut state = self.state.write();
        if state.token.as_ref() != Some(&token) {
            state.token = Some(token);
            state.version += 1;
        }
    }

    /// Current JWT token.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        self.state.read().token.clone()
    }

    /// Register the password refresh callback.
    pub fn set_refresh_password(&self, callback: RefreshPassword) {
        self.state.write().refresh_password = Some(callback);
    }

    /// Register the client certificate refresh callback.
    pub fn set_refresh_client_cert(&self, callback: RefreshClientCert) {
        self.state.write().refresh_client_cert = Some(callback);
    }

    /// Register the token refresh callback.
    pub fn set_refresh_token(&self, callback: RefreshToken) {
        self.state.write().refresh_token = Some(callback);
    }

    /// Whether a session cookie is cached.
    #[must_use]
    pub fn has_cookie(&self) -> bool {
        self.state.read().cookie.is_some()
    }

    /// Cached session cookie.
    #[must_use]
    pub fn cookie(&self) -> Option<SessionCookie> {
        self.state.read().cookie.clone()
    }

    /// Store the cookie of a successful authentication.
    pub fn set_cookie(&self, cookie: SessionCookie) {
        tracing::debug!(logon_name = %cookie.logon_name, "session cookie stored");
        self.state.write().cookie = Some(cookie);
    }

    /// Drop the cached cookie.
    pub fn invalidate_cookie(&self) {
        if self.state.write().cookie.take().is_some() {
            tracing::debug!("session cookie invalidated");
        }
    }

    /// Handler offering every method the current credentials allow.
    pub fn handler(&self) -> Result<AuthHandler, AuthError> {
        let state = self.state.read();
        let mut handler = AuthHandler::new(state.username.clone());
        if let Some(certificate) = &state.certificate {
            handler.add_method(Box::new(X509Method::new(certificate.clone())));
        }
        if let Some(token) = &state.token {
            handler.add_method(Box::new(JwtMethod::new(token.clone())));
        }
        if let Some(password) = &state.password {
            handler.add_method(Box::new(Scram::pbkdf2(password.clone())));
            handler.add_method(Box::new(Scram::sha256(password.clone())));
        }
        if handler.is_empty() {
            return Err(AuthError::InvalidCredentials(
                "no password, client certificate or token configured".into(),
            ));
        }
        Ok(handler)
    }

    /// Handler offering only the cached cookie, if any.
    #[must_use]
    pub fn cookie_handler(&self, client_id: impl Into<Bytes>) -> Option<AuthHandler> {
        let cookie = self.cookie()?;
        let logon_name = cookie.logon_name.clone();
        Some(AuthHandler::new(logon_name).with_method(CookieMethod::new(cookie, client_id)))
    }

    /// Run the refresh callbacks and store changed credentials.
    ///
    /// Only one refresh runs at a time. The version is bumped once for every
    /// callback that returned a value different from the stored one.
    pub fn refresh(&self) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock();

        let (password_cb, cert_cb, token_cb, password, certificate, token) = {
            let state = self.state.read();
            (
                state.refresh_password.clone(),
                state.refresh_client_cert.clone(),
                state.refresh_token.clone(),
                state.password.clone(),
                state.certificate.clone(),
                state.token.clone(),
            )
        };

        if let Some(callback) = password_cb {
            let current = password.as_ref().map_or("", Password::expose);
            if let Some(new) = callback(current) {
                self.set_password(new);
            }
        }
        if let Some(callback) = cert_cb {
            let (cert_pem, key_pem) = certificate
                .as_ref()
                .map_or((&[][..], &[][..]), |c| (c.cert_pem(), c.key_pem()));
            if let Some((new_cert, new_key)) = callback(cert_pem, key_pem) {
                self.set_client_cert(&new_cert, &new_key)?;
            }
        }
        if let Some(callback) = token_cb {
            let current = token.as_ref().map_or("", Token::expose);
            if let Some(new) = callback(current) {
                self.set_token(new);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for AuthAttrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("AuthAttrs")
            .field("username", &state.username)
            .field("password", &state.password)
            .field("certificate", &state.certificate)
            .field("token", &state.token)
            .field("cookie", &state.cookie)
            .field("version", &state.version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::testutil::{TEST_CERT_PEM, test_key_pem};

    #[test]
    fn test_setters_bump_version_on_change_only() {
        let attrs = AuthAttrs::with_password("SYSTEM", "manager");
        let v = attrs.version();
        attrs.set_password("manager");
        assert_eq!(attrs.version(), v);
        attrs.set_password("other");
        assert_eq!(attrs.version(), v + 1);
    }

    #[test]
    fn test_refresh_identical_password_keeps_version() {
        let attrs = AuthAttrs::with_password("SYSTEM", "manager");
        attrs.set_refresh_password(Arc::new(|current: &str| Some(current.to_string())));
        let v = attrs.version();
        attrs.refresh().unwrap();
        assert_eq!(attrs.version(), v);
    }

    #[test]
    fn test_refresh_changed_password_bumps_version() {
        let attrs = AuthAttrs::with_password("SYSTEM", "old");
        attrs.set_refresh_password(Arc::new(|_: &str| Some("new".to_string())));
        let v = attrs.version();
        attrs.refresh().unwrap();
        assert_eq!(attrs.version(), v + 1);
        assert_eq!(attrs.password().unwrap().expose(), "new");

        // second refresh returns the same value again
        attrs.refresh().unwrap();
        assert_eq!(attrs.version(), v + 1);
    }

    #[test]
    fn test_refresh_none_keeps_credentials() {
        let attrs = AuthAttrs::new();
        attrs.set_token("t1");
        attrs.set_refresh_token(Arc::new(|_: &str| None));
        let v = attrs.version();
        attrs.refresh().unwrap();
        assert_eq!(attrs.version(), v);
        assert_eq!(attrs.token().unwrap().expose(), "t1");
    }

    #[test]
    fn test_callback_may_read_attributes() {
        let attrs = Arc::new(AuthAttrs::with_password("SYSTEM", "pw"));
        let inner = Arc::clone(&attrs);
        attrs.set_refresh_password(Arc::new(move |_: &str| {
            // would deadlock if refresh held the write lock
            Some(format!("{}-rotated", inner.username()))
        }));
        attrs.refresh().unwrap();
        assert_eq!(attrs.password().unwrap().expose(), "SYSTEM-rotated");
    }

    #[test]
    fn test_refresh_client_cert() {
        let attrs = AuthAttrs::new();
        attrs.set_refresh_client_cert(Arc::new(|cert: &[u8], _key: &[u8]| {
            cert.is_empty()
                .then(|| (TEST_CERT_PEM.as_bytes().to_vec(), test_key_pem().into_bytes()))
        }));
        attrs.refresh().unwrap();
        let v = attrs.version();
        assert!(attrs.client_cert().is_some());
        attrs.refresh().unwrap();
        assert_eq!(attrs.version(), v);
        assert_eq!(attrs.handler().unwrap().method_names(), vec!["X509"]);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_serialized() {
        let running = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let attrs = Arc::new(AuthAttrs::with_password("U", "p0"));
        {
            let running = Arc::clone(&running);
            let overlap = Arc::clone(&overlap);
            attrs.set_refresh_password(Arc::new(move |_: &str| {
                if running.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(std::time::Duration::from_millis(5));
                running.fetch_sub(1, Ordering::SeqCst);
                None
            }));
        }

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let attrs = Arc::clone(&attrs);
                tokio::task::spawn_blocking(move || attrs.refresh())
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_methods() {
        let attrs = AuthAttrs::with_password("SYSTEM", "pw");
        attrs.set_token("tok");
        assert_eq!(
            attrs.handler().unwrap().method_names(),
            vec!["JWT", "SCRAMPBKDF2SHA256", "SCRAMSHA256"]
        );
        assert!(AuthAttrs::new().handler().is_err());
    }

    #[test]
    fn test_cookie_lifecycle() {
        let attrs = AuthAttrs::with_password("SYSTEM", "pw");
        assert!(attrs.cookie_handler(Bytes::from_static(b"1@h")).is_none());
        attrs.set_cookie(SessionCookie {
            logon_name: "SYSTEM".into(),
            cookie: Bytes::from_static(b"c"),
        });
        let handler = attrs.cookie_handler(Bytes::from_static(b"1@h")).unwrap();
        assert_eq!(handler.method_names(), vec!["SessionCookie"]);
        assert_eq!(handler.username(), "SYSTEM");
        attrs.invalidate_cookie();
        assert!(!attrs.has_cookie());
    }

    #[test]
    fn test_debug_hides_password() {
        let attrs = AuthAttrs::with_password("SYSTEM", "manager");
        let text = format!("{attrs:?}");
        assert!(text.contains("SYSTEM"));
        assert!(!text.contains("manager"));
    }
}
