//! Credential types for authentication.
//!
//! Secrets never show up in `Debug` output.

use std::fmt;
use std::io::BufReader;
use std::sync::Arc;

use bytes::Bytes;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use rustls_pemfile::Item;

use crate::error::AuthError;

/// A password.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(Arc<str>);

impl Password {
    /// Wrap a password.
    pub fn new(password: impl Into<Arc<str>>) -> Self {
        Self(password.into())
    }

    /// The clear text.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// An opaque bearer token (JWT).
#[derive(Clone, PartialEq, Eq)]
pub struct Token(Arc<str>);

impl Token {
    /// Wrap a token.
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self(token.into())
    }

    /// The token text.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// A client certificate chain with its RSA private key.
///
/// Built from PEM; the original PEM text is kept so that refreshed
/// material can be compared with the stored one.
#[derive(Clone)]
pub struct ClientCertificate {
    cert_pem: Arc<[u8]>,
    key_pem: Arc<[u8]>,
    chain: Vec<Bytes>,
    key: Arc<RsaPrivateKey>,
}

impl ClientCertificate {
    /// Parse a PEM certificate chain and a PEM (PKCS#1 or PKCS#8) RSA key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, AuthError> {
        let mut chain = Vec::new();
        for item in rustls_pemfile::read_all(&mut BufReader::new(cert_pem)) {
            match item.map_err(|e| AuthError::Certificate(e.to_string()))? {
                Item::X509Certificate(der) => chain.push(Bytes::copy_from_slice(der.as_ref())),
                _ => continue,
            }
        }
        if chain.is_empty() {
            return Err(AuthError::Certificate("no certificate in PEM data".into()));
        }

        let key = parse_private_key(key_pem)?;
        Ok(Self {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
            chain,
            key: Arc::new(key),
        })
    }

    /// DER certificates, leaf first.
    #[must_use]
    pub fn chain(&self) -> &[Bytes] {
        &self.chain
    }

    /// The private key.
    #[must_use]
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }

    /// Whether this is built from the given PEM material.
    #[must_use]
    pub fn same_pem(&self, cert_pem: &[u8], key_pem: &[u8]) -> bool {
        *self.cert_pem == *cert_pem && *self.key_pem == *key_pem
    }

    /// PEM text of the certificate chain.
    #[must_use]
    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    /// PEM text of the key.
    #[must_use]
    pub fn key_pem(&self) -> &[u8] {
        &self.key_pem
    }
}

fn parse_private_key(key_pem: &[u8]) -> Result<RsaPrivateKey, AuthError> {
    for item in rustls_pemfile::read_all(&mut BufReader::new(key_pem)) {
        match item.map_err(|e| AuthError::Certificate(e.to_string()))? {
            Item::Pkcs8Key(der) => {
                return RsaPrivateKey::from_pkcs8_der(der.secret_pkcs8_der())
                    .map_err(|e| AuthError::Certificate(format!("PKCS#8 key: {e}")));
            }
            Item::Pkcs1Key(der) => {
                return RsaPrivateKey::from_pkcs1_der(der.secret_pkcs1_der())
                    .map_err(|e| AuthError::Certificate(format!("PKCS#1 key: {e}")));
            }
            Item::Sec1Key(_) => {
                return Err(AuthError::Certificate(
                    "EC keys are not supported, use an RSA key".into(),
                ));
            }
            _ => continue,
        }
    }
    Err(AuthError::Certificate("no private key in PEM data".into()))
}

impl fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("chain_len", &self.chain.len())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for ClientCertificate {
    fn eq(&self, other: &Self) -> bool {
        self.same_pem(&other.cert_pem, &other.key_pem)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let password = Password::new("hunter2");
        let token = Token::new("eyJhbGciOi");
        assert!(!format!("{password:?}").contains("hunter2"));
        assert!(!format!("{token:?}").contains("eyJ"));
        assert_eq!(password.expose(), "hunter2");
    }

    #[test]
    fn test_certificate_requires_chain() {
        let err = ClientCertificate::from_pem(b"garbage", b"garbage").unwrap_err();
        assert!(matches!(err, AuthError::Certificate(_)));
    }
}
