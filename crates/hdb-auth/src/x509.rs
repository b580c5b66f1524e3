//! X.509 client certificate method.
//!
//! The server sends a nonce; the client answers with its certificate chain
//! and an RSA PKCS#1 v1.5 SHA-256 signature over the nonce. The final
//! reply carries the logon name and a session cookie.

use bytes::Bytes;
use hdb_protocol::AuthFields;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::credentials::ClientCertificate;
use crate::error::AuthError;
use crate::method::{AuthMethod, SessionCookie};

/// Method name of X.509 authentication.
pub const X509: &str = "X509";

/// Sign `nonce` with the certificate's key.
pub fn sign_nonce(certificate: &ClientCertificate, nonce: &[u8]) -> Result<Vec<u8>, AuthError> {
    let digest = Sha256::digest(nonce);
    certificate
        .private_key()
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| AuthError::Crypto(e.to_string()))
}

/// Check a nonce signature against a public key.
pub fn verify_nonce(public_key: &RsaPublicKey, nonce: &[u8], signature: &[u8]) -> bool {
    let digest = Sha256::digest(nonce);
    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .is_ok()
}

/// Split final request data into the certificate chain and the signature.
pub fn parse_final_data(data: Bytes) -> Result<(Vec<Bytes>, Bytes), AuthError> {
    let fields = AuthFields::from_bytes(data)?;
    let (Some(chain), Some(signature)) = (fields.get(0), fields.get(1)) else {
        return Err(AuthError::AuthenticationFailed("X509: truncated final data".into()));
    };
    let chain = AuthFields::from_bytes(chain.clone())?;
    Ok((chain.0, signature.clone()))
}

/// X.509 method state.
#[derive(Debug)]
pub struct X509Method {
    certificate: ClientCertificate,
    nonce: Option<Bytes>,
    cookie: Option<SessionCookie>,
}

impl X509Method {
    /// Authenticate with `certificate`.
    #[must_use]
    pub fn new(certificate: ClientCertificate) -> Self {
        Self {
            certificate,
            nonce: None,
            cookie: None,
        }
    }
}

impl AuthMethod for X509Method {
    fn name(&self) -> &'static str {
        X509
    }

    fn order(&self) -> u8 {
        1
    }

    fn initial_data(&mut self) -> Result<Bytes, AuthError> {
        Ok(Bytes::new())
    }

    fn initial_reply(&mut self, data: Bytes) -> Result<(), AuthError> {
        if data.is_empty() {
            return Err(AuthError::AuthenticationFailed("X509: empty server nonce".into()));
        }
        self.nonce = Some(data);
        Ok(())
    }

    fn final_data(&mut self) -> Result<Bytes, AuthError> {
        let nonce = self
            .nonce
            .as_ref()
            .ok_or(AuthError::InvalidState("final request before initial reply"))?;
        let signature = sign_nonce(&self.certificate, nonce)?;
        let chain = AuthFields(self.certificate.chain().to_vec()).to_bytes()?;
        Ok(AuthFields::new()
            .with(chain)
            .with(Bytes::from(signature))
            .to_bytes()?)
    }

    fn final_reply(&mut self, data: Bytes) -> Result<(), AuthError> {
        let fields = AuthFields::from_bytes(data)?;
        let (Some(logon_name), Some(cookie)) = (fields.get(0), fields.get(1)) else {
            return Err(AuthError::AuthenticationFailed("X509: truncated final reply".into()));
        };
        self.cookie = Some(SessionCookie {
            logon_name: String::from_utf8_lossy(logon_name).into_owned(),
            cookie: cookie.clone(),
        });
        Ok(())
    }

    fn cookie(&self) -> Option<SessionCookie> {
        self.cookie.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testutil::test_certificate;

    #[test]
    fn test_signature_verifies() {
        let (certificate, public_key) = test_certificate();
        let mut method = X509Method::new(certificate);
        assert!(method.initial_data().unwrap().is_empty());
        method.initial_reply(Bytes::from_static(b"nonce-123")).unwrap();

        let (chain, signature) = parse_final_data(method.final_data().unwrap()).unwrap();
        assert_eq!(chain.len(), 1);
        assert!(verify_nonce(&public_key, b"nonce-123", &signature));
        assert!(!verify_nonce(&public_key, b"other", &signature));
    }

    #[test]
    fn test_final_reply_mints_cookie() {
        let (certificate, _) = test_certificate();
        let mut method = X509Method::new(certificate);
        method.initial_reply(Bytes::from_static(b"n")).unwrap();
        method.final_data().unwrap();
        let reply = AuthFields::new()
            .with(Bytes::from_static(b"CERTUSER"))
            .with(Bytes::from_static(b"\x01\x02\x03"))
            .to_bytes()
            .unwrap();
        method.final_reply(reply).unwrap();
        let cookie = method.cookie().unwrap();
        assert_eq!(cookie.logon_name, "CERTUSER");
        assert_eq!(cookie.cookie.as_ref(), b"\x01\x02\x03");
    }

    #[test]
    fn test_final_before_nonce() {
        let (certificate, _) = test_certificate();
        let mut method = X509Method::new(certificate);
        assert!(matches!(method.final_data(), Err(AuthError::InvalidState(_))));
    }
}
