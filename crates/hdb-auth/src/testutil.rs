//! Throwaway certificate material for tests.

#![allow(clippy::expect_used)]

use std::sync::OnceLock;

use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::credentials::ClientCertificate;

/// PEM block with a placeholder DER body; the server side only checks the
/// signature, never the certificate contents.
pub const TEST_CERT_PEM: &str = "-----BEGIN CERTIFICATE-----\nMAMCAQE=\n-----END CERTIFICATE-----\n";

fn test_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("generate RSA test key")
    })
}

/// PKCS#8 PEM of the shared test key.
#[must_use]
pub fn test_key_pem() -> String {
    test_key()
        .to_pkcs8_pem(LineEnding::LF)
        .expect("encode RSA test key")
        .to_string()
}

/// A client certificate and the public key that verifies its signatures.
#[must_use]
pub fn test_certificate() -> (ClientCertificate, RsaPublicKey) {
    let certificate = ClientCertificate::from_pem(TEST_CERT_PEM.as_bytes(), test_key_pem().as_bytes())
        .expect("parse test certificate");
    (certificate, RsaPublicKey::from(test_key()))
}
