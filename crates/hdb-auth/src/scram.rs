//! SCRAM style password methods.
//!
//! Both variants derive a salted password, prove knowledge of it with a
//! client proof and check the server proof of the final reply:
//!
//! ```text
//! salted       = HMAC(password, salt)                  SCRAMSHA256
//!              = PBKDF2(password, salt, rounds)        SCRAMPBKDF2SHA256
//! key          = SHA256(salted)
//! client_proof = HMAC(SHA256(key), salt | server_challenge | client_challenge) XOR key
//! server_proof = HMAC(HMAC(salted, salt), client_challenge | salt | server_challenge)
//! ```
//!
//! The free functions are public so that test servers can verify proofs.

use bytes::Bytes;
use hdb_protocol::AuthFields;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::credentials::Password;
use crate::error::AuthError;
use crate::method::AuthMethod;

type HmacSha256 = Hmac<Sha256>;

/// Length of the client challenge.
pub const CLIENT_CHALLENGE_LEN: usize = 64;

/// Method name of SCRAM-SHA256.
pub const SCRAM_SHA256: &str = "SCRAMSHA256";

/// Method name of SCRAM-PBKDF2-SHA256.
pub const SCRAM_PBKDF2_SHA256: &str = "SCRAMPBKDF2SHA256";

fn hmac(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], AuthError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| AuthError::Crypto(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Salted password of SCRAM-SHA256.
pub fn salted_sha256(password: &[u8], salt: &[u8]) -> Result<[u8; 32], AuthError> {
    hmac(password, &[salt])
}

/// Salted password of SCRAM-PBKDF2-SHA256.
pub fn salted_pbkdf2(password: &[u8], salt: &[u8], rounds: u32) -> Result<[u8; 32], AuthError> {
    if rounds == 0 {
        return Err(AuthError::Crypto("zero PBKDF2 rounds".into()));
    }
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, rounds, &mut out);
    Ok(out)
}

/// Client proof for a salted password.
pub fn client_proof(
    salted: &[u8; 32],
    salt: &[u8],
    server_challenge: &[u8],
    client_challenge: &[u8],
) -> Result<[u8; 32], AuthError> {
    let key: [u8; 32] = Sha256::digest(salted).into();
    let verifier: [u8; 32] = Sha256::digest(key).into();
    let sig = hmac(&verifier, &[salt, server_challenge, client_challenge])?;
    let mut proof = [0u8; 32];
    for (i, b) in proof.iter_mut().enumerate() {
        *b = sig[i] ^ key[i];
    }
    Ok(proof)
}

/// Server proof for a salted password.
pub fn server_proof(
    salted: &[u8; 32],
    salt: &[u8],
    server_challenge: &[u8],
    client_challenge: &[u8],
) -> Result<[u8; 32], AuthError> {
    let server_key = hmac(salted, &[salt])?;
    hmac(&server_key, &[client_challenge, salt, server_challenge])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Sha256,
    Pbkdf2,
}

/// Password based SCRAM method.
#[derive(Debug)]
pub struct Scram {
    variant: Variant,
    password: Password,
    client_challenge: Vec<u8>,
    salt: Bytes,
    server_challenge: Bytes,
    rounds: u32,
    salted: Option<[u8; 32]>,
}

impl Scram {
    /// SCRAM-SHA256.
    #[must_use]
    pub fn sha256(password: Password) -> Self {
        Self::new(Variant::Sha256, password)
    }

    /// SCRAM-PBKDF2-SHA256.
    #[must_use]
    pub fn pbkdf2(password: Password) -> Self {
        Self::new(Variant::Pbkdf2, password)
    }

    fn new(variant: Variant, password: Password) -> Self {
        let mut client_challenge = vec![0u8; CLIENT_CHALLENGE_LEN];
        rand::thread_rng().fill_bytes(&mut client_challenge);
        Self {
            variant,
            password,
            client_challenge,
            salt: Bytes::new(),
            server_challenge: Bytes::new(),
            rounds: 0,
            salted: None,
        }
    }

    /// The random client challenge sent with the initial request.
    #[must_use]
    pub fn client_challenge(&self) -> &[u8] {
        &self.client_challenge
    }
}

impl AuthMethod for Scram {
    fn name(&self) -> &'static str {
        match self.variant {
            Variant::Sha256 => SCRAM_SHA256,
            Variant::Pbkdf2 => SCRAM_PBKDF2_SHA256,
        }
    }

    fn order(&self) -> u8 {
        match self.variant {
            Variant::Pbkdf2 => 4,
            Variant::Sha256 => 5,
        }
    }

    fn initial_data(&mut self) -> Result<Bytes, AuthError> {
        Ok(Bytes::copy_from_slice(&self.client_challenge))
    }

    fn initial_reply(&mut self, data: Bytes) -> Result<(), AuthError> {
        let fields = AuthFields::from_bytes(data)?;
        let expected = match self.variant {
            Variant::Sha256 => 2,
            Variant::Pbkdf2 => 3,
        };
        if fields.len() != expected {
            return Err(AuthError::AuthenticationFailed(format!(
                "{}: expected {expected} challenge fields, got {}",
                self.name(),
                fields.len()
            )));
        }
        self.salt = fields.0[0].clone();
        self.server_challenge = fields.0[1].clone();
        if self.variant == Variant::Pbkdf2 {
            let raw: [u8; 4] = fields.0[2].as_ref().try_into().map_err(|_| {
                AuthError::AuthenticationFailed("PBKDF2 rounds field must be 4 bytes".into())
            })?;
            self.rounds = u32::from_be_bytes(raw);
        }
        Ok(())
    }

    fn final_data(&mut self) -> Result<Bytes, AuthError> {
        let password = self.password.expose().as_bytes();
        let salted = match self.variant {
            Variant::Sha256 => salted_sha256(password, &self.salt)?,
            Variant::Pbkdf2 => salted_pbkdf2(password, &self.salt, self.rounds)?,
        };
        let proof = client_proof(
            &salted,
            &self.salt,
            &self.server_challenge,
            &self.client_challenge,
        )?;
        self.salted = Some(salted);
        Ok(AuthFields::new()
            .with(Bytes::copy_from_slice(&proof))
            .to_bytes()?)
    }

    fn final_reply(&mut self, data: Bytes) -> Result<(), AuthError> {
        let salted = self
            .salted
            .ok_or(AuthError::InvalidState("final reply before final request"))?;
        let fields = AuthFields::from_bytes(data)?;
        let received = fields.get(0).ok_or(AuthError::ServerProofMismatch)?;
        let expected = server_proof(
            &salted,
            &self.salt,
            &self.server_challenge,
            &self.client_challenge,
        )?;
        if received.as_ref() != expected.as_slice() {
            return Err(AuthError::ServerProofMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn challenge(fields: &[&[u8]]) -> Bytes {
        let mut list = AuthFields::new();
        for f in fields {
            list.push(Bytes::copy_from_slice(f));
        }
        list.to_bytes().unwrap()
    }

    #[test]
    fn test_client_proof_depends_on_challenges() {
        let salted = salted_sha256(b"secret", b"salt").unwrap();
        let a = client_proof(&salted, b"salt", b"server", b"client-1").unwrap();
        let b = client_proof(&salted, b"salt", b"server", b"client-2").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, client_proof(&salted, b"salt", b"server", b"client-1").unwrap());
    }

    #[test]
    fn test_pbkdf2_rounds_change_key() {
        let one = salted_pbkdf2(b"secret", b"salt", 1).unwrap();
        let many = salted_pbkdf2(b"secret", b"salt", 15000).unwrap();
        assert_ne!(one, many);
        assert!(salted_pbkdf2(b"secret", b"salt", 0).is_err());
    }

    #[test]
    fn test_full_exchange_sha256() {
        let mut method = Scram::sha256(Password::new("secret"));
        let client_challenge = method.initial_data().unwrap();
        assert_eq!(client_challenge.len(), CLIENT_CHALLENGE_LEN);

        method
            .initial_reply(challenge(&[b"salty", b"server-challenge"]))
            .unwrap();
        let final_data = method.final_data().unwrap();

        let salted = salted_sha256(b"secret", b"salty").unwrap();
        let proof = AuthFields::from_bytes(final_data).unwrap();
        let expected = client_proof(&salted, b"salty", b"server-challenge", &client_challenge).unwrap();
        assert_eq!(proof.get(0).unwrap().as_ref(), expected.as_slice());

        let sp = server_proof(&salted, b"salty", b"server-challenge", &client_challenge).unwrap();
        method.final_reply(challenge(&[&sp])).unwrap();
    }

    #[test]
    fn test_pbkdf2_reads_big_endian_rounds() {
        let mut method = Scram::pbkdf2(Password::new("secret"));
        method.initial_data().unwrap();
        method
            .initial_reply(challenge(&[b"salt", b"chal", &15000u32.to_be_bytes()]))
            .unwrap();
        assert_eq!(method.rounds, 15000);
    }

    #[test]
    fn test_wrong_server_proof_rejected() {
        let mut method = Scram::sha256(Password::new("secret"));
        method.initial_reply(challenge(&[b"salt", b"chal"])).unwrap();
        method.final_data().unwrap();
        let err = method.final_reply(challenge(&[&[0u8; 32]])).unwrap_err();
        assert!(matches!(err, AuthError::ServerProofMismatch));
    }

    #[test]
    fn test_final_reply_before_final_request() {
        let mut method = Scram::sha256(Password::new("secret"));
        let err = method.final_reply(challenge(&[b"x"])).unwrap_err();
        assert!(matches!(err, AuthError::InvalidState(_)));
    }

    #[test]
    fn test_malformed_challenge() {
        let mut method = Scram::pbkdf2(Password::new("secret"));
        let err = method.initial_reply(challenge(&[b"salt", b"chal"])).unwrap_err();
        assert!(matches!(err, AuthError::AuthenticationFailed(_)));
    }
}
