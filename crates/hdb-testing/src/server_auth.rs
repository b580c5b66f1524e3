//! Server side of the authentication handshake.
//!
//! Of the methods a client offers, the mock answers the first one it can
//! serve in this order: session cookie, X.509, JWT, SCRAM-PBKDF2, SCRAM.

use bytes::Bytes;
use hdb_auth::cookie::SESSION_COOKIE;
use hdb_auth::jwt::JWT;
use hdb_auth::scram::{self, SCRAM_PBKDF2_SHA256, SCRAM_SHA256};
use hdb_auth::x509::{self, X509};
use hdb_protocol::{AuthFields, ServerError};
use rand::RngCore;

use crate::mock_server::ServerState;

/// Error code of a rejected authentication.
pub(crate) const AUTHENTICATION_FAILED: i32 = 10;

const SALT_LEN: usize = 16;
const SERVER_CHALLENGE_LEN: usize = 48;
const NONCE_LEN: usize = 32;
const COOKIE_LEN: usize = 32;

/// What the server remembers between the initial and the final request.
#[derive(Debug)]
pub(crate) enum Challenge {
    Scram {
        method: &'static str,
        password: String,
        salt: Bytes,
        server_challenge: Bytes,
        client_challenge: Bytes,
        rounds: Option<u32>,
    },
    Jwt {
        logon_name: String,
    },
    X509 {
        nonce: Bytes,
    },
    Cookie {
        logon_name: String,
    },
}

pub(crate) fn rejected(text: impl Into<String>) -> ServerError {
    let mut err = ServerError::new(AUTHENTICATION_FAILED, text);
    err.sql_state = *b"28000";
    err
}

pub(crate) fn random_bytes(len: usize) -> Bytes {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    Bytes::from(buf)
}

pub(crate) fn new_cookie() -> Bytes {
    random_bytes(COOKIE_LEN)
}

fn reply(method: &str, data: Bytes) -> AuthFields {
    AuthFields::new()
        .with(Bytes::copy_from_slice(method.as_bytes()))
        .with(data)
}

fn nested(fields: &AuthFields) -> Result<Bytes, ServerError> {
    fields.to_bytes().map_err(|e| rejected(e.to_string()))
}

/// Data the client sent for `method` in its initial request.
fn offered<'a>(request: &'a AuthFields, method: &str) -> Option<&'a Bytes> {
    request.0.get(1..)?.chunks(2).find_map(|pair| match pair {
        [name, data] if name.as_ref() == method.as_bytes() => Some(data),
        _ => None,
    })
}

/// Answer an initial request `[user, method1, data1, method2, data2, ...]`.
pub(crate) fn initial(
    state: &ServerState,
    request: &AuthFields,
) -> Result<(Challenge, AuthFields), ServerError> {
    let user = request
        .get(0)
        .map(|user| String::from_utf8_lossy(user).into_owned())
        .ok_or_else(|| rejected("authentication request without user name"))?;

    if let Some(data) = offered(request, SESSION_COOKIE) {
        let logon_name = state
            .cookie_owner(data)
            .ok_or_else(|| rejected("session cookie rejected"))?;
        return Ok((
            Challenge::Cookie { logon_name },
            reply(SESSION_COOKIE, Bytes::new()),
        ));
    }

    if offered(request, X509).is_some() && !state.config.certificates.is_empty() {
        let nonce = random_bytes(NONCE_LEN);
        return Ok((Challenge::X509 { nonce: nonce.clone() }, reply(X509, nonce)));
    }

    if let Some(token) = offered(request, JWT).filter(|_| !state.config.tokens.is_empty()) {
        let logon_name = state
            .config
            .tokens
            .get(&*String::from_utf8_lossy(token))
            .cloned()
            .ok_or_else(|| rejected("invalid token"))?;
        let data = Bytes::from(logon_name.clone().into_bytes());
        return Ok((Challenge::Jwt { logon_name }, reply(JWT, data)));
    }

    for method in [SCRAM_PBKDF2_SHA256, SCRAM_SHA256] {
        let Some(client_challenge) = offered(request, method) else {
            continue;
        };
        let password = state
            .config
            .users
            .get(&user)
            .cloned()
            .ok_or_else(|| rejected(format!("authentication failed for user {user}")))?;
        let salt = random_bytes(SALT_LEN);
        let server_challenge = random_bytes(SERVER_CHALLENGE_LEN);
        let rounds = (method == SCRAM_PBKDF2_SHA256).then_some(state.config.pbkdf2_rounds);

        let mut fields = AuthFields::new()
            .with(salt.clone())
            .with(server_challenge.clone());
        if let Some(rounds) = rounds {
            fields.push(Bytes::copy_from_slice(&rounds.to_be_bytes()));
        }
        let data = nested(&fields)?;
        let challenge = Challenge::Scram {
            method,
            password,
            salt,
            server_challenge,
            client_challenge: client_challenge.clone(),
            rounds,
        };
        return Ok((challenge, reply(method, data)));
    }

    Err(rejected("no supported authentication method offered"))
}

/// Check a final request `[user, method, data]`.
///
/// Returns the session user and the final reply.
pub(crate) fn finish(
    state: &ServerState,
    challenge: Challenge,
    request: &AuthFields,
) -> Result<(String, AuthFields), ServerError> {
    let (Some(user), Some(method), Some(data)) = (request.get(0), request.get(1), request.get(2))
    else {
        return Err(rejected("truncated final authentication request"));
    };
    let user = String::from_utf8_lossy(user).into_owned();

    match challenge {
        Challenge::Scram {
            method: expected,
            password,
            salt,
            server_challenge,
            client_challenge,
            rounds,
        } => {
            check_method(method, expected)?;
            let proof = AuthFields::from_bytes(data.clone())
                .ok()
                .and_then(|fields| fields.get(0).cloned())
                .ok_or_else(|| rejected("missing client proof"))?;
            let salted = match rounds {
                Some(rounds) => scram::salted_pbkdf2(password.as_bytes(), &salt, rounds),
                None => scram::salted_sha256(password.as_bytes(), &salt),
            }
            .map_err(|e| rejected(e.to_string()))?;
            let expected_proof =
                scram::client_proof(&salted, &salt, &server_challenge, &client_challenge)
                    .map_err(|e| rejected(e.to_string()))?;
            if proof.as_ref() != expected_proof.as_slice() {
                return Err(rejected(format!("authentication failed for user {user}")));
            }
            let server_proof =
                scram::server_proof(&salted, &salt, &server_challenge, &client_challenge)
                    .map_err(|e| rejected(e.to_string()))?;
            let data = nested(&AuthFields::new().with(Bytes::copy_from_slice(&server_proof)))?;
            Ok((user, reply(expected, data)))
        }
        Challenge::Jwt { logon_name } => {
            check_method(method, JWT)?;
            let cookie = state.mint_cookie(&logon_name);
            Ok((logon_name, reply(JWT, cookie)))
        }
        Challenge::X509 { nonce } => {
            check_method(method, X509)?;
            let (_chain, signature) =
                x509::parse_final_data(data.clone()).map_err(|e| rejected(e.to_string()))?;
            let logon_name = state
                .config
                .certificates
                .iter()
                .find(|(key, _)| x509::verify_nonce(key, &nonce, &signature))
                .map(|(_, logon_name)| logon_name.clone())
                .ok_or_else(|| rejected("certificate signature rejected"))?;
            let cookie = state.mint_cookie(&logon_name);
            let data = nested(
                &AuthFields::new()
                    .with(Bytes::from(logon_name.clone().into_bytes()))
                    .with(cookie),
            )?;
            Ok((logon_name, reply(X509, data)))
        }
        Challenge::Cookie { logon_name } => {
            check_method(method, SESSION_COOKIE)?;
            Ok((logon_name, reply(SESSION_COOKIE, Bytes::new())))
        }
    }
}

fn check_method(got: &Bytes, expected: &str) -> Result<(), ServerError> {
    if got.as_ref() == expected.as_bytes() {
        Ok(())
    } else {
        Err(rejected(format!(
            "method {} does not continue {expected}",
            String::from_utf8_lossy(got)
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_offered_pairs() {
        let request = AuthFields::new()
            .with(Bytes::from_static(b"SYSTEM"))
            .with(Bytes::from_static(b"SCRAMSHA256"))
            .with(Bytes::from_static(b"abc"))
            .with(Bytes::from_static(b"JWT"))
            .with(Bytes::from_static(b"token"));
        assert_eq!(offered(&request, SCRAM_SHA256).unwrap().as_ref(), b"abc");
        assert_eq!(offered(&request, JWT).unwrap().as_ref(), b"token");
        assert!(offered(&request, X509).is_none());
    }

    #[test]
    fn test_offered_ignores_user_field() {
        let request = AuthFields::new().with(Bytes::from_static(b"JWT"));
        assert!(offered(&request, JWT).is_none());
    }

    #[test]
    fn test_rejected_is_auth_failure() {
        let err = rejected("nope");
        assert_eq!(err.code, AUTHENTICATION_FAILED);
        assert_eq!(err.sql_state(), "28000");
    }

    #[test]
    fn test_check_method() {
        assert!(check_method(&Bytes::from_static(b"JWT"), JWT).is_ok());
        assert!(check_method(&Bytes::from_static(b"X509"), JWT).is_err());
    }
}
