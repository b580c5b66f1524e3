//! # hdb-auth
//!
//! Authentication methods for HDB connections, isolated from connection
//! logic for better modularity and testing.
//!
//! Authentication is a two round exchange of `authentication` parts. The
//! client offers every method its credentials allow, the server selects
//! one, and the selected method answers the server challenge.
//!
//! ## Supported Authentication Methods
//!
//! | Method | Wire name | Credentials |
//! |--------|-----------|-------------|
//! | Session cookie | `SessionCookie` | cookie of an earlier authentication |
//! | X.509 | `X509` | PEM certificate chain and RSA key |
//! | JWT | `JWT` | bearer token |
//! | SCRAM PBKDF2 | `SCRAMPBKDF2SHA256` | user and password |
//! | SCRAM | `SCRAMSHA256` | user and password |
//!
//! [`AuthAttrs`] holds the credentials of a connector together with the
//! refresh callbacks and the cached cookie.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod attrs;
pub mod cookie;
pub mod credentials;
pub mod error;
pub mod handler;
pub mod jwt;
pub mod method;
pub mod scram;
#[cfg(any(test, feature = "test-util"))]
pub mod testutil;
pub mod x509;

pub use attrs::{AuthAttrs, RefreshClientCert, RefreshPassword, RefreshToken};
pub use cookie::CookieMethod;
pub use credentials::{ClientCertificate, Password, Token};
pub use error::AuthError;
pub use handler::AuthHandler;
pub use jwt::JwtMethod;
pub use method::{AuthMethod, SessionCookie};
pub use scram::Scram;
pub use x509::X509Method;
