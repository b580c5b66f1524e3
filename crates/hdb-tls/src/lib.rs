//! # hdb-tls
//!
//! TLS layer for HDB connections.
//!
//! HDB wraps the whole session in TLS when encryption is enabled:
//!
//! ```text
//! TCP Connect → TLS Handshake → Prolog → Authenticate → Connect
//! ```
//!
//! ## Features
//!
//! - TLS 1.2 and TLS 1.3 via rustls
//! - Mozilla root store plus extra root CA PEM files
//! - Server name override for SNI and hostname verification
//! - Insecure skip-verify for development
//!
//! ```rust,ignore
//! use hdb_tls::{TlsConfig, TlsConnector};
//!
//! let config = TlsConfig::new()
//!     .add_root_ca_file("/etc/ssl/hana-ca.pem")
//!     .with_server_name("hana.internal");
//! let tls = TlsConnector::new(config)?.connect(tcp, "10.0.0.5").await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;

pub use config::{TlsConfig, TlsVersion};
pub use connector::{TlsConnector, load_pem_certificates};
pub use error::TlsError;

// Re-export tokio-rustls stream type for convenience
pub use tokio_rustls::client::TlsStream;
