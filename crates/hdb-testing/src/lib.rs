//! # hdb-testing
//!
//! Test infrastructure for HDB driver development.
//!
//! This crate provides a mock HDB server that speaks the wire protocol
//! well enough to run the client end to end in unit tests, without a
//! SAP HANA instance.
//!
//! ## Features
//!
//! - Password, JWT, X.509 and session cookie authentication
//! - Configured responses for direct and prepared statements
//! - Paged cursors, LOB reads and piecewise LOB writes
//! - Procedure calls with output parameters and tables
//! - Tenant database lookups for redirect tests
//! - Request recording for assertions on the wire traffic
//!
//! ## Mock Server Example
//!
//! ```rust,ignore
//! use hdb_client::HdbValue;
//! use hdb_testing::mock_server::{MockColumn, MockHdbServer, MockResponse};
//!
//! #[tokio::test]
//! async fn test_with_mock_server() {
//!     let server = MockHdbServer::builder()
//!         .with_response(
//!             "select id, name from users where id = 1",
//!             MockResponse::rows(
//!                 vec![MockColumn::int("ID"), MockColumn::nvarchar("NAME", 50)],
//!                 vec![vec![HdbValue::Int(1), HdbValue::String("Alice".into())]],
//!             ),
//!         )
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let conn = server.connector().connect().await.unwrap();
//!     let rows = conn
//!         .query("select id, name from users where id = 1", &[])
//!         .await
//!         .unwrap()
//!         .collect_all()
//!         .await
//!         .unwrap();
//!     assert_eq!(rows.len(), 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_server;
mod server_auth;

pub use mock_server::{
    MockColumn, MockHdbServer, MockResponse, MockServerBuilder, MockServerConfig, MockServerError,
    MockStatement, MockTable, RecordedRequest, WHILE_PARSING_PROTOCOL,
};
