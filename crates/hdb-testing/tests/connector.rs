//! Connector behavior: authentication methods, credential refresh, session
//! cookies and tenant redirects.
//!
//! ```bash
//! cargo test -p hdb-testing --test connector
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use hdb_auth::testutil::{TEST_CERT_PEM, test_certificate, test_key_pem};
use hdb_client::{AuthAttrs, Connector};
use hdb_protocol::{AuthFields, MessageKind, Part};
use hdb_testing::{MockHdbServer, RecordedRequest};

/// Method names offered in an initial authentication request.
fn offered_methods(request: &RecordedRequest) -> Vec<String> {
    let fields = request
        .parts
        .iter()
        .find_map(|part| match part {
            Part::Authentication(fields) => Some(fields.clone()),
            _ => None,
        })
        .unwrap_or_else(AuthFields::new);
    fields
        .0
        .iter()
        .skip(1)
        .step_by(2)
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect()
}

// =============================================================================
// Password authentication and refresh
// =============================================================================

#[tokio::test]
async fn test_password_offers_both_scram_methods() {
    let server = MockHdbServer::builder().build().await.unwrap();
    server.connector().connect().await.unwrap();

    let initial = &server.requests_of(MessageKind::Authenticate)[0];
    assert_eq!(
        offered_methods(initial),
        vec!["SCRAMPBKDF2SHA256".to_owned(), "SCRAMSHA256".to_owned()]
    );
}

#[tokio::test]
async fn test_refresh_with_unchanged_password_does_not_retry() {
    let server = MockHdbServer::builder().build().await.unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let auth = AuthAttrs::with_password("SYSTEM", "stale");
    let counter = Arc::clone(&calls);
    auth.set_refresh_password(Arc::new(move |current: &str| {
        counter.fetch_add(1, Ordering::SeqCst);
        Some(current.to_owned())
    }));

    let err = Connector::with_auth(server.address(), auth)
        .connect()
        .await
        .unwrap_err();
    assert!(err.is_auth_error());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.accepted_connections(), 1);
}

#[tokio::test]
async fn test_refresh_with_new_password_retries_once() {
    let server = MockHdbServer::builder().build().await.unwrap();

    let auth = AuthAttrs::with_password("SYSTEM", "stale");
    auth.set_refresh_password(Arc::new(|_current: &str| Some("manager".to_owned())));
    let connector = Connector::with_auth(server.address(), auth);
    let version = connector.auth().version();

    let conn = connector.connect().await.unwrap();
    assert_eq!(conn.username().await, "SYSTEM");
    assert_eq!(server.accepted_connections(), 2);
    assert!(connector.auth().version() > version);
}

// =============================================================================
// JWT and session cookies
// =============================================================================

#[tokio::test]
async fn test_jwt_login_caches_cookie() {
    let server = MockHdbServer::builder()
        .with_jwt("header.payload.signature", "JWTUSER")
        .build()
        .await
        .unwrap();

    let auth = AuthAttrs::new();
    auth.set_token("header.payload.signature");
    let connector = Connector::with_auth(server.address(), auth);

    let conn = connector.connect().await.unwrap();
    assert_eq!(conn.username().await, "JWTUSER");
    assert!(connector.auth().has_cookie());
    conn.close().await.unwrap();

    server.clear_requests();
    let conn = connector.connect().await.unwrap();
    assert_eq!(conn.username().await, "JWTUSER");

    // Cookie logon: one initial request, then the connect request finishes it.
    let initial = server.requests_of(MessageKind::Authenticate);
    assert_eq!(initial.len(), 1);
    assert_eq!(offered_methods(&initial[0]), vec!["SessionCookie".to_owned()]);
    let connect = server.requests_of(MessageKind::Connect);
    assert_eq!(connect.len(), 1);
    assert_eq!(offered_methods(&connect[0]), vec!["SessionCookie".to_owned()]);
}

#[tokio::test]
async fn test_rejected_cookie_is_not_retried() {
    let server = MockHdbServer::builder()
        .with_jwt("header.payload.signature", "JWTUSER")
        .build()
        .await
        .unwrap();

    let auth = AuthAttrs::new();
    auth.set_token("header.payload.signature");
    let connector = Connector::with_auth(server.address(), auth);
    connector.connect().await.unwrap();
    assert!(connector.auth().has_cookie());

    server.revoke_cookies();
    server.clear_requests();

    let conn = connector.connect().await.unwrap();
    assert_eq!(conn.username().await, "JWTUSER");

    // Rejected cookie attempt, then the token handshake.
    let offers: Vec<Vec<String>> = server
        .requests_of(MessageKind::Authenticate)
        .iter()
        .map(offered_methods)
        .collect();
    assert_eq!(
        offers,
        vec![vec!["SessionCookie".to_owned()], vec!["JWT".to_owned()]]
    );
    let connect = server.requests_of(MessageKind::Connect);
    assert_eq!(connect.len(), 1);
    assert_eq!(offered_methods(&connect[0]), vec!["JWT".to_owned()]);

    // The token handshake stored a fresh cookie.
    assert!(connector.auth().has_cookie());
}

#[tokio::test]
async fn test_unknown_token_is_auth_error() {
    let server = MockHdbServer::builder()
        .with_jwt("valid", "JWTUSER")
        .build()
        .await
        .unwrap();

    let auth = AuthAttrs::new();
    auth.set_token("forged");
    let err = Connector::with_auth(server.address(), auth)
        .connect()
        .await
        .unwrap_err();
    assert!(err.is_auth_error());
}

// =============================================================================
// X.509
// =============================================================================

#[tokio::test]
async fn test_x509_login() {
    let (_certificate, public_key) = test_certificate();
    let server = MockHdbServer::builder()
        .with_x509(public_key, "CERTUSER")
        .build()
        .await
        .unwrap();

    let auth = AuthAttrs::new();
    auth.set_client_cert(TEST_CERT_PEM.as_bytes(), test_key_pem().as_bytes())
        .unwrap();
    let connector = Connector::with_auth(server.address(), auth);

    let conn = connector.connect().await.unwrap();
    assert_eq!(conn.username().await, "CERTUSER");
    assert!(connector.auth().has_cookie());
}

// =============================================================================
// Tenant redirect
// =============================================================================

#[tokio::test]
async fn test_tenant_redirect_is_cached() {
    let tenant = MockHdbServer::builder()
        .with_database("T1")
        .build()
        .await
        .unwrap();
    let landing = MockHdbServer::builder()
        .with_database("SYSTEMDB")
        .with_tenant("T1", "127.0.0.1", tenant.port())
        .build()
        .await
        .unwrap();

    let connector = Connector::new(landing.address(), "SYSTEM", "manager").with_database_name("T1");

    let conn = connector.connect().await.unwrap();
    assert_eq!(conn.database_name(), "T1");
    assert_eq!(landing.accepted_connections(), 1);
    assert_eq!(landing.requests_of(MessageKind::DbConnectInfo).len(), 1);
    assert_eq!(tenant.accepted_connections(), 1);
    conn.close().await.unwrap();

    let conn = connector.connect().await.unwrap();
    assert_eq!(conn.database_name(), "T1");
    assert_eq!(landing.accepted_connections(), 1, "landing host skipped");
    assert_eq!(tenant.accepted_connections(), 2);
}

#[tokio::test]
async fn test_no_redirect_for_own_database() {
    let server = MockHdbServer::builder().with_database("HXE").build().await.unwrap();
    let connector = Connector::new(server.address(), "SYSTEM", "manager").with_database_name("HXE");

    let conn = connector.connect().await.unwrap();
    assert_eq!(conn.database_name(), "HXE");
    assert_eq!(server.accepted_connections(), 1);
    conn.ping().await.unwrap();
}

#[tokio::test]
async fn test_unknown_tenant_fails() {
    let server = MockHdbServer::builder().build().await.unwrap();
    let connector = Connector::new(server.address(), "SYSTEM", "manager").with_database_name("NOPE");

    let err = connector.connect().await.unwrap_err();
    assert!(!err.is_auth_error());
}
