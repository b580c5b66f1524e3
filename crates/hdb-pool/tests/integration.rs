//! Pool behavior against the mock HDB server.
//!
//! ```bash
//! cargo test -p hdb-pool --test integration
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use hdb_client::TxOptions;
use hdb_protocol::MessageKind;
use hdb_pool::{Pool, PoolConfig, PoolError};
use hdb_testing::{MockHdbServer, MockResponse};

async fn pool_with(server: &MockHdbServer, config: PoolConfig) -> Pool {
    Pool::builder()
        .connector(server.connector())
        .config(config)
        .build()
        .await
        .expect("build pool")
}

#[tokio::test]
async fn test_min_connections_opened_eagerly() {
    let server = MockHdbServer::builder().build().await.unwrap();
    let pool = pool_with(&server, PoolConfig::new().min_connections(2).max_connections(4)).await;

    let status = pool.status();
    assert_eq!(status.total, 2);
    assert_eq!(status.available, 2);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.max, 4);
    assert_eq!(server.accepted_connections(), 2);
}

#[tokio::test]
async fn test_connection_reused_after_return() {
    let server = MockHdbServer::builder()
        .with_response("select 42 from dummy", MockResponse::scalar_int(42))
        .build()
        .await
        .unwrap();
    let pool = pool_with(&server, PoolConfig::new().max_connections(2)).await;

    {
        let conn = pool.get().await.unwrap();
        let rows = conn
            .query("select 42 from dummy", &[])
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(rows[0].get::<i32>(0).unwrap(), 42);
        assert_eq!(pool.status().in_use, 1);
    }
    assert_eq!(pool.status().in_use, 0);
    assert_eq!(pool.status().available, 1);

    let conn = pool.get().await.unwrap();
    assert_eq!(conn.metadata().checkout_count, 2);
    drop(conn);

    assert_eq!(server.accepted_connections(), 1);
    let metrics = pool.metrics();
    assert_eq!(metrics.connections_created, 1);
    assert_eq!(metrics.checkouts_successful, 2);
    assert_eq!(metrics.checkouts_failed, 0);
}

#[tokio::test]
async fn test_acquisition_timeout() {
    let server = MockHdbServer::builder().build().await.unwrap();
    let pool = pool_with(
        &server,
        PoolConfig::new()
            .max_connections(1)
            .connection_timeout(Duration::from_millis(100)),
    )
    .await;

    let held = pool.get().await.unwrap();
    let err = pool.get().await.unwrap_err();
    assert!(matches!(err, PoolError::AcquisitionTimeout(_)), "unexpected error: {err}");
    assert!(pool.try_get().unwrap().is_none());
    assert_eq!(pool.metrics().checkouts_failed, 1);

    drop(held);
    assert!(pool.try_get().unwrap().is_some());
}

#[tokio::test]
async fn test_closed_pool_rejects_checkout() {
    let server = MockHdbServer::builder().build().await.unwrap();
    let pool = pool_with(&server, PoolConfig::new().min_connections(1).max_connections(2)).await;

    pool.close().await;
    assert!(pool.is_closed());
    assert_eq!(pool.status().total, 0);
    assert!(matches!(pool.get().await, Err(PoolError::PoolClosed)));
    assert!(matches!(pool.try_get(), Err(PoolError::PoolClosed)));
}

#[tokio::test]
async fn test_broken_connection_replaced_on_checkout() {
    let server = MockHdbServer::builder().build().await.unwrap();
    let pool = pool_with(
        &server,
        PoolConfig::new()
            .min_connections(1)
            .max_connections(2)
            .test_on_checkout(true)
            .health_check_interval(Duration::ZERO),
    )
    .await;

    server.disconnect_all();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let conn = pool.get().await.unwrap();
    conn.ping().await.unwrap();
    assert_eq!(server.accepted_connections(), 2);

    let metrics = pool.metrics();
    assert_eq!(metrics.health_checks_failed, 1);
    assert_eq!(metrics.connections_created, 2);
    assert_eq!(metrics.connections_closed, 1);
}

#[tokio::test]
async fn test_abandoned_transaction_rolled_back_before_reuse() {
    let server = MockHdbServer::builder().build().await.unwrap();
    let pool = pool_with(&server, PoolConfig::new().max_connections(1)).await;

    {
        let conn = pool.get().await.unwrap();
        let tx = conn.begin_tx(TxOptions::default()).await.unwrap();
        conn.exec("insert into t values (1)", &[]).await.unwrap();
        drop(tx);
    }

    let conn = pool.get().await.unwrap();
    conn.ping().await.unwrap();
    assert_eq!(
        server.requests_of(MessageKind::Rollback).len(),
        1,
        "rollback sent before the connection was handed out again"
    );
}

#[tokio::test]
async fn test_invalid_configuration() {
    let server = MockHdbServer::builder().build().await.unwrap();
    let err = Pool::builder()
        .connector(server.connector())
        .max_connections(0)
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Configuration(_)));

    let err = Pool::builder().build().await.unwrap_err();
    assert!(matches!(err, PoolError::Configuration(_)));
}
