//! Pool error types.

use thiserror::Error;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Failed to acquire a connection within the timeout.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(std::time::Duration),

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Connection creation failed.
    #[error("failed to create connection: {0}")]
    ConnectionCreation(#[source] hdb_client::Error),

    /// Connection is unhealthy.
    #[error("connection health check failed: {0}")]
    UnhealthyConnection(#[source] hdb_client::Error),

    /// Connection reset failed.
    #[error("connection reset failed: {0}")]
    ResetFailed(#[source] hdb_client::Error),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}
