//! Connection pool implementation.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use hdb_client::{Conn, Connector};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionLifecycle, ConnectionMetadata};

/// A connection pool for SAP HANA.
///
/// The pool hands out at most `max_connections` connections at a time and
/// keeps returned connections for reuse. Idle connections are retired when
/// they exceed their lifetime or idle timeout, when they were marked bad,
/// or when the checkout reset or ping fails.
///
/// Cloning a pool is cheap; clones share the connections.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    connector: Connector,
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleConnection>>,
    semaphore: Arc<Semaphore>,
    total: AtomicU32,
    next_id: AtomicU64,
    closed: AtomicBool,
    metrics: Counters,
}

struct IdleConnection {
    conn: Conn,
    meta: ConnectionMetadata,
}

#[derive(Default)]
struct Counters {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    checkouts_successful: AtomicU64,
    checkouts_failed: AtomicU64,
    health_checks_failed: AtomicU64,
    resets_failed: AtomicU64,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("host", &self.inner.connector.host())
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

/// Builder for [`Pool`].
#[derive(Debug, Default)]
pub struct PoolBuilder {
    connector: Option<Connector>,
    config: PoolConfig,
}

impl PoolBuilder {
    /// Connector opening the pooled connections.
    #[must_use]
    pub fn connector(mut self, connector: Connector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the whole pool configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of connections opened by [`build`](Self::build).
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.config.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_lifetime = lifetime;
        self
    }

    /// Enable or disable pinging connections on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.config.test_on_checkout = enabled;
        self
    }

    /// Enable or disable the session reset before reuse.
    #[must_use]
    pub fn reset_session(mut self, enabled: bool) -> Self {
        self.config.reset_session = enabled;
        self
    }

    /// Build the pool and open the minimum number of connections.
    pub async fn build(self) -> Result<Pool, PoolError> {
        let connector = self
            .connector
            .ok_or_else(|| PoolError::Configuration("connector is required".into()))?;
        Pool::new(connector, self.config).await
    }
}

impl Pool {
    /// Builder for a pool.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::default()
    }

    /// Create a pool and open `min_connections` connections.
    pub async fn new(connector: Connector, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let max = usize::try_from(config.max_connections).unwrap_or(usize::MAX);
        let pool = Self {
            inner: Arc::new(PoolInner {
                connector,
                semaphore: Arc::new(Semaphore::new(max)),
                idle: Mutex::new(VecDeque::with_capacity(max)),
                config,
                total: AtomicU32::new(0),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                metrics: Counters::default(),
            }),
        };

        for _ in 0..pool.inner.config.min_connections {
            let (conn, mut meta) = pool.inner.open().await?;
            meta.mark_checkin();
            pool.inner.idle.lock().push_back(IdleConnection { conn, meta });
        }
        tracing::info!(
            host = pool.inner.connector.host(),
            min = pool.inner.config.min_connections,
            max = pool.inner.config.max_connections,
            "connection pool created"
        );
        Ok(pool)
    }

    /// Get a connection from the pool.
    ///
    /// Returns an idle connection that passes the checkout checks, or opens
    /// a new one. If all connections are in use this waits until one is
    /// returned or the connection timeout is reached.
    pub async fn get(&self) -> Result<PooledConnection, PoolError> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        tracing::trace!("acquiring connection from pool");

        let timeout = self.inner.config.connection_timeout;
        let permit = match tokio::time::timeout(timeout, Arc::clone(&self.inner.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::PoolClosed),
            Err(_) => {
                self.inner.metrics.checkouts_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(?timeout, "timed out waiting for a pooled connection");
                return Err(PoolError::AcquisitionTimeout(timeout));
            }
        };

        while let Some(idle) = self.inner.pop_idle() {
            if let Some((conn, meta)) = self.inner.check_out(idle).await {
                return Ok(self.inner.hand_out(conn, meta, permit));
            }
        }

        match self.inner.open().await {
            Ok((conn, meta)) => Ok(self.inner.hand_out(conn, meta, permit)),
            Err(err) => {
                self.inner.metrics.checkouts_failed.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Get an idle connection without waiting or opening a new one.
    ///
    /// Returns `Ok(None)` when no permit or no usable idle connection is
    /// available. Pending session cleanup is applied by the connection
    /// itself before its next request.
    pub fn try_get(&self) -> Result<Option<PooledConnection>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        let permit = match Arc::clone(&self.inner.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return Ok(None),
            Err(TryAcquireError::Closed) => return Err(PoolError::PoolClosed),
        };
        while let Some(IdleConnection { conn, meta }) = self.inner.pop_idle() {
            if self.inner.is_stale(&conn, &meta) {
                self.inner.retire(conn, meta);
                continue;
            }
            return Ok(Some(self.inner.hand_out(conn, meta, permit)));
        }
        Ok(None)
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let max = self.inner.config.max_connections;
        let free = u32::try_from(self.inner.semaphore.available_permits()).unwrap_or(max);
        PoolStatus {
            available: u32::try_from(self.inner.idle.lock().len()).unwrap_or(u32::MAX),
            in_use: max.saturating_sub(free),
            total: self.inner.total.load(Ordering::Acquire),
            max,
        }
    }

    /// Get the pool counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let m = &self.inner.metrics;
        PoolMetrics {
            connections_created: m.connections_created.load(Ordering::Relaxed),
            connections_closed: m.connections_closed.load(Ordering::Relaxed),
            checkouts_successful: m.checkouts_successful.load(Ordering::Relaxed),
            checkouts_failed: m.checkouts_failed.load(Ordering::Relaxed),
            health_checks_failed: m.health_checks_failed.load(Ordering::Relaxed),
            resets_failed: m.resets_failed.load(Ordering::Relaxed),
        }
    }

    /// Close the pool and disconnect all idle connections.
    ///
    /// Connections in use are disconnected when they are returned.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.semaphore.close();
        let idle: Vec<IdleConnection> = self.inner.idle.lock().drain(..).collect();
        for IdleConnection { conn, mut meta } in idle {
            meta.mark_closed();
            self.inner.forget(&meta);
            if let Err(err) = conn.close().await {
                tracing::debug!(id = meta.id, error = %err, "disconnect failed");
            }
        }
        tracing::info!("connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The connector opening the pooled connections.
    #[must_use]
    pub fn connector(&self) -> &Connector {
        &self.inner.connector
    }
}

impl PoolInner {
    async fn open(&self) -> Result<(Conn, ConnectionMetadata), PoolError> {
        let conn = self
            .connector
            .connect()
            .await
            .map_err(PoolError::ConnectionCreation)?;
        let meta = ConnectionMetadata::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.total.fetch_add(1, Ordering::AcqRel);
        self.metrics.connections_created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(id = meta.id, "pooled connection opened");
        Ok((conn, meta))
    }

    fn pop_idle(&self) -> Option<IdleConnection> {
        self.idle.lock().pop_front()
    }

    fn is_stale(&self, conn: &Conn, meta: &ConnectionMetadata) -> bool {
        !ConnectionLifecycle::is_valid(conn)
            || meta.is_expired(self.config.max_lifetime)
            || meta.is_idle_expired(self.config.idle_timeout)
    }

    /// Run the checkout checks; `None` when the connection was retired.
    async fn check_out(&self, idle: IdleConnection) -> Option<(Conn, ConnectionMetadata)> {
        let IdleConnection { mut conn, mut meta } = idle;
        if self.is_stale(&conn, &meta) {
            self.retire(conn, meta);
            return None;
        }
        if self.config.reset_session {
            if let Err(err) = conn.reset().await {
                tracing::debug!(id = meta.id, error = %err, "discarding connection");
                self.metrics.resets_failed.fetch_add(1, Ordering::Relaxed);
                self.retire(conn, meta);
                return None;
            }
        }
        if self.config.test_on_checkout && meta.needs_health_check(self.config.health_check_interval) {
            if let Err(err) = conn.health_check().await {
                tracing::warn!(id = meta.id, error = %err, "discarding connection");
                self.metrics.health_checks_failed.fetch_add(1, Ordering::Relaxed);
                self.retire(conn, meta);
                return None;
            }
            meta.mark_health_check();
        }
        Some((conn, meta))
    }

    fn hand_out(
        self: &Arc<Self>,
        conn: Conn,
        mut meta: ConnectionMetadata,
        permit: OwnedSemaphorePermit,
    ) -> PooledConnection {
        meta.mark_checkout();
        self.metrics.checkouts_successful.fetch_add(1, Ordering::Relaxed);
        PooledConnection {
            conn: Some(conn),
            meta,
            pool: Arc::clone(self),
            _permit: permit,
        }
    }

    fn check_in(&self, conn: Conn, mut meta: ConnectionMetadata) {
        if self.closed.load(Ordering::Acquire) || self.is_stale(&conn, &meta) {
            self.retire(conn, meta);
            return;
        }
        meta.mark_checkin();
        self.idle.lock().push_back(IdleConnection { conn, meta });
    }

    /// Drop a connection; its transport closes with it.
    fn retire(&self, conn: Conn, mut meta: ConnectionMetadata) {
        meta.mark_closed();
        self.forget(&meta);
        tracing::debug!(id = meta.id, uses = meta.checkout_count, "pooled connection retired");
        drop(conn);
    }

    fn forget(&self, meta: &ConnectionMetadata) {
        debug_assert!(meta.state.should_remove());
        self.total.fetch_sub(1, Ordering::AcqRel);
        self.metrics.connections_closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Total number of open connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

/// Counters of pool events since creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolMetrics {
    /// Connections opened.
    pub connections_created: u64,
    /// Connections retired or closed.
    pub connections_closed: u64,
    /// Successful checkouts.
    pub checkouts_successful: u64,
    /// Checkouts that timed out or failed to open a connection.
    pub checkouts_failed: u64,
    /// Failed checkout pings.
    pub health_checks_failed: u64,
    /// Failed session resets.
    pub resets_failed: u64,
}

impl PoolMetrics {
    /// Share of successful checkouts; 1.0 before the first checkout.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            1.0
        } else {
            self.checkouts_successful as f64 / total as f64
        }
    }
}

/// A connection retrieved from the pool.
///
/// When dropped, the connection is returned to the pool, or retired if it
/// is no longer valid.
pub struct PooledConnection {
    conn: Option<Conn>,
    meta: ConnectionMetadata,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Bookkeeping of this connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.meta
    }

    /// Detach the connection from the pool.
    ///
    /// The connection no longer counts against the pool.
    #[must_use]
    pub fn detach(mut self) -> Option<Conn> {
        let conn = self.conn.take();
        self.meta.mark_closed();
        self.pool.forget(&self.meta);
        conn
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl Deref for PooledConnection {
    type Target = Conn;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl DerefMut for PooledConnection {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::trace!(id = self.meta.id, "returning connection to pool");
            self.pool.check_in(conn, self.meta.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_success_rate() {
        let metrics = PoolMetrics::default();
        assert!((metrics.checkout_success_rate() - 1.0).abs() < f64::EPSILON);

        let metrics = PoolMetrics {
            checkouts_successful: 3,
            checkouts_failed: 1,
            ..PoolMetrics::default()
        };
        assert!((metrics.checkout_success_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_builder_requires_connector() {
        let err = Pool::builder().max_connections(2).build().await.unwrap_err();
        assert!(matches!(err, PoolError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_builder_validates_config() {
        let connector = Connector::new("localhost:30015", "USER", "secret");
        let err = Pool::builder()
            .connector(connector)
            .max_connections(0)
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Configuration(_)));
    }
}
