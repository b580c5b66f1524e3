//! Connection lifecycle management.
//!
//! This module defines the operations the pool needs from a connection and
//! the bookkeeping it keeps per pooled connection.

use std::time::{Duration, Instant};

use hdb_client::Conn;

use crate::error::PoolError;

/// Operations the pool needs to manage connection health and state.
///
/// # Native Async Traits
///
/// This uses native async traits (Rust 2024 Edition); the pool calls it
/// with static dispatch only.
#[allow(async_fn_in_trait)]
pub trait ConnectionLifecycle: Send + Sync {
    /// Check if the connection is healthy with a server round trip.
    async fn health_check(&self) -> Result<(), PoolError>;

    /// Prepare the connection for its next user.
    ///
    /// Closes abandoned result sets, drops abandoned statements and rolls
    /// back an abandoned transaction.
    async fn reset(&mut self) -> Result<(), PoolError>;

    /// Check if the connection is still valid for use, without I/O.
    fn is_valid(&self) -> bool;
}

impl ConnectionLifecycle for Conn {
    async fn health_check(&self) -> Result<(), PoolError> {
        self.ping().await.map_err(PoolError::UnhealthyConnection)
    }

    async fn reset(&mut self) -> Result<(), PoolError> {
        self.reset_session().await.map_err(PoolError::ResetFailed)
    }

    fn is_valid(&self) -> bool {
        Conn::is_valid(self)
    }
}

/// Connection state tracked by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is idle and available for use.
    Idle,
    /// Connection is currently in use.
    InUse,
    /// Connection was removed from the pool.
    Closed,
}

impl ConnectionState {
    /// Check if the connection is available for checkout.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if the connection should be removed from the pool.
    #[must_use]
    pub fn should_remove(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Unique identifier for this connection.
    pub id: u64,
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection was last used.
    pub last_used_at: Instant,
    /// When the connection was last health-checked.
    pub last_checked_at: Option<Instant>,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
    /// Current state of the connection.
    pub state: ConnectionState,
}

impl ConnectionMetadata {
    /// Create metadata for a new connection.
    #[must_use]
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            last_checked_at: None,
            checkout_count: 0,
            state: ConnectionState::Idle,
        }
    }

    /// Check if the connection has exceeded its maximum lifetime.
    #[must_use]
    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.created_at.elapsed() > max_lifetime
    }

    /// Check if the connection has been idle too long.
    #[must_use]
    pub fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used_at.elapsed() > idle_timeout
    }

    /// Check if a health check is due.
    #[must_use]
    pub fn needs_health_check(&self, check_interval: Duration) -> bool {
        match self.last_checked_at {
            Some(last) => last.elapsed() > check_interval,
            None => true,
        }
    }

    /// Mark the connection as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
        self.state = ConnectionState::InUse;
    }

    /// Mark the connection as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
        self.state = ConnectionState::Idle;
    }

    /// Mark the connection as removed from the pool.
    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Mark the connection as health-checked.
    pub fn mark_health_check(&mut self) {
        self.last_checked_at = Some(Instant::now());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(ConnectionState::Idle.is_available());
        assert!(!ConnectionState::InUse.is_available());
        assert!(!ConnectionState::InUse.should_remove());
        assert!(ConnectionState::Closed.should_remove());
    }

    #[test]
    fn test_connection_metadata_new() {
        let meta = ConnectionMetadata::new(1);
        assert_eq!(meta.id, 1);
        assert_eq!(meta.checkout_count, 0);
        assert_eq!(meta.state, ConnectionState::Idle);
        assert!(meta.needs_health_check(Duration::from_secs(60)));
    }

    #[test]
    fn test_connection_metadata_checkout_checkin() {
        let mut meta = ConnectionMetadata::new(1);
        meta.mark_checkout();
        assert_eq!(meta.checkout_count, 1);
        assert_eq!(meta.state, ConnectionState::InUse);

        meta.mark_checkin();
        assert_eq!(meta.state, ConnectionState::Idle);

        meta.mark_closed();
        assert!(meta.state.should_remove());
    }

    #[test]
    fn test_health_check_due() {
        let mut meta = ConnectionMetadata::new(1);
        meta.mark_health_check();
        assert!(meta.last_checked_at.is_some());
        assert!(!meta.needs_health_check(Duration::from_secs(60)));
    }

    #[test]
    fn test_expiry() {
        let meta = ConnectionMetadata::new(1);
        assert!(!meta.is_expired(Duration::from_secs(60)));
        assert!(!meta.is_idle_expired(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(2));
        assert!(meta.is_expired(Duration::from_millis(1)));
        assert!(meta.is_idle_expired(Duration::from_millis(1)));
    }
}
