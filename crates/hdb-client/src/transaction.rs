//! Transaction support.
//!
//! Sessions run in auto-commit mode. [`Conn::begin_tx`](crate::Conn::begin_tx)
//! switches the session into a transaction until the returned
//! [`Transaction`] is committed or rolled back. A transaction dropped
//! without either is rolled back before the next request of the session.

use crate::error::Result;
use crate::rows::SessionRef;
use crate::stats;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read uncommitted; not supported by the server.
    ReadUncommitted,

    /// Read committed (server default).
    #[default]
    ReadCommitted,

    /// Repeatable read.
    RepeatableRead,

    /// Serializable.
    Serializable,

    /// Snapshot; not supported by the server.
    Snapshot,
}

impl IsolationLevel {
    /// The SQL statement setting this isolation level, if the server
    /// supports it.
    #[must_use]
    pub fn as_sql(&self) -> Option<&'static str> {
        match self {
            Self::ReadCommitted => Some("set transaction isolation level read committed"),
            Self::RepeatableRead => Some("set transaction isolation level repeatable read"),
            Self::Serializable => Some("set transaction isolation level serializable"),
            Self::ReadUncommitted | Self::Snapshot => None,
        }
    }

    /// The isolation level name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

/// Options of a new transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxOptions {
    /// Isolation level.
    pub isolation: IsolationLevel,
    /// Whether the transaction only reads.
    pub read_only: bool,
}

impl TxOptions {
    /// Read-write transaction with the given isolation level.
    #[must_use]
    pub fn with_isolation(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            read_only: false,
        }
    }

    /// Mark the transaction read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub(crate) fn access_mode_sql(&self) -> &'static str {
        if self.read_only {
            "set transaction read only"
        } else {
            "set transaction read write"
        }
    }
}

/// An open transaction.
///
/// Statements run through the [`Conn`](crate::Conn) as usual; they become
/// part of the transaction until it ends.
#[derive(Debug)]
pub struct Transaction {
    session: SessionRef,
    options: TxOptions,
    done: bool,
}

impl Transaction {
    pub(crate) fn new(session: SessionRef, options: TxOptions) -> Self {
        stats::add_transactions(1);
        Self {
            session,
            options,
            done: false,
        }
    }

    /// Isolation level of this transaction.
    #[must_use]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.options.isolation
    }

    /// Whether the transaction is read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.options.read_only
    }

    fn finish(&mut self) {
        self.done = true;
        stats::add_transactions(-1);
    }

    /// Commit the transaction.
    pub async fn commit(mut self) -> Result<()> {
        self.finish();
        let mut session = self.session.session.lock().await;
        session.commit().await
    }

    /// Roll the transaction back.
    pub async fn rollback(mut self) -> Result<()> {
        self.finish();
        let mut session = self.session.session.lock().await;
        session.rollback().await
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.done {
            self.finish();
            tracing::debug!("transaction dropped without commit or rollback");
            self.session.pending.lock().rollback = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_sql() {
        assert_eq!(
            IsolationLevel::ReadCommitted.as_sql(),
            Some("set transaction isolation level read committed")
        );
        assert_eq!(
            IsolationLevel::Serializable.as_sql(),
            Some("set transaction isolation level serializable")
        );
        assert_eq!(IsolationLevel::Snapshot.as_sql(), None);
        assert_eq!(IsolationLevel::ReadUncommitted.as_sql(), None);
    }

    #[test]
    fn test_isolation_level_name() {
        assert_eq!(IsolationLevel::ReadCommitted.name(), "READ COMMITTED");
        assert_eq!(IsolationLevel::Serializable.name(), "SERIALIZABLE");
    }

    #[test]
    fn test_default_options() {
        let options = TxOptions::default();
        assert_eq!(options.isolation, IsolationLevel::ReadCommitted);
        assert_eq!(options.access_mode_sql(), "set transaction read write");
        let options = TxOptions::with_isolation(IsolationLevel::RepeatableRead).read_only();
        assert!(options.read_only);
        assert_eq!(options.access_mode_sql(), "set transaction read only");
    }
}
