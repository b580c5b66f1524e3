//! Process-wide driver statistics.
//!
//! Counters are plain atomics. Transport samples travel through the codec's
//! metrics channel to one collector task, which is spawned when the first
//! session opens and aborted when the last one closes.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use hashbrown::HashMap;
use hdb_codec::{DEFAULT_METRICS_CAPACITY, MetricsSink, Sample};
use hdb_protocol::MessageKind;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Latency of one message kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Latency {
    /// Completed round trips.
    pub count: u64,
    /// Sum of round-trip times.
    pub total: Duration,
    /// Slowest round trip.
    pub max: Duration,
}

impl Latency {
    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.max = self.max.max(elapsed);
    }

    /// Mean round-trip time.
    #[must_use]
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / u32::try_from(self.count).unwrap_or(u32::MAX)
        }
    }
}

/// Snapshot of the driver statistics.
#[derive(Debug, Clone, Default)]
pub struct DriverStats {
    /// Open sessions.
    pub open_connections: i64,
    /// Prepared statements not yet dropped.
    pub open_statements: i64,
    /// Active transactions.
    pub open_transactions: i64,
    /// Bytes read by all sessions.
    pub bytes_read: u64,
    /// Bytes written by all sessions.
    pub bytes_written: u64,
    /// Transport errors observed.
    pub errors: u64,
    /// Round-trip latency per request kind.
    pub latency: HashMap<MessageKind, Latency>,
}

#[derive(Default)]
struct Counters {
    open_connections: AtomicI64,
    open_statements: AtomicI64,
    open_transactions: AtomicI64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    errors: AtomicU64,
    latency: Mutex<HashMap<MessageKind, Latency>>,
}

impl Counters {
    fn apply(&self, sample: Sample) {
        match sample {
            Sample::Read { bytes, .. } => {
                self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
            }
            Sample::Written { bytes, .. } => {
                self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
            }
            Sample::Exchange { kind, elapsed } => {
                self.latency.lock().entry(kind).or_default().record(elapsed);
            }
            Sample::Error => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

/// Snapshot of the process-wide statistics.
#[must_use]
pub fn driver_stats() -> DriverStats {
    let c = &*COUNTERS;
    DriverStats {
        open_connections: c.open_connections.load(Ordering::Relaxed),
        open_statements: c.open_statements.load(Ordering::Relaxed),
        open_transactions: c.open_transactions.load(Ordering::Relaxed),
        bytes_read: c.bytes_read.load(Ordering::Relaxed),
        bytes_written: c.bytes_written.load(Ordering::Relaxed),
        errors: c.errors.load(Ordering::Relaxed),
        latency: c.latency.lock().clone(),
    }
}

pub(crate) fn add_statements(delta: i64) {
    COUNTERS.open_statements.fetch_add(delta, Ordering::Relaxed);
}

pub(crate) fn add_transactions(delta: i64) {
    COUNTERS.open_transactions.fetch_add(delta, Ordering::Relaxed);
}

struct Collector {
    sink: MetricsSink,
    task: JoinHandle<()>,
}

/// Open-session counter owning the collector task.
struct Tracker {
    sessions: usize,
    collector: Option<Collector>,
}

static TRACKER: Lazy<Mutex<Tracker>> = Lazy::new(|| {
    Mutex::new(Tracker {
        sessions: 0,
        collector: None,
    })
});

/// Registration of one open session; dropping it unregisters.
#[derive(Debug)]
pub(crate) struct SessionTicket {
    sink: MetricsSink,
}

impl SessionTicket {
    /// Register a session, spawning the collector for the first one.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn register() -> Self {
        let mut tracker = TRACKER.lock();
        tracker.sessions += 1;
        COUNTERS.open_connections.fetch_add(1, Ordering::Relaxed);
        // a collector whose runtime shut down is replaced
        if tracker.collector.as_ref().is_some_and(|c| c.task.is_finished()) {
            tracker.collector = None;
        }
        let sink = match &tracker.collector {
            Some(collector) => collector.sink.clone(),
            None => {
                let (sink, mut rx) = MetricsSink::channel(DEFAULT_METRICS_CAPACITY);
                let task = tokio::spawn(async move {
                    while let Some(sample) = rx.recv().await {
                        COUNTERS.apply(sample);
                    }
                });
                tracing::debug!("metrics collector started");
                tracker.collector = Some(Collector {
                    sink: sink.clone(),
                    task,
                });
                sink
            }
        };
        Self { sink }
    }

    /// Sink the session's transport reports to.
    pub(crate) fn sink(&self) -> MetricsSink {
        self.sink.clone()
    }
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        let mut tracker = TRACKER.lock();
        tracker.sessions = tracker.sessions.saturating_sub(1);
        COUNTERS.open_connections.fetch_sub(1, Ordering::Relaxed);
        if tracker.sessions == 0 {
            if let Some(collector) = tracker.collector.take() {
                collector.task.abort();
                tracing::debug!("metrics collector stopped");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_mean() {
        let mut latency = Latency::default();
        assert_eq!(latency.mean(), Duration::ZERO);
        latency.record(Duration::from_millis(10));
        latency.record(Duration::from_millis(30));
        assert_eq!(latency.count, 2);
        assert_eq!(latency.mean(), Duration::from_millis(20));
        assert_eq!(latency.max, Duration::from_millis(30));
    }

    #[test]
    fn test_counters_apply() {
        let counters = Counters::default();
        counters.apply(Sample::Read {
            bytes: 100,
            elapsed: Duration::ZERO,
        });
        counters.apply(Sample::Exchange {
            kind: MessageKind::Prepare,
            elapsed: Duration::from_millis(2),
        });
        counters.apply(Sample::Error);
        assert_eq!(counters.bytes_read.load(Ordering::Relaxed), 100);
        assert_eq!(counters.errors.load(Ordering::Relaxed), 1);
        assert_eq!(counters.latency.lock()[&MessageKind::Prepare].count, 1);
    }

    #[tokio::test]
    async fn test_ticket_feeds_collector() {
        let before = driver_stats();
        let ticket = SessionTicket::register();
        ticket.sink().record(Sample::Written {
            bytes: 42,
            elapsed: Duration::ZERO,
        });
        for _ in 0..100 {
            if driver_stats().bytes_written >= before.bytes_written + 42 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(driver_stats().bytes_written >= before.bytes_written + 42);
        drop(ticket);
    }
}
