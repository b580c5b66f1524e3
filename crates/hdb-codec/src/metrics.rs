//! Transport metric samples.
//!
//! Producers never block: samples go through a bounded channel with
//! `try_send` and are dropped when the collector falls behind.

use std::time::Duration;

use hdb_protocol::MessageKind;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default capacity of the metrics channel.
pub const DEFAULT_METRICS_CAPACITY: usize = 1024;

/// One observation emitted by the framing layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// A message was read.
    Read {
        /// Bytes read.
        bytes: u64,
        /// Time spent waiting for the message.
        elapsed: Duration,
    },
    /// A message was written.
    Written {
        /// Bytes written.
        bytes: u64,
        /// Time spent writing.
        elapsed: Duration,
    },
    /// A request/reply round trip completed.
    Exchange {
        /// Request kind.
        kind: MessageKind,
        /// Round-trip time.
        elapsed: Duration,
    },
    /// A transport error was observed.
    Error,
}

/// Sending side of the metrics channel.
#[derive(Debug, Clone)]
pub struct MetricsSink {
    tx: mpsc::Sender<Sample>,
}

impl MetricsSink {
    /// Create a sink and the receiver a collector task drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Sample>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Record a sample, dropping it if the channel is full or closed.
    pub fn record(&self, sample: Sample) {
        match self.tx.try_send(sample) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::trace!("metrics channel full, sample dropped"),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_full_channel_drops() {
        let (sink, mut rx) = MetricsSink::channel(1);
        sink.record(Sample::Error);
        sink.record(Sample::Error);
        assert_eq!(rx.try_recv().unwrap(), Sample::Error);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (sink, rx) = MetricsSink::channel(4);
        drop(rx);
        sink.record(Sample::Error);
    }
}
