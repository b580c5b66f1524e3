//! Framed connection with deadlines, counters and cancel marking.
//!
//! The transport is split into read and write halves. Every read and write
//! runs under the configured deadline. Any failure, a triggered
//! [`CancelHandle`], or an operation future dropped mid-flight marks the
//! connection bad; from then on every call fails fast.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use hdb_protocol::{
    ByteReader, Message, PROLOG_REPLY_SIZE, PrologReply, PrologRequest, RawMessage,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Notify;

use crate::codec::{DEFAULT_MAX_MESSAGE_SIZE, HdbCodec};
use crate::error::CodecError;
use crate::framed::{MessageReader, MessageWriter};
use crate::metrics::{MetricsSink, Sample};

/// Transport settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Deadline applied to each read and write; `None` or zero disables it.
    pub timeout: Option<Duration>,
    /// Largest message accepted from the peer.
    pub max_message_size: usize,
    /// Buffer size announced in outgoing message headers.
    pub varpart_size: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            varpart_size: 0,
        }
    }
}

/// State shared between a connection and its cancel handles.
#[derive(Debug)]
struct Shared {
    canceled: AtomicBool,
    bad: AtomicBool,
    notify: Notify,
    epoch: Instant,
    /// Nanoseconds since `epoch` plus one; zero means never.
    last_read: AtomicU64,
    last_written: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            bad: AtomicBool::new(false),
            notify: Notify::new(),
            epoch: Instant::now(),
            last_read: AtomicU64::new(0),
            last_written: AtomicU64::new(0),
        }
    }

    fn check(&self) -> Result<(), CodecError> {
        if self.canceled.load(Ordering::Acquire) {
            Err(CodecError::Canceled)
        } else if self.bad.load(Ordering::Acquire) {
            Err(CodecError::Bad)
        } else {
            Ok(())
        }
    }

    fn stamp(&self, slot: &AtomicU64) {
        let nanos = self.epoch.elapsed().as_nanos().min(u128::from(u64::MAX - 1)) as u64;
        slot.store(nanos + 1, Ordering::Release);
    }

    fn instant(&self, slot: &AtomicU64) -> Option<Instant> {
        match slot.load(Ordering::Acquire) {
            0 => None,
            n => Some(self.epoch + Duration::from_nanos(n - 1)),
        }
    }
}

/// Marks the connection canceled unless the operation completed.
struct InFlight {
    shared: Arc<Shared>,
    done: bool,
}

impl InFlight {
    fn begin(shared: &Arc<Shared>) -> Result<Self, CodecError> {
        shared.check()?;
        Ok(Self {
            shared: Arc::clone(shared),
            done: false,
        })
    }

    fn finish(mut self) {
        self.done = true;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.done {
            self.shared.canceled.store(true, Ordering::Release);
            tracing::warn!("operation abandoned in flight, connection marked canceled");
        }
    }
}

async fn with_deadline<F, R>(
    timeout: Option<Duration>,
    operation: &'static str,
    fut: F,
) -> Result<R, CodecError>
where
    F: Future<Output = Result<R, CodecError>>,
{
    match timeout {
        Some(limit) if !limit.is_zero() => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| CodecError::Timeout {
                operation,
                elapsed: limit,
            })?,
        _ => fut.await,
    }
}

/// An HDB connection over a byte stream.
///
/// Not safe for concurrent use; one request/reply exchange runs at a time.
/// Requests are totally ordered and the server answers in the same order.
pub struct Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    reader: MessageReader<ReadHalf<T>>,
    writer: MessageWriter<WriteHalf<T>>,
    shared: Arc<Shared>,
    timeout: Option<Duration>,
    metrics: Option<MetricsSink>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the prolog handshake on a fresh transport and frame it.
    pub async fn connect(
        mut transport: T,
        config: &ConnectionConfig,
        prolog: &PrologRequest,
    ) -> Result<(Self, PrologReply), CodecError> {
        let request = prolog.encode_to_bytes();
        let reply = with_deadline(config.timeout, "prolog", async {
            transport.write_all(&request).await?;
            transport.flush().await?;
            let mut raw = [0u8; PROLOG_REPLY_SIZE];
            transport.read_exact(&mut raw).await?;
            Ok(PrologReply::decode(&mut ByteReader::new(Bytes::copy_from_slice(&raw)))?)
        })
        .await?;

        tracing::debug!(
            product_version = ?reply.product_version,
            protocol_version = ?reply.protocol_version,
            "prolog acknowledged"
        );
        Ok((Self::new(transport, config), reply))
    }

    /// Frame a transport whose prolog has already been exchanged.
    pub fn new(transport: T, config: &ConnectionConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        let codec = || {
            HdbCodec::new()
                .with_max_message_size(config.max_message_size)
                .with_varpart_size(config.varpart_size)
        };
        Self {
            reader: MessageReader::new(read_half, codec()),
            writer: MessageWriter::new(write_half, codec()),
            shared: Arc::new(Shared::new()),
            timeout: config.timeout,
            metrics: None,
        }
    }

    /// Attach a metrics sink.
    pub fn set_metrics(&mut self, sink: MetricsSink) {
        self.metrics = Some(sink);
    }

    /// Get a handle that cancels this connection from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether the connection has failed or been canceled.
    #[must_use]
    pub fn is_bad(&self) -> bool {
        self.shared.check().is_err()
    }

    /// Mark the connection bad.
    pub fn mark_bad(&self) {
        if !self.shared.bad.swap(true, Ordering::AcqRel) {
            tracing::warn!("connection marked bad");
        }
    }

    /// Time of the last completed read.
    #[must_use]
    pub fn last_read_at(&self) -> Option<Instant> {
        self.shared.instant(&self.shared.last_read)
    }

    /// Time of the last completed write.
    #[must_use]
    pub fn last_written_at(&self) -> Option<Instant> {
        self.shared.instant(&self.shared.last_written)
    }

    /// Total bytes read.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.reader.bytes_decoded()
    }

    /// Total bytes written.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.writer.bytes_encoded()
    }

    fn record(&self, sample: Sample) {
        if let Some(metrics) = &self.metrics {
            metrics.record(sample);
        }
    }

    fn fail(&self, err: CodecError) -> CodecError {
        self.mark_bad();
        self.record(Sample::Error);
        tracing::warn!(error = %err, "transport error");
        err
    }

    /// Write one message and flush.
    pub async fn send(&mut self, message: &Message) -> Result<(), CodecError> {
        let guard = InFlight::begin(&self.shared)?;
        let before = self.bytes_written();
        let start = Instant::now();

        let result = with_deadline(self.timeout, "write", self.writer.send(message)).await;
        guard.finish();
        result.map_err(|e| self.fail(e))?;

        self.shared.stamp(&self.shared.last_written);
        self.record(Sample::Written {
            bytes: self.bytes_written() - before,
            elapsed: start.elapsed(),
        });
        Ok(())
    }

    /// Read the next message.
    pub async fn receive(&mut self) -> Result<RawMessage, CodecError> {
        let guard = InFlight::begin(&self.shared)?;
        let before = self.bytes_read();
        let start = Instant::now();

        let shared = Arc::clone(&self.shared);
        let reader = &mut self.reader;
        let read = async {
            tokio::select! {
                biased;
                () = shared.notify.notified() => Err(CodecError::Canceled),
                item = reader.next() => item.unwrap_or(Err(CodecError::ConnectionClosed)),
            }
        };
        let result = with_deadline(self.timeout, "read", read).await;
        guard.finish();
        let message = result.map_err(|e| self.fail(e))?;

        self.shared.stamp(&self.shared.last_read);
        self.record(Sample::Read {
            bytes: self.bytes_read() - before,
            elapsed: start.elapsed(),
        });
        Ok(message)
    }

    /// Write a request and read its reply.
    pub async fn exchange(&mut self, message: &Message) -> Result<RawMessage, CodecError> {
        let start = Instant::now();
        self.send(message).await?;
        let reply = self.receive().await?;
        if let Some(kind) = message.kind() {
            self.record(Sample::Exchange {
                kind,
                elapsed: start.elapsed(),
            });
        }
        Ok(reply)
    }

    /// Shut down the write side of the transport.
    pub async fn close(&mut self) -> Result<(), CodecError> {
        let result = with_deadline(self.timeout, "close", async {
            SinkExt::<&Message>::close(&mut self.writer).await
        })
        .await;
        self.shared.bad.store(true, Ordering::Release);
        result
    }
}

impl<T> std::fmt::Debug for Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("canceled", &self.shared.canceled.load(Ordering::Acquire))
            .field("bad", &self.shared.bad.load(Ordering::Acquire))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Handle for canceling a connection from another task.
///
/// Canceling wakes a pending read, which fails with
/// [`CodecError::Canceled`]; the connection stays unusable afterwards.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    /// Cancel the connection.
    pub fn cancel(&self) {
        if !self.shared.canceled.swap(true, Ordering::AcqRel) {
            tracing::debug!("connection canceled");
        }
        self.shared.notify.notify_one();
    }

    /// Whether the connection was canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.shared.canceled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::framed::MessageStream;
    use hdb_protocol::{FunctionCode, MessageKind, Part, Segment};
    use tokio::io::duplex;

    fn ping() -> Message {
        Message::request(
            1,
            1,
            MessageKind::ExecuteDirect,
            true,
            vec![Part::Command(Bytes::from_static(b"select 1 from dummy"))],
        )
    }

    #[tokio::test]
    async fn test_exchange_roundtrip() {
        let (client, server) = duplex(4096);
        let mut conn = Connection::new(client, &ConnectionConfig::default());
        let (sink, mut samples) = MetricsSink::channel(16);
        conn.set_metrics(sink);

        let server = tokio::spawn(async move {
            let mut stream = MessageStream::new(server);
            let request = stream.next().await.unwrap().unwrap();
            assert_eq!(request.header.session_id, 1);
            let reply = Message::new(1, 1, vec![Segment::reply(FunctionCode::Select)]);
            stream.send(&reply).await.unwrap();
        });

        let reply = conn.exchange(&ping()).await.unwrap();
        assert_eq!(reply.function_code(), FunctionCode::Select);
        server.await.unwrap();

        assert!(conn.last_read_at().is_some());
        assert!(conn.last_written_at().is_some());
        assert!(conn.bytes_read() > 0);
        assert!(matches!(samples.recv().await, Some(Sample::Written { .. })));
        assert!(matches!(samples.recv().await, Some(Sample::Read { .. })));
        assert!(matches!(
            samples.recv().await,
            Some(Sample::Exchange {
                kind: MessageKind::ExecuteDirect,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_prolog_handshake() {
        let (client, mut server) = duplex(4096);
        let server = tokio::spawn(async move {
            let mut raw = [0u8; hdb_protocol::PROLOG_REQUEST_SIZE];
            server.read_exact(&mut raw).await.unwrap();
            let mut reply = bytes::BytesMut::new();
            PrologReply {
                product_version: (4, 20),
                protocol_version: (4, 1),
            }
            .encode(&mut reply);
            server.write_all(&reply).await.unwrap();
            server
        });

        let (conn, reply) =
            Connection::connect(client, &ConnectionConfig::default(), &PrologRequest::default())
                .await
                .unwrap();
        assert_eq!(reply.protocol_version, (4, 1));
        assert!(!conn.is_bad());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_timeout_marks_bad() {
        let (client, _server) = duplex(4096);
        let config = ConnectionConfig {
            timeout: Some(Duration::from_millis(20)),
            ..ConnectionConfig::default()
        };
        let mut conn = Connection::new(client, &config);
        assert!(matches!(
            conn.receive().await,
            Err(CodecError::Timeout { operation: "read", .. })
        ));
        assert!(conn.is_bad());
        assert!(matches!(conn.send(&ping()).await, Err(CodecError::Bad)));
    }

    #[tokio::test]
    async fn test_cancel_wakes_pending_read() {
        let (client, _server) = duplex(4096);
        let mut conn = Connection::new(client, &ConnectionConfig::default());
        let cancel = conn.cancel_handle();

        let canceler = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });
        assert!(conn.receive().await.unwrap_err().is_canceled());
        canceler.await.unwrap();
        assert!(conn.is_bad());
        assert!(matches!(conn.receive().await, Err(CodecError::Canceled)));
    }

    #[tokio::test]
    async fn test_dropped_read_marks_canceled() {
        let (client, _server) = duplex(4096);
        let mut conn = Connection::new(client, &ConnectionConfig::default());
        let abandoned = tokio::time::timeout(Duration::from_millis(10), conn.receive()).await;
        assert!(abandoned.is_err());
        assert!(conn.is_bad());
        assert!(conn.cancel_handle().is_canceled());
    }

    #[tokio::test]
    async fn test_peer_close_is_connection_closed() {
        let (client, server) = duplex(4096);
        drop(server);
        let mut conn = Connection::new(client, &ConnectionConfig::default());
        assert!(matches!(conn.receive().await, Err(CodecError::ConnectionClosed)));
    }
}
