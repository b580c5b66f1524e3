//! # hdb-codec
//!
//! Async framing layer for HDB messages.
//!
//! This crate turns a raw byte stream into complete HDB messages and back,
//! and wraps the stream in a [`Connection`] that applies per-operation
//! deadlines, keeps byte counters and last-activity timestamps, and reports
//! samples to a metrics channel without ever blocking.
//!
//! ## Architecture
//!
//! ```text
//! TCP/TLS stream → prolog → HdbCodec (message framing) → Connection → session
//! ```
//!
//! ### Cancellation
//!
//! A [`CancelHandle`] wakes a pending read and marks the connection
//! canceled. Dropping an in-flight `send`/`receive` future has the same
//! effect. Either way every later call fails, so the session is discarded
//! instead of reading a reply that belongs to an abandoned request.
//!
//! ```rust,ignore
//! use hdb_codec::{Connection, ConnectionConfig};
//! use hdb_protocol::PrologRequest;
//!
//! let (mut conn, _) = Connection::connect(stream, &ConnectionConfig::default(), &PrologRequest::default()).await?;
//! let cancel = conn.cancel_handle();
//! tokio::spawn(async move { cancel.cancel() });
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod connection;
pub mod error;
pub mod framed;
pub mod metrics;

pub use codec::{DEFAULT_MAX_MESSAGE_SIZE, HdbCodec};
pub use connection::{CancelHandle, Connection, ConnectionConfig};
pub use error::CodecError;
pub use framed::{MessageReader, MessageStream, MessageWriter};
pub use metrics::{DEFAULT_METRICS_CAPACITY, MetricsSink, Sample};
