//! Framed message streams for async I/O.
//!
//! - `MessageStream<T>` - combined read/write stream, used by servers
//! - `MessageReader<T>` - read half for receiving messages
//! - `MessageWriter<T>` - write half for sending messages
//!
//! The split types back [`Connection`](crate::Connection).

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::Sink;
use hdb_protocol::{Message, RawMessage};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, FramedRead, FramedWrite};

use crate::codec::HdbCodec;
use crate::error::CodecError;

pin_project! {
    /// A framed message stream over an async I/O transport.
    pub struct MessageStream<T> {
        #[pin]
        inner: Framed<T, HdbCodec>,
    }
}

impl<T> MessageStream<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Frame `transport` with default codec limits.
    pub fn new(transport: T) -> Self {
        Self {
            inner: Framed::new(transport, HdbCodec::new()),
        }
    }
}

impl<T> Stream for MessageStream<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<RawMessage, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<'a, T> Sink<&'a Message> for MessageStream<T>
where
    T: AsyncWrite + Unpin,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: &'a Message) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T> std::fmt::Debug for MessageStream<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("transport", self.inner.get_ref())
            .finish()
    }
}

pin_project! {
    /// A read-only message stream.
    pub struct MessageReader<T> {
        #[pin]
        inner: FramedRead<T, HdbCodec>,
    }
}

impl<T> MessageReader<T>
where
    T: AsyncRead,
{
    /// Read messages from `transport` with `codec`.
    pub fn new(transport: T, codec: HdbCodec) -> Self {
        Self {
            inner: FramedRead::new(transport, codec),
        }
    }

    /// Message bytes decoded so far.
    pub fn bytes_decoded(&self) -> u64 {
        self.inner.decoder().bytes_decoded()
    }
}

impl<T> Stream for MessageReader<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<RawMessage, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<T> std::fmt::Debug for MessageReader<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReader")
            .field("transport", self.inner.get_ref())
            .finish()
    }
}

pin_project! {
    /// A write-only message sink.
    pub struct MessageWriter<T> {
        #[pin]
        inner: FramedWrite<T, HdbCodec>,
    }
}

impl<T> MessageWriter<T>
where
    T: AsyncWrite,
{
    /// Write messages to `transport` with `codec`.
    pub fn new(transport: T, codec: HdbCodec) -> Self {
        Self {
            inner: FramedWrite::new(transport, codec),
        }
    }

    /// Message bytes encoded so far.
    pub fn bytes_encoded(&self) -> u64 {
        self.inner.encoder().bytes_encoded()
    }
}

impl<'a, T> Sink<&'a Message> for MessageWriter<T>
where
    T: AsyncWrite + Unpin,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: &'a Message) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T> std::fmt::Debug for MessageWriter<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageWriter")
            .field("transport", self.inner.get_ref())
            .finish()
    }
}
