//! Streaming reads of LOB column values.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use hdb_types::LobLocator;

use crate::error::{Error, Result, WHILE_PARSING_PROTOCOL};
use crate::rows::SessionRef;
use crate::session::cesu8_char_count;

/// Reads a LOB value chunk by chunk.
///
/// The first chunk comes with the row; the rest is requested with read-lob
/// messages while the originating cursor is open. Positions and lengths of
/// character LOBs count characters, binary LOBs count bytes. Character data
/// is returned as CESU-8 by [`next_chunk`](Self::next_chunk) and as UTF-8
/// by [`read_to_string`](Self::read_to_string).
#[derive(Debug)]
pub struct LobReader {
    ctx: SessionRef,
    cursor_closed: Arc<AtomicBool>,
    locator: LobLocator,
    /// 1-based position of the next read.
    position: i64,
    buffer: Bytes,
    done: bool,
}

impl LobReader {
    pub(crate) fn new(ctx: SessionRef, cursor_closed: Arc<AtomicBool>, locator: LobLocator) -> Self {
        let delivered = Self::units(&locator, &locator.data);
        let total = locator.total_len();
        let done = locator.is_complete() || (total >= 0 && delivered >= total);
        Self {
            ctx,
            cursor_closed,
            buffer: locator.data.clone(),
            position: delivered + 1,
            done,
            locator,
        }
    }

    fn units(locator: &LobLocator, data: &[u8]) -> i64 {
        if locator.is_char_based() {
            cesu8_char_count(data)
        } else {
            data.len() as i64
        }
    }

    /// Total length in characters (character LOBs) or bytes.
    #[must_use]
    pub fn total_len(&self) -> i64 {
        self.locator.total_len()
    }

    /// Whether positions and lengths count characters.
    #[must_use]
    pub fn is_char_based(&self) -> bool {
        self.locator.is_char_based()
    }

    /// The next chunk of raw data; `None` at the end of the value.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if !self.buffer.is_empty() {
            return Ok(Some(std::mem::take(&mut self.buffer)));
        }
        if self.done {
            return Ok(None);
        }
        if self.cursor_closed.load(Ordering::Acquire) {
            return Err(Error::ScanOnClosedResultset);
        }

        let reply = {
            let mut session = self.ctx.session.lock().await;
            session
                .read_lob(self.locator.locator, self.position, self.ctx.lob_chunk_size)
                .await
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(Error::Server(errors)) if errors.has_code(WHILE_PARSING_PROTOCOL) => {
                return Err(Error::NestedQuery);
            }
            Err(err) => return Err(err),
        };

        let read = Self::units(&self.locator, &reply.data);
        self.position += read;
        if reply.options.is_last_data() || read == 0 {
            self.done = true;
        }
        tracing::trace!(locator = self.locator.locator, read, done = self.done, "LOB chunk read");
        if reply.data.is_empty() {
            Ok(None)
        } else {
            Ok(Some(reply.data))
        }
    }

    /// Read the remaining raw data.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Read the remaining data of a character LOB as UTF-8.
    pub async fn read_to_string(&mut self) -> Result<String> {
        let data = self.read_to_end().await?;
        Ok(self.ctx.cesu8.decode(&data)?)
    }
}
