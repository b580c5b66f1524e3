//! LOB descriptors.
//!
//! [`LobSource`] is the application side of a piecewise LOB write;
//! [`LobInDescr`] tracks its progress through the write-lob exchange.
//! [`LobLocator`] is what a LOB column decodes to: the server's locator plus
//! the first chunk of data.

use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

use bytes::Bytes;
use hdb_protocol::{Cesu8Transformer, LobOptions, LocatorId, TypeCode};
use parking_lot::Mutex;

use crate::error::TypeError;

/// Shared handle to an application reader feeding a LOB parameter.
///
/// Clones share the same reader; equality is identity.
#[derive(Clone)]
pub struct LobSource {
    reader: Arc<Mutex<Box<dyn Read + Send>>>,
}

impl LobSource {
    /// Wrap a reader.
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Arc::new(Mutex::new(Box::new(reader))),
        }
    }

    /// Source over an in-memory buffer.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::new(Cursor::new(data.into()))
    }

    /// Fill `buf` as far as the reader allows; returns bytes read and whether
    /// the reader is exhausted.
    fn fill(&self, buf: &mut [u8]) -> std::io::Result<(usize, bool)> {
        let mut reader = self.reader.lock();
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => return Ok((filled, true)),
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok((filled, false))
    }
}

impl fmt::Debug for LobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LobSource").finish_non_exhaustive()
    }
}

impl PartialEq for LobSource {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.reader, &other.reader)
    }
}

/// Progress of one LOB parameter during a piecewise write.
#[derive(Debug)]
pub struct LobInDescr {
    source: LobSource,
    char_based: bool,
    chunk_size: usize,
    carry: Vec<u8>,
    /// Locator assigned by the server once the first chunk was accepted.
    pub locator: Option<LocatorId>,
    last: bool,
    written: u64,
}

impl LobInDescr {
    /// New descriptor; `char_based` LOBs are transcoded to CESU-8 on the fly.
    #[must_use]
    pub fn new(source: LobSource, type_code: TypeCode, chunk_size: usize) -> Self {
        Self {
            source,
            char_based: type_code.is_char_based_lob(),
            chunk_size: chunk_size.max(1),
            carry: Vec::new(),
            locator: None,
            last: false,
            written: 0,
        }
    }

    /// Whether the final chunk has been produced.
    #[must_use]
    pub fn is_last_data(&self) -> bool {
        self.last
    }

    /// Bytes produced so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Options to send with the chunk just produced.
    #[must_use]
    pub fn options(&self) -> LobOptions {
        if self.last {
            LobOptions::DATA_INCLUDED | LobOptions::LAST_DATA
        } else {
            LobOptions::DATA_INCLUDED
        }
    }

    /// Produce the next chunk of at most `chunk_size` source bytes.
    ///
    /// Character LOBs never split a UTF-8 sequence; an incomplete tail is
    /// carried into the next chunk.
    pub fn next_chunk(&mut self, cesu8: &dyn Cesu8Transformer) -> Result<Bytes, TypeError> {
        if self.last {
            return Ok(Bytes::new());
        }
        let mut buf = std::mem::take(&mut self.carry);
        let start = buf.len();
        buf.resize(self.chunk_size.max(start), 0);
        let (n, eof) = self.source.fill(&mut buf[start..])?;
        buf.truncate(start + n);
        self.last = eof;

        let chunk = if self.char_based {
            let valid = match std::str::from_utf8(&buf) {
                Ok(_) => buf.len(),
                Err(e) if e.error_len().is_none() && !eof => e.valid_up_to(),
                Err(e) => {
                    return Err(TypeError::LobSource(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("invalid UTF-8 at byte {}", self.written as usize + e.valid_up_to()),
                    )));
                }
            };
            self.carry = buf.split_off(valid);
            // validated above
            let text = std::str::from_utf8(&buf).unwrap_or_default();
            Bytes::from(cesu8.encode(text))
        } else {
            Bytes::from(buf)
        };
        self.written += chunk.len() as u64;
        Ok(chunk)
    }
}

/// Decoded LOB column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobLocator {
    /// LOB type as reported by the server.
    pub type_code: TypeCode,
    /// Options of the first chunk.
    pub options: LobOptions,
    /// Total length in characters (character LOBs).
    pub char_len: i64,
    /// Total length in bytes.
    pub byte_len: i64,
    /// Locator to read further chunks with.
    pub locator: LocatorId,
    /// Data delivered with the row.
    pub data: Bytes,
}

impl LobLocator {
    /// Whether `data` already holds the whole value.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.options.is_last_data()
    }

    /// Whether reads and lengths count characters rather than bytes.
    #[must_use]
    pub fn is_char_based(&self) -> bool {
        self.type_code.is_char_based_lob()
    }

    /// Total length in the unit used by read-lob requests.
    #[must_use]
    pub fn total_len(&self) -> i64 {
        if self.is_char_based() {
            self.char_len
        } else {
            self.byte_len
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hdb_protocol::Cesu8;

    #[test]
    fn test_binary_chunks() {
        let src = LobSource::from_bytes(vec![7u8; 25]);
        let mut descr = LobInDescr::new(src, TypeCode::Blob, 10);
        let sizes: Vec<usize> = (0..3).map(|_| descr.next_chunk(&Cesu8).unwrap().len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert!(descr.is_last_data());
        assert_eq!(descr.written(), 25);
        assert!(descr.options().is_last_data());
    }

    #[test]
    fn test_exact_multiple_needs_extra_empty_chunk() {
        let src = LobSource::from_bytes(vec![1u8; 20]);
        let mut descr = LobInDescr::new(src, TypeCode::Blob, 10);
        descr.next_chunk(&Cesu8).unwrap();
        descr.next_chunk(&Cesu8).unwrap();
        assert!(!descr.is_last_data());
        assert!(descr.next_chunk(&Cesu8).unwrap().is_empty());
        assert!(descr.is_last_data());
    }

    #[test]
    fn test_char_lob_keeps_sequences_whole() {
        // 'ä' is two bytes, the chunk boundary falls inside the second one
        let src = LobSource::from_bytes("aää".as_bytes().to_vec());
        let mut descr = LobInDescr::new(src, TypeCode::Nclob, 4);
        assert_eq!(&descr.next_chunk(&Cesu8).unwrap()[..], "aä".as_bytes());
        assert_eq!(&descr.next_chunk(&Cesu8).unwrap()[..], "ä".as_bytes());
        assert!(descr.is_last_data());
    }

    #[test]
    fn test_char_lob_supplementary_plane() {
        let src = LobSource::from_bytes("\u{1F600}".as_bytes().to_vec());
        let mut descr = LobInDescr::new(src, TypeCode::Nclob, 16);
        let chunk = descr.next_chunk(&Cesu8).unwrap();
        assert_eq!(chunk.len(), 6);
    }

    #[test]
    fn test_source_identity() {
        let a = LobSource::from_bytes(Bytes::from_static(b"x"));
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, LobSource::from_bytes(Bytes::from_static(b"x")));
    }
}
