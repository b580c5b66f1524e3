//! LOB read/write request and reply parts.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use super::PartBody;
use crate::codec::{put_zeroes, ByteReader};
use crate::error::ProtocolError;
use crate::header::PartHeader;
use crate::kinds::PartKind;

/// Opaque server-side handle of a LOB value.
pub type LocatorId = u64;

/// Offset value telling the server to append a write-lob chunk.
pub const APPEND_OFFSET: i64 = -1;

bitflags! {
    /// Per-chunk LOB option bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LobOptions: i8 {
        /// The value is NULL.
        const NULL_INDICATOR = 0x01;
        /// Data is included in this chunk.
        const DATA_INCLUDED = 0x02;
        /// This chunk is the last one.
        const LAST_DATA = 0x04;
    }
}

impl LobOptions {
    /// Whether the LOB is NULL.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.contains(Self::NULL_INDICATOR)
    }

    /// Whether no more chunks follow.
    #[must_use]
    pub const fn is_last_data(self) -> bool {
        self.contains(Self::LAST_DATA)
    }
}

/// `read-lob-request` part: ask for `length` bytes (or characters) from `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLobRequest {
    /// Locator to read from.
    pub locator: LocatorId,
    /// 1-based offset.
    pub offset: i64,
    /// Number of units requested.
    pub length: i32,
}

impl PartBody for ReadLobRequest {
    const KIND: PartKind = PartKind::ReadLobRequest;

    fn arg_count(&self) -> i32 {
        1
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        dst.put_u64_le(self.locator);
        dst.put_i64_le(self.offset);
        dst.put_i32_le(self.length);
        put_zeroes(dst, 4);
        Ok(24)
    }

    fn decode(_header: &PartHeader, src: &mut ByteReader) -> Result<Self, ProtocolError> {
        let locator = src.u64()?;
        let offset = src.i64()?;
        let length = src.i32()?;
        src.skip(4)?;
        Ok(Self {
            locator,
            offset,
            length,
        })
    }
}

/// `read-lob-reply` part: one chunk of LOB data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadLobReply {
    /// Locator the chunk belongs to.
    pub locator: LocatorId,
    /// Chunk options.
    pub options: LobOptions,
    /// Chunk bytes.
    pub data: Bytes,
}

impl PartBody for ReadLobReply {
    const KIND: PartKind = PartKind::ReadLobReply;

    fn arg_count(&self) -> i32 {
        1
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        dst.put_u64_le(self.locator);
        dst.put_i8(self.options.bits());
        dst.put_i32_le(self.data.len() as i32);
        put_zeroes(dst, 3);
        dst.put_slice(&self.data);
        Ok(16 + self.data.len())
    }

    fn decode(_header: &PartHeader, src: &mut ByteReader) -> Result<Self, ProtocolError> {
        let locator = src.u64()?;
        let options = LobOptions::from_bits_retain(src.i8()?);
        let len = src.i32()?;
        src.skip(3)?;
        let data = src.bytes(len.max(0) as usize)?;
        Ok(Self {
            locator,
            options,
            data,
        })
    }
}

/// One chunk in a `write-lob-request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteLobChunk {
    /// Locator assigned by the server.
    pub locator: LocatorId,
    /// Chunk options.
    pub options: LobOptions,
    /// Write offset, [`APPEND_OFFSET`] to append.
    pub offset: i64,
    /// Chunk bytes.
    pub data: Bytes,
}

/// `write-lob-request` part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteLobRequest(pub Vec<WriteLobChunk>);

impl PartBody for WriteLobRequest {
    const KIND: PartKind = PartKind::WriteLobRequest;

    fn arg_count(&self) -> i32 {
        self.0.len() as i32
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        let mut written = 0;
        for chunk in &self.0 {
            dst.put_u64_le(chunk.locator);
            dst.put_i8(chunk.options.bits());
            dst.put_i64_le(chunk.offset);
            dst.put_i32_le(chunk.data.len() as i32);
            dst.put_slice(&chunk.data);
            written += 21 + chunk.data.len();
        }
        Ok(written)
    }

    fn decode(header: &PartHeader, src: &mut ByteReader) -> Result<Self, ProtocolError> {
        let mut chunks = Vec::with_capacity(header.arg_count.max(0) as usize);
        for _ in 0..header.arg_count {
            let locator = src.u64()?;
            let options = LobOptions::from_bits_retain(src.i8()?);
            let offset = src.i64()?;
            let len = src.i32()?;
            let data = src.bytes(len.max(0) as usize)?;
            chunks.push(WriteLobChunk {
                locator,
                options,
                offset,
                data,
            });
        }
        Ok(Self(chunks))
    }
}

/// `write-lob-reply` part: locator ids for LOBs that still expect data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteLobReply(pub Vec<LocatorId>);

impl PartBody for WriteLobReply {
    const KIND: PartKind = PartKind::WriteLobReply;

    fn arg_count(&self) -> i32 {
        self.0.len() as i32
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        for id in &self.0 {
            dst.put_u64_le(*id);
        }
        Ok(self.0.len() * 8)
    }

    fn decode(header: &PartHeader, src: &mut ByteReader) -> Result<Self, ProtocolError> {
        (0..header.arg_count.max(0))
            .map(|_| src.u64())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}
