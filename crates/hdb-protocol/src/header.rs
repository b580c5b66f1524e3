//! Message, segment and part headers.
//!
//! ```text
//! message  := message_header (32) || segment*
//! segment  := segment_header (24) || part*
//! part     := part_header (16) || body || padding to 8 bytes
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{put_zeroes, ByteReader};
use crate::error::ProtocolError;
use crate::kinds::{CommandOptions, FunctionCode, MessageKind, PartAttributes, SegmentKind};

/// Message header size in bytes.
pub const MESSAGE_HEADER_SIZE: usize = 32;

/// Segment header size in bytes.
pub const SEGMENT_HEADER_SIZE: usize = 24;

/// Part header size in bytes.
pub const PART_HEADER_SIZE: usize = 16;

/// Largest varpart a message may carry.
pub const MAX_VARPART_SIZE: usize = i32::MAX as usize;

/// Message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    /// Session id assigned by the server (0 before connect).
    pub session_id: i64,
    /// Packet sequence counter.
    pub packet_count: i32,
    /// Bytes following the header.
    pub varpart_length: u32,
    /// Buffer size reserved for the varpart.
    pub varpart_size: u32,
    /// Number of segments.
    pub num_segments: i16,
    /// Packet options.
    pub packet_options: i8,
}

impl MessageHeader {
    /// Decode a message header.
    pub fn decode(src: &mut ByteReader) -> Result<Self, ProtocolError> {
        if src.remaining() < MESSAGE_HEADER_SIZE {
            return Err(ProtocolError::incomplete(MESSAGE_HEADER_SIZE, src.remaining()));
        }
        let session_id = src.i64()?;
        let packet_count = src.i32()?;
        let varpart_length = src.u32()?;
        let varpart_size = src.u32()?;
        let num_segments = src.i16()?;
        let packet_options = src.i8()?;
        // filler (1) + compression varpart length (4) + filler (4)
        src.skip(9)?;
        Ok(Self {
            session_id,
            packet_count,
            varpart_length,
            varpart_size,
            num_segments,
            packet_options,
        })
    }

    /// Peek the varpart length from the first header bytes without consuming.
    ///
    /// Returns `None` if fewer than [`MESSAGE_HEADER_SIZE`] bytes are given.
    #[must_use]
    pub fn peek_varpart_length(src: &[u8]) -> Option<usize> {
        if src.len() < MESSAGE_HEADER_SIZE {
            return None;
        }
        let raw = [src[12], src[13], src[14], src[15]];
        Some(u32::from_le_bytes(raw) as usize)
    }

    /// Encode into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_i64_le(self.session_id);
        dst.put_i32_le(self.packet_count);
        dst.put_u32_le(self.varpart_length);
        dst.put_u32_le(self.varpart_size);
        dst.put_i16_le(self.num_segments);
        dst.put_i8(self.packet_options);
        put_zeroes(dst, 9);
    }

    /// Encode to a new `Bytes`.
    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Kind-specific half of the segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentBody {
    /// Request segment.
    Request {
        /// What the client asks for.
        message_kind: MessageKind,
        /// Auto-commit flag.
        commit: bool,
        /// Command options.
        command_options: CommandOptions,
    },
    /// Reply or error segment.
    Reply {
        /// What the server did.
        function_code: FunctionCode,
    },
}

/// Segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Segment length including this header.
    pub length: i32,
    /// Offset of the segment within the message varpart.
    pub offset: i32,
    /// Number of parts.
    pub num_parts: i16,
    /// Segment number, starting at 1.
    pub segment_no: i16,
    /// Segment kind.
    pub kind: SegmentKind,
    /// Request or reply specific fields.
    pub body: SegmentBody,
}

impl SegmentHeader {
    /// Build a request segment header; lengths are filled in by the framer.
    #[must_use]
    pub const fn request(message_kind: MessageKind, commit: bool, command_options: CommandOptions) -> Self {
        Self {
            length: 0,
            offset: 0,
            num_parts: 0,
            segment_no: 1,
            kind: SegmentKind::Request,
            body: SegmentBody::Request {
                message_kind,
                commit,
                command_options,
            },
        }
    }

    /// Build a reply segment header; lengths are filled in by the framer.
    #[must_use]
    pub const fn reply(kind: SegmentKind, function_code: FunctionCode) -> Self {
        Self {
            length: 0,
            offset: 0,
            num_parts: 0,
            segment_no: 1,
            kind,
            body: SegmentBody::Reply { function_code },
        }
    }

    /// Message kind for request segments.
    #[must_use]
    pub const fn message_kind(&self) -> Option<MessageKind> {
        match self.body {
            SegmentBody::Request { message_kind, .. } => Some(message_kind),
            SegmentBody::Reply { .. } => None,
        }
    }

    /// Function code for reply segments.
    #[must_use]
    pub const fn function_code(&self) -> Option<FunctionCode> {
        match self.body {
            SegmentBody::Reply { function_code } => Some(function_code),
            SegmentBody::Request { .. } => None,
        }
    }

    /// Decode a segment header.
    pub fn decode(src: &mut ByteReader) -> Result<Self, ProtocolError> {
        if src.remaining() < SEGMENT_HEADER_SIZE {
            return Err(ProtocolError::incomplete(SEGMENT_HEADER_SIZE, src.remaining()));
        }
        let length = src.i32()?;
        let offset = src.i32()?;
        let num_parts = src.i16()?;
        let segment_no = src.i16()?;
        let kind = SegmentKind::from_raw(src.i8()?)?;
        let body = match kind {
            SegmentKind::Request => {
                let message_kind = MessageKind::from_raw(src.i8()?)?;
                let commit = src.bool()?;
                let command_options = CommandOptions::from_bits_retain(src.i8()?);
                src.skip(8)?;
                SegmentBody::Request {
                    message_kind,
                    commit,
                    command_options,
                }
            }
            SegmentKind::Reply | SegmentKind::Error | SegmentKind::Invalid => {
                src.skip(1)?;
                let function_code = FunctionCode::from_raw(src.i16()?)?;
                src.skip(8)?;
                SegmentBody::Reply { function_code }
            }
        };
        Ok(Self {
            length,
            offset,
            num_parts,
            segment_no,
            kind,
            body,
        })
    }

    /// Encode into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_i32_le(self.length);
        dst.put_i32_le(self.offset);
        dst.put_i16_le(self.num_parts);
        dst.put_i16_le(self.segment_no);
        dst.put_i8(self.kind.raw());
        match self.body {
            SegmentBody::Request {
                message_kind,
                commit,
                command_options,
            } => {
                dst.put_i8(message_kind.raw());
                dst.put_u8(u8::from(commit));
                dst.put_i8(command_options.bits());
            }
            SegmentBody::Reply { function_code } => {
                dst.put_i8(0);
                dst.put_i16_le(function_code.raw());
            }
        }
        put_zeroes(dst, 8);
    }
}

/// Part header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartHeader {
    /// Raw part kind (unknown kinds are kept and skipped).
    pub kind: i8,
    /// Attribute flags.
    pub attributes: PartAttributes,
    /// Argument count; large counts use the 32-bit field on the wire.
    pub arg_count: i32,
    /// Body length in bytes, excluding padding.
    pub buffer_length: i32,
    /// Buffer size available (requests) or used (replies).
    pub buffer_size: i32,
}

impl PartHeader {
    /// Create a header for a body of `buffer_length` bytes.
    #[must_use]
    pub const fn new(kind: i8, arg_count: i32, buffer_length: i32) -> Self {
        Self {
            kind,
            attributes: PartAttributes::empty(),
            arg_count,
            buffer_length,
            buffer_size: buffer_length,
        }
    }

    /// Decode a part header.
    pub fn decode(src: &mut ByteReader) -> Result<Self, ProtocolError> {
        if src.remaining() < PART_HEADER_SIZE {
            return Err(ProtocolError::incomplete(PART_HEADER_SIZE, src.remaining()));
        }
        let kind = src.i8()?;
        let attributes = PartAttributes::from_bits_retain(src.i8()?);
        let small = src.i16()?;
        let big = src.i32()?;
        let buffer_length = src.i32()?;
        let buffer_size = src.i32()?;
        let arg_count = if small == -1 { big } else { i32::from(small) };
        Ok(Self {
            kind,
            attributes,
            arg_count,
            buffer_length,
            buffer_size,
        })
    }

    /// Encode into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_i8(self.kind);
        dst.put_i8(self.attributes.bits());
        if self.arg_count > i32::from(i16::MAX) {
            dst.put_i16_le(-1);
            dst.put_i32_le(self.arg_count);
        } else {
            dst.put_i16_le(self.arg_count as i16);
            dst.put_i32_le(0);
        }
        dst.put_i32_le(self.buffer_length);
        dst.put_i32_le(self.buffer_size);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_header_roundtrip() {
        let header = MessageHeader {
            session_id: 0x0102_0304_0506_0708,
            packet_count: 7,
            varpart_length: 120,
            varpart_size: 16276,
            num_segments: 1,
            packet_options: 0,
        };
        let bytes = header.encode_to_bytes();
        assert_eq!(bytes.len(), MESSAGE_HEADER_SIZE);
        assert_eq!(MessageHeader::peek_varpart_length(&bytes), Some(120));

        let decoded = MessageHeader::decode(&mut ByteReader::new(bytes)).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_segment_header_sizes() {
        let mut buf = BytesMut::new();
        SegmentHeader::request(MessageKind::ExecuteDirect, true, CommandOptions::empty()).encode(&mut buf);
        assert_eq!(buf.len(), SEGMENT_HEADER_SIZE);
        assert_eq!(buf[13], MessageKind::ExecuteDirect.raw() as u8);
        assert_eq!(buf[14], 1, "auto-commit flag");

        let mut buf = BytesMut::new();
        SegmentHeader::reply(SegmentKind::Reply, FunctionCode::Select).encode(&mut buf);
        assert_eq!(buf.len(), SEGMENT_HEADER_SIZE);
        let decoded = SegmentHeader::decode(&mut ByteReader::new(buf.freeze())).unwrap();
        assert_eq!(decoded.function_code(), Some(FunctionCode::Select));
    }

    #[test]
    fn test_part_header_big_arg_count() {
        let header = PartHeader::new(32, 100_000, 64);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PART_HEADER_SIZE);
        assert_eq!(&buf[2..4], &(-1i16).to_le_bytes());

        let decoded = PartHeader::decode(&mut ByteReader::new(buf.freeze())).unwrap();
        assert_eq!(decoded.arg_count, 100_000);
    }

    #[test]
    fn test_truncated_header() {
        let err = MessageHeader::decode(&mut ByteReader::new(Bytes::from_static(&[0; 10]))).unwrap_err();
        assert_eq!(err, ProtocolError::incomplete(MESSAGE_HEADER_SIZE, 10));
    }
}
