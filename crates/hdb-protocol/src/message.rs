//! Message framing.
//!
//! [`Message`] groups parts into segments and segments into a message,
//! back-patching lengths and offsets once the bodies are serialised.
//! [`RawMessage`] is the decoded counterpart: headers are parsed eagerly,
//! part bodies are kept as bytes until a visitor asks for them.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{padding, put_zeroes, ByteReader};
use crate::error::ProtocolError;
use crate::header::{
    MessageHeader, PartHeader, SegmentHeader, MESSAGE_HEADER_SIZE, PART_HEADER_SIZE,
    SEGMENT_HEADER_SIZE,
};
use crate::kinds::{
    CommandOptions, FunctionCode, MessageKind, PartAttributes, PartKind, SegmentKind,
};
use crate::parts::{Part, ServerErrors};

/// Outgoing segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Header; lengths and part count are computed on encode.
    pub header: SegmentHeader,
    /// Parts in wire order.
    pub parts: Vec<Part>,
}

impl Segment {
    /// Request segment for `kind`.
    #[must_use]
    pub fn request(kind: MessageKind, commit: bool) -> Self {
        Self {
            header: SegmentHeader::request(kind, commit, CommandOptions::empty()),
            parts: Vec::new(),
        }
    }

    /// Reply segment carrying `function_code`.
    #[must_use]
    pub fn reply(function_code: FunctionCode) -> Self {
        Self {
            header: SegmentHeader::reply(SegmentKind::Reply, function_code),
            parts: Vec::new(),
        }
    }

    /// Error segment.
    #[must_use]
    pub fn error(errors: ServerErrors) -> Self {
        Self {
            header: SegmentHeader::reply(SegmentKind::Error, FunctionCode::Nil),
            parts: vec![Part::Errors(errors)],
        }
    }

    /// Append a part.
    #[must_use]
    pub fn with_part(mut self, part: impl Into<Part>) -> Self {
        self.parts.push(part.into());
        self
    }
}

/// Outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Session id.
    pub session_id: i64,
    /// Packet sequence number.
    pub packet_count: i32,
    /// Segments in wire order.
    pub segments: Vec<Segment>,
}

impl Message {
    /// Single-segment request.
    #[must_use]
    pub fn request(session_id: i64, packet_count: i32, kind: MessageKind, commit: bool, parts: Vec<Part>) -> Self {
        let mut segment = Segment::request(kind, commit);
        segment.parts = parts;
        Self {
            session_id,
            packet_count,
            segments: vec![segment],
        }
    }

    /// Message with arbitrary segments.
    #[must_use]
    pub fn new(session_id: i64, packet_count: i32, segments: Vec<Segment>) -> Self {
        Self {
            session_id,
            packet_count,
            segments,
        }
    }

    /// Message kind of the first request segment.
    #[must_use]
    pub fn kind(&self) -> Option<MessageKind> {
        self.segments.first().and_then(|s| s.header.message_kind())
    }

    /// Serialise into `dst`, returning the total number of bytes written.
    ///
    /// `varpart_size` is the buffer size announced to the server; it is raised
    /// to the actual varpart length if smaller.
    pub fn encode(&self, dst: &mut BytesMut, varpart_size: u32) -> Result<usize, ProtocolError> {
        let start = dst.len();
        dst.put_bytes(0, MESSAGE_HEADER_SIZE);

        for (index, segment) in self.segments.iter().enumerate() {
            let seg_start = dst.len();
            dst.put_bytes(0, SEGMENT_HEADER_SIZE);

            for part in &segment.parts {
                let part_start = dst.len();
                dst.put_bytes(0, PART_HEADER_SIZE);
                let len = part.encode(dst)?;
                if len > i32::MAX as usize {
                    return Err(ProtocolError::LengthExceeded(len));
                }
                put_zeroes(dst, padding(len));

                let mut header = PartHeader::new(part.kind(), part.arg_count(), len as i32);
                header.attributes = part.attributes();
                let mut raw = [0u8; PART_HEADER_SIZE];
                header.encode(&mut &mut raw[..]);
                dst[part_start..part_start + PART_HEADER_SIZE].copy_from_slice(&raw);
            }

            let mut header = segment.header;
            header.length = (dst.len() - seg_start) as i32;
            header.offset = (seg_start - start - MESSAGE_HEADER_SIZE) as i32;
            header.num_parts = segment.parts.len() as i16;
            header.segment_no = (index + 1) as i16;
            let mut raw = [0u8; SEGMENT_HEADER_SIZE];
            header.encode(&mut &mut raw[..]);
            dst[seg_start..seg_start + SEGMENT_HEADER_SIZE].copy_from_slice(&raw);
        }

        let varpart_length = dst.len() - start - MESSAGE_HEADER_SIZE;
        if varpart_length > crate::header::MAX_VARPART_SIZE {
            return Err(ProtocolError::LengthExceeded(varpart_length));
        }
        let header = MessageHeader {
            session_id: self.session_id,
            packet_count: self.packet_count,
            varpart_length: varpart_length as u32,
            varpart_size: varpart_size.max(varpart_length as u32),
            num_segments: self.segments.len() as i16,
            packet_options: 0,
        };
        let mut raw = [0u8; MESSAGE_HEADER_SIZE];
        header.encode(&mut &mut raw[..]);
        dst[start..start + MESSAGE_HEADER_SIZE].copy_from_slice(&raw);

        tracing::trace!(
            kind = ?self.kind(),
            segments = self.segments.len(),
            varpart_len = varpart_length,
            "encoded HDB message"
        );
        Ok(dst.len() - start)
    }

    /// Serialise to a new buffer.
    pub fn encode_to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf, 0)?;
        Ok(buf.freeze())
    }
}

/// Decoded part whose body has not been interpreted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPart {
    /// Part header.
    pub header: PartHeader,
    /// Body without padding.
    pub body: Bytes,
}

impl RawPart {
    /// Registered kind, if known.
    #[must_use]
    pub fn kind(&self) -> Option<PartKind> {
        PartKind::from_raw(self.header.kind).ok()
    }

    /// Part attributes.
    #[must_use]
    pub fn attributes(&self) -> PartAttributes {
        self.header.attributes
    }

    /// Decode through the part registry.
    pub fn decode(&self) -> Result<Part, ProtocolError> {
        Part::decode(&self.header, self.body.clone())
    }

    /// Reader over the body.
    #[must_use]
    pub fn reader(&self) -> ByteReader {
        ByteReader::new(self.body.clone())
    }
}

/// Decoded segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSegment {
    /// Segment header.
    pub header: SegmentHeader,
    /// Parts in wire order.
    pub parts: Vec<RawPart>,
}

/// Decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Message header.
    pub header: MessageHeader,
    /// Segments in wire order.
    pub segments: Vec<RawSegment>,
}

impl RawMessage {
    /// Decode a complete message (header plus varpart).
    pub fn decode(data: Bytes) -> Result<Self, ProtocolError> {
        let mut src = ByteReader::new(data);
        let header = MessageHeader::decode(&mut src)?;
        let varpart_len = header.varpart_length as usize;
        if src.remaining() < varpart_len {
            return Err(ProtocolError::InvalidMessageLength {
                announced: varpart_len,
                actual: src.remaining(),
            });
        }
        let mut varpart = ByteReader::new(src.bytes(varpart_len)?);

        let mut segments = Vec::with_capacity(header.num_segments.max(0) as usize);
        for _ in 0..header.num_segments.max(0) {
            let seg_header = SegmentHeader::decode(&mut varpart)?;
            let body_len = (seg_header.length as usize)
                .checked_sub(SEGMENT_HEADER_SIZE)
                .ok_or_else(|| ProtocolError::Malformed(format!("segment length {}", seg_header.length)))?;
            let mut seg_body = ByteReader::new(varpart.bytes(body_len)?);

            let mut parts = Vec::with_capacity(seg_header.num_parts.max(0) as usize);
            for _ in 0..seg_header.num_parts.max(0) {
                let part_header = PartHeader::decode(&mut seg_body)?;
                let len = part_header.buffer_length.max(0) as usize;
                let body = seg_body.bytes(len)?;
                // the final part of a message may omit its padding
                let pad = padding(len).min(seg_body.remaining());
                seg_body.skip(pad)?;
                parts.push(RawPart {
                    header: part_header,
                    body,
                });
            }
            segments.push(RawSegment {
                header: seg_header,
                parts,
            });
        }

        tracing::trace!(
            session_id = header.session_id,
            segments = segments.len(),
            varpart_len,
            "decoded HDB message"
        );
        Ok(Self { header, segments })
    }

    /// Function code of the first segment.
    #[must_use]
    pub fn function_code(&self) -> FunctionCode {
        self.segments
            .first()
            .and_then(|s| s.header.function_code())
            .unwrap_or(FunctionCode::Nil)
    }

    /// Whether any segment is an error segment.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.segments.iter().any(|s| s.header.kind == SegmentKind::Error)
    }

    /// All parts across segments, in wire order.
    pub fn parts(&self) -> impl Iterator<Item = &RawPart> {
        self.segments.iter().flat_map(|s| s.parts.iter())
    }

    /// Visit every part in wire order.
    ///
    /// The visitor decides per part whether to decode it or skip it; the
    /// first error aborts the iteration.
    pub fn iterate_parts<E, F>(&self, mut visitor: F) -> Result<(), E>
    where
        F: FnMut(&SegmentHeader, &RawPart) -> Result<(), E>,
    {
        for segment in &self.segments {
            for part in &segment.parts {
                visitor(&segment.header, part)?;
            }
        }
        Ok(())
    }

    /// Collect all server errors of the message.
    pub fn server_errors(&self) -> Result<ServerErrors, ProtocolError> {
        let mut all = ServerErrors::default();
        for part in self.parts() {
            if part.kind() == Some(PartKind::Error) {
                if let Part::Errors(errors) = part.decode()? {
                    all.0.extend(errors.0);
                }
            }
        }
        Ok(all)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::options::{ConnectOption, OptionValue, Options};
    use crate::parts::{AuthFields, ParameterField, ParameterMetadata, RowData, ServerError};
    use crate::typecode::TypeCode;
    use proptest::prelude::*;

    fn check_alignment(bytes: &[u8]) {
        let msg = RawMessage::decode(Bytes::copy_from_slice(bytes)).unwrap();
        let mut offset = MESSAGE_HEADER_SIZE;
        for segment in &msg.segments {
            offset += SEGMENT_HEADER_SIZE;
            for part in &segment.parts {
                assert_eq!(offset % 8, 0, "part not 8-byte aligned");
                let len = part.header.buffer_length as usize;
                let pad = padding(len);
                let pad_start = offset + PART_HEADER_SIZE + len;
                assert!(bytes[pad_start..pad_start + pad].iter().all(|b| *b == 0));
                offset = pad_start + pad;
            }
        }
    }

    #[test]
    fn test_execute_direct_layout() {
        let msg = Message::request(
            77,
            3,
            MessageKind::ExecuteDirect,
            true,
            vec![Part::Command(Bytes::from_static(b"select 1 from dummy"))],
        );
        let bytes = msg.encode_to_bytes().unwrap();
        // 32 + 24 + 16 + 19 + 5 padding
        assert_eq!(bytes.len(), 96);
        check_alignment(&bytes);

        let raw = RawMessage::decode(bytes).unwrap();
        assert_eq!(raw.header.session_id, 77);
        assert_eq!(raw.header.packet_count, 3);
        let seg = &raw.segments[0];
        assert_eq!(seg.header.message_kind(), Some(MessageKind::ExecuteDirect));
        assert!(matches!(
            seg.header.body,
            crate::header::SegmentBody::Request { commit: true, .. }
        ));
        assert_eq!(seg.parts[0].decode().unwrap(), msg.segments[0].parts[0]);
    }

    #[test]
    fn test_reply_with_errors() {
        let msg = Message::new(
            1,
            1,
            vec![Segment::error(ServerErrors(vec![ServerError::new(260, "invalid column")]))],
        );
        let raw = RawMessage::decode(msg.encode_to_bytes().unwrap()).unwrap();
        assert!(raw.is_error());
        let errors = raw.server_errors().unwrap();
        assert_eq!(errors.0[0].code, 260);
    }

    #[test]
    fn test_iterate_parts_stops_on_error() {
        let msg = Message::new(
            1,
            1,
            vec![Segment::reply(FunctionCode::Select)
                .with_part(Part::ResultsetId(5))
                .with_part(Part::Resultset(RowData::new(0, Bytes::new())))],
        );
        let raw = RawMessage::decode(msg.encode_to_bytes().unwrap()).unwrap();
        let mut seen = 0;
        let result: Result<(), &str> = raw.iterate_parts(|_, part| {
            seen += 1;
            if part.kind() == Some(PartKind::ResultsetId) {
                Err("stop")
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err("stop"));
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_truncated_varpart() {
        let msg = Message::request(0, 0, MessageKind::Commit, false, vec![]);
        let bytes = msg.encode_to_bytes().unwrap();
        let err = RawMessage::decode(bytes.slice(..bytes.len() - 1)).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessageLength { .. }));
    }

    fn arb_part() -> impl Strategy<Value = Part> {
        prop_oneof![
            any::<u64>().prop_map(Part::StatementId),
            any::<u64>().prop_map(Part::ResultsetId),
            any::<i32>().prop_map(Part::FetchSize),
            proptest::collection::vec(any::<i32>(), 0..8).prop_map(Part::RowsAffected),
            proptest::collection::vec(any::<u8>(), 0..64)
                .prop_map(|v| Part::Command(Bytes::from(v))),
            proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..300), 0..4)
                .prop_map(|fields| Part::Authentication(AuthFields(fields.into_iter().map(Bytes::from).collect()))),
            (any::<i32>(), "[a-z]{0,12}").prop_map(|(dfv, locale)| {
                Part::ConnectOptions(
                    Options::new()
                        .with(ConnectOption::DataFormatVersion2, OptionValue::Int(dfv))
                        .with(ConnectOption::ClientLocale, OptionValue::String(locale)),
                )
            }),
            (0i16..100, 0i16..10).prop_map(|(len, frac)| {
                Part::ParameterMetadata(ParameterMetadata(vec![ParameterField::input(TypeCode::Decimal, len, frac)]))
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_framing_roundtrip(parts in proptest::collection::vec(arb_part(), 0..6), session in any::<i64>()) {
            let msg = Message::request(session, 1, MessageKind::Execute, false, parts.clone());
            let bytes = msg.encode_to_bytes().unwrap();
            check_alignment(&bytes);

            let raw = RawMessage::decode(bytes).unwrap();
            let decoded: Vec<Part> = raw.parts().map(|p| p.decode().unwrap()).collect();
            prop_assert_eq!(decoded, parts);
        }
    }
}
