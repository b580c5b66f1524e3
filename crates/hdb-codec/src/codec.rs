//! HDB message codec implementation.

use bytes::BytesMut;
use hdb_protocol::{MAX_VARPART_SIZE, MESSAGE_HEADER_SIZE, Message, MessageHeader, RawMessage};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Default receive limit for a single message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 128 * 1024 * 1024;

/// HDB message codec for tokio-util framing.
///
/// Decodes complete [`RawMessage`]s (header plus varpart) and encodes
/// [`Message`]s. The same codec serves both sides of a connection.
pub struct HdbCodec {
    max_message_size: usize,
    /// Buffer size announced in the message header of outgoing messages.
    varpart_size: u32,
    bytes_decoded: u64,
    bytes_encoded: u64,
}

impl HdbCodec {
    /// Create a codec with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            varpart_size: 0,
            bytes_decoded: 0,
            bytes_encoded: 0,
        }
    }

    /// Set the maximum accepted message size.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.min(MESSAGE_HEADER_SIZE + MAX_VARPART_SIZE);
        self
    }

    /// Set the buffer size announced to the peer.
    #[must_use]
    pub fn with_varpart_size(mut self, size: u32) -> Self {
        self.varpart_size = size;
        self
    }

    /// Total bytes consumed by the decoder.
    #[must_use]
    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    /// Total bytes produced by the encoder.
    #[must_use]
    pub fn bytes_encoded(&self) -> u64 {
        self.bytes_encoded
    }
}

impl Default for HdbCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for HdbCodec {
    type Item = RawMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(varpart_len) = MessageHeader::peek_varpart_length(src) else {
            return Ok(None);
        };

        let length = MESSAGE_HEADER_SIZE + varpart_len;
        if length > self.max_message_size {
            return Err(CodecError::MessageTooLarge {
                size: length,
                max: self.max_message_size,
            });
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let data = src.split_to(length).freeze();
        self.bytes_decoded += length as u64;
        Ok(Some(RawMessage::decode(data)?))
    }
}

impl Encoder<&Message> for HdbCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let written = item.encode(dst, self.varpart_size)?;
        self.bytes_encoded += written as u64;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hdb_protocol::{MessageKind, Part};

    fn sample() -> Message {
        Message::request(
            7,
            3,
            MessageKind::ExecuteDirect,
            true,
            vec![Part::Command("select 1 from dummy".into())],
        )
    }

    #[test]
    fn test_encode_decode_message() {
        let mut codec = HdbCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(&sample(), &mut buf).unwrap();
        let len = buf.len();

        let raw = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(raw.header.session_id, 7);
        assert_eq!(raw.header.packet_count, 3);
        assert_eq!(raw.segments.len(), 1);
        assert!(buf.is_empty());
        assert_eq!(codec.bytes_encoded(), len as u64);
        assert_eq!(codec.bytes_decoded(), len as u64);
    }

    #[test]
    fn test_incomplete_message() {
        let mut codec = HdbCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(&sample(), &mut buf).unwrap();
        let full = buf.split();

        // header only
        let mut partial = BytesMut::from(&full[..MESSAGE_HEADER_SIZE]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // everything but the last byte
        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_message_too_large() {
        let mut codec = HdbCodec::new().with_max_message_size(64);
        let mut buf = BytesMut::new();
        HdbCodec::new().encode(&sample(), &mut buf).unwrap();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::MessageTooLarge { max: 64, .. })
        ));
    }

    #[test]
    fn test_two_messages_in_one_buffer() {
        let mut codec = HdbCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(&sample(), &mut buf).unwrap();
        codec.encode(&sample(), &mut buf).unwrap();
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
