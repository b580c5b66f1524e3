//! Initial protocol handshake.
//!
//! Before the first message the client sends a fixed 14-byte prolog announcing
//! product and protocol versions plus the byte order, and the server answers
//! with an 8-byte reply.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::ByteReader;
use crate::error::ProtocolError;

/// Size of the prolog request in bytes.
pub const PROLOG_REQUEST_SIZE: usize = 14;

/// Size of the prolog reply in bytes.
pub const PROLOG_REPLY_SIZE: usize = 8;

const PRODUCT_VERSION: (i8, i16) = (4, 20);
const PROTOCOL_VERSION: (i8, i16) = (4, 1);
const OPTION_ENDIANNESS: i8 = 1;
const LITTLE_ENDIAN: i8 = 1;

/// Client prolog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrologRequest {
    /// Product version (major, minor).
    pub product_version: (i8, i16),
    /// Protocol version (major, minor).
    pub protocol_version: (i8, i16),
}

impl Default for PrologRequest {
    fn default() -> Self {
        Self {
            product_version: PRODUCT_VERSION,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

impl PrologRequest {
    /// Serialise into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&[0xff; 4]);
        dst.put_i8(self.product_version.0);
        dst.put_i16_le(self.product_version.1);
        dst.put_i8(self.protocol_version.0);
        dst.put_i16_le(self.protocol_version.1);
        dst.put_i8(0);
        // one option: byte order
        dst.put_i8(1);
        dst.put_i8(OPTION_ENDIANNESS);
        dst.put_i8(LITTLE_ENDIAN);
    }

    /// Serialise to a new buffer.
    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PROLOG_REQUEST_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Server prolog reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrologReply {
    /// Product version (major, minor).
    pub product_version: (i8, i16),
    /// Protocol version (major, minor).
    pub protocol_version: (i8, i16),
}

impl PrologReply {
    /// Parse an 8-byte reply.
    pub fn decode(src: &mut ByteReader) -> Result<Self, ProtocolError> {
        if src.remaining() < PROLOG_REPLY_SIZE {
            return Err(ProtocolError::incomplete(PROLOG_REPLY_SIZE, src.remaining()));
        }
        let product_version = (src.i8()?, src.i16()?);
        let protocol_version = (src.i8()?, src.i16()?);
        src.skip(2)?;
        if protocol_version.0 < 1 {
            return Err(ProtocolError::InvalidProlog(format!(
                "unexpected protocol version {}.{}",
                protocol_version.0, protocol_version.1
            )));
        }
        Ok(Self {
            product_version,
            protocol_version,
        })
    }

    /// Serialise into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_i8(self.product_version.0);
        dst.put_i16_le(self.product_version.1);
        dst.put_i8(self.protocol_version.0);
        dst.put_i16_le(self.protocol_version.1);
        dst.put_bytes(0, 2);
    }
}

/// Parse a prolog request. Used by test servers.
pub fn decode_prolog_request(src: &mut ByteReader) -> Result<PrologRequest, ProtocolError> {
    let marker = src.array::<4>()?;
    if marker != [0xff; 4] {
        return Err(ProtocolError::InvalidProlog(format!("bad marker {marker:02x?}")));
    }
    let product_version = (src.i8()?, src.i16()?);
    let protocol_version = (src.i8()?, src.i16()?);
    src.skip(4)?;
    Ok(PrologRequest {
        product_version,
        protocol_version,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let bytes = PrologRequest::default().encode_to_bytes();
        assert_eq!(bytes.len(), PROLOG_REQUEST_SIZE);
        assert_eq!(&bytes[..4], &[0xff; 4]);
        assert_eq!(bytes[4], 4);
        assert_eq!(&bytes[5..7], &20i16.to_le_bytes());
        assert_eq!(&bytes[10..], &[0, 1, 1, 1]);

        let parsed = decode_prolog_request(&mut ByteReader::new(bytes)).unwrap();
        assert_eq!(parsed, PrologRequest::default());
    }

    #[test]
    fn test_reply() {
        let reply = PrologReply {
            product_version: (4, 20),
            protocol_version: (4, 1),
        };
        let mut buf = BytesMut::new();
        reply.encode(&mut buf);
        assert_eq!(buf.len(), PROLOG_REPLY_SIZE);
        assert_eq!(PrologReply::decode(&mut ByteReader::new(buf.freeze())).unwrap(), reply);
    }

    #[test]
    fn test_short_reply() {
        let err = PrologReply::decode(&mut ByteReader::new(Bytes::from_static(&[4, 0, 0]))).unwrap_err();
        assert!(matches!(err, ProtocolError::Incomplete { .. }));
    }
}
