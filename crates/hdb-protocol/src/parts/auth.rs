//! Authentication field list.

use bytes::{BufMut, Bytes, BytesMut};

use super::PartBody;
use crate::codec::{put_var_bytes, var_field_size, ByteReader};
use crate::error::ProtocolError;
use crate::header::PartHeader;
use crate::kinds::PartKind;

/// Ordered list of opaque authentication fields.
///
/// The layout is a 2-byte field count followed by length-prefixed fields.
/// Method-specific payloads are frequently themselves nested field lists.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthFields(pub Vec<Bytes>);

impl AuthFields {
    /// Empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field.
    pub fn push(&mut self, field: impl Into<Bytes>) {
        self.0.push(field.into());
    }

    /// Builder-style [`push`](Self::push).
    #[must_use]
    pub fn with(mut self, field: impl Into<Bytes>) -> Self {
        self.push(field);
        self
    }

    /// Field at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.0.get(index)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialise into a standalone buffer (used for nested lists).
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.write(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Parse a standalone buffer (used for nested lists).
    pub fn from_bytes(data: Bytes) -> Result<Self, ProtocolError> {
        Self::read(&mut ByteReader::new(data))
    }

    fn write(&self, dst: &mut impl BufMut) -> Result<usize, ProtocolError> {
        dst.put_i16_le(self.0.len() as i16);
        let mut written = 2;
        for field in &self.0 {
            put_var_bytes(dst, field)?;
            written += var_field_size(field.len()).ok_or(ProtocolError::LengthExceeded(field.len()))?;
        }
        Ok(written)
    }

    fn read(src: &mut ByteReader) -> Result<Self, ProtocolError> {
        let count = src.i16()?;
        if count < 0 {
            return Err(ProtocolError::Malformed(format!("auth field count {count}")));
        }
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            // authentication fields never carry the NULL indicator
            fields.push(src.var_bytes()?.unwrap_or_default());
        }
        Ok(Self(fields))
    }
}

impl PartBody for AuthFields {
    const KIND: PartKind = PartKind::Authentication;

    fn arg_count(&self) -> i32 {
        1
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        self.write(dst)
    }

    fn decode(_header: &PartHeader, src: &mut ByteReader) -> Result<Self, ProtocolError> {
        Self::read(src)
    }
}
