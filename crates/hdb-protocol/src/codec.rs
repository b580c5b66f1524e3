//! Primitive encoding and decoding for the HDB wire format.
//!
//! All integers on the wire are little-endian. Variable-length byte fields
//! are prefixed with a length indicator:
//!
//! | Indicator | Meaning |
//! |-----------|---------|
//! | `0..=245` | length is the indicator itself |
//! | `246` | 2-byte length follows |
//! | `247` | 4-byte length follows |
//! | `255` | NULL value |

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;

/// Length indicator of a NULL variable-length value.
pub const LEN_IND_NULL: u8 = 255;
/// Largest length encoded directly in the indicator byte.
pub const LEN_IND_SMALL: u8 = 245;
/// Indicator followed by a 2-byte length.
pub const LEN_IND_MEDIUM: u8 = 246;
/// Indicator followed by a 4-byte length.
pub const LEN_IND_BIG: u8 = 247;

/// Number of bytes needed for a variable-length field holding `size` bytes.
///
/// Returns `None` if the size cannot be represented.
#[must_use]
pub const fn var_field_size(size: usize) -> Option<usize> {
    if size <= LEN_IND_SMALL as usize {
        Some(size + 1)
    } else if size <= i16::MAX as usize {
        Some(size + 3)
    } else if size <= i32::MAX as usize {
        Some(size + 5)
    } else {
        None
    }
}

/// Write the length indicator for a variable-length field.
pub fn put_var_len(dst: &mut impl BufMut, size: usize) -> Result<(), ProtocolError> {
    if size <= LEN_IND_SMALL as usize {
        dst.put_u8(size as u8);
    } else if size <= i16::MAX as usize {
        dst.put_u8(LEN_IND_MEDIUM);
        dst.put_i16_le(size as i16);
    } else if size <= i32::MAX as usize {
        dst.put_u8(LEN_IND_BIG);
        dst.put_i32_le(size as i32);
    } else {
        return Err(ProtocolError::LengthExceeded(size));
    }
    Ok(())
}

/// Write a length-prefixed byte field.
pub fn put_var_bytes(dst: &mut impl BufMut, data: &[u8]) -> Result<(), ProtocolError> {
    put_var_len(dst, data.len())?;
    dst.put_slice(data);
    Ok(())
}

/// Write `n` zero bytes.
pub fn put_zeroes(dst: &mut impl BufMut, n: usize) {
    dst.put_bytes(0, n);
}

/// Padding needed to bring `len` to an 8-byte boundary.
#[must_use]
pub const fn padding(len: usize) -> usize {
    (8 - (len % 8)) % 8
}

/// Bounds-checked reader over an immutable byte buffer.
///
/// Every accessor verifies the remaining length before consuming, so a
/// truncated buffer yields [`ProtocolError::Incomplete`] rather than a panic.
#[derive(Debug, Clone)]
pub struct ByteReader {
    data: Bytes,
    consumed: usize,
}

macro_rules! read_le {
    ($(#[$doc:meta] $name:ident, $ty:ty, $get:ident;)*) => {
        $(
            #[$doc]
            pub fn $name(&mut self) -> Result<$ty, ProtocolError> {
                self.need(core::mem::size_of::<$ty>())?;
                self.consumed += core::mem::size_of::<$ty>();
                Ok(self.data.$get())
            }
        )*
    };
}

impl ByteReader {
    /// Create a reader over `data`.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self { data, consumed: 0 }
    }

    /// Bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }

    /// Bytes consumed since creation.
    #[must_use]
    pub fn position(&self) -> usize {
        self.consumed
    }

    /// Whether all data has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.data.has_remaining()
    }

    fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.data.remaining() < n {
            Err(ProtocolError::incomplete(n, self.data.remaining()))
        } else {
            Ok(())
        }
    }

    read_le! {
        /// Read an unsigned byte.
        u8, u8, get_u8;
        /// Read a signed byte.
        i8, i8, get_i8;
        /// Read a little-endian `i16`.
        i16, i16, get_i16_le;
        /// Read a little-endian `u16`.
        u16, u16, get_u16_le;
        /// Read a little-endian `i32`.
        i32, i32, get_i32_le;
        /// Read a little-endian `u32`.
        u32, u32, get_u32_le;
        /// Read a little-endian `i64`.
        i64, i64, get_i64_le;
        /// Read a little-endian `u64`.
        u64, u64, get_u64_le;
        /// Read a little-endian IEEE single.
        f32, f32, get_f32_le;
        /// Read a little-endian IEEE double.
        f64, f64, get_f64_le;
    }

    /// Read a boolean byte (non-zero is `true`).
    pub fn bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.u8()? != 0)
    }

    /// Read exactly `n` bytes without copying.
    pub fn bytes(&mut self, n: usize) -> Result<Bytes, ProtocolError> {
        self.need(n)?;
        self.consumed += n;
        Ok(self.data.split_to(n))
    }

    /// Read a fixed-size array.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        self.need(N)?;
        let mut out = [0u8; N];
        self.data.copy_to_slice(&mut out);
        self.consumed += N;
        Ok(out)
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        self.need(n)?;
        self.data.advance(n);
        self.consumed += n;
        Ok(())
    }

    /// Read a variable-length size indicator.
    ///
    /// Returns `None` for the NULL indicator.
    pub fn var_len(&mut self) -> Result<Option<usize>, ProtocolError> {
        let ind = self.u8()?;
        match ind {
            LEN_IND_NULL => Ok(None),
            0..=LEN_IND_SMALL => Ok(Some(ind as usize)),
            LEN_IND_MEDIUM => Ok(Some(self.i16()? as u16 as usize)),
            LEN_IND_BIG => Ok(Some(self.i32()? as u32 as usize)),
            other => Err(ProtocolError::InvalidLengthIndicator(other)),
        }
    }

    /// Read a length-prefixed byte field; `None` for NULL.
    pub fn var_bytes(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        match self.var_len()? {
            Some(n) => self.bytes(n).map(Some),
            None => Ok(None),
        }
    }

    /// Consume the rest of the buffer.
    pub fn rest(&mut self) -> Bytes {
        let n = self.data.remaining();
        self.consumed += n;
        self.data.split_to(n)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_var_len_boundaries() {
        for size in [0usize, 1, 245, 246, 32767, 32768, 70000] {
            let mut buf = BytesMut::new();
            put_var_len(&mut buf, size).unwrap();
            assert_eq!(buf.len() + size, var_field_size(size).unwrap());

            let mut reader = ByteReader::new(buf.freeze());
            assert_eq!(reader.var_len().unwrap(), Some(size));
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn test_var_bytes_null() {
        let mut reader = ByteReader::new(Bytes::from_static(&[LEN_IND_NULL]));
        assert_eq!(reader.var_bytes().unwrap(), None);
    }

    #[test]
    fn test_truncated_read_is_error() {
        let mut reader = ByteReader::new(Bytes::from_static(&[1, 2, 3]));
        let err = reader.i32().unwrap_err();
        assert_eq!(err, ProtocolError::incomplete(4, 3));
        // nothing consumed on failure
        assert_eq!(reader.remaining(), 3);
    }

    #[test]
    fn test_little_endian() {
        let mut reader = ByteReader::new(Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]));
        assert_eq!(reader.u32().unwrap(), 0x0403_0201);
        assert_eq!(reader.position(), 4);
    }

    #[test]
    fn test_padding() {
        assert_eq!(padding(0), 0);
        assert_eq!(padding(1), 7);
        assert_eq!(padding(8), 0);
        assert_eq!(padding(13), 3);
    }
}
