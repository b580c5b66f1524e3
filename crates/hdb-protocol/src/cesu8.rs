//! CESU-8 transcoding.
//!
//! CESU-8 is UTF-8 except that code points above U+FFFF are written as a
//! surrogate pair, each half encoded as a 3-byte sequence. The server expects
//! it for NCHAR, NVARCHAR and NCLOB payloads as well as for SQL command text.

use std::fmt;

use crate::error::ProtocolError;

/// Pluggable string transformer used for NCHAR data.
///
/// Connection attributes hold an instance so callers can substitute their own
/// (for example a lossy decoder for damaged data).
pub trait Cesu8Transformer: Send + Sync + fmt::Debug {
    /// Encode UTF-8 text into CESU-8 bytes.
    fn encode(&self, s: &str) -> Vec<u8>;

    /// Decode CESU-8 bytes into a `String`.
    fn decode(&self, data: &[u8]) -> Result<String, ProtocolError>;

    /// Size of `s` once encoded.
    fn encoded_len(&self, s: &str) -> usize {
        encoded_len(s)
    }
}

/// Strict CESU-8 transformer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cesu8;

impl Cesu8Transformer for Cesu8 {
    fn encode(&self, s: &str) -> Vec<u8> {
        encode(s)
    }

    fn decode(&self, data: &[u8]) -> Result<String, ProtocolError> {
        decode(data)
    }
}

/// Number of bytes `s` occupies in CESU-8.
#[must_use]
pub fn encoded_len(s: &str) -> usize {
    s.chars()
        .map(|c| if (c as u32) > 0xFFFF { 6 } else { c.len_utf8() })
        .sum()
}

/// Encode a string as CESU-8.
#[must_use]
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(s));
    for c in s.chars() {
        let cp = c as u32;
        if cp <= 0xFFFF {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        } else {
            let v = cp - 0x1_0000;
            push_surrogate(&mut out, 0xD800 | (v >> 10));
            push_surrogate(&mut out, 0xDC00 | (v & 0x3FF));
        }
    }
    out
}

fn push_surrogate(out: &mut Vec<u8>, unit: u32) {
    out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
    out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
    out.push(0x80 | (unit & 0x3F) as u8);
}

/// Decode CESU-8 bytes. Plain UTF-8 4-byte sequences are accepted as well.
pub fn decode(data: &[u8]) -> Result<String, ProtocolError> {
    // fast path: no surrogate lead bytes means the data is valid UTF-8 or invalid altogether
    if !data.windows(2).any(|w| w[0] == 0xED && w[1] >= 0xA0) {
        return String::from_utf8(data.to_vec())
            .map_err(|e| ProtocolError::InvalidCesu8(e.utf8_error().valid_up_to()));
    }

    let mut out = String::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        let (cp, width) = match b {
            0x00..=0x7F => (u32::from(b), 1),
            0xC0..=0xDF => (seq2(data, i)?, 2),
            0xE0..=0xEF => {
                let unit = seq3(data, i)?;
                if (0xD800..0xDC00).contains(&unit) {
                    let low = seq3(data, i + 3)?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return Err(ProtocolError::InvalidCesu8(i + 3));
                    }
                    (0x1_0000 + ((unit - 0xD800) << 10) + (low - 0xDC00), 6)
                } else {
                    (unit, 3)
                }
            }
            0xF0..=0xF7 => (seq4(data, i)?, 4),
            _ => return Err(ProtocolError::InvalidCesu8(i)),
        };
        let c = char::from_u32(cp).ok_or(ProtocolError::InvalidCesu8(i))?;
        out.push(c);
        i += width;
    }
    Ok(out)
}

fn cont(data: &[u8], at: usize) -> Result<u32, ProtocolError> {
    match data.get(at) {
        Some(&b) if b & 0xC0 == 0x80 => Ok(u32::from(b & 0x3F)),
        _ => Err(ProtocolError::InvalidCesu8(at)),
    }
}

fn seq2(data: &[u8], i: usize) -> Result<u32, ProtocolError> {
    Ok((u32::from(data[i] & 0x1F) << 6) | cont(data, i + 1)?)
}

fn seq3(data: &[u8], i: usize) -> Result<u32, ProtocolError> {
    let lead = data.get(i).ok_or(ProtocolError::InvalidCesu8(i))?;
    Ok((u32::from(lead & 0x0F) << 12) | (cont(data, i + 1)? << 6) | cont(data, i + 2)?)
}

fn seq4(data: &[u8], i: usize) -> Result<u32, ProtocolError> {
    Ok((u32::from(data[i] & 0x07) << 18)
        | (cont(data, i + 1)? << 12)
        | (cont(data, i + 2)? << 6)
        | cont(data, i + 3)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bmp_is_plain_utf8() {
        let s = "Grüße, 世界";
        assert_eq!(encode(s), s.as_bytes());
        assert_eq!(decode(s.as_bytes()).unwrap(), s);
    }

    #[test]
    fn test_supplementary_plane_uses_surrogates() {
        // U+1F600 -> D83D DE00
        let encoded = encode("\u{1F600}");
        assert_eq!(encoded, vec![0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
        assert_eq!(encoded_len("\u{1F600}"), 6);
        assert_eq!(decode(&encoded).unwrap(), "\u{1F600}");
    }

    #[test]
    fn test_lone_high_surrogate_rejected() {
        let err = decode(&[0xED, 0xA0, 0xBD, b'a']).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidCesu8(_)));
    }

    #[test]
    fn test_truncated_sequence_rejected() {
        assert!(decode(&[0xE4, 0xB8]).is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(s in "\\PC*") {
            let encoded = encode(&s);
            prop_assert_eq!(encoded.len(), encoded_len(&s));
            prop_assert_eq!(decode(&encoded).unwrap(), s);
        }
    }
}
