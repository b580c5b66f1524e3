//! Parameter and result metadata parts.
//!
//! Both parts consist of fixed-size descriptors followed by a name section.
//! Descriptors reference names by offset into that section; each name is a
//! 1-byte length followed by CESU-8 bytes. An offset of `u32::MAX` means the
//! name is absent.

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};

use super::PartBody;
use crate::cesu8;
use crate::codec::ByteReader;
use crate::error::ProtocolError;
use crate::header::PartHeader;
use crate::kinds::PartKind;
use crate::typecode::TypeCode;

const NO_NAME: u32 = u32::MAX;
const PARAMETER_FIELD_SIZE: usize = 16;
const RESULT_FIELD_SIZE: usize = 24;

bitflags! {
    /// Parameter descriptor options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParameterOptions: i8 {
        /// NOT NULL.
        const MANDATORY = 0x01;
        /// Nullable.
        const OPTIONAL = 0x02;
        /// Has a default value.
        const DEFAULT = 0x04;
    }
}

bitflags! {
    /// Result column options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnOptions: i8 {
        /// NOT NULL.
        const MANDATORY = 0x01;
        /// Nullable.
        const OPTIONAL = 0x02;
    }
}

/// Direction of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterMode {
    /// Input only.
    In,
    /// Input and output.
    InOut,
    /// Output only.
    Out,
}

impl ParameterMode {
    fn from_raw(raw: i8) -> Result<Self, ProtocolError> {
        match raw {
            0x01 => Ok(Self::In),
            0x02 => Ok(Self::InOut),
            0x04 => Ok(Self::Out),
            other => Err(ProtocolError::Malformed(format!("parameter mode {other}"))),
        }
    }

    const fn raw(self) -> i8 {
        match self {
            Self::In => 0x01,
            Self::InOut => 0x02,
            Self::Out => 0x04,
        }
    }

    /// Whether the client sends a value for this parameter.
    #[must_use]
    pub const fn is_input(self) -> bool {
        matches!(self, Self::In | Self::InOut)
    }

    /// Whether the server returns a value for this parameter.
    #[must_use]
    pub const fn is_output(self) -> bool {
        matches!(self, Self::InOut | Self::Out)
    }
}

/// Descriptor of a statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterField {
    /// Options.
    pub options: ParameterOptions,
    /// Type code.
    pub type_code: TypeCode,
    /// Direction.
    pub mode: ParameterMode,
    /// Name, for named procedure parameters.
    pub name: Option<String>,
    /// Length or precision.
    pub length: i16,
    /// Fraction (scale).
    pub fraction: i16,
}

impl ParameterField {
    /// Create an unnamed nullable input field.
    #[must_use]
    pub fn input(type_code: TypeCode, length: i16, fraction: i16) -> Self {
        Self {
            options: ParameterOptions::OPTIONAL,
            type_code,
            mode: ParameterMode::In,
            name: None,
            length,
            fraction,
        }
    }

    /// Whether NULL is allowed.
    #[must_use]
    pub fn nullable(&self) -> bool {
        self.options.contains(ParameterOptions::OPTIONAL)
    }
}

/// Descriptor of a result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultField {
    /// Options.
    pub options: ColumnOptions,
    /// Type code.
    pub type_code: TypeCode,
    /// Fraction (scale).
    pub fraction: i16,
    /// Length or precision.
    pub length: i16,
    /// Source table.
    pub table_name: Option<String>,
    /// Source schema.
    pub schema_name: Option<String>,
    /// Source column.
    pub column_name: Option<String>,
    /// Display name (alias).
    pub display_name: Option<String>,
}

impl ResultField {
    /// Create a nullable column with a display name.
    #[must_use]
    pub fn new(name: impl Into<String>, type_code: TypeCode, length: i16, fraction: i16) -> Self {
        let name = name.into();
        Self {
            options: ColumnOptions::OPTIONAL,
            type_code,
            fraction,
            length,
            table_name: None,
            schema_name: None,
            column_name: Some(name.clone()),
            display_name: Some(name),
        }
    }

    /// Name the application sees.
    #[must_use]
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.column_name.as_deref())
            .unwrap_or_default()
    }

    /// Whether NULL may occur.
    #[must_use]
    pub fn nullable(&self) -> bool {
        self.options.contains(ColumnOptions::OPTIONAL)
    }
}

/// Builds the name section, deduplicating identical names.
#[derive(Default)]
struct NameTable {
    names: Vec<String>,
    offsets: Vec<u32>,
    size: u32,
}

impl NameTable {
    fn offset(&mut self, name: Option<&str>) -> u32 {
        let Some(name) = name else {
            return NO_NAME;
        };
        if let Some(pos) = self.names.iter().position(|n| n == name) {
            return self.offsets[pos];
        }
        let offset = self.size;
        self.size += 1 + cesu8::encoded_len(name).min(u8::MAX as usize) as u32;
        self.names.push(name.to_string());
        self.offsets.push(offset);
        offset
    }

    fn write(&self, dst: &mut impl BufMut) -> usize {
        for name in &self.names {
            let mut encoded = cesu8::encode(name);
            encoded.truncate(u8::MAX as usize);
            dst.put_u8(encoded.len() as u8);
            dst.put_slice(&encoded);
        }
        self.size as usize
    }
}

fn read_name(names: &[u8], offset: u32) -> Result<Option<String>, ProtocolError> {
    if offset == NO_NAME {
        return Ok(None);
    }
    let start = offset as usize;
    let len = *names
        .get(start)
        .ok_or_else(|| ProtocolError::Malformed(format!("name offset {offset}")))? as usize;
    let raw = names
        .get(start + 1..start + 1 + len)
        .ok_or_else(|| ProtocolError::Malformed(format!("name length {len} at {offset}")))?;
    cesu8::decode(raw).map(Some)
}

/// `parameter-metadata` part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterMetadata(pub Vec<ParameterField>);

impl PartBody for ParameterMetadata {
    const KIND: PartKind = PartKind::ParameterMetadata;

    fn arg_count(&self) -> i32 {
        self.0.len() as i32
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        let mut names = NameTable::default();
        for field in &self.0 {
            dst.put_i8(field.options.bits());
            dst.put_u8(field.type_code.raw());
            dst.put_i8(field.mode.raw());
            dst.put_i8(0);
            dst.put_u32_le(names.offset(field.name.as_deref()));
            dst.put_i16_le(field.length);
            dst.put_i16_le(field.fraction);
            dst.put_u32_le(0);
        }
        Ok(self.0.len() * PARAMETER_FIELD_SIZE + names.write(dst))
    }

    fn decode(header: &PartHeader, src: &mut ByteReader) -> Result<Self, ProtocolError> {
        let count = header.arg_count.max(0) as usize;
        let mut raw = Vec::with_capacity(count);
        for _ in 0..count {
            let options = ParameterOptions::from_bits_retain(src.i8()?);
            let type_code = TypeCode::from_u8(src.u8()?)?;
            let mode = ParameterMode::from_raw(src.i8()?)?;
            src.skip(1)?;
            let name_offset = src.u32()?;
            let length = src.i16()?;
            let fraction = src.i16()?;
            src.skip(4)?;
            raw.push((options, type_code, mode, name_offset, length, fraction));
        }
        let names = src.rest();
        let fields = raw
            .into_iter()
            .map(|(options, type_code, mode, name_offset, length, fraction)| {
                Ok(ParameterField {
                    options,
                    type_code,
                    mode,
                    name: read_name(&names, name_offset)?,
                    length,
                    fraction,
                })
            })
            .collect::<Result<Vec<_>, ProtocolError>>()?;
        Ok(Self(fields))
    }
}

/// `result-metadata` part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultMetadata(pub Vec<ResultField>);

impl PartBody for ResultMetadata {
    const KIND: PartKind = PartKind::ResultMetadata;

    fn arg_count(&self) -> i32 {
        self.0.len() as i32
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        let mut names = NameTable::default();
        for field in &self.0 {
            dst.put_i8(field.options.bits());
            dst.put_u8(field.type_code.raw());
            dst.put_i16_le(field.fraction);
            dst.put_i16_le(field.length);
            dst.put_i16_le(0);
            dst.put_u32_le(names.offset(field.table_name.as_deref()));
            dst.put_u32_le(names.offset(field.schema_name.as_deref()));
            dst.put_u32_le(names.offset(field.column_name.as_deref()));
            dst.put_u32_le(names.offset(field.display_name.as_deref()));
        }
        Ok(self.0.len() * RESULT_FIELD_SIZE + names.write(dst))
    }

    fn decode(header: &PartHeader, src: &mut ByteReader) -> Result<Self, ProtocolError> {
        let count = header.arg_count.max(0) as usize;
        let mut raw = Vec::with_capacity(count);
        for _ in 0..count {
            let options = ColumnOptions::from_bits_retain(src.i8()?);
            let type_code = TypeCode::from_u8(src.u8()?)?;
            let fraction = src.i16()?;
            let length = src.i16()?;
            src.skip(2)?;
            let offsets = [src.u32()?, src.u32()?, src.u32()?, src.u32()?];
            raw.push((options, type_code, fraction, length, offsets));
        }
        let names = src.rest();
        let fields = raw
            .into_iter()
            .map(|(options, type_code, fraction, length, [table, schema, column, display])| {
                Ok(ResultField {
                    options,
                    type_code,
                    fraction,
                    length,
                    table_name: read_name(&names, table)?,
                    schema_name: read_name(&names, schema)?,
                    column_name: read_name(&names, column)?,
                    display_name: read_name(&names, display)?,
                })
            })
            .collect::<Result<Vec<_>, ProtocolError>>()?;
        Ok(Self(fields))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn roundtrip<T: PartBody + PartialEq + core::fmt::Debug>(value: &T) -> T {
        let mut buf = BytesMut::new();
        let written = value.encode(&mut buf).unwrap();
        assert_eq!(written, buf.len());
        let header = PartHeader::new(T::KIND.raw(), value.arg_count(), written as i32);
        T::decode(&header, &mut ByteReader::new(buf.freeze())).unwrap()
    }

    #[test]
    fn test_parameter_metadata() {
        let mut out = ParameterField::input(TypeCode::Table, 0, 0);
        out.mode = ParameterMode::Out;
        out.name = Some("RESULT".into());
        let meta = ParameterMetadata(vec![
            ParameterField::input(TypeCode::Integer, 10, 0),
            ParameterField::input(TypeCode::Nvarchar, 5000, 0),
            out,
        ]);
        let decoded = roundtrip(&meta);
        assert_eq!(decoded, meta);
        assert!(decoded.0[2].mode.is_output());
        assert!(!decoded.0[2].mode.is_input());
    }

    #[test]
    fn test_result_metadata_shared_names() {
        let mut field = ResultField::new("ID", TypeCode::Integer, 10, 0);
        field.table_name = Some("T".into());
        field.schema_name = Some("S".into());
        let meta = ResultMetadata(vec![field, ResultField::new("名前", TypeCode::Nvarchar, 20, 0)]);
        let decoded = roundtrip(&meta);
        assert_eq!(decoded, meta);
        assert_eq!(decoded.0[1].name(), "名前");
    }

    #[test]
    fn test_bad_name_offset() {
        let mut buf = BytesMut::new();
        ResultMetadata(vec![ResultField::new("A", TypeCode::Integer, 10, 0)])
            .encode(&mut buf)
            .unwrap();
        // corrupt the column name offset
        buf[16..20].copy_from_slice(&100u32.to_le_bytes());
        let header = PartHeader::new(PartKind::ResultMetadata.raw(), 1, buf.len() as i32);
        assert!(ResultMetadata::decode(&header, &mut ByteReader::new(buf.freeze())).is_err());
    }
}
