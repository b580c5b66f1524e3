//! Wire decoding of values.
//!
//! Result columns and output parameters carry no per-value type code: the
//! field descriptor selects the decoder. Input parameters (decoded only when
//! acting as a server) are self-describing.

use bytes::Bytes;
use hdb_protocol::{ByteReader, DataType, LobOptions, ProtocolError, ResultField, TypeCode, NULL_TYPE_FLAG};

use crate::datetime;
use crate::decimal::{HdbDecimal, DECIMAL128_SIZE};
use crate::error::TypeError;
use crate::lob::LobLocator;
use crate::value::{ConvContext, HdbValue};

fn decode_chars(data: &[u8], tc: TypeCode, ctx: &ConvContext) -> Result<HdbValue, TypeError> {
    let s = if tc.is_cesu8() {
        ctx.cesu8.decode(data)?
    } else {
        String::from_utf8_lossy(data).into_owned()
    };
    Ok(HdbValue::String(s))
}

fn decode_alphanum(data: &[u8], length: i16, ctx: &ConvContext) -> HdbValue {
    if ctx.is_dfv1() || data.is_empty() {
        return HdbValue::String(String::from_utf8_lossy(data).into_owned());
    }
    let numeric = data[0] & 0x80 != 0;
    let text = String::from_utf8_lossy(&data[1..]);
    let width = usize::try_from(length).unwrap_or(0);
    if numeric && width > text.len() {
        HdbValue::String(format!("{text:0>width$}"))
    } else {
        HdbValue::String(text.into_owned())
    }
}

fn decode_lob(src: &mut ByteReader) -> Result<HdbValue, TypeError> {
    let raw_tc = src.u8()?;
    let options = LobOptions::from_bits_retain(src.i8()?);
    if options.is_null() {
        return Ok(HdbValue::Null);
    }
    src.skip(2)?;
    let char_len = src.i64()?;
    let byte_len = src.i64()?;
    let locator = src.u64()?;
    let chunk_len = src.i32()?.max(0) as usize;
    let data = src.bytes(chunk_len)?;
    Ok(HdbValue::Lob(LobLocator {
        type_code: TypeCode::from_u8(raw_tc)?,
        options,
        char_len,
        byte_len,
        locator,
        data,
    }))
}

fn opt<T>(v: Option<T>, f: impl FnOnce(T) -> HdbValue) -> HdbValue {
    v.map_or(HdbValue::Null, f)
}

/// Decode one result column or output parameter.
pub fn decode_result(
    src: &mut ByteReader,
    tc: TypeCode,
    fraction: i16,
    length: i16,
    ctx: &ConvContext,
) -> Result<HdbValue, TypeError> {
    Ok(match tc {
        TypeCode::Tinyint | TypeCode::Smallint | TypeCode::Integer | TypeCode::Bigint => {
            if !src.bool()? {
                return Ok(HdbValue::Null);
            }
            match tc {
                TypeCode::Tinyint => HdbValue::TinyInt(src.u8()?),
                TypeCode::Smallint => HdbValue::SmallInt(src.i16()?),
                TypeCode::Integer => HdbValue::Int(src.i32()?),
                _ => HdbValue::BigInt(src.i64()?),
            }
        }
        TypeCode::Real => {
            let bits = src.u32()?;
            if bits == u32::MAX {
                HdbValue::Null
            } else {
                HdbValue::Real(f32::from_bits(bits))
            }
        }
        TypeCode::Double => {
            let bits = src.u64()?;
            if bits == u64::MAX {
                HdbValue::Null
            } else {
                HdbValue::Double(f64::from_bits(bits))
            }
        }
        TypeCode::Boolean => match src.u8()? {
            0 => HdbValue::Bool(false),
            1 => HdbValue::Null,
            _ => HdbValue::Bool(true),
        },
        TypeCode::Decimal | TypeCode::Smalldecimal => {
            let raw = src.array::<DECIMAL128_SIZE>()?;
            if HdbDecimal::is_null_decimal128(&raw) {
                HdbValue::Null
            } else {
                HdbValue::Decimal(HdbDecimal::from_decimal128(raw))
            }
        }
        TypeCode::Fixed8 | TypeCode::Fixed12 | TypeCode::Fixed16 => {
            if !src.bool()? {
                return Ok(HdbValue::Null);
            }
            let size = match tc {
                TypeCode::Fixed8 => 8,
                TypeCode::Fixed12 => 12,
                _ => 16,
            };
            HdbValue::Decimal(HdbDecimal::from_fixed(&src.bytes(size)?, i32::from(fraction)))
        }
        TypeCode::Alphanum => match src.var_bytes()? {
            None => HdbValue::Null,
            Some(data) => decode_alphanum(&data, length, ctx),
        },
        TypeCode::Char
        | TypeCode::Varchar
        | TypeCode::Nchar
        | TypeCode::Nvarchar
        | TypeCode::String
        | TypeCode::Nstring
        | TypeCode::Shorttext => match src.var_bytes()? {
            None => HdbValue::Null,
            Some(data) => decode_chars(&data, tc, ctx)?,
        },
        TypeCode::Binary
        | TypeCode::Varbinary
        | TypeCode::Bstring
        | TypeCode::StGeometry
        | TypeCode::StPoint => opt(src.var_bytes()?, HdbValue::Binary),
        TypeCode::Date => opt(datetime::get_date_v1(src)?, HdbValue::Date),
        TypeCode::Time => opt(datetime::get_time_v1(src)?, HdbValue::Time),
        TypeCode::Timestamp => opt(datetime::get_timestamp_v1(src)?, HdbValue::Timestamp),
        TypeCode::Daydate => opt(
            datetime::decode_daydate(src.i32()?, ctx.empty_date_as_null)?,
            HdbValue::Date,
        ),
        TypeCode::Seconddate => opt(datetime::decode_seconddate(src.i64()?)?, HdbValue::Timestamp),
        TypeCode::Longdate => opt(datetime::decode_longdate(src.i64()?)?, HdbValue::Timestamp),
        TypeCode::Secondtime => opt(datetime::decode_secondtime(src.i32()?)?, HdbValue::Time),
        _ if tc.is_lob() => decode_lob(src)?,
        other => return Err(TypeError::UnsupportedTypeCode(other)),
    })
}

/// Decode one row of result fields.
pub fn decode_row(
    src: &mut ByteReader,
    fields: &[ResultField],
    ctx: &ConvContext,
) -> Result<Vec<HdbValue>, TypeError> {
    fields
        .iter()
        .map(|f| decode_result(src, f.type_code, f.fraction, f.length, ctx))
        .collect()
}

/// Decode the rows of an `input-parameters` part.
///
/// LOB parameters are resolved against `body` (their data is addressed by
/// position) and surface as [`HdbValue::Lob`] with locator 0.
pub fn decode_input_rows(
    body: &Bytes,
    rows: usize,
    columns: usize,
    ctx: &ConvContext,
) -> Result<Vec<Vec<HdbValue>>, TypeError> {
    let mut src = ByteReader::new(body.clone());
    let mut out = Vec::with_capacity(rows);
    for _ in 0..rows {
        let mut row = Vec::with_capacity(columns);
        let mut row_end = 0;
        for _ in 0..columns {
            let raw = src.u8()?;
            let tc = TypeCode::from_u8(raw)?;
            if raw & NULL_TYPE_FLAG != 0 {
                row.push(HdbValue::Null);
                continue;
            }
            if tc.is_lob() {
                let options = LobOptions::from_bits_retain(src.i8()?);
                let len = src.i32()?.max(0) as usize;
                let pos = (src.i32()?.max(1) - 1) as usize;
                if pos + len > body.len() {
                    return Err(ProtocolError::incomplete(pos + len, body.len()).into());
                }
                let data = body.slice(pos..pos + len);
                row_end = row_end.max(pos + len);
                row.push(HdbValue::Lob(LobLocator {
                    type_code: tc,
                    options,
                    char_len: 0,
                    byte_len: len as i64,
                    locator: 0,
                    data,
                }));
                continue;
            }
            let value = match tc {
                TypeCode::Tinyint => HdbValue::TinyInt(src.u8()?),
                TypeCode::Smallint => HdbValue::SmallInt(src.i16()?),
                TypeCode::Integer => HdbValue::Int(src.i32()?),
                TypeCode::Bigint => HdbValue::BigInt(src.i64()?),
                TypeCode::Boolean => HdbValue::Bool(src.u8()? != 0),
                TypeCode::Real => HdbValue::Real(src.f32()?),
                TypeCode::Double => HdbValue::Double(src.f64()?),
                TypeCode::Decimal | TypeCode::Smalldecimal => {
                    HdbValue::Decimal(HdbDecimal::from_decimal128(src.array()?))
                }
                TypeCode::Fixed8 => HdbValue::Decimal(HdbDecimal::from_fixed(&src.bytes(8)?, 0)),
                TypeCode::Fixed12 => HdbValue::Decimal(HdbDecimal::from_fixed(&src.bytes(12)?, 0)),
                TypeCode::Fixed16 => HdbValue::Decimal(HdbDecimal::from_fixed(&src.bytes(16)?, 0)),
                // a NULL-flagged prefix was handled above, so dates are never NULL here
                TypeCode::Date
                | TypeCode::Time
                | TypeCode::Timestamp
                | TypeCode::Daydate
                | TypeCode::Seconddate
                | TypeCode::Longdate
                | TypeCode::Secondtime => decode_result(&mut src, tc, 0, 0, ctx)?,
                _ if tc.is_variable_length() => match src.var_bytes()? {
                    None => HdbValue::Null,
                    Some(data) if tc.data_type() == DataType::String => decode_chars(&data, tc, ctx)?,
                    Some(data) => HdbValue::Binary(data),
                },
                other => return Err(TypeError::UnsupportedTypeCode(other)),
            };
            row.push(value);
        }
        if row_end > src.position() {
            src.skip(row_end - src.position())?;
        }
        out.push(row);
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::encode::{encode_input_row, encode_result};
    use crate::lob::LobSource;
    use bytes::{BufMut, BytesMut};
    use chrono::NaiveDate;
    use hdb_protocol::ParameterField;

    fn roundtrip(value: HdbValue, tc: TypeCode, ctx: &ConvContext) -> HdbValue {
        let mut buf = BytesMut::new();
        encode_result(&value, tc, 0, ctx, &mut buf).unwrap();
        let mut src = ByteReader::new(buf.freeze());
        let out = decode_result(&mut src, tc, 0, 0, ctx).unwrap();
        assert!(src.is_empty(), "trailing bytes for {tc}");
        out
    }

    #[test]
    fn test_result_nulls() {
        let ctx = ConvContext::default();
        for tc in [
            TypeCode::Tinyint,
            TypeCode::Integer,
            TypeCode::Real,
            TypeCode::Double,
            TypeCode::Boolean,
            TypeCode::Decimal,
            TypeCode::Fixed12,
            TypeCode::Nvarchar,
            TypeCode::Varbinary,
            TypeCode::Daydate,
            TypeCode::Longdate,
            TypeCode::Secondtime,
            TypeCode::Date,
            TypeCode::Blob,
        ] {
            assert_eq!(roundtrip(HdbValue::Null, tc, &ctx), HdbValue::Null, "{tc}");
        }
    }

    #[test]
    fn test_result_values() {
        let ctx = ConvContext::default();
        assert_eq!(roundtrip(HdbValue::Int(-7), TypeCode::Integer, &ctx), HdbValue::Int(-7));
        assert_eq!(roundtrip(HdbValue::Bool(true), TypeCode::Boolean, &ctx), HdbValue::Bool(true));
        assert_eq!(
            roundtrip(HdbValue::from("\u{1F600}x"), TypeCode::Nvarchar, &ctx),
            HdbValue::from("\u{1F600}x")
        );
        let d = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        assert_eq!(roundtrip(HdbValue::Date(d), TypeCode::Daydate, &ctx), HdbValue::Date(d));
    }

    #[test]
    fn test_empty_daydate() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(0);
        let bytes = buf.freeze();
        let strict = ConvContext {
            empty_date_as_null: true,
            ..ConvContext::default()
        };
        let v = decode_result(&mut ByteReader::new(bytes.clone()), TypeCode::Daydate, 0, 0, &strict).unwrap();
        assert_eq!(v, HdbValue::Null);
        let lenient = ConvContext::default();
        let v = decode_result(&mut ByteReader::new(bytes), TypeCode::Daydate, 0, 0, &lenient).unwrap();
        assert!(matches!(v, HdbValue::Date(_)));
    }

    #[test]
    fn test_alphanum_numeric_padding() {
        let ctx = ConvContext::default();
        let mut buf = BytesMut::new();
        encode_result(&HdbValue::from("42"), TypeCode::Alphanum, 0, &ctx, &mut buf).unwrap();
        let v = decode_result(&mut ByteReader::new(buf.freeze()), TypeCode::Alphanum, 0, 5, &ctx).unwrap();
        assert_eq!(v, HdbValue::from("00042"));

        let dfv1 = ConvContext::with_dfv(1);
        let mut buf = BytesMut::new();
        encode_result(&HdbValue::from("42"), TypeCode::Alphanum, 0, &dfv1, &mut buf).unwrap();
        let v = decode_result(&mut ByteReader::new(buf.freeze()), TypeCode::Alphanum, 0, 5, &dfv1).unwrap();
        assert_eq!(v, HdbValue::from("42"));
    }

    #[test]
    fn test_lob_column() {
        let ctx = ConvContext::default();
        let lob = LobLocator {
            type_code: TypeCode::Blob,
            options: LobOptions::DATA_INCLUDED,
            char_len: 0,
            byte_len: 100,
            locator: 0xBEEF,
            data: Bytes::from_static(b"first"),
        };
        match roundtrip(HdbValue::Lob(lob.clone()), TypeCode::Blob, &ctx) {
            HdbValue::Lob(out) => {
                assert_eq!(out, lob);
                assert!(!out.is_complete());
                assert_eq!(out.total_len(), 100);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_input_rows_with_lob() {
        let ctx = ConvContext::default();
        let fields = vec![
            ParameterField::input(TypeCode::Integer, 0, 0),
            ParameterField::input(TypeCode::Blob, 0, 0),
            ParameterField::input(TypeCode::Nvarchar, 0, 0),
        ];
        let mut buf = BytesMut::new();
        for i in 0..2 {
            let values = vec![
                HdbValue::Int(i),
                HdbValue::LobIn(LobSource::from_bytes(vec![i as u8; 3])),
                HdbValue::Null,
            ];
            encode_input_row(&fields, &values, &ctx, &mut buf, 0).unwrap();
        }
        let rows = decode_input_rows(&buf.freeze(), 2, 3, &ctx).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], HdbValue::Int(1));
        match &rows[1][1] {
            HdbValue::Lob(l) => assert_eq!(&l.data[..], &[1, 1, 1]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rows[1][2], HdbValue::Null);
    }
}
