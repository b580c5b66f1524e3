//! Wire encoding of values.
//!
//! Converters form a closed set selected by the target type code: each one
//! accepts an explicit list of [`HdbValue`] kinds and rejects everything else
//! with [`TypeError::UnsupportedConversion`].

use bytes::{BufMut, BytesMut};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use hdb_protocol::codec::{put_var_bytes, LEN_IND_NULL};
use hdb_protocol::{LobOptions, ParameterField, TypeCode};

use crate::datetime;
use crate::decimal::HdbDecimal;
use crate::error::TypeError;
use crate::lob::{LobInDescr, LobSource};
use crate::value::{ConvContext, HdbValue};

/// Size of a LOB parameter header after the type code: options, length, position.
const LOB_PARAM_HEADER_SIZE: usize = 9;

fn unsupported(value: &HdbValue, to: TypeCode) -> TypeError {
    TypeError::UnsupportedConversion {
        from: value.kind_name(),
        to,
    }
}

fn out_of_range(tc: TypeCode) -> TypeError {
    TypeError::OutOfRange {
        target_type: tc.type_name(),
    }
}

fn int_value(value: &HdbValue, tc: TypeCode, min: i64, max: i64) -> Result<i64, TypeError> {
    let v = match value {
        HdbValue::Bool(b) => i64::from(*b),
        HdbValue::Decimal(d) => d
            .to_i128()
            .and_then(|v| i64::try_from(v).ok())
            .ok_or_else(|| out_of_range(tc))?,
        other => other.as_i64().ok_or_else(|| unsupported(value, tc))?,
    };
    if (min..=max).contains(&v) {
        Ok(v)
    } else {
        Err(out_of_range(tc))
    }
}

fn float_value(value: &HdbValue, tc: TypeCode) -> Result<f64, TypeError> {
    match value {
        HdbValue::Real(_) | HdbValue::Double(_) | HdbValue::Decimal(_) => {
            value.as_f64().ok_or_else(|| unsupported(value, tc))
        }
        other => other.as_i64().map(|v| v as f64).ok_or_else(|| unsupported(value, tc)),
    }
}

fn decimal_value(value: &HdbValue, tc: TypeCode) -> Result<HdbDecimal, TypeError> {
    match value {
        HdbValue::Decimal(d) => Ok(*d),
        HdbValue::Real(v) => HdbDecimal::try_from(f64::from(*v)),
        HdbValue::Double(v) => HdbDecimal::try_from(*v),
        other => other
            .as_i64()
            .map(HdbDecimal::from)
            .ok_or_else(|| unsupported(value, tc)),
    }
}

fn char_bytes(value: &HdbValue, tc: TypeCode, ctx: &ConvContext) -> Result<Vec<u8>, TypeError> {
    match value {
        HdbValue::String(s) if tc.is_cesu8() => Ok(ctx.cesu8.encode(s)),
        HdbValue::String(s) => Ok(s.as_bytes().to_vec()),
        HdbValue::Binary(b) => Ok(b.to_vec()),
        _ => Err(unsupported(value, tc)),
    }
}

fn binary_bytes(value: &HdbValue, tc: TypeCode) -> Result<&[u8], TypeError> {
    match value {
        HdbValue::Binary(_) | HdbValue::String(_) => value.as_bytes().ok_or_else(|| unsupported(value, tc)),
        _ => Err(unsupported(value, tc)),
    }
}

fn date_value(value: &HdbValue, tc: TypeCode) -> Result<NaiveDate, TypeError> {
    match value {
        HdbValue::Date(d) => Ok(*d),
        HdbValue::Timestamp(ts) => Ok(ts.date()),
        _ => Err(unsupported(value, tc)),
    }
}

fn time_value(value: &HdbValue, tc: TypeCode) -> Result<NaiveTime, TypeError> {
    match value {
        HdbValue::Time(t) => Ok(*t),
        HdbValue::Timestamp(ts) => Ok(ts.time()),
        _ => Err(unsupported(value, tc)),
    }
}

fn timestamp_value(value: &HdbValue, tc: TypeCode) -> Result<NaiveDateTime, TypeError> {
    match value {
        HdbValue::Timestamp(ts) => Ok(*ts),
        HdbValue::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
        _ => Err(unsupported(value, tc)),
    }
}

fn fixed_size(tc: TypeCode) -> Option<usize> {
    match tc {
        TypeCode::Fixed8 => Some(8),
        TypeCode::Fixed12 => Some(12),
        TypeCode::Fixed16 => Some(16),
        _ => None,
    }
}

/// Encode one non-LOB input parameter: the type code prefix followed by the
/// value. NULL is the type code with the NULL flag and no value.
pub fn encode_param(
    value: &HdbValue,
    field: &ParameterField,
    ctx: &ConvContext,
    dst: &mut BytesMut,
) -> Result<(), TypeError> {
    let tc = field.type_code;
    if value.is_null() {
        dst.put_u8(tc.null_raw());
        return Ok(());
    }
    if tc.is_lob() {
        return Err(TypeError::UnsupportedConversion {
            from: value.kind_name(),
            to: tc,
        });
    }

    // encode into a scratch buffer so a failed conversion leaves dst untouched
    let mut buf = BytesMut::new();
    buf.put_u8(tc.raw());
    match tc {
        TypeCode::Tinyint => buf.put_u8(int_value(value, tc, 0, 255)? as u8),
        TypeCode::Smallint => {
            buf.put_i16_le(int_value(value, tc, i16::MIN.into(), i16::MAX.into())? as i16);
        }
        TypeCode::Integer => {
            buf.put_i32_le(int_value(value, tc, i32::MIN.into(), i32::MAX.into())? as i32);
        }
        TypeCode::Bigint => buf.put_i64_le(int_value(value, tc, i64::MIN, i64::MAX)?),
        TypeCode::Boolean => match value {
            HdbValue::Bool(b) => buf.put_u8(u8::from(*b)),
            other => buf.put_u8(u8::from(int_value(other, tc, i64::MIN, i64::MAX)? != 0)),
        },
        TypeCode::Real => {
            let v = float_value(value, tc)?;
            if v.is_finite() && v.abs() > f64::from(f32::MAX) {
                return Err(out_of_range(tc));
            }
            buf.put_f32_le(v as f32);
        }
        TypeCode::Double => buf.put_f64_le(float_value(value, tc)?),
        TypeCode::Decimal | TypeCode::Smalldecimal => {
            buf.put_slice(&decimal_value(value, tc)?.to_decimal128()?);
        }
        TypeCode::Fixed8 | TypeCode::Fixed12 | TypeCode::Fixed16 => {
            let size = fixed_size(tc).unwrap_or(16);
            buf.put_slice(&decimal_value(value, tc)?.to_fixed(size, i32::from(field.fraction))?);
        }
        TypeCode::Char
        | TypeCode::Varchar
        | TypeCode::Nchar
        | TypeCode::Nvarchar
        | TypeCode::String
        | TypeCode::Nstring
        | TypeCode::Shorttext
        | TypeCode::Alphanum => put_var_bytes(&mut buf, &char_bytes(value, tc, ctx)?)?,
        TypeCode::Binary
        | TypeCode::Varbinary
        | TypeCode::Bstring
        | TypeCode::StGeometry
        | TypeCode::StPoint => put_var_bytes(&mut buf, binary_bytes(value, tc)?)?,
        TypeCode::Date => datetime::put_date_v1(&mut buf, date_value(value, tc)?)?,
        TypeCode::Time => datetime::put_time_v1(&mut buf, time_value(value, tc)?),
        TypeCode::Timestamp => {
            let ts = timestamp_value(value, tc)?;
            datetime::put_date_v1(&mut buf, ts.date())?;
            datetime::put_time_v1(&mut buf, ts.time());
        }
        TypeCode::Daydate => buf.put_i32_le(datetime::encode_daydate(date_value(value, tc)?)?),
        TypeCode::Seconddate => buf.put_i64_le(datetime::encode_seconddate(timestamp_value(value, tc)?)?),
        TypeCode::Longdate => buf.put_i64_le(datetime::encode_longdate(timestamp_value(value, tc)?)?),
        TypeCode::Secondtime => buf.put_i32_le(datetime::encode_secondtime(time_value(value, tc)?)),
        other => return Err(TypeError::UnsupportedTypeCode(other)),
    }
    dst.put_slice(&buf);
    Ok(())
}

/// LOB source for a LOB parameter value.
fn lob_source(value: &HdbValue, tc: TypeCode) -> Result<LobSource, TypeError> {
    match value {
        HdbValue::LobIn(src) => Ok(src.clone()),
        HdbValue::String(s) => Ok(LobSource::from_bytes(s.clone().into_bytes())),
        HdbValue::Binary(b) => Ok(LobSource::from_bytes(b.clone())),
        _ => Err(unsupported(value, tc)),
    }
}

/// Encode one row of an `input-parameters` part.
///
/// `part_start` is the offset in `dst` where the part body begins; LOB
/// headers carry the 1-based position of their first chunk relative to it.
/// Each LOB parameter gets its first chunk appended after the row's fields.
/// The returned descriptors (in field order) tell the caller which LOBs still
/// have data left.
pub fn encode_input_row(
    fields: &[ParameterField],
    values: &[HdbValue],
    ctx: &ConvContext,
    dst: &mut BytesMut,
    part_start: usize,
) -> Result<Vec<LobInDescr>, TypeError> {
    if fields.len() != values.len() {
        return Err(TypeError::TypeMismatch {
            expected: "one value per input parameter",
            actual: format!("{} values for {} parameters", values.len(), fields.len()),
        });
    }

    let mut pending = Vec::new();
    for (field, value) in fields.iter().zip(values) {
        let tc = field.type_code;
        if !tc.is_lob() || value.is_null() {
            encode_param(value, field, ctx, dst)?;
            continue;
        }
        let descr = LobInDescr::new(lob_source(value, tc)?, tc, ctx.lob_chunk_size);
        dst.put_u8(tc.raw());
        let header_at = dst.len();
        dst.put_bytes(0, LOB_PARAM_HEADER_SIZE);
        pending.push((header_at, descr));
    }

    let mut descrs = Vec::with_capacity(pending.len());
    for (header_at, mut descr) in pending {
        let chunk = descr.next_chunk(ctx.cesu8.as_ref())?;
        let position = dst.len() - part_start + 1;
        let (Ok(len), Ok(pos)) = (i32::try_from(chunk.len()), i32::try_from(position)) else {
            return Err(TypeError::OutOfRange {
                target_type: "LOB chunk",
            });
        };
        dst.put_slice(&chunk);

        let header = &mut dst[header_at..header_at + LOB_PARAM_HEADER_SIZE];
        header[0] = descr.options().bits() as u8;
        header[1..5].copy_from_slice(&len.to_le_bytes());
        header[5..9].copy_from_slice(&pos.to_le_bytes());
        descrs.push(descr);
    }
    Ok(descrs)
}

/// Encode a result or output-parameter value in the column layout of
/// `tc`. Used when acting as a server.
pub fn encode_result(
    value: &HdbValue,
    tc: TypeCode,
    fraction: i16,
    ctx: &ConvContext,
    dst: &mut BytesMut,
) -> Result<(), TypeError> {
    let null = value.is_null();
    match tc {
        TypeCode::Tinyint | TypeCode::Smallint | TypeCode::Integer | TypeCode::Bigint => {
            dst.put_u8(u8::from(!null));
            if !null {
                match tc {
                    TypeCode::Tinyint => dst.put_u8(int_value(value, tc, 0, 255)? as u8),
                    TypeCode::Smallint => {
                        dst.put_i16_le(int_value(value, tc, i16::MIN.into(), i16::MAX.into())? as i16);
                    }
                    TypeCode::Integer => {
                        dst.put_i32_le(int_value(value, tc, i32::MIN.into(), i32::MAX.into())? as i32);
                    }
                    _ => dst.put_i64_le(int_value(value, tc, i64::MIN, i64::MAX)?),
                }
            }
        }
        TypeCode::Real if null => dst.put_u32_le(u32::MAX),
        TypeCode::Real => dst.put_f32_le(float_value(value, tc)? as f32),
        TypeCode::Double if null => dst.put_u64_le(u64::MAX),
        TypeCode::Double => dst.put_f64_le(float_value(value, tc)?),
        TypeCode::Boolean => dst.put_u8(match value {
            HdbValue::Null => 1,
            HdbValue::Bool(true) => 2,
            HdbValue::Bool(false) => 0,
            other => return Err(unsupported(other, tc)),
        }),
        TypeCode::Decimal | TypeCode::Smalldecimal if null => {
            dst.put_bytes(0, 15);
            dst.put_u8(0x70);
        }
        TypeCode::Decimal | TypeCode::Smalldecimal => {
            dst.put_slice(&decimal_value(value, tc)?.to_decimal128()?);
        }
        TypeCode::Fixed8 | TypeCode::Fixed12 | TypeCode::Fixed16 => {
            let size = fixed_size(tc).unwrap_or(16);
            dst.put_u8(u8::from(!null));
            if !null {
                dst.put_slice(&decimal_value(value, tc)?.to_fixed(size, i32::from(fraction))?);
            }
        }
        _ if null && (tc.is_variable_length()) => dst.put_u8(LEN_IND_NULL),
        TypeCode::Alphanum if !ctx.is_dfv1() => {
            let data = char_bytes(value, tc, ctx)?;
            let numeric = !data.is_empty() && data.iter().all(u8::is_ascii_digit);
            let flag = if numeric { 0x80 | data.len() as u8 } else { data.len() as u8 };
            let mut with_flag = Vec::with_capacity(data.len() + 1);
            with_flag.push(flag);
            with_flag.extend_from_slice(&data);
            put_var_bytes(dst, &with_flag)?;
        }
        TypeCode::Char
        | TypeCode::Varchar
        | TypeCode::Nchar
        | TypeCode::Nvarchar
        | TypeCode::String
        | TypeCode::Nstring
        | TypeCode::Shorttext
        | TypeCode::Alphanum => put_var_bytes(dst, &char_bytes(value, tc, ctx)?)?,
        TypeCode::Binary
        | TypeCode::Varbinary
        | TypeCode::Bstring
        | TypeCode::StGeometry
        | TypeCode::StPoint => put_var_bytes(dst, binary_bytes(value, tc)?)?,
        TypeCode::Date if null => datetime::put_date_v1_null(dst),
        TypeCode::Date => datetime::put_date_v1(dst, date_value(value, tc)?)?,
        TypeCode::Time if null => datetime::put_time_v1_null(dst),
        TypeCode::Time => datetime::put_time_v1(dst, time_value(value, tc)?),
        TypeCode::Timestamp if null => {
            datetime::put_date_v1_null(dst);
            datetime::put_time_v1_null(dst);
        }
        TypeCode::Timestamp => {
            let ts = timestamp_value(value, tc)?;
            datetime::put_date_v1(dst, ts.date())?;
            datetime::put_time_v1(dst, ts.time());
        }
        TypeCode::Daydate if null => dst.put_i32_le(datetime::DAYDATE_NULL),
        TypeCode::Daydate => dst.put_i32_le(datetime::encode_daydate(date_value(value, tc)?)?),
        TypeCode::Seconddate if null => dst.put_i64_le(datetime::SECONDDATE_NULL),
        TypeCode::Seconddate => dst.put_i64_le(datetime::encode_seconddate(timestamp_value(value, tc)?)?),
        TypeCode::Longdate if null => dst.put_i64_le(datetime::LONGDATE_NULL),
        TypeCode::Longdate => dst.put_i64_le(datetime::encode_longdate(timestamp_value(value, tc)?)?),
        TypeCode::Secondtime if null => dst.put_i32_le(datetime::SECONDTIME_NULL),
        TypeCode::Secondtime => dst.put_i32_le(datetime::encode_secondtime(time_value(value, tc)?)),
        _ if tc.is_lob() => match value {
            HdbValue::Null => {
                dst.put_u8(tc.raw());
                dst.put_i8(LobOptions::NULL_INDICATOR.bits());
            }
            HdbValue::Lob(lob) => {
                dst.put_u8(lob.type_code.raw());
                dst.put_i8(lob.options.bits());
                dst.put_bytes(0, 2);
                dst.put_i64_le(lob.char_len);
                dst.put_i64_le(lob.byte_len);
                dst.put_u64_le(lob.locator);
                dst.put_i32_le(lob.data.len() as i32);
                dst.put_slice(&lob.data);
            }
            other => return Err(unsupported(other, tc)),
        },
        other => return Err(TypeError::UnsupportedTypeCode(other)),
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn field(tc: TypeCode) -> ParameterField {
        ParameterField::input(tc, 0, 0)
    }

    #[test]
    fn test_int_params() {
        let ctx = ConvContext::default();
        let mut buf = BytesMut::new();
        encode_param(&HdbValue::Int(42), &field(TypeCode::Integer), &ctx, &mut buf).unwrap();
        assert_eq!(&buf[..], &[3, 42, 0, 0, 0]);

        buf.clear();
        encode_param(&HdbValue::BigInt(7), &field(TypeCode::Smallint), &ctx, &mut buf).unwrap();
        assert_eq!(&buf[..], &[2, 7, 0]);

        let err = encode_param(&HdbValue::Int(300), &field(TypeCode::Tinyint), &ctx, &mut buf);
        assert!(matches!(err, Err(TypeError::OutOfRange { .. })));
    }

    #[test]
    fn test_rejected_kind_leaves_buffer_untouched() {
        let ctx = ConvContext::default();
        let mut buf = BytesMut::new();
        let err = encode_param(&HdbValue::from("x"), &field(TypeCode::Integer), &ctx, &mut buf);
        assert!(matches!(err, Err(TypeError::UnsupportedConversion { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_null_param() {
        let mut buf = BytesMut::new();
        encode_param(&HdbValue::Null, &field(TypeCode::Nvarchar), &ConvContext::default(), &mut buf).unwrap();
        assert_eq!(&buf[..], &[TypeCode::Nvarchar.raw() | 0x80]);
    }

    #[test]
    fn test_nvarchar_param_is_cesu8() {
        let mut buf = BytesMut::new();
        let v = HdbValue::from("\u{1F600}");
        encode_param(&v, &field(TypeCode::Nvarchar), &ConvContext::default(), &mut buf).unwrap();
        assert_eq!(buf[0], TypeCode::Nvarchar.raw());
        assert_eq!(buf[1], 6);
        assert_eq!(buf[2], 0xED);
    }

    #[test]
    fn test_fixed_param_uses_field_scale() {
        let mut f = field(TypeCode::Fixed8);
        f.fraction = 2;
        let mut buf = BytesMut::new();
        let v = HdbValue::Decimal("1.5".parse().unwrap());
        encode_param(&v, &f, &ConvContext::default(), &mut buf).unwrap();
        assert_eq!(buf.len(), 9);
        assert_eq!(i64::from_le_bytes(buf[1..9].try_into().unwrap()), 150);
    }

    #[test]
    fn test_lob_row_positions() {
        let ctx = ConvContext {
            lob_chunk_size: 4,
            ..ConvContext::default()
        };
        let fields = vec![field(TypeCode::Integer), field(TypeCode::Blob)];
        let values = vec![HdbValue::Int(1), HdbValue::LobIn(LobSource::from_bytes(vec![9u8; 10]))];

        let mut buf = BytesMut::new();
        buf.put_slice(b"prefix");
        let descrs = encode_input_row(&fields, &values, &ctx, &mut buf, 6).unwrap();
        assert_eq!(descrs.len(), 1);
        assert!(!descrs[0].is_last_data());

        let body = &buf[6..];
        // int param (5 bytes), then blob type code and 9-byte header
        assert_eq!(body[5], TypeCode::Blob.raw());
        assert_eq!(body[6], LobOptions::DATA_INCLUDED.bits() as u8);
        assert_eq!(i32::from_le_bytes(body[7..11].try_into().unwrap()), 4);
        let pos = i32::from_le_bytes(body[11..15].try_into().unwrap()) as usize;
        assert_eq!(pos, 16);
        assert_eq!(&body[pos - 1..pos + 3], &[9, 9, 9, 9]);
    }

    #[test]
    fn test_small_lob_is_complete() {
        let ctx = ConvContext::default();
        let fields = vec![field(TypeCode::Nclob)];
        let mut buf = BytesMut::new();
        let descrs = encode_input_row(&fields, &[HdbValue::from("short")], &ctx, &mut buf, 0).unwrap();
        assert!(descrs[0].is_last_data());
        assert_eq!(buf[1], (LobOptions::DATA_INCLUDED | LobOptions::LAST_DATA).bits() as u8);
    }

    #[test]
    fn test_row_arity_mismatch() {
        let mut buf = BytesMut::new();
        let err = encode_input_row(&[field(TypeCode::Integer)], &[], &ConvContext::default(), &mut buf, 0);
        assert!(err.is_err());
    }
}
