//! Type conversion edge cases.
//!
//! Covers NULL handling, CESU-8 boundaries, wire round-trips through the
//! result and parameter layouts, and range checks.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::{Bytes, BytesMut};
use chrono::{NaiveDate, NaiveDateTime};
use hdb_protocol::{ByteReader, ParameterField, TypeCode};
use hdb_types::{
    ConvContext, FromHdb, HdbDecimal, HdbValue, LobSource, ToHdb, TypeError, decode_input_rows,
    decode_result, encode_input_row, encode_param, encode_result,
};

fn result_roundtrip(value: &HdbValue, tc: TypeCode, fraction: i16) -> HdbValue {
    let ctx = ConvContext::default();
    let mut buf = BytesMut::new();
    encode_result(value, tc, fraction, &ctx, &mut buf).unwrap();
    let mut src = ByteReader::new(buf.freeze());
    let out = decode_result(&mut src, tc, fraction, 0, &ctx).unwrap();
    assert!(src.is_empty(), "{tc:?} left trailing bytes");
    out
}

mod null_handling {
    use super::*;

    #[test]
    fn test_null_to_option() {
        assert_eq!(Option::<i32>::from_hdb(&HdbValue::Null).unwrap(), None);
        assert_eq!(Option::<String>::from_hdb(&HdbValue::Null).unwrap(), None);
        assert_eq!(Option::<NaiveDate>::from_hdb(&HdbValue::Null).unwrap(), None);
    }

    #[test]
    fn test_null_to_non_option_fails() {
        assert!(matches!(
            String::from_hdb(&HdbValue::Null),
            Err(TypeError::UnexpectedNull)
        ));
        assert!(matches!(
            f64::from_hdb(&HdbValue::Null),
            Err(TypeError::UnexpectedNull)
        ));
    }

    #[test]
    fn test_null_survives_every_result_layout() {
        for tc in [
            TypeCode::Tinyint,
            TypeCode::Smallint,
            TypeCode::Integer,
            TypeCode::Bigint,
            TypeCode::Real,
            TypeCode::Double,
            TypeCode::Boolean,
            TypeCode::Decimal,
            TypeCode::Fixed8,
            TypeCode::Fixed16,
            TypeCode::Nvarchar,
            TypeCode::Varbinary,
            TypeCode::Daydate,
            TypeCode::Seconddate,
            TypeCode::Longdate,
            TypeCode::Secondtime,
        ] {
            assert!(result_roundtrip(&HdbValue::Null, tc, 2).is_null(), "{tc:?}");
        }
    }

    #[test]
    fn test_null_parameter_is_flagged_type_code() {
        let ctx = ConvContext::default();
        let field = ParameterField::input(TypeCode::Integer, 10, 0);
        let mut buf = BytesMut::new();
        encode_param(&None::<i32>.to_hdb().unwrap(), &field, &ctx, &mut buf).unwrap();
        assert_eq!(&buf[..], &[TypeCode::Integer.null_raw()]);
    }
}

mod unicode {
    use super::*;

    #[test]
    fn test_supplementary_plane_roundtrip() {
        let value = HdbValue::from("emoji \u{1F600} and \u{10FFFF}");
        assert_eq!(result_roundtrip(&value, TypeCode::Nvarchar, 0), value);
    }

    #[test]
    fn test_supplementary_plane_is_six_bytes_on_wire() {
        let ctx = ConvContext::default();
        let field = ParameterField::input(TypeCode::Nvarchar, 10, 0);
        let mut buf = BytesMut::new();
        encode_param(&HdbValue::from("\u{1F600}"), &field, &ctx, &mut buf).unwrap();
        // type code, length indicator, surrogate pair
        assert_eq!(buf.len(), 1 + 1 + 6);
        assert_eq!(buf[1], 6);
    }

    #[test]
    fn test_long_string_uses_wide_length_indicator() {
        let value = HdbValue::String("x".repeat(1000));
        assert_eq!(result_roundtrip(&value, TypeCode::Nvarchar, 0), value);
    }
}

mod boundaries {
    use super::*;

    #[test]
    fn test_integer_extremes() {
        for (value, tc) in [
            (HdbValue::TinyInt(u8::MAX), TypeCode::Tinyint),
            (HdbValue::SmallInt(i16::MIN), TypeCode::Smallint),
            (HdbValue::Int(i32::MAX), TypeCode::Integer),
            (HdbValue::BigInt(i64::MIN), TypeCode::Bigint),
        ] {
            assert_eq!(result_roundtrip(&value, tc, 0), value);
        }
    }

    #[test]
    fn test_integer_parameter_out_of_range() {
        let ctx = ConvContext::default();
        let field = ParameterField::input(TypeCode::Smallint, 5, 0);
        let mut buf = BytesMut::new();
        let err = encode_param(&HdbValue::Int(40_000), &field, &ctx, &mut buf).unwrap_err();
        assert!(matches!(err, TypeError::OutOfRange { .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_date_into_integer_column_is_rejected() {
        let ctx = ConvContext::default();
        let field = ParameterField::input(TypeCode::Integer, 10, 0);
        let mut buf = BytesMut::new();
        let err = encode_param(&HdbValue::Date(NaiveDate::MIN), &field, &ctx, &mut buf);
        assert!(matches!(err, Err(TypeError::UnsupportedConversion { .. })));
    }

    #[test]
    fn test_decimal_roundtrip_keeps_value() {
        let d: HdbDecimal = "-12345.6789".parse().unwrap();
        let out = result_roundtrip(&HdbValue::Decimal(d), TypeCode::Decimal, 0);
        assert_eq!(HdbDecimal::from_hdb(&out).unwrap(), d);
    }

    #[test]
    fn test_fixed_decimal_uses_scale() {
        let d: HdbDecimal = "3.14".parse().unwrap();
        let out = result_roundtrip(&HdbValue::Decimal(d), TypeCode::Fixed8, 2);
        assert_eq!(out, HdbValue::Decimal(d));
    }

    #[test]
    fn test_timestamp_extremes() {
        let low = NaiveDate::from_ymd_opt(1, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let high: NaiveDateTime = NaiveDate::from_ymd_opt(9999, 12, 31)
            .unwrap()
            .and_hms_nano_opt(23, 59, 59, 999_999_900)
            .unwrap();
        for ts in [low, high] {
            let out = result_roundtrip(&HdbValue::Timestamp(ts), TypeCode::Longdate, 0);
            assert_eq!(out, HdbValue::Timestamp(ts));
        }
    }

    #[cfg(feature = "decimal")]
    #[test]
    fn test_rust_decimal_interop() {
        let d = rust_decimal::Decimal::new(-314, 2);
        let value = d.to_hdb().unwrap();
        let back = rust_decimal::Decimal::from_hdb(&value).unwrap();
        assert_eq!(back, d);
    }
}

mod input_rows {
    use super::*;

    #[test]
    fn test_mixed_row_with_lob_decodes() {
        let ctx = ConvContext::default();
        let fields = vec![
            ParameterField::input(TypeCode::Integer, 10, 0),
            ParameterField::input(TypeCode::Nclob, 0, 0),
            ParameterField::input(TypeCode::Nvarchar, 20, 0),
        ];
        let values = vec![
            HdbValue::Int(7),
            HdbValue::LobIn(LobSource::from_bytes(Bytes::from_static(b"lob body"))),
            HdbValue::Null,
        ];
        let mut buf = BytesMut::new();
        let descrs = encode_input_row(&fields, &values, &ctx, &mut buf, 0).unwrap();
        assert_eq!(descrs.len(), 1);
        assert!(descrs[0].is_last_data());

        let rows = decode_input_rows(&buf.freeze(), 1, 3, &ctx).unwrap();
        assert_eq!(rows[0][0], HdbValue::Int(7));
        assert_eq!(Bytes::from_hdb(&rows[0][1]).unwrap(), Bytes::from_static(b"lob body"));
        assert!(rows[0][2].is_null());
    }

    #[test]
    fn test_arity_mismatch_is_an_error() {
        let ctx = ConvContext::default();
        let fields = vec![ParameterField::input(TypeCode::Integer, 10, 0)];
        let mut buf = BytesMut::new();
        let err = encode_input_row(&fields, &[], &ctx, &mut buf, 0);
        assert!(matches!(err, Err(TypeError::TypeMismatch { .. })));
    }
}
