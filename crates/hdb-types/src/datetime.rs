//! Date and time encodings.
//!
//! Data format version 1 uses calendar-field encodings (`DATE`, `TIME`,
//! `TIMESTAMP`); later versions count units since 0001-01-01 plus one, so
//! that zero stays free for the "empty" date. Each encoding has its own NULL
//! sentinel.

// expect() is only used on constant, known-valid dates
#![allow(clippy::expect_used)]

use bytes::BufMut;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use hdb_protocol::ByteReader;

use crate::error::TypeError;

/// `LONGDATE` NULL sentinel.
pub const LONGDATE_NULL: i64 = 3_155_380_704_000_000_001;
/// `SECONDDATE` NULL sentinel.
pub const SECONDDATE_NULL: i64 = 315_538_070_401;
/// `DAYDATE` NULL sentinel.
pub const DAYDATE_NULL: i32 = 3_652_062;
/// `SECONDTIME` NULL sentinel.
pub const SECONDTIME_NULL: i32 = 86_402;

const TICKS_PER_SECOND: i64 = 10_000_000;
const SECONDS_PER_DAY: i64 = 86_400;

#[allow(clippy::expect_used)]
fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1, 1, 1).expect("0001-01-01 is a valid date")
}

fn days_since_epoch(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce() - 1)
}

fn date_from_days(days: i64) -> Result<NaiveDate, TypeError> {
    i32::try_from(days + 1)
        .ok()
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("day offset {days}")))
}

fn time_from_seconds(secs: i64, nanos: u32) -> Result<NaiveTime, TypeError> {
    u32::try_from(secs)
        .ok()
        .and_then(|s| NaiveTime::from_num_seconds_from_midnight_opt(s, nanos))
        .ok_or_else(|| TypeError::InvalidDateTime(format!("second of day {secs}")))
}

fn check_year(year: i32) -> Result<(), TypeError> {
    if (1..=9999).contains(&year) {
        Ok(())
    } else {
        Err(TypeError::InvalidDateTime(format!("year {year} outside 1..=9999")))
    }
}

/// `DAYDATE` value for `date`.
pub fn encode_daydate(date: NaiveDate) -> Result<i32, TypeError> {
    check_year(date.year())?;
    Ok((days_since_epoch(date) + 1) as i32)
}

/// Decode a `DAYDATE`. With `empty_as_null`, the empty date `0` is NULL,
/// otherwise it maps to 0001-01-01.
pub fn decode_daydate(raw: i32, empty_as_null: bool) -> Result<Option<NaiveDate>, TypeError> {
    match raw {
        DAYDATE_NULL => Ok(None),
        0 if empty_as_null => Ok(None),
        0 => Ok(Some(epoch())),
        v => date_from_days(i64::from(v) - 1).map(Some),
    }
}

/// `SECONDDATE` value for `ts`.
pub fn encode_seconddate(ts: NaiveDateTime) -> Result<i64, TypeError> {
    check_year(ts.year())?;
    Ok(days_since_epoch(ts.date()) * SECONDS_PER_DAY
        + i64::from(ts.time().num_seconds_from_midnight())
        + 1)
}

/// Decode a `SECONDDATE`.
pub fn decode_seconddate(raw: i64) -> Result<Option<NaiveDateTime>, TypeError> {
    if raw == SECONDDATE_NULL {
        return Ok(None);
    }
    let secs = (raw - 1).max(0);
    let date = date_from_days(secs / SECONDS_PER_DAY)?;
    let time = time_from_seconds(secs % SECONDS_PER_DAY, 0)?;
    Ok(Some(date.and_time(time)))
}

/// `LONGDATE` value (100ns ticks plus one) for `ts`.
pub fn encode_longdate(ts: NaiveDateTime) -> Result<i64, TypeError> {
    check_year(ts.year())?;
    let secs = days_since_epoch(ts.date()) * SECONDS_PER_DAY
        + i64::from(ts.time().num_seconds_from_midnight());
    Ok(secs * TICKS_PER_SECOND + i64::from(ts.time().nanosecond() % 1_000_000_000) / 100 + 1)
}

/// Decode a `LONGDATE`.
pub fn decode_longdate(raw: i64) -> Result<Option<NaiveDateTime>, TypeError> {
    if raw == LONGDATE_NULL {
        return Ok(None);
    }
    let ticks = (raw - 1).max(0);
    let secs = ticks / TICKS_PER_SECOND;
    let nanos = ((ticks % TICKS_PER_SECOND) * 100) as u32;
    let date = date_from_days(secs / SECONDS_PER_DAY)?;
    let time = time_from_seconds(secs % SECONDS_PER_DAY, nanos)?;
    Ok(Some(date.and_time(time)))
}

/// `SECONDTIME` value for `time`.
#[must_use]
pub fn encode_secondtime(time: NaiveTime) -> i32 {
    time.num_seconds_from_midnight() as i32 + 1
}

/// Decode a `SECONDTIME`.
pub fn decode_secondtime(raw: i32) -> Result<Option<NaiveTime>, TypeError> {
    if raw == SECONDTIME_NULL {
        return Ok(None);
    }
    time_from_seconds(i64::from((raw - 1).max(0)), 0).map(Some)
}

/// Write a DFV 1 `DATE` (year with the not-null bit, zero-based month, day).
pub fn put_date_v1(dst: &mut impl BufMut, date: NaiveDate) -> Result<(), TypeError> {
    check_year(date.year())?;
    dst.put_u16_le(date.year() as u16 | 0x8000);
    dst.put_i8(date.month0() as i8);
    dst.put_i8(date.day() as i8);
    Ok(())
}

/// Write a NULL DFV 1 `DATE`.
pub fn put_date_v1_null(dst: &mut impl BufMut) {
    dst.put_bytes(0, 4);
}

/// Read a DFV 1 `DATE`.
pub fn get_date_v1(src: &mut ByteReader) -> Result<Option<NaiveDate>, TypeError> {
    let year = src.u16()?;
    let month = src.i8()?;
    let day = src.i8()?;
    if year & 0x8000 == 0 {
        return Ok(None);
    }
    let year = i32::from(year & 0x3FFF);
    NaiveDate::from_ymd_opt(year, (i32::from(month) + 1) as u32, day as u32)
        .map(Some)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{year}-{}-{day}", month + 1)))
}

/// Write a DFV 1 `TIME` (hour with the not-null bit, minute, milliseconds).
pub fn put_time_v1(dst: &mut impl BufMut, time: NaiveTime) {
    dst.put_u8(time.hour() as u8 | 0x80);
    dst.put_i8(time.minute() as i8);
    let millis = time.second() * 1000 + (time.nanosecond() % 1_000_000_000) / 1_000_000;
    dst.put_u16_le(millis as u16);
}

/// Write a NULL DFV 1 `TIME`.
pub fn put_time_v1_null(dst: &mut impl BufMut) {
    dst.put_bytes(0, 4);
}

/// Read a DFV 1 `TIME`.
pub fn get_time_v1(src: &mut ByteReader) -> Result<Option<NaiveTime>, TypeError> {
    let hour = src.u8()?;
    let minute = src.i8()?;
    let millis = src.u16()?;
    if hour & 0x80 == 0 {
        return Ok(None);
    }
    let hour = u32::from(hour & 0x7F);
    NaiveTime::from_hms_milli_opt(hour, minute as u32, u32::from(millis / 1000), u32::from(millis % 1000))
        .map(Some)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{hour}:{minute} +{millis}ms")))
}

/// Read a DFV 1 `TIMESTAMP` (date followed by time).
pub fn get_timestamp_v1(src: &mut ByteReader) -> Result<Option<NaiveDateTime>, TypeError> {
    let date = get_date_v1(src)?;
    let time = get_time_v1(src)?;
    Ok(date.map(|d| d.and_time(time.unwrap_or(NaiveTime::MIN))))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    #[test]
    fn test_daydate() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let raw = encode_daydate(d).unwrap();
        assert_eq!(decode_daydate(raw, false).unwrap(), Some(d));
        assert_eq!(encode_daydate(epoch()).unwrap(), 1);
        assert_eq!(decode_daydate(DAYDATE_NULL, false).unwrap(), None);
    }

    #[test]
    fn test_empty_date_as_null() {
        assert_eq!(decode_daydate(0, true).unwrap(), None);
        assert_eq!(decode_daydate(0, false).unwrap(), Some(epoch()));
    }

    #[test]
    fn test_longdate_precision() {
        let t = ts("1999-12-31 23:59:59.1234567");
        let raw = encode_longdate(t).unwrap();
        assert_eq!(decode_longdate(raw).unwrap(), Some(t));
        assert_eq!(decode_longdate(LONGDATE_NULL).unwrap(), None);
        assert!(encode_longdate(ts("9999-12-31 23:59:59.9999999")).unwrap() < LONGDATE_NULL);
    }

    #[test]
    fn test_seconddate_and_secondtime() {
        let t = ts("2020-06-01 12:34:56");
        assert_eq!(decode_seconddate(encode_seconddate(t).unwrap()).unwrap(), Some(t));
        let time = t.time();
        assert_eq!(decode_secondtime(encode_secondtime(time)).unwrap(), Some(time));
        assert_eq!(decode_secondtime(SECONDTIME_NULL).unwrap(), None);
    }

    #[test]
    fn test_v1_layouts() {
        let t = ts("2021-03-04 05:06:07.890");
        let mut buf = BytesMut::new();
        put_date_v1(&mut buf, t.date()).unwrap();
        put_time_v1(&mut buf, t.time());
        assert_eq!(&buf[..2], &(2021u16 | 0x8000).to_le_bytes());
        assert_eq!(buf[2], 2);
        assert_eq!(buf[4], 5 | 0x80);

        let mut src = ByteReader::new(buf.freeze());
        assert_eq!(get_timestamp_v1(&mut src).unwrap(), Some(t));

        let mut nulls = BytesMut::new();
        put_date_v1_null(&mut nulls);
        put_time_v1_null(&mut nulls);
        assert_eq!(get_timestamp_v1(&mut ByteReader::new(nulls.freeze())).unwrap(), None);
    }

    #[test]
    fn test_year_out_of_range() {
        let d = NaiveDate::from_ymd_opt(10_000, 1, 1).unwrap();
        assert!(encode_daydate(d).is_err());
    }
}
