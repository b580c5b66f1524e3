//! # hdb-types
//!
//! HDB to Rust type mappings and conversions.
//!
//! This crate provides the value model shared by the client and the
//! converters that move values between Rust and the wire. Converters are
//! selected by the type code of the parameter or column and accept a closed
//! set of value kinds.
//!
//! ## Features
//!
//! - `decimal` (default): conversions between [`HdbDecimal`] and
//!   `rust_decimal::Decimal`
//!
//! ## Type Mappings
//!
//! | HDB Type | Rust Type |
//! |----------|-----------|
//! | `BOOLEAN` | `bool` |
//! | `TINYINT` | `u8` |
//! | `SMALLINT` | `i16` |
//! | `INTEGER` | `i32` |
//! | `BIGINT` | `i64` |
//! | `REAL` | `f32` |
//! | `DOUBLE` | `f64` |
//! | `DECIMAL`, `SMALLDECIMAL` | [`HdbDecimal`] |
//! | `VARCHAR`, `NVARCHAR`, `ALPHANUM`, `SHORTTEXT` | `String` |
//! | `VARBINARY`, `ST_GEOMETRY` | `bytes::Bytes` |
//! | `DATE`, `DAYDATE` | `chrono::NaiveDate` |
//! | `TIME`, `SECONDTIME` | `chrono::NaiveTime` |
//! | `TIMESTAMP`, `SECONDDATE`, `LONGDATE` | `chrono::NaiveDateTime` |
//! | `BLOB`, `CLOB`, `NCLOB` | [`LobSource`] in, [`LobLocator`] out |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod datetime;
pub mod decimal;
pub mod decode;
pub mod encode;
pub mod error;
pub mod from_hdb;
pub mod lob;
pub mod to_hdb;
pub mod value;

pub use decimal::HdbDecimal;
pub use decode::{decode_input_rows, decode_result, decode_row};
pub use encode::{encode_input_row, encode_param, encode_result};
pub use error::TypeError;
pub use from_hdb::FromHdb;
pub use lob::{LobInDescr, LobLocator, LobSource};
pub use to_hdb::ToHdb;
pub use value::{ConvContext, HdbValue};
