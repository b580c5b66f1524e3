//! # hdb-protocol
//!
//! Pure implementation of the HDB command network protocol used by SAP HANA.
//!
//! This crate provides the message, segment and part structures of the wire
//! format, the option-set and metadata part bodies, the CESU-8 transcoder and
//! the type code table.
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic and
//! makes no assumptions about the async runtime. Value conversion lives in
//! `hdb-types`, framing over a socket in `hdb-codec`.
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use hdb_protocol::{Message, MessageKind, Part, RawMessage};
//!
//! let msg = Message::request(
//!     0,
//!     1,
//!     MessageKind::ExecuteDirect,
//!     true,
//!     vec![Part::Command(Bytes::from_static(b"select 1 from dummy"))],
//! );
//! let bytes = msg.encode_to_bytes().unwrap();
//! let decoded = RawMessage::decode(bytes).unwrap();
//! assert_eq!(decoded.segments.len(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cesu8;
pub mod codec;
pub mod error;
pub mod header;
pub mod kinds;
pub mod message;
pub mod options;
pub mod parts;
pub mod prolog;
pub mod typecode;
pub mod version;

pub use cesu8::{Cesu8, Cesu8Transformer};
pub use codec::ByteReader;
pub use error::ProtocolError;
pub use header::{
    MessageHeader, PartHeader, SegmentBody, SegmentHeader, MAX_VARPART_SIZE, MESSAGE_HEADER_SIZE,
    PART_HEADER_SIZE, SEGMENT_HEADER_SIZE,
};
pub use kinds::{CommandOptions, FunctionCode, MessageKind, PartAttributes, PartKind, SegmentKind};
pub use message::{Message, RawMessage, RawPart, RawSegment, Segment};
pub use options::{
    ClientContextOption, ConnectOption, DbConnectInfoOption, OptionValue, Options,
    StatementContextOption, TopologyOption, TransactionFlag,
};
pub use parts::{
    AuthFields, ClientInfo, ColumnOptions, ErrorLevel, LobOptions, LocatorId, ParameterField,
    ParameterMetadata, ParameterMode, ParameterOptions, Part, PartBody, ReadLobReply,
    ReadLobRequest, ResultField, ResultMetadata, RowData, ServerError, ServerErrors, TopologyHost,
    WriteLobChunk, WriteLobReply, WriteLobRequest, APPEND_OFFSET,
};
pub use prolog::{
    decode_prolog_request, PrologReply, PrologRequest, PROLOG_REPLY_SIZE, PROLOG_REQUEST_SIZE,
};
pub use typecode::{DataType, TypeCode, NULL_TYPE_FLAG};
pub use version::HdbVersion;
