//! Part registry.
//!
//! Each part kind has a body type implementing [`PartBody`]; the [`Part`]
//! enum is the registry that dispatches reading and writing by kind. Row
//! oriented parts (`resultset`, `input-parameters`, `output-parameters`) are
//! kept as raw [`RowData`] because decoding them needs the field descriptors
//! of the statement, which the session layer owns.

mod auth;
mod errors;
mod lob;
mod metadata;

use bytes::{BufMut, Bytes, BytesMut};

pub use auth::AuthFields;
pub use errors::{ErrorLevel, ServerError, ServerErrors};
pub use lob::{
    LobOptions, LocatorId, ReadLobReply, ReadLobRequest, WriteLobChunk, WriteLobReply,
    WriteLobRequest, APPEND_OFFSET,
};
pub use metadata::{
    ColumnOptions, ParameterField, ParameterMetadata, ParameterMode, ParameterOptions,
    ResultField, ResultMetadata,
};

use crate::codec::{put_var_bytes, var_field_size, ByteReader};
use crate::error::ProtocolError;
use crate::header::PartHeader;
use crate::kinds::{PartAttributes, PartKind};
use crate::options::Options;

/// Reader and writer for one part kind.
pub trait PartBody: Sized {
    /// Kind tag written to the part header.
    const KIND: PartKind;

    /// Argument count written to the part header.
    fn arg_count(&self) -> i32;

    /// Serialise the body and return the number of bytes written.
    fn encode(&self, dst: &mut BytesMut) -> Result<usize, ProtocolError>;

    /// Parse the body described by `header`.
    fn decode(header: &PartHeader, src: &mut ByteReader) -> Result<Self, ProtocolError>;
}

/// Raw row-oriented payload with its row count and attributes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowData {
    /// Number of rows (the part's argument count).
    pub rows: usize,
    /// Attributes (last-packet, resultset-closed, ...).
    pub attributes: PartAttributes,
    /// Encoded rows.
    pub data: Bytes,
}

impl RowData {
    /// Wrap encoded rows.
    #[must_use]
    pub fn new(rows: usize, data: Bytes) -> Self {
        Self {
            rows,
            attributes: PartAttributes::empty(),
            data,
        }
    }

    /// Builder-style attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: PartAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    fn decode(header: &PartHeader, src: &mut ByteReader) -> Self {
        Self {
            rows: header.arg_count.max(0) as usize,
            attributes: header.attributes,
            data: src.rest(),
        }
    }
}

/// One host entry of the topology.
pub type TopologyHost = Options;

/// Session variables sent as `client-info`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientInfo(pub Vec<(String, String)>);

impl ClientInfo {
    fn encode(&self, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        let mut written = 0;
        for (key, value) in &self.0 {
            for s in [key, value] {
                put_var_bytes(dst, s.as_bytes())?;
                written += var_field_size(s.len()).ok_or(ProtocolError::LengthExceeded(s.len()))?;
            }
        }
        Ok(written)
    }

    fn decode(header: &PartHeader, src: &mut ByteReader) -> Result<Self, ProtocolError> {
        let mut pairs = Vec::with_capacity(header.arg_count.max(0) as usize);
        for _ in 0..header.arg_count.max(0) {
            let key = src.var_bytes()?.unwrap_or_default();
            let value = src.var_bytes()?.unwrap_or_default();
            pairs.push((
                String::from_utf8_lossy(&key).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            ));
        }
        Ok(Self(pairs))
    }
}

/// A decoded part of any registered kind.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Part {
    /// Authentication fields.
    Authentication(AuthFields),
    /// Client id (`pid@host`).
    ClientId(Bytes),
    /// Client context options.
    ClientContext(Options),
    /// Connect options.
    ConnectOptions(Options),
    /// Topology, one option list per host.
    TopologyInformation(Vec<TopologyHost>),
    /// SQL text (CESU-8).
    Command(Bytes),
    /// Prepared statement id.
    StatementId(u64),
    /// Cursor id.
    ResultsetId(u64),
    /// Result column descriptors.
    ResultMetadata(ResultMetadata),
    /// Parameter descriptors.
    ParameterMetadata(ParameterMetadata),
    /// Result rows.
    Resultset(RowData),
    /// Output parameter row.
    OutputParameters(RowData),
    /// Input parameter rows.
    InputParameters(RowData),
    /// Rows per fetch.
    FetchSize(i32),
    /// Read-lob request.
    ReadLobRequest(ReadLobRequest),
    /// Read-lob reply.
    ReadLobReply(ReadLobReply),
    /// Write-lob request.
    WriteLobRequest(WriteLobRequest),
    /// Write-lob reply.
    WriteLobReply(WriteLobReply),
    /// Rows affected per statement.
    RowsAffected(Vec<i32>),
    /// Server errors.
    Errors(ServerErrors),
    /// Statement context.
    StatementContext(Options),
    /// Database connect info.
    DbConnectInfo(Options),
    /// Transaction flags.
    TransactionFlags(Options),
    /// Session variables.
    ClientInfo(ClientInfo),
    /// A kind this client does not interpret.
    Unknown {
        /// Raw kind.
        kind: i8,
        /// Raw body.
        body: Bytes,
    },
}

impl Part {
    /// Raw kind tag.
    #[must_use]
    pub fn kind(&self) -> i8 {
        let kind = match self {
            Self::Authentication(_) => PartKind::Authentication,
            Self::ClientId(_) => PartKind::ClientId,
            Self::ClientContext(_) => PartKind::ClientContext,
            Self::ConnectOptions(_) => PartKind::ConnectOptions,
            Self::TopologyInformation(_) => PartKind::TopologyInformation,
            Self::Command(_) => PartKind::Command,
            Self::StatementId(_) => PartKind::StatementId,
            Self::ResultsetId(_) => PartKind::ResultsetId,
            Self::ResultMetadata(_) => PartKind::ResultMetadata,
            Self::ParameterMetadata(_) => PartKind::ParameterMetadata,
            Self::Resultset(_) => PartKind::Resultset,
            Self::OutputParameters(_) => PartKind::OutputParameters,
            Self::InputParameters(_) => PartKind::Parameters,
            Self::FetchSize(_) => PartKind::FetchSize,
            Self::ReadLobRequest(_) => PartKind::ReadLobRequest,
            Self::ReadLobReply(_) => PartKind::ReadLobReply,
            Self::WriteLobRequest(_) => PartKind::WriteLobRequest,
            Self::WriteLobReply(_) => PartKind::WriteLobReply,
            Self::RowsAffected(_) => PartKind::RowsAffected,
            Self::Errors(_) => PartKind::Error,
            Self::StatementContext(_) => PartKind::StatementContext,
            Self::DbConnectInfo(_) => PartKind::DbConnectInfo,
            Self::TransactionFlags(_) => PartKind::TransactionFlags,
            Self::ClientInfo(_) => PartKind::ClientInfo,
            Self::Unknown { kind, .. } => return *kind,
        };
        kind.raw()
    }

    /// Argument count for the part header.
    #[must_use]
    pub fn arg_count(&self) -> i32 {
        match self {
            Self::Authentication(p) => p.arg_count(),
            Self::ClientContext(o)
            | Self::ConnectOptions(o)
            | Self::StatementContext(o)
            | Self::DbConnectInfo(o)
            | Self::TransactionFlags(o) => o.len() as i32,
            Self::TopologyInformation(hosts) => hosts.len() as i32,
            Self::ResultMetadata(p) => p.arg_count(),
            Self::ParameterMetadata(p) => p.arg_count(),
            Self::Resultset(r) | Self::OutputParameters(r) | Self::InputParameters(r) => r.rows as i32,
            Self::ReadLobRequest(p) => p.arg_count(),
            Self::ReadLobReply(p) => p.arg_count(),
            Self::WriteLobRequest(p) => p.arg_count(),
            Self::WriteLobReply(p) => p.arg_count(),
            Self::RowsAffected(v) => v.len() as i32,
            Self::Errors(p) => p.arg_count(),
            Self::ClientInfo(c) => c.0.len() as i32,
            Self::ClientId(_)
            | Self::Command(_)
            | Self::StatementId(_)
            | Self::ResultsetId(_)
            | Self::FetchSize(_)
            | Self::Unknown { .. } => 1,
        }
    }

    /// Attributes for the part header.
    #[must_use]
    pub fn attributes(&self) -> PartAttributes {
        match self {
            Self::Resultset(r) | Self::OutputParameters(r) | Self::InputParameters(r) => r.attributes,
            _ => PartAttributes::empty(),
        }
    }

    /// Serialise the body; returns the number of bytes written.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        match self {
            Self::Authentication(p) => p.encode(dst),
            Self::ClientContext(o)
            | Self::ConnectOptions(o)
            | Self::StatementContext(o)
            | Self::DbConnectInfo(o)
            | Self::TransactionFlags(o) => Ok(o.encode(dst)),
            Self::TopologyInformation(hosts) => {
                let mut written = 0;
                for host in hosts {
                    dst.put_i16_le(host.len() as i16);
                    written += 2 + host.encode(dst);
                }
                Ok(written)
            }
            Self::ClientId(b) | Self::Command(b) | Self::Unknown { body: b, .. } => {
                dst.put_slice(b);
                Ok(b.len())
            }
            Self::StatementId(id) | Self::ResultsetId(id) => {
                dst.put_u64_le(*id);
                Ok(8)
            }
            Self::ResultMetadata(p) => p.encode(dst),
            Self::ParameterMetadata(p) => p.encode(dst),
            Self::Resultset(r) | Self::OutputParameters(r) | Self::InputParameters(r) => {
                dst.put_slice(&r.data);
                Ok(r.data.len())
            }
            Self::FetchSize(n) => {
                dst.put_i32_le(*n);
                Ok(4)
            }
            Self::ReadLobRequest(p) => p.encode(dst),
            Self::ReadLobReply(p) => p.encode(dst),
            Self::WriteLobRequest(p) => p.encode(dst),
            Self::WriteLobReply(p) => p.encode(dst),
            Self::RowsAffected(values) => {
                for v in values {
                    dst.put_i32_le(*v);
                }
                Ok(values.len() * 4)
            }
            Self::Errors(p) => p.encode(dst),
            Self::ClientInfo(c) => c.encode(dst),
        }
    }

    /// Decode the body of a part described by `header`.
    ///
    /// Unregistered kinds decode to [`Part::Unknown`].
    pub fn decode(header: &PartHeader, body: Bytes) -> Result<Self, ProtocolError> {
        let src = &mut ByteReader::new(body);
        let count = header.arg_count.max(0) as usize;
        let Ok(kind) = PartKind::from_raw(header.kind) else {
            return Ok(Self::Unknown {
                kind: header.kind,
                body: src.rest(),
            });
        };
        Ok(match kind {
            PartKind::Authentication => Self::Authentication(AuthFields::decode(header, src)?),
            PartKind::ClientId => Self::ClientId(src.rest()),
            PartKind::ClientContext => Self::ClientContext(Options::decode(src, count)?),
            PartKind::ConnectOptions => Self::ConnectOptions(Options::decode(src, count)?),
            PartKind::TopologyInformation => {
                let mut hosts = Vec::with_capacity(count);
                for _ in 0..count {
                    let n = src.i16()?.max(0) as usize;
                    hosts.push(Options::decode(src, n)?);
                }
                Self::TopologyInformation(hosts)
            }
            PartKind::Command => Self::Command(src.rest()),
            PartKind::StatementId => Self::StatementId(src.u64()?),
            PartKind::ResultsetId => Self::ResultsetId(src.u64()?),
            PartKind::ResultMetadata => Self::ResultMetadata(ResultMetadata::decode(header, src)?),
            PartKind::ParameterMetadata => {
                Self::ParameterMetadata(ParameterMetadata::decode(header, src)?)
            }
            PartKind::Resultset => Self::Resultset(RowData::decode(header, src)),
            PartKind::OutputParameters => Self::OutputParameters(RowData::decode(header, src)),
            PartKind::Parameters => Self::InputParameters(RowData::decode(header, src)),
            PartKind::FetchSize => Self::FetchSize(src.i32()?),
            PartKind::ReadLobRequest => Self::ReadLobRequest(ReadLobRequest::decode(header, src)?),
            PartKind::ReadLobReply => Self::ReadLobReply(ReadLobReply::decode(header, src)?),
            PartKind::WriteLobRequest => {
                Self::WriteLobRequest(WriteLobRequest::decode(header, src)?)
            }
            PartKind::WriteLobReply => Self::WriteLobReply(WriteLobReply::decode(header, src)?),
            PartKind::RowsAffected => {
                Self::RowsAffected((0..count).map(|_| src.i32()).collect::<Result<_, _>>()?)
            }
            PartKind::Error => Self::Errors(ServerErrors::decode(header, src)?),
            PartKind::StatementContext => Self::StatementContext(Options::decode(src, count)?),
            PartKind::DbConnectInfo => Self::DbConnectInfo(Options::decode(src, count)?),
            PartKind::TransactionFlags => Self::TransactionFlags(Options::decode(src, count)?),
            PartKind::ClientInfo => Self::ClientInfo(ClientInfo::decode(header, src)?),
            _ => Self::Unknown {
                kind: header.kind,
                body: src.rest(),
            },
        })
    }
}

macro_rules! part_from {
    ($($ty:ty => $variant:ident,)*) => {
        $(
            impl From<$ty> for Part {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

part_from! {
    AuthFields => Authentication,
    ResultMetadata => ResultMetadata,
    ParameterMetadata => ParameterMetadata,
    ReadLobRequest => ReadLobRequest,
    ReadLobReply => ReadLobReply,
    WriteLobRequest => WriteLobRequest,
    WriteLobReply => WriteLobReply,
    ServerErrors => Errors,
    ClientInfo => ClientInfo,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::options::{OptionValue, TopologyOption};

    fn roundtrip(part: &Part) -> Part {
        let mut buf = BytesMut::new();
        let len = part.encode(&mut buf).unwrap();
        assert_eq!(len, buf.len());
        let mut header = PartHeader::new(part.kind(), part.arg_count(), len as i32);
        header.attributes = part.attributes();
        Part::decode(&header, buf.freeze()).unwrap()
    }

    #[test]
    fn test_simple_parts() {
        for part in [
            Part::StatementId(0xDEAD_BEEF),
            Part::ResultsetId(42),
            Part::FetchSize(128),
            Part::RowsAffected(vec![1, -2, 3]),
            Part::Command(Bytes::from_static(b"select 1 from dummy")),
        ] {
            assert_eq!(roundtrip(&part), part);
        }
    }

    #[test]
    fn test_topology() {
        let host = Options::new()
            .with(TopologyOption::HostName, OptionValue::String("hana1".into()))
            .with(TopologyOption::HostPortNumber, OptionValue::Int(30015));
        let part = Part::TopologyInformation(vec![host.clone(), host]);
        assert_eq!(roundtrip(&part), part);
    }

    #[test]
    fn test_resultset_keeps_attributes() {
        let part = Part::Resultset(
            RowData::new(2, Bytes::from_static(&[1, 2, 3])).with_attributes(PartAttributes::LAST_PACKET),
        );
        let Part::Resultset(rows) = roundtrip(&part) else {
            panic!("expected resultset");
        };
        assert!(rows.attributes.is_last_packet());
        assert_eq!(rows.rows, 2);
    }

    #[test]
    fn test_unknown_kind_is_kept() {
        let header = PartHeader::new(99, 1, 2);
        let part = Part::decode(&header, Bytes::from_static(&[9, 9])).unwrap();
        assert!(matches!(part, Part::Unknown { kind: 99, .. }));
    }

    #[test]
    fn test_client_info() {
        let part = Part::ClientInfo(ClientInfo(vec![("APPLICATION".into(), "demo".into())]));
        assert_eq!(roundtrip(&part), part);
    }
}
