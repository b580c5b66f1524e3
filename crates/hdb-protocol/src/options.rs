//! Typed key/value option lists.
//!
//! Several parts (connect options, client context, db-connect-info,
//! statement context, transaction flags, topology rows) share one layout:
//! each entry is `key: i8, type: u8, value`, with the value encoded according
//! to its type code.

use bytes::{BufMut, Bytes};

use crate::codec::ByteReader;
use crate::error::ProtocolError;
use crate::typecode::TypeCode;

/// A single option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// Boolean.
    Bool(bool),
    /// 8-bit integer.
    Tinyint(u8),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Bigint(i64),
    /// Double.
    Double(f64),
    /// Text (2-byte length prefix).
    String(String),
    /// Binary (2-byte length prefix).
    Bytes(Bytes),
}

impl OptionValue {
    fn type_code(&self) -> TypeCode {
        match self {
            Self::Bool(_) => TypeCode::Boolean,
            Self::Tinyint(_) => TypeCode::Tinyint,
            Self::Int(_) => TypeCode::Integer,
            Self::Bigint(_) => TypeCode::Bigint,
            Self::Double(_) => TypeCode::Double,
            Self::String(_) => TypeCode::String,
            Self::Bytes(_) => TypeCode::Bstring,
        }
    }

    fn encoded_len(&self) -> usize {
        2 + match self {
            Self::Bool(_) | Self::Tinyint(_) => 1,
            Self::Int(_) => 4,
            Self::Bigint(_) | Self::Double(_) => 8,
            Self::String(s) => 2 + s.len(),
            Self::Bytes(b) => 2 + b.len(),
        }
    }

    /// Integer view (any integer width).
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Tinyint(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::Bigint(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean view.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Ordered option list keyed by raw option id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Options {
    entries: Vec<(i8, OptionValue)>,
}

impl Options {
    /// Empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing an existing entry.
    pub fn set(&mut self, key: impl Into<i8>, value: OptionValue) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: impl Into<i8>, value: OptionValue) -> Self {
        self.set(key, value);
        self
    }

    /// Value stored under `key`.
    #[must_use]
    pub fn get(&self, key: impl Into<i8>) -> Option<&OptionValue> {
        let key = key.into();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Number of entries (the part's argument count).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in wire order.
    pub fn iter(&self) -> impl Iterator<Item = &(i8, OptionValue)> {
        self.entries.iter()
    }

    /// Encoded size of the list.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.encoded_len()).sum()
    }

    /// Encode all entries, returning the number of bytes written.
    pub fn encode(&self, dst: &mut impl BufMut) -> usize {
        for (key, value) in &self.entries {
            dst.put_i8(*key);
            dst.put_u8(value.type_code().raw());
            match value {
                OptionValue::Bool(v) => dst.put_u8(u8::from(*v)),
                OptionValue::Tinyint(v) => dst.put_u8(*v),
                OptionValue::Int(v) => dst.put_i32_le(*v),
                OptionValue::Bigint(v) => dst.put_i64_le(*v),
                OptionValue::Double(v) => dst.put_f64_le(*v),
                OptionValue::String(s) => {
                    dst.put_i16_le(s.len() as i16);
                    dst.put_slice(s.as_bytes());
                }
                OptionValue::Bytes(b) => {
                    dst.put_i16_le(b.len() as i16);
                    dst.put_slice(b);
                }
            }
        }
        self.encoded_len()
    }

    /// Decode `count` entries.
    pub fn decode(src: &mut ByteReader, count: usize) -> Result<Self, ProtocolError> {
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let key = src.i8()?;
            let raw_type = src.u8()?;
            let value = match TypeCode::from_u8(raw_type)? {
                TypeCode::Boolean => OptionValue::Bool(src.bool()?),
                TypeCode::Tinyint => OptionValue::Tinyint(src.u8()?),
                TypeCode::Integer => OptionValue::Int(src.i32()?),
                TypeCode::Bigint => OptionValue::Bigint(src.i64()?),
                TypeCode::Double => OptionValue::Double(src.f64()?),
                TypeCode::String | TypeCode::Nstring => {
                    let len = src.i16()? as u16 as usize;
                    let raw = src.bytes(len)?;
                    OptionValue::String(String::from_utf8_lossy(&raw).into_owned())
                }
                TypeCode::Bstring => {
                    let len = src.i16()? as u16 as usize;
                    OptionValue::Bytes(src.bytes(len)?)
                }
                _ => {
                    return Err(ProtocolError::InvalidOptionType {
                        key,
                        type_code: raw_type,
                    });
                }
            };
            entries.push((key, value));
        }
        Ok(Self { entries })
    }
}

macro_rules! option_keys {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i8)]
        #[allow(missing_docs)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)*
        }

        impl From<$name> for i8 {
            fn from(key: $name) -> i8 {
                key as i8
            }
        }
    };
}

option_keys! {
    /// Keys of the `connect-options` part.
    ConnectOption {
        ConnectionId = 1,
        CompleteArrayExecution = 2,
        ClientLocale = 3,
        SupportsLargeBulkOperations = 4,
        LargeNumberOfParametersSupport = 10,
        SystemId = 11,
        DataFormatVersion = 12,
        SelectForUpdateSupported = 14,
        ClientDistributionMode = 15,
        EngineDataFormatVersion = 16,
        DistributionProtocolVersion = 17,
        SplitBatchCommands = 18,
        UseTransactionFlagsOnly = 19,
        IgnoreUnknownPartKinds = 21,
        TableOutputParameterMetadataSupport = 22,
        DataFormatVersion2 = 23,
        ItabParameter = 24,
        DescribeTableOutputParameter = 25,
        ColumnarResultSet = 26,
        ScrollableResultSet = 27,
        ClientInfoNullValueSupported = 28,
        AssociatedConnectionId = 29,
        NonTransactionalPrepare = 30,
        FdaEnabled = 31,
        OsUser = 32,
        RowSlotImageResultSet = 33,
        Endianness = 34,
        ImplicitLobStreaming = 37,
        FullVersionString = 44,
        DatabaseName = 45,
        BuildPlatform = 46,
    }
}

option_keys! {
    /// Keys of the `client-context` part.
    ClientContextOption {
        ClientVersion = 1,
        ClientType = 2,
        ClientApplicationProgram = 3,
    }
}

option_keys! {
    /// Keys of the `db-connect-info` part.
    DbConnectInfoOption {
        DatabaseName = 1,
        Host = 2,
        Port = 3,
        IsConnected = 4,
    }
}

option_keys! {
    /// Keys of the `statement-context` part.
    StatementContextOption {
        StatementSequenceInfo = 1,
        ServerExecutionTime = 2,
    }
}

option_keys! {
    /// Keys of the `transactionflags` part.
    TransactionFlag {
        RolledBack = 0,
        Committed = 1,
        NewIsolationLevel = 2,
        DdlCommitModeChanged = 3,
        WriteTransactionStarted = 4,
        NoWriteTransactionStarted = 5,
        SessionClosingTransactionError = 6,
    }
}

option_keys! {
    /// Keys of one `topology-information` row.
    TopologyOption {
        HostName = 1,
        HostPortNumber = 2,
        TenantName = 3,
        LoadFactor = 4,
        VolumeId = 5,
        IsMaster = 6,
        IsCurrentSession = 7,
        ServiceType = 8,
        IsStandby = 10,
        AllIpAddresses = 11,
        AllHostNames = 12,
        SiteType = 13,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_options_roundtrip() {
        let options = Options::new()
            .with(ConnectOption::DataFormatVersion, OptionValue::Int(8))
            .with(ConnectOption::ClientLocale, OptionValue::String("en_US".into()))
            .with(ConnectOption::CompleteArrayExecution, OptionValue::Bool(true))
            .with(ConnectOption::ConnectionId, OptionValue::Bigint(-5));

        let mut buf = BytesMut::new();
        let written = options.encode(&mut buf);
        assert_eq!(written, buf.len());

        let decoded = Options::decode(&mut ByteReader::new(buf.freeze()), options.len()).unwrap();
        assert_eq!(decoded, options);
        assert_eq!(
            decoded.get(ConnectOption::DataFormatVersion).and_then(OptionValue::as_i64),
            Some(8)
        );
    }

    #[test]
    fn test_set_replaces() {
        let mut options = Options::new();
        options.set(DbConnectInfoOption::Port, OptionValue::Int(1));
        options.set(DbConnectInfoOption::Port, OptionValue::Int(2));
        assert_eq!(options.len(), 1);
        assert_eq!(options.get(DbConnectInfoOption::Port), Some(&OptionValue::Int(2)));
    }

    #[test]
    fn test_invalid_option_type() {
        // key 1, type DECIMAL
        let mut reader = ByteReader::new(Bytes::from_static(&[1, 5, 0, 0]));
        assert!(matches!(
            Options::decode(&mut reader, 1),
            Err(ProtocolError::InvalidOptionType { key: 1, type_code: 5 })
        ));
    }
}
