//! Database type codes.

use core::fmt;

use crate::error::ProtocolError;

/// Type code of a parameter, column or option value.
///
/// Values are fixed by the protocol. When used as a parameter type prefix,
/// the high bit (`0x80`) marks a NULL value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[non_exhaustive]
pub enum TypeCode {
    /// NULL.
    Null = 0,
    /// 8-bit unsigned integer.
    Tinyint = 1,
    /// 16-bit signed integer.
    Smallint = 2,
    /// 32-bit signed integer.
    Integer = 3,
    /// 64-bit signed integer.
    Bigint = 4,
    /// Floating decimal.
    Decimal = 5,
    /// IEEE single.
    Real = 6,
    /// IEEE double.
    Double = 7,
    /// Fixed-length ASCII.
    Char = 8,
    /// Variable-length ASCII.
    Varchar = 9,
    /// Fixed-length unicode.
    Nchar = 10,
    /// Variable-length unicode.
    Nvarchar = 11,
    /// Fixed-length binary.
    Binary = 12,
    /// Variable-length binary.
    Varbinary = 13,
    /// Date (DFV 1).
    Date = 14,
    /// Time (DFV 1).
    Time = 15,
    /// Timestamp (DFV 1).
    Timestamp = 16,
    /// Character LOB.
    Clob = 25,
    /// Unicode LOB.
    Nclob = 26,
    /// Binary LOB.
    Blob = 27,
    /// Boolean.
    Boolean = 28,
    /// String (option values).
    String = 29,
    /// Unicode string.
    Nstring = 30,
    /// Binary LOB locator.
    Blocator = 31,
    /// Unicode LOB locator.
    Nlocator = 32,
    /// Binary string (option values).
    Bstring = 33,
    /// Table (procedure output).
    Table = 45,
    /// Small decimal.
    Smalldecimal = 47,
    /// Text LOB.
    Text = 51,
    /// Short text.
    Shorttext = 52,
    /// Binary text LOB.
    Bintext = 53,
    /// Alphanumeric.
    Alphanum = 55,
    /// Timestamp as 100ns ticks.
    Longdate = 61,
    /// Timestamp as seconds.
    Seconddate = 62,
    /// Date as days.
    Daydate = 63,
    /// Time as seconds.
    Secondtime = 64,
    /// Spatial geometry.
    StGeometry = 74,
    /// Spatial point.
    StPoint = 75,
    /// 16-byte fixed decimal.
    Fixed16 = 76,
    /// 8-byte fixed decimal.
    Fixed8 = 81,
    /// 12-byte fixed decimal.
    Fixed12 = 82,
}

/// Bit that marks a NULL parameter value.
pub const NULL_TYPE_FLAG: u8 = 0x80;

/// Coarse data type a type code maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Boolean.
    Boolean,
    /// Any integer.
    Integer,
    /// Floating point.
    Float,
    /// Decimal (rational).
    Decimal,
    /// Date and/or time.
    Time,
    /// Text.
    String,
    /// Raw bytes.
    Bytes,
    /// Large object.
    Lob,
    /// Nested table.
    Table,
}

impl TypeCode {
    /// Convert from a raw byte, ignoring the NULL flag.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value & !NULL_TYPE_FLAG {
            0 => Self::Null,
            1 => Self::Tinyint,
            2 => Self::Smallint,
            3 => Self::Integer,
            4 => Self::Bigint,
            5 => Self::Decimal,
            6 => Self::Real,
            7 => Self::Double,
            8 => Self::Char,
            9 => Self::Varchar,
            10 => Self::Nchar,
            11 => Self::Nvarchar,
            12 => Self::Binary,
            13 => Self::Varbinary,
            14 => Self::Date,
            15 => Self::Time,
            16 => Self::Timestamp,
            25 => Self::Clob,
            26 => Self::Nclob,
            27 => Self::Blob,
            28 => Self::Boolean,
            29 => Self::String,
            30 => Self::Nstring,
            31 => Self::Blocator,
            32 => Self::Nlocator,
            33 => Self::Bstring,
            45 => Self::Table,
            47 => Self::Smalldecimal,
            51 => Self::Text,
            52 => Self::Shorttext,
            53 => Self::Bintext,
            55 => Self::Alphanum,
            61 => Self::Longdate,
            62 => Self::Seconddate,
            63 => Self::Daydate,
            64 => Self::Secondtime,
            74 => Self::StGeometry,
            75 => Self::StPoint,
            76 => Self::Fixed16,
            81 => Self::Fixed8,
            82 => Self::Fixed12,
            _ => return Err(ProtocolError::InvalidTypeCode(value)),
        })
    }

    /// Raw value.
    #[must_use]
    pub const fn raw(self) -> u8 {
        self as u8
    }

    /// Raw value with the NULL flag set.
    #[must_use]
    pub const fn null_raw(self) -> u8 {
        self as u8 | NULL_TYPE_FLAG
    }

    /// Whether values of this type stream through LOB locators.
    #[must_use]
    pub const fn is_lob(self) -> bool {
        matches!(
            self,
            Self::Clob
                | Self::Nclob
                | Self::Blob
                | Self::Text
                | Self::Bintext
                | Self::Blocator
                | Self::Nlocator
        )
    }

    /// Whether LOB payloads of this type are CESU-8 text.
    #[must_use]
    pub const fn is_char_based_lob(self) -> bool {
        matches!(self, Self::Clob | Self::Nclob | Self::Text | Self::Nlocator)
    }

    /// Whether variable data of this type is CESU-8 text.
    #[must_use]
    pub const fn is_cesu8(self) -> bool {
        matches!(
            self,
            Self::Nchar | Self::Nvarchar | Self::Nstring | Self::Shorttext | Self::String
        )
    }

    /// Whether the type is variable length.
    #[must_use]
    pub const fn is_variable_length(self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::Varchar
                | Self::Nchar
                | Self::Nvarchar
                | Self::Binary
                | Self::Varbinary
                | Self::String
                | Self::Nstring
                | Self::Bstring
                | Self::Shorttext
                | Self::Alphanum
                | Self::StGeometry
                | Self::StPoint
        )
    }

    /// Whether the type is a decimal kind.
    #[must_use]
    pub const fn is_decimal(self) -> bool {
        matches!(
            self,
            Self::Decimal | Self::Smalldecimal | Self::Fixed8 | Self::Fixed12 | Self::Fixed16
        )
    }

    /// Coarse data type.
    #[must_use]
    pub const fn data_type(self) -> DataType {
        match self {
            Self::Boolean => DataType::Boolean,
            Self::Tinyint | Self::Smallint | Self::Integer | Self::Bigint => DataType::Integer,
            Self::Real | Self::Double => DataType::Float,
            Self::Decimal | Self::Smalldecimal | Self::Fixed8 | Self::Fixed12 | Self::Fixed16 => {
                DataType::Decimal
            }
            Self::Date
            | Self::Time
            | Self::Timestamp
            | Self::Longdate
            | Self::Seconddate
            | Self::Daydate
            | Self::Secondtime => DataType::Time,
            Self::Char
            | Self::Varchar
            | Self::Nchar
            | Self::Nvarchar
            | Self::String
            | Self::Nstring
            | Self::Shorttext
            | Self::Alphanum => DataType::String,
            Self::Clob
            | Self::Nclob
            | Self::Blob
            | Self::Text
            | Self::Bintext
            | Self::Blocator
            | Self::Nlocator => DataType::Lob,
            Self::Table => DataType::Table,
            Self::Null
            | Self::Binary
            | Self::Varbinary
            | Self::Bstring
            | Self::StGeometry
            | Self::StPoint => DataType::Bytes,
        }
    }

    /// SQL type name as reported by the server catalogue.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Tinyint => "TINYINT",
            Self::Smallint => "SMALLINT",
            Self::Integer => "INTEGER",
            Self::Bigint => "BIGINT",
            Self::Decimal | Self::Fixed8 | Self::Fixed12 | Self::Fixed16 => "DECIMAL",
            Self::Smalldecimal => "SMALLDECIMAL",
            Self::Real => "REAL",
            Self::Double => "DOUBLE",
            Self::Char => "CHAR",
            Self::Varchar | Self::String => "VARCHAR",
            Self::Nchar => "NCHAR",
            Self::Nvarchar | Self::Nstring => "NVARCHAR",
            Self::Binary => "BINARY",
            Self::Varbinary | Self::Bstring => "VARBINARY",
            Self::Date | Self::Daydate => "DATE",
            Self::Time | Self::Secondtime => "TIME",
            Self::Timestamp | Self::Longdate => "TIMESTAMP",
            Self::Seconddate => "SECONDDATE",
            Self::Clob => "CLOB",
            Self::Nclob | Self::Nlocator => "NCLOB",
            Self::Blob | Self::Blocator => "BLOB",
            Self::Boolean => "BOOLEAN",
            Self::Table => "TABLE",
            Self::Text => "TEXT",
            Self::Shorttext => "SHORTTEXT",
            Self::Bintext => "BINTEXT",
            Self::Alphanum => "ALPHANUM",
            Self::StGeometry => "ST_GEOMETRY",
            Self::StPoint => "ST_POINT",
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}
