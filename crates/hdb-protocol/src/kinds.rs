//! Fixed enumerations of the wire protocol.
//!
//! Every value here is preserved by number on the wire.

use core::fmt;

use bitflags::bitflags;

use crate::error::ProtocolError;

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident: $repr:ident => $err:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr($repr)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)*
        }

        impl $name {
            /// Convert from the raw wire value.
            pub fn from_raw(value: $repr) -> Result<Self, ProtocolError> {
                match value {
                    $($value => Ok(Self::$variant),)*
                    other => Err(ProtocolError::$err(other)),
                }
            }

            /// Raw wire value.
            #[must_use]
            pub const fn raw(self) -> $repr {
                self as $repr
            }
        }
    };
}

wire_enum! {
    /// Request message kind, carried in the request segment header.
    MessageKind: i8 => InvalidMessageKind {
        /// Execute SQL text directly.
        ExecuteDirect = 2,
        /// Prepare a statement.
        Prepare = 3,
        /// Execute a prepared statement.
        Execute = 13,
        /// Write LOB chunks.
        WriteLob = 16,
        /// Read a LOB chunk.
        ReadLob = 17,
        /// First authentication round.
        Authenticate = 65,
        /// Final authentication round and session setup.
        Connect = 66,
        /// Commit the current transaction.
        Commit = 67,
        /// Roll back the current transaction.
        Rollback = 68,
        /// Close a cursor.
        CloseResultset = 69,
        /// Drop a prepared statement.
        DropStatementId = 70,
        /// Fetch the next row batch.
        FetchNext = 71,
        /// End the session.
        Disconnect = 77,
        /// Ask for tenant connection information.
        DbConnectInfo = 82,
    }
}

wire_enum! {
    /// Segment kind.
    SegmentKind: i8 => InvalidSegmentKind {
        /// Invalid / unset.
        Invalid = 0,
        /// Client request.
        Request = 1,
        /// Server reply.
        Reply = 2,
        /// Server error reply.
        Error = 5,
    }
}

wire_enum! {
    /// Reply function code: what kind of work the server performed.
    FunctionCode: i16 => InvalidFunctionCode {
        /// Nothing.
        Nil = 0,
        /// Data definition statement.
        Ddl = 1,
        /// INSERT.
        Insert = 2,
        /// UPDATE.
        Update = 3,
        /// DELETE.
        Delete = 4,
        /// SELECT.
        Select = 5,
        /// SELECT ... FOR UPDATE.
        SelectForUpdate = 6,
        /// EXPLAIN.
        Explain = 7,
        /// Procedure call.
        DbProcedureCall = 8,
        /// Procedure call with result sets.
        DbProcedureCallWithResult = 9,
        /// Fetch.
        Fetch = 10,
        /// Commit.
        Commit = 11,
        /// Rollback.
        Rollback = 12,
        /// Savepoint.
        Savepoint = 13,
        /// Connect.
        Connect = 14,
        /// Write LOB.
        WriteLob = 15,
        /// Read LOB.
        ReadLob = 16,
        /// Ping.
        Ping = 17,
        /// Disconnect.
        Disconnect = 18,
        /// Close cursor.
        CloseCursor = 19,
        /// Find LOB.
        FindLob = 20,
        /// ABAP stream.
        AbapStream = 21,
        /// XA start.
        XaStart = 22,
        /// XA join.
        XaJoin = 23,
    }
}

impl FunctionCode {
    /// Whether the statement produces a cursor.
    #[must_use]
    pub const fn is_query(self) -> bool {
        matches!(self, Self::Select | Self::SelectForUpdate)
    }

    /// Whether the statement is a procedure call.
    #[must_use]
    pub const fn is_procedure_call(self) -> bool {
        matches!(self, Self::DbProcedureCall | Self::DbProcedureCallWithResult)
    }

    /// Whether the statement modifies rows.
    #[must_use]
    pub const fn is_dml(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

wire_enum! {
    /// Part kind: the tag of each typed unit inside a segment.
    PartKind: i8 => InvalidPartKind {
        /// SQL command text.
        Command = 3,
        /// Rows of a result set.
        Resultset = 5,
        /// Server errors and warnings.
        Error = 6,
        /// Prepared statement id.
        StatementId = 10,
        /// Transaction id.
        TransactionId = 11,
        /// Rows affected per statement.
        RowsAffected = 12,
        /// Cursor id.
        ResultsetId = 13,
        /// Topology information.
        TopologyInformation = 15,
        /// Table location.
        TableLocation = 16,
        /// Read LOB request.
        ReadLobRequest = 17,
        /// Read LOB reply.
        ReadLobReply = 18,
        /// Command info.
        CommandInfo = 27,
        /// Write LOB request.
        WriteLobRequest = 28,
        /// Client context.
        ClientContext = 29,
        /// Write LOB reply.
        WriteLobReply = 30,
        /// Input parameters.
        Parameters = 32,
        /// Authentication fields.
        Authentication = 33,
        /// Session context.
        SessionContext = 34,
        /// Client id.
        ClientId = 35,
        /// Statement context.
        StatementContext = 39,
        /// Partition information.
        PartitionInformation = 40,
        /// Output parameters.
        OutputParameters = 41,
        /// Connect options.
        ConnectOptions = 42,
        /// Commit options.
        CommitOptions = 43,
        /// Fetch options.
        FetchOptions = 44,
        /// Fetch size.
        FetchSize = 45,
        /// Parameter metadata.
        ParameterMetadata = 47,
        /// Result metadata.
        ResultMetadata = 48,
        /// Client info (session variables).
        ClientInfo = 57,
        /// Transaction flags.
        TransactionFlags = 64,
        /// Database connect info.
        DbConnectInfo = 67,
        /// LOB flags.
        LobFlags = 68,
        /// Result set options.
        ResultsetOptions = 69,
    }
}

impl fmt::Display for PartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

bitflags! {
    /// Part attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PartAttributes: i8 {
        /// Last packet of a result set.
        const LAST_PACKET = 0x01;
        /// More packets follow.
        const NEXT_PACKET = 0x02;
        /// First packet of a result set.
        const FIRST_PACKET = 0x04;
        /// No row found.
        const ROW_NOT_FOUND = 0x08;
        /// The server already closed the result set.
        const RESULTSET_CLOSED = 0x10;
    }
}

impl PartAttributes {
    /// Whether no further fetch is possible.
    #[must_use]
    pub const fn is_last_packet(self) -> bool {
        self.contains(Self::LAST_PACKET)
    }

    /// Whether the server closed the result set.
    #[must_use]
    pub const fn is_resultset_closed(self) -> bool {
        self.contains(Self::RESULTSET_CLOSED)
    }
}

bitflags! {
    /// Request segment command options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CommandOptions: i8 {
        /// Hold cursors over commit.
        const HOLD_CURSORS_OVER_COMMIT = 0x08;
        /// Scrollable cursor.
        const SCROLLABLE_CURSOR_ON = 0x10;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind_values() {
        assert_eq!(MessageKind::ExecuteDirect.raw(), 2);
        assert_eq!(MessageKind::DbConnectInfo.raw(), 82);
        assert_eq!(MessageKind::from_raw(71).unwrap(), MessageKind::FetchNext);
        assert!(MessageKind::from_raw(1).is_err());
    }

    #[test]
    fn test_part_kind_roundtrip() {
        for kind in [
            PartKind::Authentication,
            PartKind::ClientId,
            PartKind::DbConnectInfo,
            PartKind::TransactionFlags,
        ] {
            assert_eq!(PartKind::from_raw(kind.raw()).unwrap(), kind);
        }
        assert!(matches!(
            PartKind::from_raw(-3),
            Err(ProtocolError::InvalidPartKind(-3))
        ));
    }

    #[test]
    fn test_function_code_classification() {
        assert!(FunctionCode::Select.is_query());
        assert!(FunctionCode::DbProcedureCall.is_procedure_call());
        assert!(FunctionCode::Insert.is_dml());
        assert!(!FunctionCode::Ddl.is_dml());
    }

    #[test]
    fn test_part_attributes() {
        let attrs = PartAttributes::from_bits_retain(0x11);
        assert!(attrs.is_last_packet());
        assert!(attrs.is_resultset_closed());
    }
}
