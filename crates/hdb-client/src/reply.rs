//! Decoded reply of one request.

use hdb_protocol::{
    AuthFields, FunctionCode, LocatorId, Options, ParameterMetadata, Part, ProtocolError,
    RawMessage, ReadLobReply, ResultMetadata, RowData, ServerError, TopologyHost,
};

use crate::error::{Error, ServerErrors};

/// One result table of a reply: metadata, cursor id and the first rows.
#[derive(Debug, Clone)]
pub(crate) struct ReplyTable {
    pub(crate) metadata: Option<ResultMetadata>,
    pub(crate) resultset_id: Option<u64>,
    pub(crate) rows: Option<RowData>,
}

/// A reply with its parts decoded and its errors split by level.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    pub(crate) session_id: i64,
    pub(crate) function_code: FunctionCode,
    pub(crate) parts: Vec<Part>,
    pub(crate) errors: Vec<ServerError>,
    pub(crate) warnings: Vec<ServerError>,
}

macro_rules! part_accessor {
    ($(#[$meta:meta])* $name:ident => $variant:ident($ty:ty)) => {
        $(#[$meta])*
        pub(crate) fn $name(&self) -> Option<&$ty> {
            self.parts.iter().find_map(|p| match p {
                Part::$variant(v) => Some(v),
                _ => None,
            })
        }
    };
}

impl Reply {
    pub(crate) fn decode(raw: &RawMessage) -> Result<Self, ProtocolError> {
        let mut parts = Vec::new();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        raw.iterate_parts(|_, part| {
            match part.decode()? {
                Part::Errors(list) => {
                    for err in list.0 {
                        if err.is_warning() {
                            warnings.push(err);
                        } else {
                            errors.push(err);
                        }
                    }
                }
                other => parts.push(other),
            }
            Ok::<_, ProtocolError>(())
        })?;
        Ok(Self {
            session_id: raw.header.session_id,
            function_code: raw.function_code(),
            parts,
            errors,
            warnings,
        })
    }

    /// Fail with the server errors, if any.
    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Server(ServerErrors::new(self.errors.clone())))
        }
    }

    part_accessor!(statement_id => StatementId(u64));
    part_accessor!(result_metadata => ResultMetadata(ResultMetadata));
    part_accessor!(parameter_metadata => ParameterMetadata(ParameterMetadata));
    part_accessor!(resultset => Resultset(RowData));
    part_accessor!(output_parameters => OutputParameters(RowData));
    part_accessor!(rows_affected => RowsAffected(Vec<i32>));
    part_accessor!(read_lob_reply => ReadLobReply(ReadLobReply));
    part_accessor!(authentication => Authentication(AuthFields));
    part_accessor!(connect_options => ConnectOptions(Options));
    part_accessor!(db_connect_info => DbConnectInfo(Options));
    part_accessor!(transaction_flags => TransactionFlags(Options));
    part_accessor!(statement_context => StatementContext(Options));
    part_accessor!(topology => TopologyInformation(Vec<TopologyHost>));

    pub(crate) fn write_lob_locators(&self) -> &[LocatorId] {
        self.parts
            .iter()
            .find_map(|p| match p {
                Part::WriteLobReply(reply) => Some(reply.0.as_slice()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Result tables in wire order; each `result-metadata` part starts a
    /// new table.
    pub(crate) fn tables(&self) -> Vec<ReplyTable> {
        let mut tables: Vec<ReplyTable> = Vec::new();
        for part in &self.parts {
            match part {
                Part::ResultMetadata(metadata) => tables.push(ReplyTable {
                    metadata: Some(metadata.clone()),
                    resultset_id: None,
                    rows: None,
                }),
                Part::ResultsetId(id) => match tables.last_mut() {
                    Some(table) if table.resultset_id.is_none() => table.resultset_id = Some(*id),
                    _ => tables.push(ReplyTable {
                        metadata: None,
                        resultset_id: Some(*id),
                        rows: None,
                    }),
                },
                Part::Resultset(rows) => match tables.last_mut() {
                    Some(table) if table.rows.is_none() => table.rows = Some(rows.clone()),
                    _ => tables.push(ReplyTable {
                        metadata: None,
                        resultset_id: None,
                        rows: Some(rows.clone()),
                    }),
                },
                _ => {}
            }
        }
        tables
    }
}
