//! One authenticated session on one transport.
//!
//! A [`Session`] owns the framed connection and all protocol state: the
//! session id, the packet counter, the transaction flags and the cursor
//! bookkeeping. Every public type of the crate reaches the server through a
//! session guarded by an async mutex, so requests never interleave.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use hashbrown::HashSet;
use hdb_auth::{AuthHandler, SessionCookie};
use hdb_codec::{CancelHandle, CodecError, Connection, ConnectionConfig};
use hdb_protocol::{
    ByteReader, ClientContextOption, ClientInfo, ConnectOption, DbConnectInfoOption,
    FunctionCode, HdbVersion, LocatorId, Message, MessageKind, OptionValue, Options,
    ParameterField, Part, PrologRequest, ReadLobReply, ReadLobRequest, ResultField, RowData,
    ServerError, StatementContextOption, TopologyHost, TransactionFlag, WriteLobChunk,
    WriteLobRequest, APPEND_OFFSET,
};
use hdb_types::{ConvContext, HdbValue, LobInDescr, decode_result, decode_row, encode_input_row};
use parking_lot::Mutex;

use crate::config::ConnAttrs;
use crate::error::{Error, Result};
use crate::reply::{Reply, ReplyTable};
use crate::result::{ExecResult, StatementInfo};
use crate::sqlscan::{is_call, quote_identifier};
use crate::stats::SessionTicket;
#[cfg(feature = "tls")]
use crate::transport::host_of;
use crate::transport::Transport;

/// Client type announced in the client context.
const CLIENT_TYPE: &str = "rust-hdb";

/// Statement used by health checks.
pub(crate) const PING_QUERY: &str = "select 1 from dummy";

/// Largest number of arguments per request without large bulk support.
const MAX_NUM_ARG: usize = i16::MAX as usize;
/// Largest number of arguments per request with large bulk support.
const MAX_NUM_ARG_LARGE_BULK: usize = i32::MAX as usize;

pub(crate) type SharedSession = Arc<tokio::sync::Mutex<Session>>;
pub(crate) type PendingState = Arc<Mutex<Pending>>;

/// Rows per execute for a configured bulk size. The argument count of an
/// input parameters part counts rows, not values.
fn bulk_limit(bulk_size: usize, large_bulk: bool) -> usize {
    let max_num_arg = if large_bulk {
        MAX_NUM_ARG_LARGE_BULK
    } else {
        MAX_NUM_ARG
    };
    bulk_size.min(max_num_arg).max(1)
}

/// Bookkeeping updated from `Drop` impls, applied before the next request.
#[derive(Debug, Default)]
pub(crate) struct Pending {
    /// Result sets holding the query slot of the session.
    pub(crate) open_cursors: HashSet<u64>,
    pub(crate) close_resultsets: Vec<u64>,
    pub(crate) drop_statements: Vec<u64>,
    pub(crate) rollback: bool,
    /// Prepared statements the application still holds.
    pub(crate) live_statements: usize,
    /// Set once the session is unusable.
    pub(crate) bad: bool,
}

impl Pending {
    pub(crate) fn hold_cursor(&mut self, rs_id: u64) {
        self.open_cursors.insert(rs_id);
    }

    pub(crate) fn release_cursor(&mut self, rs_id: u64) {
        self.open_cursors.remove(&rs_id);
    }

    /// Whether an unfinished cursor blocks new statements.
    pub(crate) fn has_open_cursor(&self) -> bool {
        !self.open_cursors.is_empty()
    }
}

/// Server facts negotiated at connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Server version.
    pub version: HdbVersion,
    /// Full version string.
    pub full_version: String,
    /// Database the session landed on.
    pub database_name: String,
    /// Server connection id.
    pub connection_id: i64,
    /// Negotiated data format version.
    pub dfv: i32,
    /// Whether the server accepts more than 32767 arguments per request.
    pub large_bulk: bool,
}

/// Connection facts of a tenant database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbConnectInfo {
    /// Tenant database name.
    pub database_name: String,
    /// Host serving the tenant.
    pub host: String,
    /// Port serving the tenant.
    pub port: i32,
    /// Whether the asking session is already connected to the tenant.
    pub is_connected: bool,
}

impl DbConnectInfo {
    /// `host:port` of the tenant.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parameter and result descriptors of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StmtMetadata {
    /// Statement kind reported by the server.
    pub function_code: FunctionCode,
    /// Parameter descriptors in declaration order.
    pub parameters: Vec<ParameterField>,
    /// Result columns; empty for statements without a result set.
    pub columns: Vec<ResultField>,
}

impl StmtMetadata {
    /// Parameters the client sends values for.
    pub fn input_parameters(&self) -> impl Iterator<Item = &ParameterField> {
        self.parameters.iter().filter(|p| p.mode.is_input())
    }

    /// Parameters the server returns values for.
    pub fn output_parameters(&self) -> impl Iterator<Item = &ParameterField> {
        self.parameters.iter().filter(|p| p.mode.is_output())
    }
}

/// A statement prepared on the server.
#[derive(Debug)]
pub(crate) struct Prepared {
    pub(crate) stmt_id: u64,
    pub(crate) metadata: StmtMetadata,
    pub(crate) input: Vec<ParameterField>,
    pub(crate) columns: Arc<[ResultField]>,
    /// The SQL text starts with `call`.
    pub(crate) call_text: bool,
}

impl Prepared {
    pub(crate) fn is_call(&self) -> bool {
        self.call_text || self.metadata.function_code.is_procedure_call()
    }
}

/// Rows of one fetch, with row errors keyed by their index in the batch.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    pub(crate) rows: VecDeque<Vec<HdbValue>>,
    pub(crate) errors: BTreeMap<usize, Vec<ServerError>>,
    pub(crate) last_packet: bool,
    pub(crate) closed: bool,
}

/// A result set as returned by an execute.
#[derive(Debug)]
pub(crate) struct CursorInit {
    pub(crate) rs_id: u64,
    pub(crate) columns: Arc<[ResultField]>,
    pub(crate) batch: Batch,
}

/// What an execute produced.
#[derive(Debug)]
pub(crate) enum Outcome {
    Exec(ExecResult),
    Query(CursorInit),
    Call {
        output: Vec<HdbValue>,
        output_fields: Vec<ParameterField>,
        tables: Vec<CursorInit>,
    },
}

/// Input rows of one execute request.
#[derive(Debug, Default)]
pub(crate) struct Package {
    body: BytesMut,
    rows: usize,
    lobs: Vec<LobInDescr>,
}

impl Package {
    pub(crate) fn rows(&self) -> usize {
        self.rows
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// An authenticated session.
pub(crate) struct Session {
    conn: Connection<Transport>,
    session_id: i64,
    packet_count: i32,
    attrs: ConnAttrs,
    ctx: ConvContext,
    info: ServerInfo,
    username: String,
    in_tx: bool,
    write_tx: bool,
    client_info: Option<ClientInfo>,
    last: StatementInfo,
    topology: Vec<TopologyHost>,
    pending: PendingState,
    closed: bool,
    _ticket: SessionTicket,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("username", &self.username)
            .field("database_name", &self.info.database_name)
            .field("in_tx", &self.in_tx)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Value sent as `ClientId`; session cookies are bound to it.
pub(crate) fn client_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}@{host}", std::process::id())
}

fn os_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

fn codec_error(err: CodecError) -> Error {
    Error::from(err)
}

/// Character count of CESU-8 data; every lead byte starts one character.
pub(crate) fn cesu8_char_count(data: &[u8]) -> i64 {
    data.iter().filter(|b| (**b & 0xC0) != 0x80).count() as i64
}

impl Session {
    /// Dial, run the prolog and authenticate.
    ///
    /// Returns the cookie the server minted, if any.
    pub(crate) async fn connect(
        addr: &str,
        attrs: ConnAttrs,
        handler: AuthHandler,
    ) -> Result<(Self, Option<SessionCookie>)> {
        let stream = attrs
            .dialer()
            .dial(addr, attrs.timeout(), attrs.tcp_keepalive())
            .await?;
        let transport = Self::secure(stream, addr, &attrs).await?;

        let config = ConnectionConfig {
            timeout: attrs.timeout(),
            varpart_size: u32::try_from(attrs.buffer_size()).unwrap_or(u32::MAX),
            ..ConnectionConfig::default()
        };
        let (mut conn, prolog) = Connection::connect(transport, &config, &PrologRequest::default())
            .await
            .map_err(codec_error)?;
        let ticket = SessionTicket::register();
        conn.set_metrics(ticket.sink());
        tracing::debug!(addr, protocol_version = ?prolog.protocol_version, "transport ready");

        let session_variables: Vec<(String, String)> = attrs
            .session_variables()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let ctx = attrs.conv_context(attrs.dfv());
        let mut session = Self {
            conn,
            session_id: 0,
            packet_count: -1,
            ctx,
            info: ServerInfo {
                dfv: attrs.dfv(),
                ..ServerInfo::default()
            },
            username: handler.username().to_owned(),
            attrs,
            in_tx: false,
            write_tx: false,
            client_info: (!session_variables.is_empty()).then(|| ClientInfo(session_variables)),
            last: StatementInfo::default(),
            topology: Vec::new(),
            pending: PendingState::default(),
            closed: false,
            _ticket: ticket,
        };

        let cookie = session.authenticate(handler).await?;
        if let Some(schema) = session.attrs.default_schema().map(str::to_owned) {
            session.set_schema(&schema).await?;
        }
        tracing::info!(
            addr,
            session_id = session.session_id,
            database = %session.info.database_name,
            version = %session.info.version,
            "session established"
        );
        Ok((session, cookie))
    }

    #[cfg(feature = "tls")]
    async fn secure(stream: Transport, addr: &str, attrs: &ConnAttrs) -> Result<Transport> {
        match attrs.tls() {
            Some(tls) => {
                let stream = tls.connect(stream, host_of(addr)).await?;
                Ok(Box::new(stream))
            }
            None => Ok(stream),
        }
    }

    #[cfg(not(feature = "tls"))]
    async fn secure(stream: Transport, _addr: &str, _attrs: &ConnAttrs) -> Result<Transport> {
        Ok(stream)
    }

    /// Authenticate and connect; also used to switch the session user.
    async fn authenticate(&mut self, mut handler: AuthHandler) -> Result<Option<SessionCookie>> {
        let context = Options::new()
            .with(
                ClientContextOption::ClientVersion,
                OptionValue::String(env!("CARGO_PKG_VERSION").into()),
            )
            .with(ClientContextOption::ClientType, OptionValue::String(CLIENT_TYPE.into()))
            .with(
                ClientContextOption::ClientApplicationProgram,
                OptionValue::String(self.attrs.application_name().into()),
            );
        let initial = handler.initial_request()?;
        let reply = self
            .exchange(
                MessageKind::Authenticate,
                vec![Part::ClientContext(context), Part::Authentication(initial)],
            )
            .await?;
        reply.check()?;
        let fields = reply
            .authentication()
            .ok_or_else(|| Error::BadConnection("authentication reply without fields".into()))?;
        handler.initial_reply(fields)?;

        let final_fields = handler.final_request()?;
        let options = Options::new()
            .with(ConnectOption::DataFormatVersion2, OptionValue::Int(self.attrs.dfv()))
            .with(ConnectOption::ClientLocale, OptionValue::String(self.attrs.locale().into()))
            .with(ConnectOption::CompleteArrayExecution, OptionValue::Bool(true))
            .with(ConnectOption::SupportsLargeBulkOperations, OptionValue::Bool(true))
            .with(ConnectOption::OsUser, OptionValue::String(os_user()));
        let reply = self
            .exchange(
                MessageKind::Connect,
                vec![
                    Part::Authentication(final_fields),
                    Part::ClientId(client_id().into_bytes().into()),
                    Part::ConnectOptions(options),
                ],
            )
            .await?;
        reply.check()?;
        self.session_id = reply.session_id;
        if let Some(fields) = reply.authentication() {
            handler.final_reply(fields)?;
        }
        if let Some(options) = reply.connect_options() {
            self.apply_connect_options(options);
        }
        self.username = handler.logon_name();
        tracing::debug!(
            method = handler.selected_name().unwrap_or_default(),
            session_id = self.session_id,
            "authenticated"
        );
        Ok(handler.cookie())
    }

    fn apply_connect_options(&mut self, options: &Options) {
        let int = |key: ConnectOption| options.get(key).and_then(OptionValue::as_i64);
        if let Some(dfv) = int(ConnectOption::DataFormatVersion2).or_else(|| int(ConnectOption::DataFormatVersion)) {
            let dfv = i32::try_from(dfv).unwrap_or(self.info.dfv);
            if dfv != self.info.dfv {
                tracing::debug!(requested = self.info.dfv, negotiated = dfv, "data format version");
            }
            self.info.dfv = dfv;
            self.ctx = self.attrs.conv_context(dfv);
        }
        if let Some(id) = int(ConnectOption::ConnectionId) {
            self.info.connection_id = id;
        }
        if let Some(large) = options
            .get(ConnectOption::SupportsLargeBulkOperations)
            .and_then(OptionValue::as_bool)
        {
            self.info.large_bulk = large;
        }
        if let Some(version) = options
            .get(ConnectOption::FullVersionString)
            .and_then(OptionValue::as_str)
        {
            self.info.full_version = version.to_owned();
            self.info.version = version.parse().unwrap_or_default();
        }
        if let Some(name) = options
            .get(ConnectOption::DatabaseName)
            .and_then(OptionValue::as_str)
        {
            self.info.database_name = name.to_owned();
        }
    }

    pub(crate) fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub(crate) fn attrs(&self) -> &ConnAttrs {
        &self.attrs
    }

    pub(crate) fn ctx(&self) -> &ConvContext {
        &self.ctx
    }

    pub(crate) fn pending(&self) -> PendingState {
        Arc::clone(&self.pending)
    }

    pub(crate) fn cancel_handle(&self) -> CancelHandle {
        self.conn.cancel_handle()
    }

    pub(crate) fn in_tx(&self) -> bool {
        self.in_tx
    }

    pub(crate) fn set_in_tx(&mut self, in_tx: bool) {
        self.in_tx = in_tx;
        if !in_tx {
            self.write_tx = false;
        }
    }

    pub(crate) fn last_statement_info(&self) -> &StatementInfo {
        &self.last
    }

    pub(crate) fn topology(&self) -> &[TopologyHost] {
        &self.topology
    }

    pub(crate) fn is_bad(&self) -> bool {
        self.closed || self.conn.is_bad()
    }

    pub(crate) fn mark_bad(&mut self) {
        self.conn.mark_bad();
        self.pending.lock().bad = true;
    }

    /// Time since the last byte was read or written.
    pub(crate) fn idle_for(&self) -> Duration {
        let last = match (self.conn.last_read_at(), self.conn.last_written_at()) {
            (Some(r), Some(w)) => Some(r.max(w)),
            (r, w) => r.or(w),
        };
        last.map_or(Duration::MAX, |at| Instant::now().saturating_duration_since(at))
    }

    /// Largest number of rows per execute.
    pub(crate) fn bulk_limit(&self) -> usize {
        bulk_limit(self.attrs.bulk_size(), self.info.large_bulk)
    }

    /// Send one request and decode the reply, applying its session-level
    /// parts. Server errors are left in the reply.
    pub(crate) async fn exchange(&mut self, kind: MessageKind, parts: Vec<Part>) -> Result<Reply> {
        if self.is_bad() {
            return Err(Error::closed());
        }
        let commit = match kind {
            MessageKind::Authenticate | MessageKind::Connect => false,
            _ => !self.in_tx,
        };
        self.packet_count = self.packet_count.wrapping_add(1);
        let message = Message::request(self.session_id, self.packet_count, kind, commit, parts);
        let raw = match self.conn.exchange(&message).await {
            Ok(raw) => raw,
            Err(err) => {
                self.pending.lock().bad = true;
                return Err(codec_error(err));
            }
        };
        let reply = match Reply::decode(&raw) {
            Ok(reply) => reply,
            Err(err) => {
                self.mark_bad();
                return Err(err.into());
            }
        };
        self.apply_reply(&reply);
        Ok(reply)
    }

    fn apply_reply(&mut self, reply: &Reply) {
        if let Some(flags) = reply.transaction_flags() {
            let set = |flag: TransactionFlag| {
                flags
                    .get(flag)
                    .and_then(OptionValue::as_bool)
                    .unwrap_or(false)
            };
            if set(TransactionFlag::Committed) || set(TransactionFlag::RolledBack) {
                self.set_in_tx(false);
            }
            if set(TransactionFlag::WriteTransactionStarted) {
                self.write_tx = true;
            }
            if set(TransactionFlag::NoWriteTransactionStarted) {
                self.write_tx = false;
            }
            if set(TransactionFlag::SessionClosingTransactionError) {
                tracing::warn!(session_id = self.session_id, "session closing transaction error");
                self.mark_bad();
            }
        }
        let server_execution_time = reply
            .statement_context()
            .and_then(|ctx| ctx.get(StatementContextOption::ServerExecutionTime))
            .and_then(OptionValue::as_i64)
            .map(|us| Duration::from_micros(u64::try_from(us).unwrap_or(0)));
        if let Some(topology) = reply.topology() {
            self.topology = topology.clone();
        }
        for warning in &reply.warnings {
            tracing::warn!(code = warning.code, sql_state = %String::from_utf8_lossy(&warning.sql_state), "{}", warning.text);
        }
        if reply.errors.iter().any(ServerError::is_fatal) {
            self.mark_bad();
        }
        self.last = StatementInfo {
            warnings: reply.warnings.clone(),
            server_execution_time,
        };
    }

    /// Apply cleanup scheduled by dropped cursors, statements and
    /// transactions.
    pub(crate) async fn flush_pending(&mut self) -> Result<()> {
        let (close, drop, rollback) = {
            let mut pending = self.pending.lock();
            (
                std::mem::take(&mut pending.close_resultsets),
                std::mem::take(&mut pending.drop_statements),
                std::mem::replace(&mut pending.rollback, false),
            )
        };
        for rs_id in close {
            self.close_resultset(rs_id).await?;
        }
        for stmt_id in drop {
            self.drop_statement(stmt_id).await?;
        }
        if rollback {
            tracing::debug!(session_id = self.session_id, "rolling back abandoned transaction");
            self.rollback().await?;
        }
        Ok(())
    }

    /// Prepare to issue a statement-level request.
    async fn begin_statement(&mut self) -> Result<()> {
        if self.pending.lock().has_open_cursor() {
            return Err(Error::NestedQuery);
        }
        self.flush_pending().await
    }

    fn trace_sql(&self, sql: &str) {
        if self.attrs.sql_trace() {
            tracing::info!(target: "hdb::sql", session_id = self.session_id, "{sql}");
        }
    }

    fn command(&self, sql: &str) -> Part {
        Part::Command(self.ctx.cesu8.encode(sql).into())
    }

    pub(crate) async fn prepare(&mut self, sql: &str) -> Result<Prepared> {
        self.begin_statement().await?;
        self.trace_sql(sql);
        let command = self.command(sql);
        let reply = self.exchange(MessageKind::Prepare, vec![command]).await?;
        reply.check()?;
        let stmt_id = *reply
            .statement_id()
            .ok_or_else(|| Error::BadConnection("prepare reply without statement id".into()))?;
        let parameters = reply
            .parameter_metadata()
            .map(|m| m.0.clone())
            .unwrap_or_default();
        let columns: Vec<ResultField> = reply
            .result_metadata()
            .map(|m| m.0.clone())
            .unwrap_or_default();
        let input = parameters.iter().filter(|p| p.mode.is_input()).cloned().collect();
        Ok(Prepared {
            stmt_id,
            columns: columns.clone().into(),
            input,
            call_text: is_call(sql),
            metadata: StmtMetadata {
                function_code: reply.function_code,
                parameters,
                columns,
            },
        })
    }

    fn take_client_info(&mut self) -> Option<Part> {
        self.client_info.take().map(Part::ClientInfo)
    }

    pub(crate) async fn execute_direct(&mut self, sql: &str) -> Result<Outcome> {
        self.begin_statement().await?;
        self.trace_sql(sql);
        let mut parts: Vec<Part> = self.take_client_info().into_iter().collect();
        parts.push(self.command(sql));
        parts.push(Part::FetchSize(self.fetch_size()));
        let reply = self.exchange(MessageKind::ExecuteDirect, parts).await?;
        self.outcome(reply, None)
    }

    /// Encode one row into `package`; returns whether the package must be
    /// sent before the next row because a LOB did not fit.
    pub(crate) fn encode_row(
        &self,
        package: &mut Package,
        fields: &[ParameterField],
        row: &[HdbValue],
    ) -> Result<bool> {
        let descrs = encode_input_row(fields, row, &self.ctx, &mut package.body, 0)?;
        package.rows += 1;
        let mut incomplete = false;
        for descr in descrs {
            if !descr.is_last_data() {
                incomplete = true;
                package.lobs.push(descr);
            }
        }
        Ok(incomplete)
    }

    /// Execute a prepared statement with the rows of `package` and stream
    /// the remaining LOB data.
    pub(crate) async fn execute(&mut self, prepared: &Prepared, package: Package) -> Result<Outcome> {
        self.begin_statement().await?;
        let Package { body, rows, lobs } = package;
        let mut parts: Vec<Part> = self.take_client_info().into_iter().collect();
        parts.push(Part::StatementId(prepared.stmt_id));
        if rows > 0 && !prepared.input.is_empty() {
            parts.push(Part::InputParameters(RowData::new(rows, body.freeze())));
        }
        if prepared.metadata.function_code.is_query() {
            parts.push(Part::FetchSize(self.fetch_size()));
        }
        let reply = self.exchange(MessageKind::Execute, parts).await?;
        if lobs.is_empty() || !reply.errors.is_empty() {
            return self.outcome(reply, Some(prepared));
        }
        let locators = reply.write_lob_locators().to_vec();
        let final_reply = self.write_lobs(lobs, &locators).await?;
        let reply = match final_reply {
            Some(last) if last.output_parameters().is_some() || last.rows_affected().is_some() => last,
            _ => reply,
        };
        self.outcome(reply, Some(prepared))
    }

    /// Send the remaining chunks of the LOB parameters until all are
    /// complete. Returns the last reply.
    async fn write_lobs(
        &mut self,
        mut lobs: Vec<LobInDescr>,
        locators: &[LocatorId],
    ) -> Result<Option<Reply>> {
        if locators.len() < lobs.len() {
            return Err(Error::BadConnection(format!(
                "{} LOB locators for {} pending LOB parameters",
                locators.len(),
                lobs.len()
            )));
        }
        for (descr, locator) in lobs.iter_mut().zip(locators) {
            descr.locator = Some(*locator);
        }
        let mut last = None;
        while !lobs.is_empty() {
            let mut chunks = Vec::with_capacity(lobs.len());
            for descr in &mut lobs {
                let data = descr.next_chunk(self.ctx.cesu8.as_ref())?;
                chunks.push(WriteLobChunk {
                    locator: descr.locator.unwrap_or_default(),
                    options: descr.options(),
                    offset: APPEND_OFFSET,
                    data,
                });
            }
            let reply = self
                .exchange(MessageKind::WriteLob, vec![Part::WriteLobRequest(WriteLobRequest(chunks))])
                .await?;
            reply.check()?;
            lobs.retain(|d| !d.is_last_data());
            tracing::trace!(pending = lobs.len(), "LOB chunk written");
            last = Some(reply);
        }
        Ok(last)
    }

    fn fetch_size(&self) -> i32 {
        i32::try_from(self.attrs.fetch_size()).unwrap_or(i32::MAX)
    }

    fn decode_batch(&self, columns: &[ResultField], data: Option<&RowData>, errors: Vec<ServerError>) -> Result<Batch> {
        let mut batch = Batch::default();
        if let Some(data) = data {
            let mut src = ByteReader::new(data.data.clone());
            for _ in 0..data.rows {
                batch.rows.push_back(decode_row(&mut src, columns, &self.ctx)?);
            }
            batch.last_packet = data.attributes.is_last_packet();
            batch.closed = data.attributes.is_resultset_closed();
        }
        for err in errors {
            batch.errors.entry(err.stmt_index).or_default().push(err);
        }
        Ok(batch)
    }

    fn decode_output(&self, fields: &[ParameterField], data: &RowData) -> Result<Vec<HdbValue>> {
        let mut src = ByteReader::new(data.data.clone());
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            values.push(decode_result(&mut src, field.type_code, field.fraction, field.length, &self.ctx)?);
        }
        Ok(values)
    }

    fn cursor(&self, table: ReplyTable, columns: Option<&Arc<[ResultField]>>, errors: Vec<ServerError>) -> Result<CursorInit> {
        let columns: Arc<[ResultField]> = match (table.metadata, columns) {
            (Some(metadata), _) => metadata.0.into(),
            (None, Some(columns)) => Arc::clone(columns),
            (None, None) => Arc::from(Vec::new()),
        };
        let batch = self.decode_batch(&columns, table.rows.as_ref(), errors)?;
        Ok(CursorInit {
            rs_id: table.resultset_id.unwrap_or_default(),
            columns,
            batch,
        })
    }

    fn outcome(&mut self, reply: Reply, prepared: Option<&Prepared>) -> Result<Outcome> {
        let fc = reply.function_code;
        if fc.is_procedure_call() || prepared.is_some_and(Prepared::is_call) {
            reply.check()?;
            let output_fields: Vec<ParameterField> = prepared
                .map(|p| p.metadata.output_parameters().cloned().collect())
                .unwrap_or_default();
            let output = match reply.output_parameters() {
                Some(data) => self.decode_output(&output_fields, data)?,
                None => Vec::new(),
            };
            let tables = reply
                .tables()
                .into_iter()
                .map(|table| self.cursor(table, None, Vec::new()))
                .collect::<Result<Vec<_>>>()?;
            for table in &tables {
                self.hold(table);
            }
            return Ok(Outcome::Call {
                output,
                output_fields,
                tables,
            });
        }

        let mut tables = reply.tables();
        if fc.is_query() || !tables.is_empty() {
            if tables.is_empty() {
                reply.check()?;
            }
            let table = if tables.is_empty() {
                ReplyTable {
                    metadata: None,
                    resultset_id: None,
                    rows: None,
                }
            } else {
                tables.swap_remove(0)
            };
            let cursor = self.cursor(table, prepared.map(|p| &p.columns), reply.errors)?;
            self.hold(&cursor);
            return Ok(Outcome::Query(cursor));
        }

        reply.check()?;
        Ok(Outcome::Exec(ExecResult::from_raw(
            reply.rows_affected().map(Vec::as_slice).unwrap_or_default(),
        )))
    }

    /// Take the query slot for a cursor with rows left to read.
    fn hold(&self, cursor: &CursorInit) {
        if !(cursor.batch.last_packet && cursor.batch.closed) || !cursor.batch.rows.is_empty() {
            self.pending.lock().hold_cursor(cursor.rs_id);
        }
    }

    pub(crate) async fn fetch_next(&mut self, rs_id: u64, columns: &[ResultField]) -> Result<Batch> {
        self.flush_pending().await?;
        let parts = vec![Part::ResultsetId(rs_id), Part::FetchSize(self.fetch_size())];
        let reply = self.exchange(MessageKind::FetchNext, parts).await?;
        if reply.resultset().is_none() {
            reply.check()?;
        }
        self.decode_batch(columns, reply.resultset(), reply.errors.clone())
    }

    pub(crate) async fn close_resultset(&mut self, rs_id: u64) -> Result<()> {
        let reply = self
            .exchange(MessageKind::CloseResultset, vec![Part::ResultsetId(rs_id)])
            .await?;
        if let Err(err) = reply.check() {
            tracing::debug!(rs_id, error = %err, "close resultset failed");
        }
        Ok(())
    }

    pub(crate) async fn drop_statement(&mut self, stmt_id: u64) -> Result<()> {
        let reply = self
            .exchange(MessageKind::DropStatementId, vec![Part::StatementId(stmt_id)])
            .await?;
        if let Err(err) = reply.check() {
            tracing::debug!(stmt_id, error = %err, "drop statement failed");
        }
        Ok(())
    }

    pub(crate) async fn read_lob(&mut self, locator: LocatorId, offset: i64, length: i32) -> Result<ReadLobReply> {
        self.flush_pending().await?;
        let request = ReadLobRequest {
            locator,
            offset,
            length,
        };
        let reply = self
            .exchange(MessageKind::ReadLob, vec![Part::ReadLobRequest(request)])
            .await?;
        reply.check()?;
        reply
            .read_lob_reply()
            .cloned()
            .ok_or_else(|| Error::BadConnection("read lob reply without data".into()))
    }

    pub(crate) async fn commit(&mut self) -> Result<()> {
        let reply = self.exchange(MessageKind::Commit, Vec::new()).await?;
        self.set_in_tx(false);
        reply.check()
    }

    pub(crate) async fn rollback(&mut self) -> Result<()> {
        let reply = self.exchange(MessageKind::Rollback, Vec::new()).await?;
        self.set_in_tx(false);
        reply.check()
    }

    /// Run a statement that returns neither rows nor output.
    pub(crate) async fn exec_direct(&mut self, sql: &str) -> Result<ExecResult> {
        let outcome = self.execute_direct(sql).await?;
        Ok(self.discard(outcome))
    }

    /// Drop the cursors of an outcome, keeping its row counts.
    pub(crate) fn discard(&self, outcome: Outcome) -> ExecResult {
        match outcome {
            Outcome::Exec(result) => result,
            Outcome::Query(cursor) => {
                self.abandon(&cursor);
                ExecResult::default()
            }
            Outcome::Call { tables, .. } => {
                for table in &tables {
                    self.abandon(table);
                }
                ExecResult::default()
            }
        }
    }

    fn abandon(&self, cursor: &CursorInit) {
        let mut pending = self.pending.lock();
        pending.release_cursor(cursor.rs_id);
        if !cursor.batch.closed {
            pending.close_resultsets.push(cursor.rs_id);
        }
    }

    pub(crate) async fn set_schema(&mut self, schema: &str) -> Result<()> {
        self.exec_direct(&format!("set schema {}", quote_identifier(schema)))
            .await
            .map(drop)
    }

    pub(crate) async fn ping(&mut self) -> Result<()> {
        match self.execute_direct(PING_QUERY).await? {
            Outcome::Query(cursor) => {
                self.abandon(&cursor);
                self.flush_pending().await
            }
            _ => Ok(()),
        }
    }

    pub(crate) async fn db_connect_info(&mut self, database_name: &str) -> Result<DbConnectInfo> {
        self.begin_statement().await?;
        let options = Options::new().with(
            DbConnectInfoOption::DatabaseName,
            OptionValue::String(database_name.into()),
        );
        let reply = self
            .exchange(MessageKind::DbConnectInfo, vec![Part::DbConnectInfo(options)])
            .await?;
        reply.check()?;
        let options = reply
            .db_connect_info()
            .ok_or_else(|| Error::BadConnection("db connect info reply without options".into()))?;
        Ok(DbConnectInfo {
            database_name: database_name.to_owned(),
            host: options
                .get(DbConnectInfoOption::Host)
                .and_then(OptionValue::as_str)
                .unwrap_or_default()
                .to_owned(),
            port: options
                .get(DbConnectInfoOption::Port)
                .and_then(OptionValue::as_i64)
                .and_then(|p| i32::try_from(p).ok())
                .unwrap_or_default(),
            is_connected: options
                .get(DbConnectInfoOption::IsConnected)
                .and_then(OptionValue::as_bool)
                .unwrap_or(false),
        })
    }

    /// Re-authenticate the session as another user and reapply the schema.
    pub(crate) async fn switch_user(&mut self, handler: AuthHandler) -> Result<()> {
        if self.in_tx {
            return Err(Error::SwitchUser("switch user within a transaction"));
        }
        if self.pending.lock().live_statements > 0 {
            return Err(Error::SwitchUser("switch user while a statement is prepared"));
        }
        if handler.username() == self.username {
            return Ok(());
        }
        self.begin_statement().await?;
        let from = std::mem::take(&mut self.username);
        if let Err(err) = self.authenticate(handler).await {
            self.username = from;
            return Err(err);
        }
        tracing::info!(from = %from, to = %self.username, "session user switched");
        if let Some(schema) = self.attrs.default_schema().map(str::to_owned) {
            self.set_schema(&schema).await?;
        }
        Ok(())
    }

    pub(crate) fn username(&self) -> &str {
        &self.username
    }

    /// Send the disconnect request without waiting for a reply and close
    /// the transport.
    pub(crate) async fn disconnect(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let sent = if self.conn.is_bad() {
            Ok(())
        } else {
            self.packet_count = self.packet_count.wrapping_add(1);
            let message = Message::request(
                self.session_id,
                self.packet_count,
                MessageKind::Disconnect,
                !self.in_tx,
                Vec::new(),
            );
            self.conn.send(&message).await.map_err(codec_error)
        };
        let closed = self.conn.close().await.map_err(codec_error);
        self.closed = true;
        self.pending.lock().bad = true;
        tracing::debug!(session_id = self.session_id, "session closed");
        sent.and(closed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hdb_protocol::Cesu8Transformer;

    #[test]
    fn test_cesu8_char_count() {
        assert_eq!(cesu8_char_count(b"abc"), 3);
        assert_eq!(cesu8_char_count("äö".as_bytes()), 2);
        // U+1F600 as a CESU-8 surrogate pair counts as two characters
        let pair = hdb_protocol::Cesu8.encode("\u{1F600}");
        assert_eq!(pair.len(), 6);
        assert_eq!(cesu8_char_count(&pair), 2);
    }

    #[test]
    fn test_pending_release_cursor() {
        let mut pending = Pending::default();
        pending.hold_cursor(4);
        pending.hold_cursor(6);
        pending.release_cursor(5);
        assert!(pending.has_open_cursor());
        pending.release_cursor(4);
        assert!(pending.has_open_cursor());
        pending.release_cursor(6);
        assert!(!pending.has_open_cursor());
    }

    #[test]
    fn test_bulk_limit_counts_rows() {
        assert_eq!(bulk_limit(10_000, false), 10_000);
        assert_eq!(bulk_limit(100_000, false), 32_767);
        assert_eq!(bulk_limit(100_000, true), 100_000);
        assert_eq!(bulk_limit(0, false), 1);
    }

    #[test]
    fn test_stmt_metadata_parameter_split() {
        use hdb_protocol::{ParameterMode, TypeCode};
        let mut out = ParameterField::input(TypeCode::Integer, 10, 0);
        out.mode = ParameterMode::Out;
        let mut inout = ParameterField::input(TypeCode::Integer, 10, 0);
        inout.mode = ParameterMode::InOut;
        let metadata = StmtMetadata {
            function_code: FunctionCode::DbProcedureCall,
            parameters: vec![ParameterField::input(TypeCode::Integer, 10, 0), out, inout],
            columns: Vec::new(),
        };
        assert_eq!(metadata.input_parameters().count(), 2);
        assert_eq!(metadata.output_parameters().count(), 2);
    }

    #[test]
    fn test_db_connect_info_address() {
        let info = DbConnectInfo {
            database_name: "T1".into(),
            host: "hana2".into(),
            port: 30041,
            is_connected: false,
        };
        assert_eq!(info.address(), "hana2:30041");
    }
}
