//! Mock HDB server for unit testing.
//!
//! This module provides a mock SAP HANA server that speaks enough of the
//! HDB wire protocol to exercise the client end to end without a real
//! database instance.
//!
//! ## Features
//!
//! - Prolog, SCRAM-SHA256, SCRAM-PBKDF2, JWT, X.509 and session cookie
//!   authentication
//! - Configurable responses for direct and prepared statements
//! - Cursors paged by the client's fetch size, with `fetch-next`
//! - LOB locators for reading and piecewise LOB writes
//! - Procedure calls with output parameters and result tables
//! - Tenant database lookup for redirect tests
//! - Every request is recorded for later inspection
//!
//! ## Example
//!
//! ```rust,ignore
//! use hdb_testing::mock_server::{MockColumn, MockHdbServer, MockResponse};
//!
//! #[tokio::test]
//! async fn test_query() {
//!     let server = MockHdbServer::builder()
//!         .with_response("select id from t", MockResponse::rows(
//!             vec![MockColumn::int("ID")],
//!             vec![vec![HdbValue::Int(1)]],
//!         ))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let conn = server.connector().connect().await.unwrap();
//!     // ...
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use hdb_client::Connector;
use hdb_codec::{CodecError, MessageStream};
use hdb_protocol::{
    AuthFields, ByteReader, ConnectOption, DbConnectInfoOption, FunctionCode,
    LobOptions, LocatorId, Message, MessageKind, OptionValue, Options, PROLOG_REQUEST_SIZE,
    ParameterField, ParameterMetadata, ParameterMode, Part, PartAttributes, PrologReply,
    ProtocolError, RawMessage, ReadLobReply, ResultField, ResultMetadata, RowData, Segment,
    SegmentBody, SegmentKind, ServerError, ServerErrors, StatementContextOption, TransactionFlag, TypeCode,
    WriteLobReply, decode_prolog_request,
};
use hdb_types::{ConvContext, HdbValue, LobLocator, TypeError, decode_input_rows, encode_result};
use parking_lot::Mutex;
use rsa::RsaPublicKey;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::server_auth::{self, Challenge};

/// Error code the server reports for a LOB read it cannot serve while
/// another statement owns the connection.
pub const WHILE_PARSING_PROTOCOL: i32 = 1033;

const SESSION_NOT_CONNECTED: i32 = 1030;
const INVALID_ID: i32 = 1034;
const UNKNOWN_DATABASE: i32 = 1036;

const PING_QUERY: &str = "SELECT 1 FROM DUMMY";
const DEFAULT_FETCH_SIZE: usize = 32;
const DEFAULT_DFV: i32 = 8;

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Malformed message.
    #[error("wire error: {0}")]
    Wire(#[from] ProtocolError),

    /// A configured value does not fit its column.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// Return a result set.
    Rows {
        /// Column definitions.
        columns: Vec<MockColumn>,
        /// Row data.
        rows: Vec<Vec<HdbValue>>,
    },

    /// Report the same row count for every input row.
    RowsAffected(i32),

    /// Return an error.
    Error {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },

    /// Deliver the first batch of rows, then fail the next fetch.
    FetchError {
        /// Column definitions.
        columns: Vec<MockColumn>,
        /// Rows delivered before the error.
        rows: Vec<Vec<HdbValue>>,
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },

    /// Return output parameters and result tables of a procedure.
    Call {
        /// Output parameter values, in declaration order.
        output: Vec<HdbValue>,
        /// Result tables.
        tables: Vec<MockTable>,
    },

    /// Custom response generator.
    Custom(Arc<dyn Fn(&str) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("rows", &rows.len())
                .finish(),
            Self::RowsAffected(count) => f.debug_tuple("RowsAffected").field(count).finish(),
            Self::Error { code, message } => f
                .debug_struct("Error")
                .field("code", code)
                .field("message", message)
                .finish(),
            Self::FetchError { rows, code, .. } => f
                .debug_struct("FetchError")
                .field("rows", &rows.len())
                .field("code", code)
                .finish_non_exhaustive(),
            Self::Call { output, tables } => f
                .debug_struct("Call")
                .field("output", &output.len())
                .field("tables", &tables.len())
                .finish(),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

impl MockResponse {
    /// Create a single integer result.
    pub fn scalar_int(value: i32) -> Self {
        Self::rows(vec![MockColumn::int("VALUE")], vec![vec![HdbValue::Int(value)]])
    }

    /// Create a single string result.
    pub fn scalar_string(value: impl Into<String>) -> Self {
        Self::rows(
            vec![MockColumn::nvarchar("VALUE", 5000)],
            vec![vec![HdbValue::String(value.into())]],
        )
    }

    /// Create an empty success response.
    pub fn empty() -> Self {
        Self::RowsAffected(0)
    }

    /// Create a rows-affected response.
    pub fn affected(count: i32) -> Self {
        Self::RowsAffected(count)
    }

    /// Create an error response.
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a result set response.
    pub fn rows(columns: Vec<MockColumn>, rows: Vec<Vec<HdbValue>>) -> Self {
        Self::Rows { columns, rows }
    }

    /// Create a result set whose second fetch fails.
    pub fn fetch_error(
        columns: Vec<MockColumn>,
        rows: Vec<Vec<HdbValue>>,
        code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self::FetchError {
            columns,
            rows,
            code,
            message: message.into(),
        }
    }

    /// Create a procedure call response.
    pub fn call(output: Vec<HdbValue>, tables: Vec<MockTable>) -> Self {
        Self::Call { output, tables }
    }

    /// Create a response computed from the SQL text.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str) -> MockResponse + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    fn resolve(self, sql: &str) -> Self {
        match self {
            Self::Custom(f) => f(sql).resolve(sql),
            other => other,
        }
    }

    fn function_code(&self, sql: &str) -> FunctionCode {
        match self {
            Self::Rows { .. } | Self::FetchError { .. } => FunctionCode::Select,
            Self::Call { .. } => FunctionCode::DbProcedureCall,
            _ => function_code_of(sql),
        }
    }
}

/// Function code a server reports for a statement, by its first keyword.
fn function_code_of(sql: &str) -> FunctionCode {
    let keyword = sql
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match keyword.as_str() {
        "select" | "with" => FunctionCode::Select,
        "insert" | "upsert" | "replace" => FunctionCode::Insert,
        "update" => FunctionCode::Update,
        "delete" => FunctionCode::Delete,
        "call" => FunctionCode::DbProcedureCall,
        "commit" => FunctionCode::Commit,
        "rollback" => FunctionCode::Rollback,
        _ => FunctionCode::Ddl,
    }
}

/// Result table of a procedure call.
#[derive(Debug, Clone)]
pub struct MockTable {
    /// Column definitions.
    pub columns: Vec<MockColumn>,
    /// Row data.
    pub rows: Vec<Vec<HdbValue>>,
}

impl MockTable {
    /// Create a result table.
    pub fn new(columns: Vec<MockColumn>, rows: Vec<Vec<HdbValue>>) -> Self {
        Self { columns, rows }
    }
}

/// Column definition for mock responses.
#[derive(Debug, Clone)]
pub struct MockColumn {
    /// Column name.
    pub name: String,
    /// Type code.
    pub type_code: TypeCode,
    /// Length or precision.
    pub length: i16,
    /// Fraction (scale).
    pub fraction: i16,
    /// Whether NULL is allowed.
    pub nullable: bool,
}

impl MockColumn {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, type_code: TypeCode, length: i16) -> Self {
        Self {
            name: name.into(),
            type_code,
            length,
            fraction: 0,
            nullable: true,
        }
    }

    /// Create an INTEGER column.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, TypeCode::Integer, 10)
    }

    /// Create a BIGINT column.
    pub fn bigint(name: impl Into<String>) -> Self {
        Self::new(name, TypeCode::Bigint, 19)
    }

    /// Create an NVARCHAR column.
    pub fn nvarchar(name: impl Into<String>, max_len: i16) -> Self {
        Self::new(name, TypeCode::Nvarchar, max_len)
    }

    /// Create a DECIMAL column.
    pub fn decimal(name: impl Into<String>, precision: i16, scale: i16) -> Self {
        let mut column = Self::new(name, TypeCode::Decimal, precision);
        column.fraction = scale;
        column
    }

    /// Create a BLOB column.
    pub fn blob(name: impl Into<String>) -> Self {
        Self::new(name, TypeCode::Blob, 0)
    }

    /// Create an NCLOB column.
    pub fn nclob(name: impl Into<String>) -> Self {
        Self::new(name, TypeCode::Nclob, 0)
    }

    /// Set nullable flag.
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    fn result_field(&self) -> ResultField {
        let mut field = ResultField::new(self.name.clone(), self.type_code, self.length, self.fraction);
        if !self.nullable {
            field.options = hdb_protocol::ColumnOptions::MANDATORY;
        }
        field
    }
}

fn result_fields(columns: &[MockColumn]) -> Vec<ResultField> {
    columns.iter().map(MockColumn::result_field).collect()
}

/// A statement the server prepares with declared parameters.
#[derive(Debug, Clone)]
pub struct MockStatement {
    parameters: Vec<ParameterField>,
    response: MockResponse,
    function_code: Option<FunctionCode>,
}

impl MockStatement {
    /// Statement without parameters.
    pub fn new(response: MockResponse) -> Self {
        Self {
            parameters: Vec::new(),
            response,
            function_code: None,
        }
    }

    /// Report `code` in the prepare reply instead of the one the response
    /// implies.
    pub fn with_function_code(mut self, code: FunctionCode) -> Self {
        self.function_code = Some(code);
        self
    }

    /// Declare an input parameter.
    pub fn with_input(mut self, type_code: TypeCode, length: i16) -> Self {
        self.parameters
            .push(ParameterField::input(type_code, length, 0));
        self
    }

    /// Declare a named output parameter.
    pub fn with_output(mut self, name: impl Into<String>, type_code: TypeCode, length: i16) -> Self {
        let mut field = ParameterField::input(type_code, length, 0);
        field.mode = ParameterMode::Out;
        field.name = Some(name.into());
        self.parameters.push(field);
        self
    }

    /// Declare an arbitrary parameter.
    pub fn with_parameter(mut self, field: ParameterField) -> Self {
        self.parameters.push(field);
        self
    }
}

/// Mock server configuration.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Responses by normalized SQL text.
    pub responses: HashMap<String, MockResponse>,
    /// Declared statements by normalized SQL text.
    pub statements: HashMap<String, MockStatement>,
    /// Default response for unmatched statements.
    pub default_response: Option<MockResponse>,
    /// Response delays by normalized SQL text.
    pub delays: HashMap<String, Duration>,
    /// Passwords by user name.
    pub users: HashMap<String, String>,
    /// Logon names by JWT token.
    pub tokens: HashMap<String, String>,
    /// Logon names by certificate public key.
    pub certificates: Vec<(RsaPublicKey, String)>,
    /// Database name.
    pub database: String,
    /// Full version string reported at connect.
    pub full_version: String,
    /// Tenant databases served elsewhere, by uppercase name.
    pub tenants: HashMap<String, (String, u16)>,
    /// Bytes or characters of a LOB sent with its row.
    pub lob_prefetch: usize,
    /// PBKDF2 iterations for SCRAM-PBKDF2.
    pub pbkdf2_rounds: u32,
    /// Reject LOB reads with [`WHILE_PARSING_PROTOCOL`].
    pub reject_lob_reads: bool,
}

/// Builder for mock server configuration.
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a new builder with defaults.
    ///
    /// The server knows the user `SYSTEM` with password `manager` and
    /// answers `select 1 from dummy`.
    pub fn new() -> Self {
        let mut responses = HashMap::new();
        responses.insert(
            PING_QUERY.to_owned(),
            MockResponse::rows(vec![MockColumn::int("1")], vec![vec![HdbValue::Int(1)]]),
        );
        let mut users = HashMap::new();
        users.insert("SYSTEM".to_owned(), "manager".to_owned());
        Self {
            config: MockServerConfig {
                responses,
                statements: HashMap::new(),
                default_response: None,
                delays: HashMap::new(),
                users,
                tokens: HashMap::new(),
                certificates: Vec::new(),
                database: "HXE".into(),
                full_version: "2.00.076.00.1705400033".into(),
                tenants: HashMap::new(),
                lob_prefetch: 1024,
                pbkdf2_rounds: 1000,
                reject_lob_reads: false,
            },
        }
    }

    /// Add a response for a SQL statement.
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.config.responses.insert(normalize(&sql.into()), response);
        self
    }

    /// Set the default response for unmatched statements.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = Some(response);
        self
    }

    /// Declare the parameters and response of a statement.
    pub fn with_statement(mut self, sql: impl Into<String>, statement: MockStatement) -> Self {
        self.config.statements.insert(normalize(&sql.into()), statement);
        self
    }

    /// Hold the reply to a statement back for `delay`.
    pub fn with_delay(mut self, sql: impl Into<String>, delay: Duration) -> Self {
        self.config.delays.insert(normalize(&sql.into()), delay);
        self
    }

    /// Accept a user with a password.
    pub fn with_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.users.insert(user.into(), password.into());
        self
    }

    /// Accept a JWT token for a logon name.
    pub fn with_jwt(mut self, token: impl Into<String>, logon_name: impl Into<String>) -> Self {
        self.config.tokens.insert(token.into(), logon_name.into());
        self
    }

    /// Accept client certificates signed by a key for a logon name.
    pub fn with_x509(mut self, public_key: RsaPublicKey, logon_name: impl Into<String>) -> Self {
        self.config.certificates.push((public_key, logon_name.into()));
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.config.database = db.into();
        self
    }

    /// Set the full version string.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.config.full_version = version.into();
        self
    }

    /// Serve a tenant database lookup with another host.
    pub fn with_tenant(mut self, name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        self.config
            .tenants
            .insert(name.into().to_uppercase(), (host.into(), port));
        self
    }

    /// Set how much of a LOB is sent with its row.
    pub fn with_lob_prefetch(mut self, units: usize) -> Self {
        self.config.lob_prefetch = units;
        self
    }

    /// Set the PBKDF2 iteration count.
    pub fn with_pbkdf2_rounds(mut self, rounds: u32) -> Self {
        self.config.pbkdf2_rounds = rounds;
        self
    }

    /// Reject LOB reads as a server does while another statement runs.
    pub fn reject_lob_reads(mut self, reject: bool) -> Self {
        self.config.reject_lob_reads = reject;
        self
    }

    /// Build and start the mock server.
    pub async fn build(self) -> Result<MockHdbServer> {
        MockHdbServer::start(self.config).await
    }
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Key under which statements are matched: whitespace collapsed, uppercase.
fn normalize(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// A request as the server received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Session id from the message header.
    pub session_id: i64,
    /// Message kind.
    pub kind: MessageKind,
    /// Auto-commit flag.
    pub commit: bool,
    /// Decoded parts.
    pub parts: Vec<Part>,
}

impl RecordedRequest {
    /// SQL text of the request, if any.
    pub fn command(&self) -> Option<String> {
        self.parts.iter().find_map(|part| match part {
            Part::Command(sql) => Some(String::from_utf8_lossy(sql).into_owned()),
            _ => None,
        })
    }

    /// Number of input parameter rows, if any.
    pub fn input_rows(&self) -> Option<usize> {
        self.parts.iter().find_map(|part| match part {
            Part::InputParameters(data) => Some(data.rows),
            _ => None,
        })
    }

    /// Whether the request carries a part of this kind.
    pub fn has_part(&self, kind: hdb_protocol::PartKind) -> bool {
        self.parts.iter().any(|part| part.kind() == kind.raw())
    }
}

/// State shared by the accept loop and all connections.
pub(crate) struct ServerState {
    pub(crate) config: MockServerConfig,
    addr: SocketAddr,
    connection_count: AtomicUsize,
    accepted: AtomicUsize,
    next_session_id: AtomicI64,
    cookies: Mutex<HashMap<Bytes, String>>,
    requests: Mutex<Vec<RecordedRequest>>,
    written_lobs: Mutex<Vec<Bytes>>,
    kill_tx: broadcast::Sender<()>,
}

impl ServerState {
    /// Logon name of the cookie `data` starts with.
    pub(crate) fn cookie_owner(&self, data: &[u8]) -> Option<String> {
        self.cookies
            .lock()
            .iter()
            .find(|(cookie, _)| !cookie.is_empty() && data.starts_with(cookie))
            .map(|(_, logon_name)| logon_name.clone())
    }

    /// Issue a new session cookie for a logon name.
    pub(crate) fn mint_cookie(&self, logon_name: &str) -> Bytes {
        let cookie = server_auth::new_cookie();
        self.cookies.lock().insert(cookie.clone(), logon_name.to_owned());
        cookie
    }

    fn record(&self, request: RecordedRequest) {
        self.requests.lock().push(request);
    }

    fn store_lob(&self, data: Bytes) {
        self.written_lobs.lock().push(data);
    }

    fn response(&self, sql: &str) -> MockResponse {
        let key = normalize(sql);
        if let Some(statement) = self.config.statements.get(&key) {
            return statement.response.clone();
        }
        self.config
            .responses
            .get(&key)
            .or(self.config.default_response.as_ref())
            .cloned()
            .unwrap_or_else(MockResponse::empty)
    }

    fn parameters(&self, sql: &str) -> Vec<ParameterField> {
        self.config
            .statements
            .get(&normalize(sql))
            .map(|statement| statement.parameters.clone())
            .unwrap_or_default()
    }

    fn prepared_function_code(&self, sql: &str) -> Option<FunctionCode> {
        self.config
            .statements
            .get(&normalize(sql))
            .and_then(|statement| statement.function_code)
    }

    async fn delay(&self, sql: &str) {
        if let Some(delay) = self.config.delays.get(&normalize(sql)) {
            tokio::time::sleep(*delay).await;
        }
    }
}

/// Mock HDB server.
pub struct MockHdbServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    state: Arc<ServerState>,
}

impl MockHdbServer {
    /// Create a new builder for the mock server.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available port.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let (kill_tx, _) = broadcast::channel(1);
        let state = Arc::new(ServerState {
            config,
            addr,
            connection_count: AtomicUsize::new(0),
            accepted: AtomicUsize::new(0),
            next_session_id: AtomicI64::new(300_001),
            cookies: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            written_lobs: Mutex::new(Vec::new()),
            kill_tx,
        });

        let server = Self {
            addr,
            shutdown_tx: shutdown_tx.clone(),
            state: state.clone(),
        };

        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _peer_addr)) => {
                                let state = state.clone();
                                let kill_rx = state.kill_tx.subscribe();
                                state.accepted.fetch_add(1, Ordering::SeqCst);
                                tokio::spawn(async move {
                                    state.connection_count.fetch_add(1, Ordering::SeqCst);
                                    if let Err(e) = handle_connection(stream, state.clone(), kill_rx).await {
                                        tracing::debug!("Connection error: {}", e);
                                    }
                                    state.connection_count.fetch_sub(1, Ordering::SeqCst);
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Ok(server)
    }

    /// Get the server's listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the host string for connection configuration.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `host:port` as a connector expects it.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Connector for the default user `SYSTEM`.
    pub fn connector(&self) -> Connector {
        Connector::new(self.address(), "SYSTEM", "manager")
    }

    /// Get the number of open connections.
    pub fn connection_count(&self) -> usize {
        self.state.connection_count.load(Ordering::SeqCst)
    }

    /// Get the number of connections accepted since the start.
    pub fn accepted_connections(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// Requests of one kind received so far.
    pub fn requests_of(&self, kind: MessageKind) -> Vec<RecordedRequest> {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|request| request.kind == kind)
            .cloned()
            .collect()
    }

    /// Forget the recorded requests.
    pub fn clear_requests(&self) {
        self.state.requests.lock().clear();
    }

    /// LOBs written completely by clients, in completion order.
    pub fn written_lobs(&self) -> Vec<Bytes> {
        self.state.written_lobs.lock().clone()
    }

    /// Invalidate every session cookie issued so far.
    pub fn revoke_cookies(&self) {
        self.state.cookies.lock().clear();
    }

    /// Close every open connection without a reply.
    pub fn disconnect_all(&self) {
        let _ = self.state.kill_tx.send(());
    }

    /// Stop the server.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        self.disconnect_all();
    }
}

impl Drop for MockHdbServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for MockHdbServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockHdbServer")
            .field("addr", &self.addr)
            .field("database", &self.state.config.database)
            .finish_non_exhaustive()
    }
}

/// Handle a single client connection.
async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<ServerState>,
    mut kill_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let mut prolog = [0u8; PROLOG_REQUEST_SIZE];
    stream.read_exact(&mut prolog).await?;
    let request = decode_prolog_request(&mut ByteReader::new(Bytes::copy_from_slice(&prolog)))?;
    tracing::trace!(?request, "prolog received");

    let mut reply = BytesMut::new();
    PrologReply {
        product_version: (4, 20),
        protocol_version: (4, 1),
    }
    .encode(&mut reply);
    stream.write_all(&reply).await?;
    stream.flush().await?;

    let mut framed = MessageStream::new(stream);
    let mut session = MockSession::new(state);
    loop {
        let message = tokio::select! {
            message = framed.next() => message,
            _ = kill_rx.recv() => break,
        };
        let Some(message) = message else {
            break;
        };
        let message = match message {
            Ok(message) => message,
            Err(CodecError::ConnectionClosed) => break,
            Err(CodecError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        match session.handle(&message).await? {
            Some(reply) => framed.send(&reply).await?,
            None => break,
        }
    }
    Ok(())
}

macro_rules! find_part {
    ($parts:expr, $variant:ident) => {
        $parts.iter().find_map(|part| match part {
            Part::$variant(value) => Some(value),
            _ => None,
        })
    };
}

fn failure(code: i32, text: impl Into<String>) -> Segment {
    Segment::error(ServerErrors(vec![ServerError::new(code, text)]))
}

fn fetch_size(parts: &[Part]) -> usize {
    find_part!(parts, FetchSize)
        .and_then(|size| usize::try_from(*size).ok())
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_FETCH_SIZE)
}

/// An open server-side cursor.
struct Cursor {
    columns: Vec<ResultField>,
    rows: VecDeque<Vec<HdbValue>>,
    failure: Option<ServerError>,
}

impl Cursor {
    fn is_done(&self) -> bool {
        self.rows.is_empty() && self.failure.is_none()
    }
}

#[derive(Clone)]
struct PreparedStatement {
    sql: String,
    parameters: Vec<ParameterField>,
    response: MockResponse,
}

/// A LOB the client can read piecewise.
struct StoredLob {
    char_based: bool,
    data: Bytes,
}

/// Byte range of `count` units starting at unit `start`.
///
/// Character LOBs count CESU-8 characters, binary LOBs count bytes.
fn unit_range(data: &[u8], start: usize, count: usize, char_based: bool) -> std::ops::Range<usize> {
    if !char_based {
        let begin = start.min(data.len());
        return begin..begin.saturating_add(count).min(data.len());
    }
    let mut boundaries: Vec<usize> = data
        .iter()
        .enumerate()
        .filter(|(_, b)| **b & 0xC0 != 0x80)
        .map(|(i, _)| i)
        .collect();
    boundaries.push(data.len());
    let at = |unit: usize| boundaries.get(unit).copied().unwrap_or(data.len());
    at(start)..at(start.saturating_add(count))
}

fn char_count(data: &[u8]) -> usize {
    data.iter().filter(|b| **b & 0xC0 != 0x80).count()
}

/// Per-connection protocol state.
struct MockSession {
    state: Arc<ServerState>,
    session_id: i64,
    user: Option<String>,
    challenge: Option<Challenge>,
    ctx: ConvContext,
    next_id: u64,
    statements: HashMap<u64, PreparedStatement>,
    cursors: HashMap<u64, Cursor>,
    lobs: HashMap<LocatorId, StoredLob>,
    writes: HashMap<LocatorId, BytesMut>,
}

impl MockSession {
    fn new(state: Arc<ServerState>) -> Self {
        Self {
            state,
            session_id: 0,
            user: None,
            challenge: None,
            ctx: ConvContext::with_dfv(DEFAULT_DFV),
            next_id: 1,
            statements: HashMap::new(),
            cursors: HashMap::new(),
            lobs: HashMap::new(),
            writes: HashMap::new(),
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Answer one request; `None` ends the connection.
    async fn handle(&mut self, message: &RawMessage) -> Result<Option<Message>> {
        let Some(segment) = message.segments.first() else {
            return Err(MockServerError::Protocol("message without segments".into()));
        };
        let Some(kind) = segment.header.message_kind() else {
            return Err(MockServerError::Protocol("reply segment sent to server".into()));
        };
        let commit = matches!(segment.header.body, SegmentBody::Request { commit: true, .. });
        let parts = message
            .segments
            .iter()
            .flat_map(|segment| &segment.parts)
            .map(|part| part.decode())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        tracing::trace!(?kind, parts = parts.len(), "request received");
        self.state.record(RecordedRequest {
            session_id: message.header.session_id,
            kind,
            commit,
            parts: parts.clone(),
        });

        let reply = match kind {
            MessageKind::Authenticate => self.authenticate(&parts),
            MessageKind::Connect => self.connect(&parts),
            MessageKind::Disconnect => return Ok(None),
            _ if self.user.is_none() => failure(SESSION_NOT_CONNECTED, "session not connected"),
            MessageKind::ExecuteDirect => self.execute_direct(&parts).await?,
            MessageKind::Prepare => self.prepare(&parts)?,
            MessageKind::Execute => self.execute(&parts).await?,
            MessageKind::FetchNext => self.fetch_next(&parts)?,
            MessageKind::CloseResultset => self.close_resultset(&parts),
            MessageKind::DropStatementId => self.drop_statement(&parts),
            MessageKind::ReadLob => self.read_lob(&parts),
            MessageKind::WriteLob => self.write_lob(&parts),
            MessageKind::Commit => Segment::reply(FunctionCode::Commit).with_part(
                Part::TransactionFlags(Options::new().with(TransactionFlag::Committed, OptionValue::Bool(true))),
            ),
            MessageKind::Rollback => Segment::reply(FunctionCode::Rollback).with_part(
                Part::TransactionFlags(Options::new().with(TransactionFlag::RolledBack, OptionValue::Bool(true))),
            ),
            MessageKind::DbConnectInfo => self.db_connect_info(&parts),
        };
        Ok(Some(Message::new(
            self.session_id,
            message.header.packet_count,
            vec![reply],
        )))
    }

    fn authenticate(&mut self, parts: &[Part]) -> Segment {
        let Some(fields) = find_part!(parts, Authentication) else {
            return failure(server_auth::AUTHENTICATION_FAILED, "authentication part missing");
        };
        match server_auth::initial(&self.state, fields) {
            Ok((challenge, reply)) => {
                self.challenge = Some(challenge);
                Segment::reply(FunctionCode::Nil).with_part(Part::Authentication(reply))
            }
            Err(err) => {
                tracing::debug!(error = %err.text, "initial authentication rejected");
                Segment::error(ServerErrors(vec![err]))
            }
        }
    }

    fn connect(&mut self, parts: &[Part]) -> Segment {
        let Some(challenge) = self.challenge.take() else {
            return failure(server_auth::AUTHENTICATION_FAILED, "connect before authenticate");
        };
        let Some(fields) = find_part!(parts, Authentication) else {
            return failure(server_auth::AUTHENTICATION_FAILED, "authentication part missing");
        };
        let (user, auth_reply): (String, AuthFields) =
            match server_auth::finish(&self.state, challenge, fields) {
                Ok(done) => done,
                Err(err) => {
                    tracing::debug!(error = %err.text, "final authentication rejected");
                    return Segment::error(ServerErrors(vec![err]));
                }
            };

        if self.session_id == 0 {
            self.session_id = self.state.next_session_id.fetch_add(1, Ordering::SeqCst);
        }
        let dfv = find_part!(parts, ConnectOptions)
            .and_then(|options| {
                options
                    .get(ConnectOption::DataFormatVersion2)
                    .or_else(|| options.get(ConnectOption::DataFormatVersion))
            })
            .and_then(OptionValue::as_i64)
            .and_then(|dfv| i32::try_from(dfv).ok())
            .unwrap_or(DEFAULT_DFV);
        self.ctx = ConvContext::with_dfv(dfv);
        tracing::debug!(session_id = self.session_id, user = %user, dfv, "mock session connected");
        self.user = Some(user);

        let connection_id = i32::try_from(self.session_id).unwrap_or(i32::MAX);
        let options = Options::new()
            .with(ConnectOption::ConnectionId, OptionValue::Int(connection_id))
            .with(ConnectOption::DataFormatVersion2, OptionValue::Int(dfv))
            .with(ConnectOption::SupportsLargeBulkOperations, OptionValue::Bool(true))
            .with(
                ConnectOption::FullVersionString,
                OptionValue::String(self.state.config.full_version.clone()),
            )
            .with(
                ConnectOption::DatabaseName,
                OptionValue::String(self.state.config.database.clone()),
            );
        Segment::reply(FunctionCode::Connect)
            .with_part(Part::Authentication(auth_reply))
            .with_part(Part::ConnectOptions(options))
    }

    fn sql(&self, parts: &[Part]) -> Result<Option<String>> {
        match find_part!(parts, Command) {
            Some(command) => Ok(Some(self.ctx.cesu8.decode(command)?)),
            None => Ok(None),
        }
    }

    async fn execute_direct(&mut self, parts: &[Part]) -> Result<Segment> {
        let Some(sql) = self.sql(parts)? else {
            return Ok(failure(INVALID_ID, "command part missing"));
        };
        let started = Instant::now();
        self.state.delay(&sql).await;
        let response = self.state.response(&sql);
        self.respond(&sql, response, &[], 1, fetch_size(parts), started)
    }

    fn prepare(&mut self, parts: &[Part]) -> Result<Segment> {
        let Some(sql) = self.sql(parts)? else {
            return Ok(failure(INVALID_ID, "command part missing"));
        };
        let response = self.state.response(&sql).resolve(&sql);
        if let MockResponse::Error { code, message } = &response {
            return Ok(failure(*code, message.clone()));
        }
        let parameters = self.state.parameters(&sql);
        let function_code = self
            .state
            .prepared_function_code(&sql)
            .unwrap_or_else(|| response.function_code(&sql));
        let columns = match &response {
            MockResponse::Rows { columns, .. } | MockResponse::FetchError { columns, .. } => {
                result_fields(columns)
            }
            _ => Vec::new(),
        };

        let stmt_id = self.next_id();
        tracing::debug!(stmt_id, sql = %sql, "statement prepared");
        self.statements.insert(
            stmt_id,
            PreparedStatement {
                sql,
                parameters: parameters.clone(),
                response,
            },
        );

        let mut segment = Segment::reply(function_code).with_part(Part::StatementId(stmt_id));
        if !parameters.is_empty() {
            segment = segment.with_part(Part::ParameterMetadata(ParameterMetadata(parameters)));
        }
        if !columns.is_empty() {
            segment = segment.with_part(Part::ResultMetadata(ResultMetadata(columns)));
        }
        Ok(segment)
    }

    async fn execute(&mut self, parts: &[Part]) -> Result<Segment> {
        let Some(stmt_id) = find_part!(parts, StatementId) else {
            return Ok(failure(INVALID_ID, "statement id part missing"));
        };
        let Some(statement) = self.statements.get(stmt_id).cloned() else {
            return Ok(failure(INVALID_ID, format!("invalid statement id {stmt_id}")));
        };
        let started = Instant::now();
        self.state.delay(&statement.sql).await;

        let inputs = statement
            .parameters
            .iter()
            .filter(|p| p.mode.is_input())
            .count();
        let (rows, values) = match find_part!(parts, InputParameters) {
            Some(data) => (
                data.rows,
                decode_input_rows(&data.data, data.rows, inputs, &self.ctx)?,
            ),
            None => (1, Vec::new()),
        };

        let mut locators = Vec::new();
        for value in values.iter().flatten() {
            if let HdbValue::Lob(lob) = value {
                if lob.options.is_last_data() {
                    self.state.store_lob(lob.data.clone());
                } else {
                    let locator = self.next_id();
                    self.writes.insert(locator, BytesMut::from(&lob.data[..]));
                    locators.push(locator);
                }
            }
        }

        let segment = self.respond(
            &statement.sql,
            statement.response,
            &statement.parameters,
            rows,
            fetch_size(parts),
            started,
        )?;
        if locators.is_empty() || segment.header.kind == SegmentKind::Error {
            return Ok(segment);
        }
        tracing::debug!(locators = locators.len(), "awaiting LOB data");
        Ok(segment.with_part(Part::WriteLobReply(WriteLobReply(locators))))
    }

    fn respond(
        &mut self,
        sql: &str,
        response: MockResponse,
        parameters: &[ParameterField],
        rows: usize,
        fetch_size: usize,
        started: Instant,
    ) -> Result<Segment> {
        let function_code = response.function_code(sql);
        let segment = match response {
            MockResponse::Custom(f) => {
                let response = f(sql);
                return self.respond(sql, response, parameters, rows, fetch_size, started);
            }
            MockResponse::Error { code, message } => return Ok(failure(code, message)),
            MockResponse::RowsAffected(count) => {
                Segment::reply(function_code).with_part(Part::RowsAffected(vec![count; rows.max(1)]))
            }
            MockResponse::Rows { columns, rows } => {
                let segment = Segment::reply(function_code);
                self.open_cursor(segment, &columns, rows, None, fetch_size)?
            }
            MockResponse::FetchError {
                columns,
                rows,
                code,
                message,
            } => {
                let segment = Segment::reply(function_code);
                let failure = ServerError::new(code, message);
                self.open_cursor(segment, &columns, rows, Some(failure), fetch_size)?
            }
            MockResponse::Call { output, tables } => {
                let fields: Vec<&ParameterField> =
                    parameters.iter().filter(|p| p.mode.is_output()).collect();
                if output.len() != fields.len() {
                    return Err(MockServerError::Protocol(format!(
                        "{} output values for {} output parameters",
                        output.len(),
                        fields.len()
                    )));
                }
                let mut buf = BytesMut::new();
                for (value, field) in output.iter().zip(&fields) {
                    encode_result(value, field.type_code, field.fraction, &self.ctx, &mut buf)?;
                }
                let mut segment = Segment::reply(function_code)
                    .with_part(Part::OutputParameters(RowData::new(1, buf.freeze())));
                for table in tables {
                    segment = self.open_cursor(segment, &table.columns, table.rows, None, usize::MAX)?;
                }
                segment
            }
        };
        let micros = i64::try_from(started.elapsed().as_micros()).unwrap_or(i64::MAX);
        Ok(segment.with_part(Part::StatementContext(
            Options::new().with(StatementContextOption::ServerExecutionTime, OptionValue::Bigint(micros)),
        )))
    }

    /// Append a result set to `segment`, keeping the cursor open if rows
    /// remain.
    fn open_cursor(
        &mut self,
        segment: Segment,
        columns: &[MockColumn],
        rows: Vec<Vec<HdbValue>>,
        failure: Option<ServerError>,
        fetch_size: usize,
    ) -> Result<Segment> {
        let resultset_id = self.next_id();
        let mut cursor = Cursor {
            columns: result_fields(columns),
            rows: rows.into(),
            failure,
        };
        let data = self.next_batch(&mut cursor, fetch_size)?;
        let segment = segment
            .with_part(Part::ResultMetadata(ResultMetadata(cursor.columns.clone())))
            .with_part(Part::ResultsetId(resultset_id))
            .with_part(Part::Resultset(data));
        if !cursor.is_done() {
            self.cursors.insert(resultset_id, cursor);
        }
        Ok(segment)
    }

    /// Encode up to `fetch_size` rows of a cursor.
    fn next_batch(&mut self, cursor: &mut Cursor, fetch_size: usize) -> Result<RowData> {
        let count = fetch_size.min(cursor.rows.len());
        let mut buf = BytesMut::new();
        for row in cursor.rows.drain(..count).collect::<Vec<_>>() {
            if row.len() != cursor.columns.len() {
                return Err(MockServerError::Protocol(format!(
                    "row with {} values for {} columns",
                    row.len(),
                    cursor.columns.len()
                )));
            }
            for (value, field) in row.iter().zip(&cursor.columns) {
                let value = if field.type_code.is_lob() {
                    self.lob_value(value, field.type_code)?
                } else {
                    value.clone()
                };
                encode_result(&value, field.type_code, field.fraction, &self.ctx, &mut buf)?;
            }
        }
        let attributes = if cursor.is_done() {
            PartAttributes::LAST_PACKET | PartAttributes::RESULTSET_CLOSED
        } else {
            PartAttributes::empty()
        };
        Ok(RowData::new(count, buf.freeze()).with_attributes(attributes))
    }

    /// Turn a configured LOB column value into a locator with prefetched data.
    fn lob_value(&mut self, value: &HdbValue, type_code: TypeCode) -> Result<HdbValue> {
        let data = match value {
            HdbValue::Null | HdbValue::Lob(_) => return Ok(value.clone()),
            HdbValue::Binary(data) => data.clone(),
            HdbValue::String(s) => Bytes::from(self.ctx.cesu8.encode(s)),
            other => {
                return Err(MockServerError::Protocol(format!(
                    "{other:?} in LOB column"
                )));
            }
        };
        let char_based = type_code.is_char_based_lob();
        let range = unit_range(&data, 0, self.state.config.lob_prefetch, char_based);
        let complete = range.end == data.len();
        let char_len = if char_based {
            char_count(&data)
        } else {
            data.len()
        };
        let locator = self.next_id();
        let mut options = LobOptions::DATA_INCLUDED;
        if complete {
            options |= LobOptions::LAST_DATA;
        }
        let prefetched = data.slice(range);
        let byte_len = data.len();
        if !complete {
            self.lobs.insert(locator, StoredLob { char_based, data });
        }
        Ok(HdbValue::Lob(LobLocator {
            type_code,
            options,
            char_len: i64::try_from(char_len).unwrap_or(i64::MAX),
            byte_len: i64::try_from(byte_len).unwrap_or(i64::MAX),
            locator,
            data: prefetched,
        }))
    }

    fn fetch_next(&mut self, parts: &[Part]) -> Result<Segment> {
        let Some(resultset_id) = find_part!(parts, ResultsetId).copied() else {
            return Ok(failure(INVALID_ID, "resultset id part missing"));
        };
        let Some(mut cursor) = self.cursors.remove(&resultset_id) else {
            return Ok(failure(INVALID_ID, format!("invalid resultset id {resultset_id}")));
        };
        if cursor.rows.is_empty() {
            if let Some(err) = cursor.failure.take() {
                tracing::debug!(resultset_id, code = err.code, "failing fetch");
                return Ok(Segment::error(ServerErrors(vec![err])));
            }
        }
        let data = self.next_batch(&mut cursor, fetch_size(parts))?;
        if !cursor.is_done() {
            self.cursors.insert(resultset_id, cursor);
        }
        Ok(Segment::reply(FunctionCode::Fetch).with_part(Part::Resultset(data)))
    }

    fn close_resultset(&mut self, parts: &[Part]) -> Segment {
        let Some(resultset_id) = find_part!(parts, ResultsetId) else {
            return failure(INVALID_ID, "resultset id part missing");
        };
        if self.cursors.remove(resultset_id).is_none() {
            return failure(INVALID_ID, format!("invalid resultset id {resultset_id}"));
        }
        Segment::reply(FunctionCode::CloseCursor)
    }

    fn drop_statement(&mut self, parts: &[Part]) -> Segment {
        let Some(stmt_id) = find_part!(parts, StatementId) else {
            return failure(INVALID_ID, "statement id part missing");
        };
        if self.statements.remove(stmt_id).is_none() {
            return failure(INVALID_ID, format!("invalid statement id {stmt_id}"));
        }
        Segment::reply(FunctionCode::Nil)
    }

    fn read_lob(&mut self, parts: &[Part]) -> Segment {
        if self.state.config.reject_lob_reads {
            return failure(WHILE_PARSING_PROTOCOL, "error while parsing protocol");
        }
        let Some(request) = find_part!(parts, ReadLobRequest) else {
            return failure(INVALID_ID, "read lob request part missing");
        };
        let Some(lob) = self.lobs.get(&request.locator) else {
            return failure(INVALID_ID, format!("invalid locator {}", request.locator));
        };
        let start = usize::try_from(request.offset.saturating_sub(1)).unwrap_or(0);
        let count = usize::try_from(request.length).unwrap_or(0);
        let range = unit_range(&lob.data, start, count, lob.char_based);
        let last = range.end == lob.data.len();
        let data = lob.data.slice(range);
        let mut options = LobOptions::DATA_INCLUDED;
        if last {
            options |= LobOptions::LAST_DATA;
            self.lobs.remove(&request.locator);
        }
        Segment::reply(FunctionCode::ReadLob).with_part(Part::ReadLobReply(ReadLobReply {
            locator: request.locator,
            options,
            data,
        }))
    }

    fn write_lob(&mut self, parts: &[Part]) -> Segment {
        let Some(request) = find_part!(parts, WriteLobRequest) else {
            return failure(INVALID_ID, "write lob request part missing");
        };
        let mut written = Vec::with_capacity(request.0.len());
        for chunk in &request.0 {
            let Some(buf) = self.writes.get_mut(&chunk.locator) else {
                return failure(INVALID_ID, format!("invalid locator {}", chunk.locator));
            };
            buf.extend_from_slice(&chunk.data);
            written.push(chunk.locator);
            if chunk.options.is_last_data() {
                if let Some(buf) = self.writes.remove(&chunk.locator) {
                    tracing::debug!(locator = chunk.locator, len = buf.len(), "LOB complete");
                    self.state.store_lob(buf.freeze());
                }
            }
        }
        Segment::reply(FunctionCode::WriteLob).with_part(Part::WriteLobReply(WriteLobReply(written)))
    }

    fn db_connect_info(&mut self, parts: &[Part]) -> Segment {
        let name = find_part!(parts, DbConnectInfo)
            .and_then(|options| options.get(DbConnectInfoOption::DatabaseName))
            .and_then(OptionValue::as_str)
            .unwrap_or_default()
            .to_uppercase();
        let config = &self.state.config;
        let (host, port, is_connected) = if name == config.database.to_uppercase() {
            (self.state.addr.ip().to_string(), self.state.addr.port(), true)
        } else if let Some((host, port)) = config.tenants.get(&name) {
            (host.clone(), *port, false)
        } else {
            return failure(UNKNOWN_DATABASE, format!("database {name} not found"));
        };
        let options = Options::new()
            .with(DbConnectInfoOption::DatabaseName, OptionValue::String(name))
            .with(DbConnectInfoOption::Host, OptionValue::String(host))
            .with(DbConnectInfoOption::Port, OptionValue::Int(i32::from(port)))
            .with(DbConnectInfoOption::IsConnected, OptionValue::Bool(is_connected));
        Segment::reply(FunctionCode::Nil).with_part(Part::DbConnectInfo(options))
    }
}
