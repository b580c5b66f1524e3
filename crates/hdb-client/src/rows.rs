//! Result set cursors and procedure call results.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hdb_protocol::{Cesu8Transformer, ParameterField, ResultField, ServerError};
use hdb_types::{FromHdb, HdbValue, LobLocator, TypeError};

use crate::error::{Error, Result, ServerErrors};
use crate::lob::LobReader;
use crate::row::Row;
use crate::session::{Batch, CursorInit, PendingState, Session, SharedSession};
use crate::statement::Statement;

/// Handles a cursor, statement or LOB reader keeps to reach its session
/// after the session lock is released.
#[derive(Debug, Clone)]
pub(crate) struct SessionRef {
    pub(crate) session: SharedSession,
    pub(crate) pending: PendingState,
    pub(crate) cesu8: Arc<dyn Cesu8Transformer>,
    pub(crate) lob_chunk_size: i32,
}

impl SessionRef {
    /// Put a fresh session behind its lock.
    pub(crate) fn wrap(session: Session) -> Self {
        let pending = session.pending();
        let cesu8 = Arc::clone(&session.ctx().cesu8);
        let lob_chunk_size = i32::try_from(session.attrs().lob_chunk_size()).unwrap_or(i32::MAX);
        Self {
            session: Arc::new(tokio::sync::Mutex::new(session)),
            pending,
            cesu8,
            lob_chunk_size,
        }
    }
}

/// A server-side cursor over the rows of one result set.
///
/// Rows arrive in batches of the configured fetch size. While a query
/// cursor is open the session rejects other statements with
/// [`Error::NestedQuery`]; the cursor releases the session when it is
/// drained, closed or dropped. Dropping an unfinished cursor schedules
/// the server-side close for the next request.
#[derive(Debug)]
pub struct Rows {
    ctx: SessionRef,
    rs_id: u64,
    columns: Arc<[ResultField]>,
    rows: VecDeque<Vec<HdbValue>>,
    errors: BTreeMap<usize, Vec<ServerError>>,
    index: usize,
    last_packet: bool,
    server_closed: bool,
    closed: Arc<AtomicBool>,
    /// Statement prepared for this cursor alone; dropped after it.
    _statement: Option<Arc<Statement>>,
}

impl Rows {
    pub(crate) fn new(ctx: SessionRef, cursor: CursorInit) -> Self {
        let mut rows = Self {
            ctx,
            rs_id: cursor.rs_id,
            columns: cursor.columns,
            rows: VecDeque::new(),
            errors: BTreeMap::new(),
            index: 0,
            last_packet: false,
            server_closed: false,
            closed: Arc::new(AtomicBool::new(false)),
            _statement: None,
        };
        rows.load(cursor.batch);
        rows
    }

    pub(crate) fn with_statement(mut self, statement: Arc<Statement>) -> Self {
        self._statement = Some(statement);
        self
    }

    /// A cursor without rows, for statements that produced none.
    pub(crate) fn empty(ctx: SessionRef) -> Self {
        Self::new(
            ctx,
            CursorInit {
                rs_id: 0,
                columns: Arc::from(Vec::new()),
                batch: Batch {
                    last_packet: true,
                    closed: true,
                    ..Batch::default()
                },
            },
        )
    }

    fn load(&mut self, batch: Batch) {
        self.rows = batch.rows;
        self.errors = batch.errors;
        self.index = 0;
        self.last_packet = batch.last_packet;
        self.server_closed |= batch.closed;
    }

    /// Column descriptors.
    #[must_use]
    pub fn columns(&self) -> &[ResultField] {
        &self.columns
    }

    /// Whether the cursor is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The next row, fetching the next batch when the current one is
    /// drained. `None` once the result set is exhausted or closed.
    ///
    /// A row the server reported an error for yields that error and closes
    /// the cursor.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        if self.is_closed() {
            return Ok(None);
        }
        loop {
            if let Some(values) = self.rows.pop_front() {
                let index = self.index;
                self.index += 1;
                if let Some(errors) = self.errors.remove(&index) {
                    self.finish();
                    return Err(Error::Server(ServerErrors::new(errors)));
                }
                return Ok(Some(Row::new(Arc::clone(&self.columns), values)));
            }
            if !self.errors.is_empty() {
                let errors = std::mem::take(&mut self.errors).into_values().flatten().collect();
                self.finish();
                return Err(Error::Server(ServerErrors::new(errors)));
            }
            if self.last_packet {
                self.finish();
                return Ok(None);
            }
            let fetched = {
                let mut session = self.ctx.session.lock().await;
                session.fetch_next(self.rs_id, &self.columns).await
            };
            match fetched {
                Ok(batch) => {
                    tracing::trace!(rs_id = self.rs_id, rows = batch.rows.len(), "batch fetched");
                    self.load(batch);
                }
                Err(err) => {
                    self.finish();
                    return Err(err);
                }
            }
        }
    }

    /// Read all remaining rows.
    pub async fn collect_all(mut self) -> Result<Vec<Row>> {
        let mut out = Vec::with_capacity(self.rows.len());
        while let Some(row) = self.next().await? {
            out.push(row);
        }
        Ok(out)
    }

    /// Close the cursor on the server now. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.rows.clear();
        self.ctx.pending.lock().release_cursor(self.rs_id);
        if self.server_closed {
            return Ok(());
        }
        self.server_closed = true;
        let mut session = self.ctx.session.lock().await;
        session.close_resultset(self.rs_id).await
    }

    /// Reader for a LOB column of the current cursor.
    ///
    /// Reads past the data delivered with the row need the cursor to be
    /// open.
    #[must_use]
    pub fn lob_reader(&self, locator: LobLocator) -> LobReader {
        LobReader::new(self.ctx.clone(), Arc::clone(&self.closed), locator)
    }

    /// Mark closed, release the session and schedule the server close.
    fn finish(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.rows.clear();
        let mut pending = self.ctx.pending.lock();
        pending.release_cursor(self.rs_id);
        if !self.server_closed {
            pending.close_resultsets.push(self.rs_id);
            self.server_closed = true;
        }
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Output parameters and result tables of a procedure call.
#[derive(Debug)]
pub struct CallResult {
    ctx: SessionRef,
    output: Vec<HdbValue>,
    fields: Vec<ParameterField>,
    tables: Vec<Rows>,
}

impl CallResult {
    pub(crate) fn new(
        ctx: SessionRef,
        output: Vec<HdbValue>,
        fields: Vec<ParameterField>,
        tables: Vec<Rows>,
    ) -> Self {
        Self {
            ctx,
            output,
            fields,
            tables,
        }
    }

    /// Tie the lifetime of `statement` to the result tables.
    pub(crate) fn with_statement(mut self, statement: Statement) -> Self {
        let statement = Arc::new(statement);
        self.tables = std::mem::take(&mut self.tables)
            .into_iter()
            .map(|t| t.with_statement(Arc::clone(&statement)))
            .collect();
        self
    }

    /// Output parameter values in declaration order.
    #[must_use]
    pub fn output(&self) -> &[HdbValue] {
        &self.output
    }

    /// Output parameter descriptors.
    #[must_use]
    pub fn output_fields(&self) -> &[ParameterField] {
        &self.fields
    }

    /// Output parameter by position, with type conversion.
    pub fn get<T: FromHdb>(&self, index: usize) -> std::result::Result<T, TypeError> {
        self.output
            .get(index)
            .ok_or_else(|| TypeError::TypeMismatch {
                expected: "valid output parameter index",
                actual: format!("index {index} out of bounds"),
            })
            .and_then(T::from_hdb)
    }

    /// Output parameter by name (case-insensitive), with type conversion.
    pub fn get_by_name<T: FromHdb>(&self, name: &str) -> std::result::Result<T, TypeError> {
        let index = self
            .fields
            .iter()
            .position(|f| f.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .ok_or_else(|| TypeError::TypeMismatch {
                expected: "valid output parameter name",
                actual: format!("parameter '{name}' not found"),
            })?;
        self.get(index)
    }

    /// Number of result tables.
    #[must_use]
    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    /// Result table by position.
    pub fn table(&mut self, index: usize) -> Option<&mut Rows> {
        self.tables.get_mut(index)
    }

    /// Consume the result, returning its tables.
    #[must_use]
    pub fn into_tables(self) -> Vec<Rows> {
        self.tables
    }

    /// Reader for a LOB output parameter.
    #[must_use]
    pub fn lob_reader(&self, locator: LobLocator) -> LobReader {
        LobReader::new(self.ctx.clone(), Arc::new(AtomicBool::new(false)), locator)
    }
}
