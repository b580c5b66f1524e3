//! Prepared statements.

use hdb_types::{HdbValue, ToHdb};

use crate::error::{Error, Result};
use crate::result::ExecResult;
use crate::rows::{CallResult, SessionRef, Rows};
use crate::session::{Outcome, Package, Prepared, Session, StmtMetadata};
use crate::stats;

/// Converts positional arguments to values.
pub(crate) fn to_values(args: &[&(dyn ToHdb + Sync)]) -> Result<Vec<HdbValue>> {
    args.iter().map(|arg| arg.to_hdb().map_err(Error::from)).collect()
}

/// Argument of [`Statement::exec_bulk`].
#[derive(Clone, Copy)]
pub enum BulkArgs<'a> {
    /// Buffer the row; the buffer is sent once it reaches the bulk size.
    NoFlush(&'a [&'a (dyn ToHdb + Sync)]),
    /// Buffer the row, if any, and send the buffer.
    Flush(&'a [&'a (dyn ToHdb + Sync)]),
}

/// Source of rows for [`Statement::exec_fct`].
///
/// Returning [`Error::EndOfRows`] ends the input; any other error aborts
/// the execution.
pub trait RowProducer: Send {
    /// Produce the next row.
    fn next_row(&mut self) -> Result<Vec<HdbValue>>;
}

impl<F> RowProducer for F
where
    F: FnMut() -> Result<Vec<HdbValue>> + Send,
{
    fn next_row(&mut self) -> Result<Vec<HdbValue>> {
        self()
    }
}

/// A statement prepared on the server.
///
/// The statement is dropped on the server by [`close`](Self::close), or
/// with the next request of the session when the handle is dropped.
#[derive(Debug)]
pub struct Statement {
    ctx: SessionRef,
    prepared: Prepared,
    sql: String,
    bulk_size: usize,
    bulk: Vec<Vec<HdbValue>>,
    closed: bool,
}

impl Statement {
    pub(crate) fn new(ctx: SessionRef, session: &Session, prepared: Prepared, sql: &str) -> Self {
        ctx.pending.lock().live_statements += 1;
        stats::add_statements(1);
        Self {
            ctx,
            prepared,
            sql: sql.to_owned(),
            bulk_size: session.attrs().bulk_size(),
            bulk: Vec::new(),
            closed: false,
        }
    }

    /// SQL text the statement was prepared from.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of input parameters.
    #[must_use]
    pub fn num_input(&self) -> usize {
        self.prepared.input.len()
    }

    /// Parameter and result descriptors.
    #[must_use]
    pub fn metadata(&self) -> &StmtMetadata {
        &self.prepared.metadata
    }

    /// Whether the statement is a procedure call.
    #[must_use]
    pub fn is_call(&self) -> bool {
        self.prepared.is_call()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Config("statement is closed".into()))
        } else {
            Ok(())
        }
    }

    fn check_row(&self, row: &[HdbValue]) -> Result<()> {
        if row.len() == self.num_input() {
            Ok(())
        } else {
            Err(Error::InvalidArgCount {
                got: row.len(),
                expected: self.num_input(),
            })
        }
    }

    /// Execute the statement.
    ///
    /// With as many arguments as input parameters the statement runs once.
    /// A multiple of that count runs it once per row of arguments, sent in
    /// packages of at most the bulk size.
    pub async fn exec(&mut self, args: &[&(dyn ToHdb + Sync)]) -> Result<ExecResult> {
        let values = to_values(args)?;
        let n = self.num_input();
        if self.is_call() {
            self.check_row(&values)?;
            self.call_values(values).await?;
            return Ok(ExecResult::default());
        }
        match values.len() {
            got if got == n => self.exec_many(vec![values]).await,
            got if n > 0 && got > 0 && got % n == 0 => {
                let rows = values.chunks(n).map(<[HdbValue]>::to_vec).collect();
                self.exec_many(rows).await
            }
            got => Err(Error::InvalidArgCount { got, expected: n }),
        }
    }

    /// Execute once per row.
    pub async fn exec_many(&mut self, rows: Vec<Vec<HdbValue>>) -> Result<ExecResult> {
        self.exec_seq(rows).await
    }

    /// Execute once per row of an iterator.
    pub async fn exec_seq<I>(&mut self, rows: I) -> Result<ExecResult>
    where
        I: IntoIterator<Item = Vec<HdbValue>>,
        I::IntoIter: Send,
    {
        self.exec_rows(rows.into_iter().map(Ok)).await
    }

    /// Execute once per row a producer returns, until it returns
    /// [`Error::EndOfRows`].
    pub async fn exec_fct<P: RowProducer>(&mut self, mut producer: P) -> Result<ExecResult> {
        let rows = std::iter::from_fn(move || match producer.next_row() {
            Err(Error::EndOfRows) => None,
            other => Some(other),
        });
        self.exec_rows(rows).await
    }

    /// Buffer rows and send them in one go.
    ///
    /// Buffered rows are discarded when the statement is closed.
    pub async fn exec_bulk(&mut self, args: BulkArgs<'_>) -> Result<ExecResult> {
        let (args, flush) = match args {
            BulkArgs::NoFlush(args) => (args, false),
            BulkArgs::Flush(args) => (args, true),
        };
        if !args.is_empty() || !flush {
            let row = to_values(args)?;
            self.check_row(&row)?;
            self.bulk.push(row);
        }
        if flush || self.bulk.len() >= self.bulk_size {
            let rows = std::mem::take(&mut self.bulk);
            if rows.is_empty() {
                return Ok(ExecResult::default());
            }
            return self.exec_seq(rows).await;
        }
        Ok(ExecResult::default())
    }

    async fn exec_rows<I>(&mut self, rows: I) -> Result<ExecResult>
    where
        I: Iterator<Item = Result<Vec<HdbValue>>> + Send,
    {
        self.check_open()?;
        let mut session = self.ctx.session.lock().await;
        let limit = session.bulk_limit();
        let mut total = ExecResult::default();
        let mut package = Package::default();
        for row in rows {
            let row = row?;
            self.check_row(&row)?;
            let must_flush = session.encode_row(&mut package, &self.prepared.input, &row)?;
            if must_flush || package.rows() >= limit {
                tracing::debug!(rows = package.rows(), "sending package");
                let outcome = session.execute(&self.prepared, std::mem::take(&mut package)).await?;
                total.extend(session.discard(outcome));
            }
        }
        if !package.is_empty() {
            let outcome = session.execute(&self.prepared, package).await?;
            total.extend(session.discard(outcome));
        }
        Ok(total)
    }

    async fn execute_once(&mut self, values: Vec<HdbValue>) -> Result<(Outcome, SessionRef)> {
        self.check_open()?;
        self.check_row(&values)?;
        let mut session = self.ctx.session.lock().await;
        let mut package = Package::default();
        session.encode_row(&mut package, &self.prepared.input, &values)?;
        let outcome = session.execute(&self.prepared, package).await?;
        Ok((outcome, self.ctx.clone()))
    }

    /// Run the statement as a query.
    pub async fn query(&mut self, args: &[&(dyn ToHdb + Sync)]) -> Result<Rows> {
        let values = to_values(args)?;
        let (outcome, ctx) = self.execute_once(values).await?;
        Ok(rows_of(ctx, outcome))
    }

    /// Run the statement as a procedure call.
    pub async fn call(&mut self, args: &[&(dyn ToHdb + Sync)]) -> Result<CallResult> {
        let values = to_values(args)?;
        self.call_values(values).await
    }

    async fn call_values(&mut self, values: Vec<HdbValue>) -> Result<CallResult> {
        let (outcome, ctx) = self.execute_once(values).await?;
        Ok(call_result_of(ctx, outcome))
    }

    /// Drop the statement on the server.
    pub async fn close(mut self) -> Result<()> {
        self.release();
        let mut session = self.ctx.session.lock().await;
        session.drop_statement(self.prepared.stmt_id).await
    }

    fn release(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.bulk.clear();
        let mut pending = self.ctx.pending.lock();
        pending.live_statements = pending.live_statements.saturating_sub(1);
        stats::add_statements(-1);
        true
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if self.release() {
            self.ctx.pending.lock().drop_statements.push(self.prepared.stmt_id);
        }
    }
}

/// Rows of a query outcome; statements without a result set yield an empty
/// cursor.
pub(crate) fn rows_of(ctx: SessionRef, outcome: Outcome) -> Rows {
    match outcome {
        Outcome::Query(cursor) => Rows::new(ctx, cursor),
        Outcome::Exec(_) => Rows::empty(ctx),
        Outcome::Call { tables, .. } => {
            // further tables are closed when dropped
            let mut tables: Vec<Rows> = tables.into_iter().map(|t| Rows::new(ctx.clone(), t)).collect();
            if tables.is_empty() {
                Rows::empty(ctx)
            } else {
                tables.swap_remove(0)
            }
        }
    }
}

pub(crate) fn call_result_of(ctx: SessionRef, outcome: Outcome) -> CallResult {
    match outcome {
        Outcome::Call {
            output,
            output_fields,
            tables,
        } => {
            let tables = tables.into_iter().map(|t| Rows::new(ctx.clone(), t)).collect();
            CallResult::new(ctx, output, output_fields, tables)
        }
        Outcome::Query(cursor) => {
            let table = Rows::new(ctx.clone(), cursor);
            CallResult::new(ctx, Vec::new(), Vec::new(), vec![table])
        }
        Outcome::Exec(_) => CallResult::new(ctx, Vec::new(), Vec::new(), Vec::new()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_to_values() {
        let name = "x".to_owned();
        let args: [&(dyn ToHdb + Sync); 3] = [&1i32, &name, &None::<i64>];
        let values = to_values(&args).unwrap();
        assert_eq!(
            values,
            vec![HdbValue::Int(1), HdbValue::String("x".into()), HdbValue::Null]
        );
    }

    #[test]
    fn test_closure_row_producer() {
        let mut n = 0;
        let mut producer = move || {
            n += 1;
            if n > 2 {
                Err(Error::EndOfRows)
            } else {
                Ok(vec![HdbValue::Int(n)])
            }
        };
        assert_eq!(producer.next_row().unwrap(), vec![HdbValue::Int(1)]);
        assert_eq!(producer.next_row().unwrap(), vec![HdbValue::Int(2)]);
        assert!(matches!(producer.next_row(), Err(Error::EndOfRows)));
    }
}
