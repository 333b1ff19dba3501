//! Multi-row inserts split into statements that stay under a parameter ceiling.

use std::ops::Range;

use tracing::debug;

use crate::context::QueryContext;
use crate::error::DbError;
use crate::handle::Db;
use crate::results::DbRow;
use crate::types::RowValues;

/// Most bind parameters one generated statement may carry.
pub const MAX_PARAMETERS: usize = 1000;

/// Receives the rows an insert reads back through `RETURNING`.
pub trait RowConsumer {
    /// # Errors
    /// An error aborts the insert after the current chunk.
    fn consume(&mut self, row: &DbRow) -> Result<(), DbError>;
}

impl<F> RowConsumer for F
where
    F: FnMut(&DbRow) -> Result<(), DbError>,
{
    fn consume(&mut self, row: &DbRow) -> Result<(), DbError> {
        self(row)
    }
}

/// One bulk insert: a table, its columns, and a flat row-major value list.
#[derive(Debug, Clone, Copy)]
pub struct BulkInsert<'a> {
    table: &'a str,
    columns: &'a [&'a str],
    values: &'a [RowValues],
    conflict: Option<&'a str>,
    returning: &'a [&'a str],
}

impl<'a> BulkInsert<'a> {
    #[must_use]
    pub fn new(table: &'a str, columns: &'a [&'a str], values: &'a [RowValues]) -> Self {
        Self {
            table,
            columns,
            values,
            conflict: None,
            returning: &[],
        }
    }

    /// Append `clause` verbatim after the `VALUES` list of every chunk.
    #[must_use]
    pub fn on_conflict(mut self, clause: &'a str) -> Self {
        self.conflict = Some(clause).filter(|c| !c.is_empty());
        self
    }

    /// Read `columns` back for every inserted row.
    #[must_use]
    pub fn returning(mut self, columns: &'a [&'a str]) -> Self {
        self.returning = columns;
        self
    }

    #[must_use]
    pub fn table(&self) -> &str {
        self.table
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.values.len().checked_div(self.columns.len()).unwrap_or(0)
    }

    /// Split the value list into chunk ranges.
    ///
    /// # Errors
    /// See [`chunk_ranges`].
    pub fn chunks(&self) -> Result<Vec<Range<usize>>, DbError> {
        chunk_ranges(self.values.len(), self.columns.len())
    }

    /// Statement text for a chunk of `nvalues` values.
    #[must_use]
    pub fn statement(&self, nvalues: usize) -> String {
        build_insert_query(
            self.table,
            self.columns,
            self.returning,
            nvalues,
            self.conflict,
        )
    }
}

/// Totals reported by a finished bulk insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkInsertOutcome {
    /// Statements sent, one per chunk.
    pub chunks: usize,
    /// Rows the database reports as inserted (rows read back, with `RETURNING`).
    pub rows_affected: u64,
}

/// Largest multiple of `columns` that fits under [`MAX_PARAMETERS`].
///
/// # Errors
/// Returns `DbError::TooManyColumns` when a single row already exceeds the ceiling.
pub fn stride(columns: usize) -> Result<usize, DbError> {
    let stride = MAX_PARAMETERS.checked_div(columns).unwrap_or(0) * columns;
    if stride == 0 {
        return Err(DbError::TooManyColumns {
            columns,
            max: MAX_PARAMETERS,
        });
    }
    Ok(stride)
}

/// Partition `nvalues` values of `columns`-wide rows into consecutive chunks.
///
/// Every chunk except possibly the last has exactly [`stride`] values; all are a
/// multiple of `columns`. No values yields no chunks.
///
/// # Errors
/// Returns `DbError::ArityMismatch` for zero columns or a partial trailing row, and
/// `DbError::TooManyColumns` when one row exceeds the ceiling.
pub fn chunk_ranges(nvalues: usize, columns: usize) -> Result<Vec<Range<usize>>, DbError> {
    if columns == 0 || nvalues % columns != 0 {
        return Err(DbError::ArityMismatch {
            columns,
            values: nvalues,
        });
    }
    let stride = stride(columns)?;
    Ok((0..nvalues)
        .step_by(stride)
        .map(|start| start..(start + stride).min(nvalues))
        .collect())
}

/// Build `INSERT INTO t (a, b) VALUES (?,?), (?,?) [conflict] [RETURNING ...]` for
/// `nvalues` values.
#[must_use]
pub fn build_insert_query(
    table: &str,
    columns: &[&str],
    returning: &[&str],
    nvalues: usize,
    conflict: Option<&str>,
) -> String {
    let rows = nvalues.checked_div(columns.len()).unwrap_or(0);
    let group = format!("({}?)", "?,".repeat(columns.len().saturating_sub(1)));

    let mut sql = format!("INSERT INTO {table} ({}) VALUES ", columns.join(", "));
    sql.push_str(&vec![group.as_str(); rows].join(", "));
    if let Some(clause) = conflict.filter(|c| !c.is_empty()) {
        sql.push(' ');
        sql.push_str(clause);
    }
    if !returning.is_empty() {
        sql.push_str(" RETURNING ");
        sql.push_str(&returning.join(", "));
    }
    sql
}

impl Db {
    /// Insert `values` into `table`, as many rows per statement as the parameter
    /// ceiling allows.
    ///
    /// Chunks are independent statements: when one fails, the chunks before it stay
    /// committed.
    ///
    /// # Errors
    /// Returns `DbError::ArityMismatch` or `DbError::TooManyColumns` before any
    /// statement is sent, `DbError::ChunkExecution` naming the failing value range,
    /// or the context's cancellation error.
    pub async fn bulk_insert(
        &self,
        ctx: &QueryContext,
        table: &str,
        columns: &[&str],
        values: &[RowValues],
        conflict: Option<&str>,
    ) -> Result<BulkInsertOutcome, DbError> {
        let mut req = BulkInsert::new(table, columns, values);
        if let Some(clause) = conflict {
            req = req.on_conflict(clause);
        }
        self.run_bulk_insert(ctx, &req, None).await
    }

    /// Run `req` and pass every row read back through `RETURNING` to `consumer`.
    ///
    /// # Errors
    /// Same as [`Db::bulk_insert`]; a consumer error fails the chunk it occurred in.
    pub async fn bulk_insert_returning<C: RowConsumer + Send>(
        &self,
        ctx: &QueryContext,
        req: &BulkInsert<'_>,
        consumer: &mut C,
    ) -> Result<BulkInsertOutcome, DbError> {
        self.run_bulk_insert(ctx, req, Some(consumer as &mut (dyn RowConsumer + Send)))
            .await
    }

    async fn run_bulk_insert(
        &self,
        ctx: &QueryContext,
        req: &BulkInsert<'_>,
        mut consumer: Option<&mut (dyn RowConsumer + Send)>,
    ) -> Result<BulkInsertOutcome, DbError> {
        let chunks = req.chunks()?;
        let mut outcome = BulkInsertOutcome::default();

        for range in chunks {
            let values = &req.values[range.clone()];
            let rows = self
                .insert_chunk(ctx, req, values, consumer.as_deref_mut())
                .await
                .map_err(|err| {
                    if err.is_cancellation() {
                        err
                    } else {
                        DbError::ChunkExecution {
                            table: req.table.to_owned(),
                            start: range.start,
                            end: range.end,
                            source: Box::new(err),
                        }
                    }
                })?;
            outcome.chunks += 1;
            outcome.rows_affected += rows;
        }

        debug!(
            table = %req.table,
            chunks = outcome.chunks,
            rows = outcome.rows_affected,
            "bulk insert done"
        );
        Ok(outcome)
    }

    async fn insert_chunk<C: RowConsumer + Send + ?Sized>(
        &self,
        ctx: &QueryContext,
        req: &BulkInsert<'_>,
        values: &[RowValues],
        consumer: Option<&mut C>,
    ) -> Result<u64, DbError> {
        let stmt = self.prepare(ctx, &req.statement(values.len())).await?;
        match consumer {
            Some(consumer) if !req.returning.is_empty() => {
                let rows = stmt.query(ctx, values).await?;
                for row in &rows {
                    consumer.consume(row)?;
                }
                Ok(rows.len() as u64)
            }
            _ => stmt.execute(ctx, values).await,
        }
    }
}
