use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{Statement, params_from_iter};

use crate::error::DbError;
use crate::results::DbRow;
use crate::types::RowValues;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
///
/// Returns `DbError` if the value cannot be read.
pub fn sqlite_extract_value_sync(row: &rusqlite::Row, idx: usize) -> Result<RowValues, DbError> {
    let value: Value = row.get(idx)?;
    match value {
        Value::Null => Ok(RowValues::Null),
        Value::Integer(i) => Ok(RowValues::Int(i)),
        Value::Real(f) => Ok(RowValues::Float(f)),
        Value::Text(s) => Ok(RowValues::Text(s)),
        Value::Blob(b) => Ok(RowValues::Blob(b)),
    }
}

/// Run `stmt` and read back at most `limit` rows.
///
/// # Errors
/// Returns `DbError` if executing the statement or reading a row fails.
pub fn collect_rows(
    stmt: &mut Statement<'_>,
    params: &[Value],
    limit: Option<usize>,
) -> Result<Vec<DbRow>, DbError> {
    let column_names: Arc<Vec<String>> = Arc::new(
        stmt.column_names()
            .iter()
            .map(|name| (*name).to_string())
            .collect(),
    );
    let col_count = column_names.len();

    let mut rows_iter = stmt.query(params_from_iter(params.iter()))?;
    let mut rows = Vec::new();
    while let Some(row) = rows_iter.next()? {
        let mut values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            values.push(sqlite_extract_value_sync(row, i)?);
        }
        rows.push(DbRow::new(Arc::clone(&column_names), values));
        if limit.is_some_and(|max| rows.len() >= max) {
            break;
        }
    }
    Ok(rows)
}
