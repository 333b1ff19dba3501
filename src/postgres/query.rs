use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_postgres::types::{FromSqlOwned, Type};

use crate::error::DbError;
use crate::results::DbRow;
use crate::types::RowValues;

fn read<T, F>(row: &tokio_postgres::Row, idx: usize, wrap: F) -> Result<RowValues, DbError>
where
    T: FromSqlOwned,
    F: FnOnce(T) -> RowValues,
{
    let value: Option<T> = row.try_get(idx)?;
    Ok(value.map_or(RowValues::Null, wrap))
}

/// Read column `idx` of `row` as the [`RowValues`] variant its type maps to.
///
/// Types without a dedicated variant are read as text.
///
/// # Errors
/// Returns `DbError` if the column cannot be read as the type its metadata reports.
pub fn postgres_extract_value(row: &tokio_postgres::Row, idx: usize) -> Result<RowValues, DbError> {
    let ty = row.columns()[idx].type_();
    match *ty {
        Type::INT2 => read(row, idx, |v: i16| RowValues::Int(i64::from(v))),
        Type::INT4 => read(row, idx, |v: i32| RowValues::Int(i64::from(v))),
        Type::INT8 => read(row, idx, RowValues::Int),
        Type::FLOAT4 => read(row, idx, |v: f32| RowValues::Float(f64::from(v))),
        Type::FLOAT8 => read(row, idx, RowValues::Float),
        Type::BOOL => read(row, idx, RowValues::Bool),
        Type::TIMESTAMP => read(row, idx, RowValues::Timestamp),
        Type::TIMESTAMPTZ => read(row, idx, |v: DateTime<Utc>| RowValues::Timestamp(v.naive_utc())),
        Type::JSON | Type::JSONB => read::<Value, _>(row, idx, RowValues::JSON),
        Type::BYTEA => read(row, idx, RowValues::Blob),
        _ => read(row, idx, RowValues::Text),
    }
}

/// Convert at most `limit` driver rows into [`DbRow`]s sharing one column list.
///
/// # Errors
/// Returns `DbError` if a value cannot be extracted.
pub fn build_rows(rows: &[tokio_postgres::Row], limit: Option<usize>) -> Result<Vec<DbRow>, DbError> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let column_names: Arc<Vec<String>> = Arc::new(
        first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
    );
    let take = limit.unwrap_or(rows.len()).min(rows.len());
    let mut out = Vec::with_capacity(take);
    for row in &rows[..take] {
        let mut values = Vec::with_capacity(column_names.len());
        for idx in 0..column_names.len() {
            values.push(postgres_extract_value(row, idx)?);
        }
        out.push(DbRow::new(Arc::clone(&column_names), values));
    }
    Ok(out)
}
