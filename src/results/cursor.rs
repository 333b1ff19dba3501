use chrono::NaiveDateTime;

use super::row::DbRow;
use crate::error::DbError;
use crate::types::RowValues;

/// Conversion from one column value into a Rust type.
pub trait FromRowValue: Sized {
    /// # Errors
    /// Returns `DbError::ExecutionError` when the value has an incompatible type.
    fn from_row_value(value: &RowValues) -> Result<Self, DbError>;
}

fn mismatch(expected: &str, value: &RowValues) -> DbError {
    DbError::ExecutionError(format!("cannot scan {value:?} into {expected}"))
}

impl FromRowValue for RowValues {
    fn from_row_value(value: &RowValues) -> Result<Self, DbError> {
        Ok(value.clone())
    }
}

impl FromRowValue for i64 {
    fn from_row_value(value: &RowValues) -> Result<Self, DbError> {
        value.as_int().copied().ok_or_else(|| mismatch("i64", value))
    }
}

impl FromRowValue for i32 {
    fn from_row_value(value: &RowValues) -> Result<Self, DbError> {
        let wide = i64::from_row_value(value)?;
        i32::try_from(wide).map_err(|_| mismatch("i32", value))
    }
}

impl FromRowValue for f64 {
    fn from_row_value(value: &RowValues) -> Result<Self, DbError> {
        value.as_float().ok_or_else(|| mismatch("f64", value))
    }
}

impl FromRowValue for bool {
    fn from_row_value(value: &RowValues) -> Result<Self, DbError> {
        value.as_bool().ok_or_else(|| mismatch("bool", value))
    }
}

impl FromRowValue for String {
    fn from_row_value(value: &RowValues) -> Result<Self, DbError> {
        match value {
            RowValues::Text(s) => Ok(s.clone()),
            RowValues::Blob(bytes) => {
                String::from_utf8(bytes.clone()).map_err(|_| mismatch("String", value))
            }
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromRowValue for Vec<u8> {
    fn from_row_value(value: &RowValues) -> Result<Self, DbError> {
        match value {
            RowValues::Blob(bytes) => Ok(bytes.clone()),
            RowValues::Text(s) => Ok(s.clone().into_bytes()),
            _ => Err(mismatch("Vec<u8>", value)),
        }
    }
}

impl FromRowValue for NaiveDateTime {
    fn from_row_value(value: &RowValues) -> Result<Self, DbError> {
        value
            .as_timestamp()
            .ok_or_else(|| mismatch("NaiveDateTime", value))
    }
}

impl<T: FromRowValue> FromRowValue for Option<T> {
    fn from_row_value(value: &RowValues) -> Result<Self, DbError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_row_value(value).map(Some)
        }
    }
}

/// Conversion from a whole row, implemented for tuples of [`FromRowValue`] types.
pub trait FromDbRow: Sized {
    /// # Errors
    /// Returns `DbError::ExecutionError` on a column count or type mismatch.
    fn from_db_row(row: &DbRow) -> Result<Self, DbError>;
}

macro_rules! impl_from_db_row {
    ($count:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name: FromRowValue),+> FromDbRow for ($($name,)+) {
            fn from_db_row(row: &DbRow) -> Result<Self, DbError> {
                if row.len() != $count {
                    return Err(DbError::ExecutionError(format!(
                        "scan expects {} columns, row has {}",
                        $count,
                        row.len()
                    )));
                }
                Ok(($($name::from_row_value(&row.values[$idx])?,)+))
            }
        }
    };
}

impl_from_db_row!(1; A: 0);
impl_from_db_row!(2; A: 0, B: 1);
impl_from_db_row!(3; A: 0, B: 1, C: 2);
impl_from_db_row!(4; A: 0, B: 1, C: 2, D: 3);
impl_from_db_row!(5; A: 0, B: 1, C: 2, D: 3, E: 4);

/// Outcome of a single-row query.
///
/// An empty result is not a failure of the query itself; it only surfaces as
/// [`DbError::NoRows`] when the caller scans.
#[derive(Debug)]
pub struct RowCursor {
    id: String,
    result: Result<Option<DbRow>, DbError>,
}

impl RowCursor {
    pub(crate) fn new(id: String, result: Result<Option<DbRow>, DbError>) -> Self {
        Self { id, result }
    }

    /// Correlation ID of the query that produced this cursor.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Scan the row into a tuple.
    ///
    /// # Errors
    /// Returns `DbError::NoRows` for an empty result, the query's own error, or a
    /// conversion error.
    pub fn scan<T: FromDbRow>(self) -> Result<T, DbError> {
        let row = self.into_row()?;
        T::from_db_row(&row)
    }

    /// Scan the first column of the row.
    ///
    /// # Errors
    /// Returns `DbError::NoRows` for an empty result, the query's own error, or a
    /// conversion error.
    pub fn scan_value<T: FromRowValue>(self) -> Result<T, DbError> {
        let row = self.into_row()?;
        let value = row.get_by_index(0).ok_or_else(|| {
            DbError::ExecutionError("scan_value on a row without columns".into())
        })?;
        T::from_row_value(value)
    }

    /// The raw row.
    ///
    /// # Errors
    /// Returns `DbError::NoRows` for an empty result or the query's own error.
    pub fn into_row(self) -> Result<DbRow, DbError> {
        self.result?.ok_or(DbError::NoRows)
    }

    /// Like [`RowCursor::into_row`], with the empty result mapped to `None`.
    ///
    /// # Errors
    /// Returns the query's own error.
    pub fn optional(self) -> Result<Option<DbRow>, DbError> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn row(values: Vec<RowValues>) -> DbRow {
        let names = (0..values.len()).map(|i| format!("c{i}")).collect();
        DbRow::new(Arc::new(names), values)
    }

    #[test]
    fn scans_tuples_and_single_values() {
        let cursor = RowCursor::new(
            "t-0".into(),
            Ok(Some(row(vec![RowValues::Int(3), RowValues::Text("x".into())]))),
        );
        let (n, s): (i64, String) = cursor.scan().unwrap();
        assert_eq!((n, s.as_str()), (3, "x"));

        let cursor = RowCursor::new("t-1".into(), Ok(Some(row(vec![RowValues::Null]))));
        let v: Option<i64> = cursor.scan_value().unwrap();
        assert_eq!(v, None);
    }

    #[test]
    fn empty_result_is_no_rows() {
        let cursor = RowCursor::new("t-2".into(), Ok(None));
        assert!(matches!(cursor.scan_value::<i64>(), Err(DbError::NoRows)));
        let cursor = RowCursor::new("t-3".into(), Ok(None));
        assert!(cursor.optional().unwrap().is_none());
    }

    #[test]
    fn column_count_mismatch_is_an_error() {
        let cursor = RowCursor::new("t-4".into(), Ok(Some(row(vec![RowValues::Int(1)]))));
        assert!(cursor.scan::<(i64, i64)>().is_err());
    }
}
