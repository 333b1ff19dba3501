use std::sync::Arc;

use crate::types::RowValues;

/// A row read back from the database
///
/// Column names are shared by every row of one result, so cloning a row or reading
/// many rows from one statement does not copy them.
#[derive(Debug, Clone, PartialEq)]
pub struct DbRow {
    /// The column names for this row (shared across all rows of a result)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row, in column order
    pub values: Vec<RowValues>,
}

impl DbRow {
    /// Create a new database row
    ///
    /// # Arguments
    ///
    /// * `column_names` - The column names
    /// * `values` - The values for this row
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<RowValues>) -> Self {
        Self {
            column_names,
            values,
        }
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.column_names.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name
    ///
    /// # Returns
    ///
    /// The value at the column, or None if the column wasn't found
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
