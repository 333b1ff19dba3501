mod cursor;
mod row;

pub use cursor::{FromDbRow, FromRowValue, RowCursor};
pub use row::DbRow;
