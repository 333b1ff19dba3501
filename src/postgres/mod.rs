// PostgreSQL backend
//
// - config: bb8 connection manager
// - params: `ToSql` for `RowValues`
// - query: row extraction
// - executor: statement execution with server-side cancellation

pub mod config;
pub mod executor;
pub mod params;
pub mod query;

pub use config::{PgManager, PgPooledConnection};
pub use query::build_rows;
