// SQLite backend
//
// - config: bb8 connection manager and connection setup
// - params: parameter conversion from `RowValues`
// - query: row extraction
// - executor: statement execution on blocking workers

pub mod config;
pub mod executor;
pub mod params;
pub mod query;

pub use config::{SharedSqliteConnection, SqliteManager, SqlitePooledConnection, open_connection};
pub use params::Params;
pub use query::collect_rows;
