//! Convenient imports for common functionality.
//!
//! This module re-exports the types most callers need, so
//! `use instrumented_db::prelude::*;` is enough to open a handle and run statements.

pub use crate::bulk::{BulkInsert, BulkInsertOutcome, RowConsumer};
pub use crate::context::QueryContext;
pub use crate::dsn::DbConfig;
pub use crate::error::DbError;
pub use crate::handle::Db;
pub use crate::migrate::{MigrationSource, setup_database};
pub use crate::prepared::PreparedStatement;
pub use crate::results::{DbRow, RowCursor};
pub use crate::test_pool::{TestDbLease, TestDbPool};
pub use crate::translation::{PlaceholderStyle, translate_placeholders};
pub use crate::types::{DatabaseType, RowValues};
