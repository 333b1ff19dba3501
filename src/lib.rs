//! Instrumented, batched database access.
//!
//! A [`Db`] wraps a connection pool to one database and routes every statement
//! through a [`QueryLogger`]: compacted query text, a bounded argument preview and a
//! correlation ID shared by the start and end records. On top of it sit chunked
//! multi-row inserts ([`Db::bulk_insert`]), schema migrations with a
//! recreate-on-failure fallback ([`setup_database`]) and a pool of pre-migrated
//! databases for tests that run in parallel ([`TestDbPool`]).
//!
//! ```rust,no_run
//! use instrumented_db::prelude::*;
//!
//! # async fn run() -> Result<(), DbError> {
//! let cfg = DbConfig::from_env()?;
//! let db = Db::from_config(&cfg, "frontend-7f3a").await?;
//! let ctx = QueryContext::with_timeout(std::time::Duration::from_secs(5));
//!
//! let values: Vec<RowValues> = ["a fortune", "another"].into_iter().map(RowValues::from).collect();
//! let conflict = cfg.driver.on_conflict_do_nothing();
//! db.bulk_insert(&ctx, "fortune_cookies", &["value"], &values, Some(conflict))
//!     .await?;
//!
//! let fortune: String = db
//!     .query_row(&ctx, "SELECT value FROM fortune_cookies LIMIT 1", &[])
//!     .await
//!     .scan_value()?;
//! println!("{fortune}");
//! db.close();
//! # Ok(())
//! # }
//! ```

#[cfg(not(any(feature = "sqlite", feature = "postgres")))]
compile_error!("enable at least one backend feature: `sqlite` or `postgres`");

pub mod admin;
pub mod bulk;
pub mod context;
pub mod dsn;
pub mod error;
pub mod handle;
pub mod logging;
pub mod migrate;
pub mod pool;
pub mod prelude;
pub mod prepared;
pub mod results;
pub mod test_pool;
pub mod translation;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use bulk::{BulkInsert, BulkInsertOutcome, MAX_PARAMETERS, RowConsumer};
pub use context::QueryContext;
pub use dsn::{DbConfig, redact_password};
pub use error::DbError;
pub use handle::Db;
pub use logging::{QueryLogger, query_logging_disabled, set_query_logging_disabled};
pub use migrate::{MigrationReport, MigrationSource, attempt_migrate, setup_database};
pub use prepared::PreparedStatement;
pub use results::{DbRow, FromDbRow, FromRowValue, RowCursor};
pub use test_pool::{TestDbLease, TestDbPool};
pub use types::{DatabaseType, RowValues};
