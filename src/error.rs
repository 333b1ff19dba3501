use thiserror::Error;

/// Driver message Postgres reports when a statement is cancelled on request.
const PG_USER_CANCEL_MESSAGE: &str = "canceling statement due to user request";

#[derive(Debug, Error)]
pub enum DbError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    /// Opening the pool or the liveness check failed. `dsn` is already redacted.
    #[error("opening database {dsn}: {message}")]
    ConnectFailure { dsn: String, message: String },

    #[error("modulus of len(values) and len(columns) must be 0: got {values} values for {columns} columns")]
    ArityMismatch { columns: usize, values: usize },

    #[error("too many columns to insert: {columns} (at most {max} parameters per statement)")]
    TooManyColumns { columns: usize, max: usize },

    /// One chunk of a bulk insert failed; chunks before `start` are already committed.
    #[error("running bulk insert into {table}, values[{start}:{end}]: {source}")]
    ChunkExecution {
        table: String,
        start: usize,
        end: usize,
        #[source]
        source: Box<DbError>,
    },

    #[error("no rows in result set")]
    NoRows,

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// A logged statement failed; `id` is the correlation ID of its log records.
    #[error("DB running query {id}: {source}")]
    Query {
        id: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("migration failed (version {version:?}, recreate={needs_recreate}): {message}")]
    Migration {
        version: Option<i64>,
        needs_recreate: bool,
        message: String,
    },

    #[error("unfixable error migrating database {database}: {source}")]
    UnrecoverableMigration {
        database: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("not all DBs were released: expected {expected}, found {found}")]
    PoolUnderflow { expected: usize, found: usize },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Strip the `Query`, `ChunkExecution` and `UnrecoverableMigration` wrappers.
    #[must_use]
    pub fn root(&self) -> &DbError {
        match self {
            DbError::Query { source, .. }
            | DbError::ChunkExecution { source, .. }
            | DbError::UnrecoverableMigration { source, .. } => source.root(),
            other => other,
        }
    }

    #[must_use]
    pub fn is_no_rows(&self) -> bool {
        matches!(self.root(), DbError::NoRows)
    }

    /// True when the failure is attributable to the caller giving up on the call:
    /// cancellation, deadline expiry, or the driver reporting that it interrupted the
    /// statement on request.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self.root() {
            DbError::Cancelled | DbError::DeadlineExceeded => true,
            #[cfg(feature = "sqlite")]
            DbError::SqliteError(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::OperationInterrupted
            }
            #[cfg(feature = "postgres")]
            // statement_timeout and lock_timeout share the 57014 code; only a
            // cancel request from this side counts
            DbError::PostgresError(err) => err
                .as_db_error()
                .map_or_else(|| err.to_string(), |db| db.message().to_owned())
                .contains(PG_USER_CANCEL_MESSAGE),
            other => other.to_string().contains(PG_USER_CANCEL_MESSAGE),
        }
    }

    /// True for a failed migration that left partial state behind.
    #[must_use]
    pub fn needs_recreate(&self) -> bool {
        matches!(
            self,
            DbError::Migration {
                needs_recreate: true,
                ..
            }
        )
    }
}

impl<E> From<bb8::RunError<E>> for DbError
where
    E: Into<DbError>,
{
    fn from(err: bb8::RunError<E>) -> Self {
        match err {
            bb8::RunError::User(e) => e.into(),
            bb8::RunError::TimedOut => {
                DbError::ConnectionError("timed out waiting for a pooled connection".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_unwraps_nested_context() {
        let err = DbError::ChunkExecution {
            table: "t".into(),
            start: 0,
            end: 1000,
            source: Box::new(DbError::Query {
                id: "local-3".into(),
                source: Box::new(DbError::NoRows),
            }),
        };
        assert!(err.is_no_rows());
        assert!(matches!(err.root(), DbError::NoRows));
        assert!(err.to_string().contains("values[0:1000]"));
        assert!(err.to_string().contains("local-3"));
    }

    #[test]
    fn cancellation_is_recognised_through_wrappers() {
        assert!(DbError::Cancelled.is_cancellation());
        assert!(DbError::DeadlineExceeded.is_cancellation());
        let wrapped = DbError::Query {
            id: "x-1".into(),
            source: Box::new(DbError::ExecutionError(
                "pq: canceling statement due to user request".into(),
            )),
        };
        assert!(wrapped.is_cancellation());
        assert!(!DbError::NoRows.is_cancellation());
    }

    #[test]
    fn server_side_timeouts_are_not_cancellation() {
        for message in [
            "ERROR: canceling statement due to statement timeout",
            "ERROR: canceling statement due to lock timeout",
        ] {
            let err = DbError::ChunkExecution {
                table: "fortune_cookies".into(),
                start: 1000,
                end: 2000,
                source: Box::new(DbError::ExecutionError(message.into())),
            };
            assert!(!err.is_cancellation(), "{message}");
        }
    }
}
