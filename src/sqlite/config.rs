use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bb8::{ManageConnection, Pool, PooledConnection};
use rusqlite::OpenFlags;
use tokio::sync::Mutex;

use super::executor::run_blocking;
use crate::error::DbError;

/// A `rusqlite` connection shared between the pool and the blocking worker that runs on it.
pub type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

pub type SqlitePooledConnection = PooledConnection<'static, SqliteManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// bb8 manager for `SQLite` database files.
///
/// Connections open existing files only: creating a database is an administrative
/// step (see [`crate::admin`]), the same as on a server backend.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    path: PathBuf,
}

impl SqliteManager {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build a pool from this manager without connecting.
    #[must_use]
    pub fn build_pool(self, connection_timeout: Duration) -> Pool<SqliteManager> {
        Pool::builder()
            .connection_timeout(connection_timeout)
            .build_unchecked(self)
    }
}

/// Open `path` with the pragmas every pooled connection runs with.
///
/// # Errors
/// Returns `DbError::SqliteError` if the file cannot be opened or configured.
pub fn open_connection(path: &Path, create: bool) -> Result<rusqlite::Connection, DbError> {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if create {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    let conn = rusqlite::Connection::open_with_flags(path, flags)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    Ok(conn)
}

impl ManageConnection for SqliteManager {
    type Connection = SharedSqliteConnection;
    type Error = DbError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let path = self.path.clone();
        async move {
            let conn = tokio::task::spawn_blocking(move || open_connection(&path, false))
                .await
                .map_err(|e| {
                    DbError::ConnectionError(format!("sqlite spawn_blocking join error: {e}"))
                })??;
            Ok(Arc::new(Mutex::new(conn)))
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let handle = Arc::clone(conn);
        async move {
            run_blocking(handle, |guard| {
                guard
                    .query_row("SELECT 1", [], |_| Ok(()))
                    .map_err(DbError::SqliteError)
            })
            .await
        }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
