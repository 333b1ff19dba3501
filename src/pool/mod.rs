use std::time::Duration;

#[cfg(feature = "postgres")]
use crate::postgres::{self, PgManager, PgPooledConnection};
#[cfg(feature = "sqlite")]
use crate::sqlite::{self, Params, SqliteManager, SqlitePooledConnection};

use crate::context::QueryContext;
use crate::error::DbError;
use crate::results::DbRow;
use crate::types::{DatabaseType, RowValues};

/// How long a caller waits for a free pooled connection.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection pool for one database, one variant per backend.
#[derive(Clone)]
pub enum BackendPool {
    /// `SQLite` connection pool
    #[cfg(feature = "sqlite")]
    Sqlite(bb8::Pool<SqliteManager>),
    /// `PostgreSQL` connection pool
    #[cfg(feature = "postgres")]
    Postgres(bb8::Pool<PgManager>),
}

impl std::fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(pool) => f.debug_tuple("Sqlite").field(&pool.state()).finish(),
            #[cfg(feature = "postgres")]
            Self::Postgres(pool) => f.debug_tuple("Postgres").field(&pool.state()).finish(),
        }
    }
}

impl BackendPool {
    /// Build a pool for `dsn` without connecting. Connections are opened lazily.
    ///
    /// # Errors
    /// Returns `DbError::ConfigError` if `dsn` is not a valid locator for `driver`.
    pub fn build(driver: DatabaseType, dsn: &str) -> Result<Self, DbError> {
        match driver {
            #[cfg(feature = "sqlite")]
            DatabaseType::Sqlite => Ok(Self::Sqlite(
                SqliteManager::new(dsn).build_pool(CONNECTION_TIMEOUT),
            )),
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => Ok(Self::Postgres(
                PgManager::from_dsn(dsn)?.build_pool(CONNECTION_TIMEOUT),
            )),
        }
    }

    #[must_use]
    pub fn driver(&self) -> DatabaseType {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => DatabaseType::Sqlite,
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => DatabaseType::Postgres,
        }
    }

    /// Open and drop one connection outside the pool.
    ///
    /// The pool retries failed connects until its timeout; this surfaces the
    /// backend's own error right away.
    ///
    /// # Errors
    /// Returns the backend's connect error or the context's error.
    pub async fn connect_once(&self, ctx: &QueryContext) -> Result<(), DbError> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(pool) => ctx.run(async { pool.dedicated_connection().await.map(drop) }).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(pool) => {
                ctx.run(async { Ok::<_, DbError>(pool.dedicated_connection().await.map(drop)?) })
                    .await
            }
        }
    }

    /// Check out a connection, giving up when `ctx` finishes.
    ///
    /// # Errors
    /// Returns the backend's connect error, a pool timeout, or the context's error.
    pub async fn get(&self, ctx: &QueryContext) -> Result<PooledConn, DbError> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(pool) => ctx
                .run(async { Ok::<_, DbError>(PooledConn::Sqlite(pool.get_owned().await?)) })
                .await,
            #[cfg(feature = "postgres")]
            Self::Postgres(pool) => ctx
                .run(async { Ok::<_, DbError>(PooledConn::Postgres(pool.get_owned().await?)) })
                .await,
        }
    }
}

/// A connection checked out of a [`BackendPool`]; returned to the pool on drop.
pub enum PooledConn {
    #[cfg(feature = "sqlite")]
    Sqlite(SqlitePooledConnection),
    #[cfg(feature = "postgres")]
    Postgres(PgPooledConnection),
}

impl PooledConn {
    /// Execute a statement and return rows affected.
    ///
    /// # Errors
    /// Returns `DbError` if the statement fails or `ctx` finishes first.
    pub async fn execute(
        &self,
        ctx: &QueryContext,
        query: &str,
        args: &[RowValues],
    ) -> Result<u64, DbError> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(conn) => {
                sqlite::executor::execute(ctx, conn, query, Params::convert(args)).await
            }
            #[cfg(feature = "postgres")]
            Self::Postgres(client) => postgres::executor::execute(ctx, client, query, args).await,
        }
    }

    /// Run a row-returning statement, keeping at most `limit` rows.
    ///
    /// # Errors
    /// Returns `DbError` if the statement fails or `ctx` finishes first.
    pub async fn query(
        &self,
        ctx: &QueryContext,
        query: &str,
        args: &[RowValues],
        limit: Option<usize>,
    ) -> Result<Vec<DbRow>, DbError> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(conn) => {
                sqlite::executor::query(ctx, conn, query, Params::convert(args), limit).await
            }
            #[cfg(feature = "postgres")]
            Self::Postgres(client) => {
                postgres::executor::query(ctx, client, query, args, limit).await
            }
        }
    }

    /// Run `;`-separated statements without parameters.
    ///
    /// # Errors
    /// Returns `DbError` if a statement fails or `ctx` finishes first.
    pub async fn execute_batch(&self, ctx: &QueryContext, sql: &str) -> Result<(), DbError> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(conn) => sqlite::executor::execute_batch(ctx, conn, sql).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(client) => postgres::executor::execute_batch(ctx, client, sql).await,
        }
    }
}
