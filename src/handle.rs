use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::context::QueryContext;
use crate::dsn::{DbConfig, redact_password};
use crate::error::DbError;
use crate::logging::QueryLogger;
use crate::pool::BackendPool;
use crate::prepared::PreparedStatement;
use crate::results::{DbRow, RowCursor};
use crate::types::{DatabaseType, RowValues};

/// Deadline for the liveness check performed by [`Db::open`].
pub const PING_TIMEOUT: Duration = Duration::from_secs(30);

/// An instrumented handle to one database.
///
/// The handle owns a connection pool, so it can be shared by concurrent callers
/// without external locking. Every statement goes through the handle's
/// [`QueryLogger`].
#[derive(Debug)]
pub struct Db {
    pool: BackendPool,
    logger: Arc<QueryLogger>,
    redacted_dsn: String,
}

impl Db {
    /// Open a pool to `dsn` and check that the database answers within
    /// [`PING_TIMEOUT`].
    ///
    /// # Errors
    /// Returns `DbError::ConnectFailure`, carrying the redacted locator, if the
    /// locator is invalid or the database cannot be reached.
    pub async fn open(driver: DatabaseType, dsn: &str, instance_id: &str) -> Result<Self, DbError> {
        Self::open_with_logger(driver, dsn, Arc::new(QueryLogger::new(instance_id))).await
    }

    /// Like [`Db::open`], sharing an existing logger (and its ID sequence).
    ///
    /// # Errors
    /// Returns `DbError::ConnectFailure` if the database cannot be reached.
    pub async fn open_with_logger(
        driver: DatabaseType,
        dsn: &str,
        logger: Arc<QueryLogger>,
    ) -> Result<Self, DbError> {
        let redacted_dsn = redact_password(dsn);
        let connect_failure = |err: DbError| DbError::ConnectFailure {
            dsn: redacted_dsn.clone(),
            message: redact_password(&err.to_string()),
        };

        let pool = BackendPool::build(driver, dsn).map_err(connect_failure)?;
        let ctx = QueryContext::with_timeout(PING_TIMEOUT);
        ping(&ctx, &pool).await.map_err(connect_failure)?;

        info!(driver = %driver, dsn = %redacted_dsn, "database opened");
        Ok(Self {
            pool,
            logger,
            redacted_dsn,
        })
    }

    /// Open the database `cfg` points at.
    ///
    /// # Errors
    /// Returns `DbError::ConnectFailure` if the database cannot be reached.
    pub async fn from_config(cfg: &DbConfig, instance_id: &str) -> Result<Self, DbError> {
        Self::open(cfg.driver, &cfg.dsn(), instance_id).await
    }

    #[must_use]
    pub fn driver(&self) -> DatabaseType {
        self.pool.driver()
    }

    #[must_use]
    pub fn logger(&self) -> &Arc<QueryLogger> {
        &self.logger
    }

    /// The locator this handle was opened with, password masked.
    #[must_use]
    pub fn redacted_dsn(&self) -> &str {
        &self.redacted_dsn
    }

    pub(crate) fn pool(&self) -> &BackendPool {
        &self.pool
    }

    /// Run a statement that returns no rows and report the rows affected.
    ///
    /// # Errors
    /// Returns `DbError::Query` tagged with the statement's correlation ID, or the
    /// context's cancellation error unchanged.
    pub async fn execute(
        &self,
        ctx: &QueryContext,
        query: &str,
        args: &[RowValues],
    ) -> Result<u64, DbError> {
        let span = self.logger.begin(query, args);
        let result = self.run_execute(ctx, query, args).await;
        span.finish(result)
    }

    async fn run_execute(
        &self,
        ctx: &QueryContext,
        query: &str,
        args: &[RowValues],
    ) -> Result<u64, DbError> {
        let conn = self.pool.get(ctx).await?;
        conn.execute(ctx, query, args).await
    }

    /// Run a statement expected to return at most one row.
    ///
    /// An empty result is a normal outcome: it is logged as a success and only
    /// surfaces as [`DbError::NoRows`] when the cursor is scanned.
    pub async fn query_row(&self, ctx: &QueryContext, query: &str, args: &[RowValues]) -> RowCursor {
        let span = self.logger.begin(query, args);
        let id = span.id().to_owned();
        let result = self.run_query(ctx, query, args, Some(1)).await;
        let first = span.finish(result).map(|rows| rows.into_iter().next());
        RowCursor::new(id, first)
    }

    /// Run a row-returning statement and collect every row.
    ///
    /// # Errors
    /// Returns `DbError::Query` tagged with the statement's correlation ID, or the
    /// context's cancellation error unchanged.
    pub async fn query(
        &self,
        ctx: &QueryContext,
        query: &str,
        args: &[RowValues],
    ) -> Result<Vec<DbRow>, DbError> {
        let span = self.logger.begin(query, args);
        let result = self.run_query(ctx, query, args, None).await;
        span.finish(result)
    }

    async fn run_query(
        &self,
        ctx: &QueryContext,
        query: &str,
        args: &[RowValues],
        limit: Option<usize>,
    ) -> Result<Vec<DbRow>, DbError> {
        let conn = self.pool.get(ctx).await?;
        conn.query(ctx, query, args, limit).await
    }

    /// Run `;`-separated statements without parameters on one connection.
    ///
    /// # Errors
    /// Returns `DbError::Query` if any statement fails. Earlier statements stay applied.
    pub async fn execute_batch(&self, ctx: &QueryContext, sql: &str) -> Result<(), DbError> {
        let span = self.logger.begin(sql, &[]);
        let result = self.run_batch(ctx, sql).await;
        span.finish(result)
    }

    async fn run_batch(&self, ctx: &QueryContext, sql: &str) -> Result<(), DbError> {
        let conn = self.pool.get(ctx).await?;
        conn.execute_batch(ctx, sql).await
    }

    /// Compile `query` for repeated execution.
    ///
    /// The statement keeps one pooled connection checked out until it is dropped.
    ///
    /// # Errors
    /// Returns `DbError::Query` if the statement does not compile.
    pub async fn prepare(
        &self,
        ctx: &QueryContext,
        query: &str,
    ) -> Result<PreparedStatement<'_>, DbError> {
        let span = self.logger.begin(&format!("preparing {query}"), &[]);
        let result = PreparedStatement::compile(self, ctx, query).await;
        span.finish(result)
    }

    /// Release the pool. Connections close once no statement still holds one.
    ///
    /// Never fails. Taking `self` rules out use after close.
    pub fn close(self) {
        debug!(dsn = %self.redacted_dsn, "database closed");
    }
}

async fn ping(ctx: &QueryContext, pool: &BackendPool) -> Result<(), DbError> {
    pool.connect_once(ctx).await?;
    let conn = pool.get(ctx).await?;
    conn.query(ctx, "SELECT 1", &[], Some(1)).await.map(drop)
}
