use std::future::Future;

use tokio_postgres::{Client, NoTls, Statement};
use tracing::debug;

use super::params::as_refs;
use super::query::build_rows;
use crate::context::QueryContext;
use crate::error::DbError;
use crate::results::DbRow;
use crate::translation::{PlaceholderStyle, translate_placeholders};
use crate::types::RowValues;

/// Drive `fut` on `client` until it completes or `ctx` finishes.
///
/// When the context wins, a cancel request is sent to the server and the statement
/// is awaited until it unwinds, so the client is idle before it returns to the pool.
///
/// # Errors
/// Returns the driver error, or the context's cancellation error.
pub(crate) async fn run_cancellable<T, F>(
    ctx: &QueryContext,
    client: &Client,
    fut: F,
) -> Result<T, DbError>
where
    F: Future<Output = Result<T, tokio_postgres::Error>>,
{
    if let Some(err) = ctx.err() {
        return Err(err);
    }
    tokio::pin!(fut);
    let ctx_err = tokio::select! {
        biased;
        res = &mut fut => return res.map_err(DbError::from),
        err = ctx.done() => err,
    };
    if let Err(e) = client.cancel_token().cancel_query(NoTls).await {
        debug!(error = %e, "postgres cancel request failed");
    }
    let _ = fut.await;
    Err(ctx_err)
}

/// Execute a non-row-returning statement and return rows affected.
///
/// # Errors
/// Returns `DbError` if the statement fails.
pub async fn execute(
    ctx: &QueryContext,
    client: &Client,
    query: &str,
    params: &[RowValues],
) -> Result<u64, DbError> {
    let sql = translate_placeholders(query, PlaceholderStyle::Postgres);
    let refs = as_refs(params);
    run_cancellable(ctx, client, client.execute(&*sql, &refs)).await
}

/// Execute a row-returning statement, keeping at most `limit` rows.
///
/// # Errors
/// Returns `DbError` if the statement fails or a value cannot be read.
pub async fn query(
    ctx: &QueryContext,
    client: &Client,
    query: &str,
    params: &[RowValues],
    limit: Option<usize>,
) -> Result<Vec<DbRow>, DbError> {
    let sql = translate_placeholders(query, PlaceholderStyle::Postgres);
    let refs = as_refs(params);
    let rows = run_cancellable(ctx, client, client.query(&*sql, &refs)).await?;
    build_rows(&rows, limit)
}

/// Execute several `;`-separated statements with the simple query protocol.
///
/// # Errors
/// Returns `DbError` if any statement fails; earlier statements stay applied.
pub async fn execute_batch(ctx: &QueryContext, client: &Client, sql: &str) -> Result<(), DbError> {
    run_cancellable(ctx, client, client.batch_execute(sql)).await
}

/// Prepare `query` on `client`.
///
/// # Errors
/// Returns `DbError` if the server rejects the statement.
pub async fn prepare(ctx: &QueryContext, client: &Client, query: &str) -> Result<Statement, DbError> {
    let sql = translate_placeholders(query, PlaceholderStyle::Postgres);
    run_cancellable(ctx, client, client.prepare(&*sql)).await
}

/// Execute a statement prepared on this same client.
///
/// # Errors
/// Returns `DbError` if the statement fails.
pub async fn execute_prepared(
    ctx: &QueryContext,
    client: &Client,
    stmt: &Statement,
    params: &[RowValues],
) -> Result<u64, DbError> {
    let refs = as_refs(params);
    run_cancellable(ctx, client, client.execute(stmt, &refs)).await
}

/// Query with a statement prepared on this same client.
///
/// # Errors
/// Returns `DbError` if the statement fails or a value cannot be read.
pub async fn query_prepared(
    ctx: &QueryContext,
    client: &Client,
    stmt: &Statement,
    params: &[RowValues],
) -> Result<Vec<DbRow>, DbError> {
    let refs = as_refs(params);
    let rows = run_cancellable(ctx, client, client.query(stmt, &refs)).await?;
    build_rows(&rows, None)
}
