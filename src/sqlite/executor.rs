use std::sync::Arc;

use rusqlite::params_from_iter;

use super::config::{SharedSqliteConnection, SqlitePooledConnection};
use super::params::Params;
use super::query::collect_rows;
use crate::context::QueryContext;
use crate::error::DbError;
use crate::results::DbRow;

/// Run synchronous `SQLite` work on a blocking worker thread.
///
/// # Errors
/// Returns the closure's error, or `DbError::ExecutionError` if the worker panicked.
pub(crate) async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R, DbError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, DbError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| DbError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}

/// Like [`run_blocking`], but interrupts the running statement when `ctx` finishes
/// first. The call still waits for the worker to unwind so the connection is idle
/// when it goes back to the pool.
///
/// Work that completed before the interrupt could land is reported as a success,
/// since its effects are already committed.
///
/// # Errors
/// Returns the closure's error or the context's cancellation error.
pub(crate) async fn run_interruptible<F, R>(
    ctx: &QueryContext,
    conn: &SqlitePooledConnection,
    func: F,
) -> Result<R, DbError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, DbError> + Send + 'static,
    R: Send + 'static,
{
    interruptible(ctx, Arc::clone(&**conn), func).await
}

async fn interruptible<F, R>(
    ctx: &QueryContext,
    handle: SharedSqliteConnection,
    func: F,
) -> Result<R, DbError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, DbError> + Send + 'static,
    R: Send + 'static,
{
    if let Some(err) = ctx.err() {
        return Err(err);
    }
    let interrupt = handle.lock().await.get_interrupt_handle();
    let worker_ctx = ctx.clone();
    let mut task = tokio::task::spawn_blocking(move || {
        let mut guard = handle.blocking_lock();
        // an interrupt sent before the first step is cleared when the step starts
        if let Some(err) = worker_ctx.err() {
            return Err(err);
        }
        func(&mut guard)
    });

    tokio::select! {
        biased;
        joined = &mut task => join_result(joined),
        err = ctx.done() => {
            interrupt.interrupt();
            match join_result(task.await) {
                Ok(value) => Ok(value),
                Err(_) => Err(err),
            }
        }
    }
}

fn join_result<R>(
    joined: Result<Result<R, DbError>, tokio::task::JoinError>,
) -> Result<R, DbError> {
    joined.map_err(|e| DbError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}

/// Execute a non-row-returning statement and return rows affected.
///
/// # Errors
/// Returns `DbError` if preparing or executing the statement fails.
pub async fn execute(
    ctx: &QueryContext,
    conn: &SqlitePooledConnection,
    query: &str,
    params: Params,
) -> Result<u64, DbError> {
    let sql_owned = query.to_owned();
    run_interruptible(ctx, conn, move |guard| {
        let mut stmt = guard.prepare_cached(&sql_owned)?;
        let affected = stmt.execute(params_from_iter(params.as_values().iter()))?;
        Ok(affected as u64)
    })
    .await
}

/// Execute a row-returning statement, reading at most `limit` rows.
///
/// # Errors
/// Returns `DbError` if preparing or executing the statement fails.
pub async fn query(
    ctx: &QueryContext,
    conn: &SqlitePooledConnection,
    query: &str,
    params: Params,
    limit: Option<usize>,
) -> Result<Vec<DbRow>, DbError> {
    let sql_owned = query.to_owned();
    run_interruptible(ctx, conn, move |guard| {
        let mut stmt = guard.prepare_cached(&sql_owned)?;
        collect_rows(&mut stmt, params.as_values(), limit)
    })
    .await
}

/// Execute several `;`-separated statements on one connection, outside any implicit
/// transaction.
///
/// # Errors
/// Returns `DbError` if any statement fails; earlier statements stay applied.
pub async fn execute_batch(
    ctx: &QueryContext,
    conn: &SqlitePooledConnection,
    sql: &str,
) -> Result<(), DbError> {
    let sql_owned = sql.to_owned();
    run_interruptible(ctx, conn, move |guard| {
        guard.execute_batch(&sql_owned).map_err(DbError::SqliteError)
    })
    .await
}

/// Compile `query` into the connection's statement cache.
///
/// # Errors
/// Returns `DbError` if the statement does not compile.
pub async fn prepare(
    ctx: &QueryContext,
    conn: &SqlitePooledConnection,
    query: &str,
) -> Result<(), DbError> {
    let sql_owned = query.to_owned();
    run_interruptible(ctx, conn, move |guard| {
        guard.prepare_cached(&sql_owned)?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Mutex;

    use super::*;

    fn memory_connection() -> SharedSqliteConnection {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn count(handle: &SharedSqliteConnection) -> i64 {
        handle
            .blocking_lock()
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn expired_context_skips_work_queued_behind_the_lock() {
        let handle = memory_connection();
        let held = Arc::clone(&handle).lock_owned().await;
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            drop(held);
        });

        let ctx = QueryContext::with_timeout(Duration::from_millis(20));
        let res = interruptible(&ctx, Arc::clone(&handle), |conn| {
            conn.execute("INSERT INTO t (x) VALUES (1)", [])?;
            Ok(())
        })
        .await;
        release.await.unwrap();

        assert!(matches!(res, Err(DbError::DeadlineExceeded)));
        let rows = tokio::task::spawn_blocking(move || count(&handle)).await.unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn work_finished_after_the_deadline_is_reported() {
        let handle = memory_connection();
        let ctx = QueryContext::with_timeout(Duration::from_millis(20));
        let res = interruptible(&ctx, Arc::clone(&handle), |conn| {
            std::thread::sleep(Duration::from_millis(150));
            conn.execute("INSERT INTO t (x) VALUES (1)", [])?;
            Ok(7)
        })
        .await;

        assert_eq!(res.unwrap(), 7);
        let rows = tokio::task::spawn_blocking(move || count(&handle)).await.unwrap();
        assert_eq!(rows, 1);
    }
}
