#[cfg(feature = "postgres")]
use crate::postgres::{self, PgPooledConnection};
#[cfg(feature = "sqlite")]
use crate::sqlite::{self, Params, SqlitePooledConnection};

use crate::context::QueryContext;
use crate::error::DbError;
use crate::handle::Db;
use crate::pool::PooledConn;
use crate::results::DbRow;
use crate::types::RowValues;

/// A statement compiled on one pooled connection.
///
/// Borrowing the [`Db`] keeps the statement inside the call that prepared it. The
/// connection goes back to the pool when the statement is dropped, whichever way
/// the caller exits.
pub struct PreparedStatement<'db> {
    db: &'db Db,
    query: String,
    compiled: Compiled,
}

enum Compiled {
    // rusqlite keeps the compiled statement in the connection's cache, keyed by text.
    #[cfg(feature = "sqlite")]
    Sqlite(SqlitePooledConnection),
    #[cfg(feature = "postgres")]
    Postgres(PgPooledConnection, tokio_postgres::Statement),
}

impl std::fmt::Debug for PreparedStatement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

impl<'db> PreparedStatement<'db> {
    pub(crate) async fn compile(
        db: &'db Db,
        ctx: &QueryContext,
        query: &str,
    ) -> Result<PreparedStatement<'db>, DbError> {
        let compiled = match db.pool().get(ctx).await? {
            #[cfg(feature = "sqlite")]
            PooledConn::Sqlite(conn) => {
                sqlite::executor::prepare(ctx, &conn, query).await?;
                Compiled::Sqlite(conn)
            }
            #[cfg(feature = "postgres")]
            PooledConn::Postgres(client) => {
                let stmt = postgres::executor::prepare(ctx, &client, query).await?;
                Compiled::Postgres(client, stmt)
            }
        };
        Ok(Self {
            db,
            query: query.to_owned(),
            compiled,
        })
    }

    #[must_use]
    pub fn query_text(&self) -> &str {
        &self.query
    }

    /// Execute the statement with `args` and report the rows affected.
    ///
    /// # Errors
    /// Returns `DbError::Query` tagged with the execution's correlation ID, or the
    /// context's cancellation error unchanged.
    pub async fn execute(&self, ctx: &QueryContext, args: &[RowValues]) -> Result<u64, DbError> {
        let span = self.db.logger().begin(&self.query, args);
        let result = match &self.compiled {
            #[cfg(feature = "sqlite")]
            Compiled::Sqlite(conn) => {
                sqlite::executor::execute(ctx, conn, &self.query, Params::convert(args)).await
            }
            #[cfg(feature = "postgres")]
            Compiled::Postgres(client, stmt) => {
                postgres::executor::execute_prepared(ctx, client, stmt, args).await
            }
        };
        span.finish(result)
    }

    /// Run the statement with `args` and collect the rows it returns.
    ///
    /// # Errors
    /// Returns `DbError::Query` tagged with the execution's correlation ID, or the
    /// context's cancellation error unchanged.
    pub async fn query(
        &self,
        ctx: &QueryContext,
        args: &[RowValues],
    ) -> Result<Vec<DbRow>, DbError> {
        let span = self.db.logger().begin(&self.query, args);
        let result = match &self.compiled {
            #[cfg(feature = "sqlite")]
            Compiled::Sqlite(conn) => {
                sqlite::executor::query(ctx, conn, &self.query, Params::convert(args), None).await
            }
            #[cfg(feature = "postgres")]
            Compiled::Postgres(client, stmt) => {
                postgres::executor::query_prepared(ctx, client, stmt, args).await
            }
        };
        span.finish(result)
    }
}
