use std::future::Future;
use std::time::Duration;

use bb8::{ManageConnection, Pool, PooledConnection};
use tokio_postgres::{Client, NoTls};
use tracing::debug;

use crate::error::DbError;

pub type PgPooledConnection = PooledConnection<'static, PgManager>;

/// bb8 manager for Postgres clients.
pub struct PgManager {
    pub(crate) config: tokio_postgres::Config,
}

impl PgManager {
    #[must_use]
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self { config }
    }

    /// Parse a `postgres://` locator into a manager.
    ///
    /// # Errors
    /// Returns `DbError::ConfigError` if the locator does not parse.
    pub fn from_dsn(dsn: &str) -> Result<Self, DbError> {
        let config = dsn
            .parse::<tokio_postgres::Config>()
            .map_err(|e| DbError::ConfigError(format!("invalid postgres locator: {e}")))?;
        Ok(Self::new(config))
    }

    /// Build a pool from this manager without connecting.
    #[must_use]
    pub fn build_pool(self, connection_timeout: Duration) -> Pool<PgManager> {
        Pool::builder()
            .connection_timeout(connection_timeout)
            .build_unchecked(self)
    }
}

impl ManageConnection for PgManager {
    type Connection = Client;
    type Error = tokio_postgres::Error;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let cfg = self.config.clone();
        async move {
            debug!(
                hosts = ?cfg.get_hosts(),
                db = ?cfg.get_dbname(),
                user = ?cfg.get_user(),
                "postgres connect start"
            );
            let (client, connection) = cfg.connect(NoTls).await?;
            // The connection future drives the socket and ends when the client is dropped.
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    debug!(error = %e, "postgres connection closed with error");
                }
            });
            Ok(client)
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move { conn.simple_query("SELECT 1").await.map(|_| ()) }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_closed()
    }
}
