//! A fixed set of pre-migrated databases shared by tests running in parallel.
//!
//! Each database is held by at most one test at a time. A test acquires a
//! [`TestDbLease`], uses it like a [`Db`], and hands it back with
//! [`TestDbLease::release`], which empties the database first.

use std::ops::Deref;
use std::time::Instant;

use deadpool::unmanaged::{Object, Pool, PoolError};
use tracing::{info, warn};

use crate::admin::reset_database;
use crate::context::QueryContext;
use crate::dsn::DbConfig;
use crate::error::DbError;
use crate::handle::Db;
use crate::logging::{query_logging_disabled, set_query_logging_disabled};
use crate::migrate::{MigrationSource, setup_database};

fn pool_error(err: PoolError) -> DbError {
    DbError::ConnectionError(format!("test database pool: {err}"))
}

/// `n` migrated databases named `<base>_0 .. <base>_{n-1}`.
pub struct TestDbPool {
    pool: Pool<Db>,
    size: usize,
    base_name: String,
}

impl std::fmt::Debug for TestDbPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestDbPool")
            .field("base_name", &self.base_name)
            .field("size", &self.size)
            .field("status", &self.pool.status())
            .finish()
    }
}

impl TestDbPool {
    /// Create (if absent), migrate and open `n` databases.
    ///
    /// Query logging is switched off while the databases are prepared and restored
    /// afterwards; call this before tests start running concurrently.
    ///
    /// # Errors
    /// Returns the first error from setting up a database. Databases opened before
    /// the failure are closed.
    pub async fn initialize(
        cfg: &DbConfig,
        base_name: &str,
        n: usize,
        source: &MigrationSource,
    ) -> Result<Self, DbError> {
        let started = Instant::now();
        let was_disabled = query_logging_disabled();
        set_query_logging_disabled(true);
        let result = Self::provision(cfg, base_name, n, source).await;
        set_query_logging_disabled(was_disabled);

        let pool = result?;
        info!(
            databases = n,
            base = %base_name,
            elapsed_ms = started.elapsed().as_millis(),
            "parallel test databases ready"
        );
        Ok(pool)
    }

    async fn provision(
        cfg: &DbConfig,
        base_name: &str,
        n: usize,
        source: &MigrationSource,
    ) -> Result<Self, DbError> {
        let pool: Pool<Db> = Pool::new(n);
        for i in 0..n {
            let db = match setup_database(cfg, &format!("{base_name}_{i}"), source).await {
                Ok(db) => db,
                Err(err) => {
                    while let Ok(db) = pool.try_remove() {
                        db.close();
                    }
                    return Err(err);
                }
            };
            pool.try_add(db).map_err(|(db, err)| {
                db.close();
                pool_error(err)
            })?;
        }
        Ok(Self {
            pool,
            size: n,
            base_name: base_name.to_owned(),
        })
    }

    /// Number of databases the pool was built with.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Databases currently waiting in the pool.
    #[must_use]
    pub fn available(&self) -> usize {
        self.pool.status().available
    }

    /// Wait until a database is free and lease it.
    ///
    /// # Errors
    /// Returns `DbError::ConnectionError` if the pool has been closed.
    pub async fn acquire(&self) -> Result<TestDbLease, DbError> {
        let object = self.pool.get().await.map_err(pool_error)?;
        Ok(TestDbLease {
            object: Some(object),
        })
    }

    /// Close every database once all of them are back in the pool.
    ///
    /// # Errors
    /// Returns `DbError::PoolUnderflow` if a lease is still out or was dropped
    /// without being released.
    pub async fn teardown(self) -> Result<(), DbError> {
        let found = self.pool.status().available;
        if found != self.size {
            return Err(DbError::PoolUnderflow {
                expected: self.size,
                found,
            });
        }
        for _ in 0..self.size {
            let db = self.pool.remove().await.map_err(pool_error)?;
            db.close();
        }
        self.pool.close();
        Ok(())
    }
}

/// Exclusive use of one pooled test database.
///
/// Dropping a lease without [`TestDbLease::release`] takes its database out of the
/// pool for good, which [`TestDbPool::teardown`] then reports.
pub struct TestDbLease {
    object: Option<Object<Db>>,
}

impl TestDbLease {
    /// Empty the database and return it to the pool.
    ///
    /// # Errors
    /// Returns the reset error; the database is then withdrawn from the pool instead
    /// of being handed to the next test dirty.
    pub async fn release(mut self) -> Result<(), DbError> {
        let Some(object) = self.object.take() else {
            return Ok(());
        };
        let ctx = QueryContext::background();
        match reset_database(&ctx, &object).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "resetting test database failed; withdrawing it");
                Object::take(object).close();
                Err(err)
            }
        }
    }
}

impl Deref for TestDbLease {
    type Target = Db;

    fn deref(&self) -> &Db {
        match &self.object {
            Some(object) => object,
            // `object` is only taken by `release` and `drop`, which consume the lease.
            None => unreachable!("test database lease used after release"),
        }
    }
}

impl Drop for TestDbLease {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            warn!(
                dsn = %object.redacted_dsn(),
                "test database lease dropped without release; withdrawing it"
            );
            Object::take(object).close();
        }
    }
}
