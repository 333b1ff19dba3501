//! Creating, dropping and emptying databases on the configured instance.
//!
//! A `SQLite` "database" is the file `<data_dir>/<name>.db`; a Postgres database is
//! managed through the instance's `postgres` maintenance database.

#[cfg(feature = "postgres")]
use bb8::ManageConnection;
use tracing::info;

use crate::context::QueryContext;
use crate::dsn::DbConfig;
#[cfg(feature = "sqlite")]
use crate::dsn::sqlite_path;
use crate::error::DbError;
use crate::handle::Db;
#[cfg(feature = "postgres")]
use crate::postgres::PgManager;
use crate::types::{DatabaseType, RowValues};

/// Migration bookkeeping table, left alone by [`reset_database`].
pub const MIGRATIONS_TABLE: &str = "schema_migrations";

/// Report whether database `name` exists.
///
/// # Errors
/// Returns `DbError` if the instance cannot be queried.
pub async fn database_exists(cfg: &DbConfig, name: &str) -> Result<bool, DbError> {
    match cfg.driver {
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => Ok(tokio::fs::try_exists(sqlite_path(&cfg.data_dir, name)).await?),
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            let client = admin_client(cfg).await?;
            let row = client
                .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&name])
                .await?;
            Ok(row.is_some())
        }
    }
}

/// Create database `name`. Creating a database that already exists is a no-op.
///
/// # Errors
/// Returns `DbError` if the database cannot be created.
pub async fn create_database(cfg: &DbConfig, name: &str) -> Result<(), DbError> {
    match cfg.driver {
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => {
            tokio::fs::create_dir_all(&cfg.data_dir).await?;
            let path = sqlite_path(&cfg.data_dir, name);
            tokio::task::spawn_blocking(move || {
                crate::sqlite::open_connection(&path, true).map(drop)
            })
            .await
            .map_err(|e| DbError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
            .map_err(|e| DbError::ExecutionError(format!("error creating {name:?}: {e}")))
        }
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            if database_exists(cfg, name).await? {
                return Ok(());
            }
            let client = admin_client(cfg).await?;
            client
                .batch_execute(&format!("CREATE DATABASE {}", quote_ident(name)))
                .await
                .map_err(|e| DbError::ExecutionError(format!("error creating {name:?}: {e}")))
        }
    }
}

/// Create database `name` unless it already exists.
///
/// # Errors
/// Returns `DbError` if the check or the creation fails.
pub async fn create_database_if_not_exists(cfg: &DbConfig, name: &str) -> Result<(), DbError> {
    if database_exists(cfg, name).await? {
        return Ok(());
    }
    info!(database = %name, "database does not exist, creating");
    create_database(cfg, name).await
}

/// Drop database `name`. A missing database is not an error.
///
/// # Errors
/// Returns `DbError` if the database exists but cannot be dropped.
pub async fn drop_database(cfg: &DbConfig, name: &str) -> Result<(), DbError> {
    match cfg.driver {
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => {
            let path = sqlite_path(&cfg.data_dir, name);
            for suffix in ["", "-wal", "-shm"] {
                let mut file = path.clone().into_os_string();
                file.push(suffix);
                match tokio::fs::remove_file(&file).await {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                        return Err(DbError::ExecutionError(format!(
                            "error dropping {name:?}: {e}"
                        )));
                    }
                    _ => {}
                }
            }
            Ok(())
        }
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            let client = admin_client(cfg).await?;
            client
                .batch_execute(&format!("DROP DATABASE IF EXISTS {}", quote_ident(name)))
                .await
                .map_err(|e| DbError::ExecutionError(format!("error dropping {name:?}: {e}")))
        }
    }
}

/// Drop and create database `name`.
///
/// # Errors
/// Returns `DbError` if either step fails.
pub async fn recreate_database(cfg: &DbConfig, name: &str) -> Result<(), DbError> {
    drop_database(cfg, name).await?;
    create_database(cfg, name).await
}

/// Delete every row of every user table of `db`, except the migration bookkeeping.
///
/// Referential checks are suspended around the deletion, so table order does not
/// matter. All statements run on one connection.
///
/// # Errors
/// Returns `DbError` if the tables cannot be listed or emptied.
pub async fn reset_database(ctx: &QueryContext, db: &Db) -> Result<(), DbError> {
    let driver = db.driver();
    let list_sql = match driver {
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => {
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name <> ? \
             AND (name = 'sqlite_sequence' OR name NOT LIKE 'sqlite_%') ORDER BY name"
        }
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            "SELECT tablename FROM pg_tables WHERE schemaname = current_schema() \
             AND tablename <> ? ORDER BY tablename"
        }
    };
    let rows = db
        .query(ctx, list_sql, &[RowValues::from(MIGRATIONS_TABLE)])
        .await?;
    let tables: Vec<String> = rows
        .iter()
        .filter_map(|row| row.get_by_index(0).and_then(RowValues::as_text).map(quote_ident))
        .collect();
    if tables.is_empty() {
        return Ok(());
    }

    let sql = match driver {
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => {
            let deletes: String = tables
                .iter()
                .map(|t| format!("DELETE FROM {t}; "))
                .collect();
            format!("PRAGMA foreign_keys = OFF; {deletes}PRAGMA foreign_keys = ON;")
        }
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            format!("TRUNCATE TABLE {} RESTART IDENTITY CASCADE", tables.join(", "))
        }
    };
    db.execute_batch(ctx, &sql).await
}

/// Double-quote an identifier for interpolation into DDL.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(feature = "postgres")]
async fn admin_client(cfg: &DbConfig) -> Result<tokio_postgres::Client, DbError> {
    let manager = PgManager::from_dsn(&cfg.admin_dsn())?;
    Ok(manager.connect().await?)
}
