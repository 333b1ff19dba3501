//! Schema migrations in the `<version>_<name>.up.sql` directory layout.
//!
//! Progress is kept in a one-row `schema_migrations(version, dirty)` table. The row
//! is marked dirty before a script runs and cleared once it succeeds, so a script
//! that fails halfway leaves evidence the next attempt can see.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::admin::{MIGRATIONS_TABLE, create_database_if_not_exists, recreate_database};
use crate::context::QueryContext;
use crate::dsn::DbConfig;
use crate::error::DbError;
use crate::handle::Db;
use crate::types::{DatabaseType, RowValues};

/// Instance identifier used by handles that [`setup_database`] returns.
pub const SETUP_INSTANCE_ID: &str = "test";

/// One up-migration script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub sql: String,
}

/// What one [`attempt_migrate`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Versions applied by this call, in order. Empty means there was nothing to do.
    pub applied: Vec<i64>,
    /// Schema version after the call, `None` for a database with no migrations.
    pub version: Option<i64>,
}

/// A directory of migration scripts.
#[derive(Debug, Clone)]
pub struct MigrationSource {
    dir: PathBuf,
}

impl MigrationSource {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The scripts shipped with this crate for `driver`.
    #[must_use]
    pub fn bundled(driver: DatabaseType) -> Self {
        Self::new(
            Path::new(env!("CARGO_MANIFEST_DIR"))
                .join("migrations")
                .join(driver.name()),
        )
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read every up-migration, ordered by version. Other files are ignored.
    ///
    /// # Errors
    /// Returns `DbError::Migration` (not needing a recreate) if the directory cannot
    /// be read or two scripts share a version.
    pub async fn load(&self) -> Result<Vec<Migration>, DbError> {
        let source_error = |message: String| DbError::Migration {
            version: None,
            needs_recreate: false,
            message,
        };
        let dir = self.dir.display();

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| source_error(format!("reading migration source {dir}: {e}")))?;
        let mut migrations = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| source_error(format!("reading migration source {dir}: {e}")))?
        {
            let file_name = entry.file_name();
            let Some((version, name)) = file_name.to_str().and_then(parse_up_file_name) else {
                continue;
            };
            let sql = tokio::fs::read_to_string(entry.path())
                .await
                .map_err(|e| source_error(format!("reading {}: {e}", entry.path().display())))?;
            migrations.push(Migration {
                version,
                name: name.to_owned(),
                sql,
            });
        }

        migrations.sort_by_key(|m| m.version);
        if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
            return Err(source_error(format!(
                "duplicate migration version {} in {dir}",
                pair[0].version
            )));
        }
        Ok(migrations)
    }
}

/// Split `000001_create_table.up.sql` into `(1, "create_table")`.
#[must_use]
pub fn parse_up_file_name(file_name: &str) -> Option<(i64, &str)> {
    let stem = file_name.strip_suffix(".up.sql")?;
    let (version, name) = stem.split_once('_')?;
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((version.parse().ok()?, name))
}

/// Apply every pending migration from `source` to database `name`.
///
/// # Errors
/// Returns `DbError::Migration` with `needs_recreate` set when a script fails or
/// the database was left dirty by an earlier failure; the database then holds
/// partial state and should be dropped and recreated. Any other failure (cannot
/// connect, unreadable source) has `needs_recreate` cleared.
pub async fn attempt_migrate(
    cfg: &DbConfig,
    name: &str,
    source: &MigrationSource,
) -> Result<MigrationReport, DbError> {
    let setup_error = |err: DbError| DbError::Migration {
        version: None,
        needs_recreate: false,
        message: err.to_string(),
    };

    let migrations = source.load().await?;
    let db = Db::open(cfg.driver, &cfg.dsn_for(name), "migrate")
        .await
        .map_err(setup_error)?;
    let ctx = QueryContext::background();

    let result = apply_pending(&ctx, &db, &migrations).await;
    db.close();
    let report = result?;

    if report.applied.is_empty() {
        debug!(database = %name, version = ?report.version, "no pending migrations");
    } else {
        info!(database = %name, applied = ?report.applied, "migrations applied");
    }
    Ok(report)
}

async fn apply_pending(
    ctx: &QueryContext,
    db: &Db,
    migrations: &[Migration],
) -> Result<MigrationReport, DbError> {
    let setup_error = |err: DbError| DbError::Migration {
        version: None,
        needs_recreate: false,
        message: err.to_string(),
    };

    db.execute(
        ctx,
        &format!(
            "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} \
             (version BIGINT NOT NULL PRIMARY KEY, dirty BOOLEAN NOT NULL)"
        ),
        &[],
    )
    .await
    .map_err(setup_error)?;

    let current: Option<(i64, bool)> = match db
        .query_row(
            ctx,
            &format!("SELECT version, dirty FROM {MIGRATIONS_TABLE} LIMIT 1"),
            &[],
        )
        .await
        .scan::<(i64, bool)>()
    {
        Ok(row) => Some(row),
        Err(err) if err.is_no_rows() => None,
        Err(err) => return Err(setup_error(err)),
    };

    if let Some((version, true)) = current {
        return Err(DbError::Migration {
            version: Some(version),
            needs_recreate: true,
            message: format!("dirty database version {version}"),
        });
    }

    let mut report = MigrationReport {
        applied: Vec::new(),
        version: current.map(|(v, _)| v),
    };
    let start = report.version;
    for migration in migrations
        .iter()
        .filter(|m| start.is_none_or(|v| m.version > v))
    {
        let failed = |err: DbError| DbError::Migration {
            version: Some(migration.version),
            needs_recreate: true,
            message: format!("migration {}_{}: {err}", migration.version, migration.name),
        };

        set_version(ctx, db, migration.version, true)
            .await
            .map_err(failed)?;
        db.execute_batch(ctx, &migration.sql).await.map_err(failed)?;
        db.execute(
            ctx,
            &format!("UPDATE {MIGRATIONS_TABLE} SET dirty = ?"),
            &[RowValues::Bool(false)],
        )
        .await
        .map_err(failed)?;

        report.applied.push(migration.version);
        report.version = Some(migration.version);
    }
    Ok(report)
}

async fn set_version(ctx: &QueryContext, db: &Db, version: i64, dirty: bool) -> Result<(), DbError> {
    db.execute(ctx, &format!("DELETE FROM {MIGRATIONS_TABLE}"), &[])
        .await?;
    db.execute(
        ctx,
        &format!("INSERT INTO {MIGRATIONS_TABLE} (version, dirty) VALUES (?, ?)"),
        &[RowValues::Int(version), RowValues::Bool(dirty)],
    )
    .await?;
    Ok(())
}

/// Create database `name` if needed, migrate it, and open a handle to it.
///
/// A migration failure that left partial state is retried exactly once, after
/// dropping and recreating the database.
///
/// # Errors
/// Returns `DbError::UnrecoverableMigration` if migrating fails for good, or the
/// error from creating or opening the database.
pub async fn setup_database(
    cfg: &DbConfig,
    name: &str,
    source: &MigrationSource,
) -> Result<Db, DbError> {
    let unrecoverable = |err: DbError| DbError::UnrecoverableMigration {
        database: name.to_owned(),
        source: Box::new(err),
    };

    create_database_if_not_exists(cfg, name).await?;
    if let Err(err) = attempt_migrate(cfg, name, source).await {
        if !err.needs_recreate() {
            return Err(unrecoverable(err));
        }
        warn!(database = %name, error = %err, "migration failed, recreating");
        recreate_database(cfg, name).await?;
        attempt_migrate(cfg, name, source)
            .await
            .map_err(unrecoverable)?;
    }

    Db::open(cfg.driver, &cfg.dsn_for(name), SETUP_INSTANCE_ID).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_up_file_names_only() {
        assert_eq!(
            parse_up_file_name("000001_create_fortune_cookies.up.sql"),
            Some((1, "create_fortune_cookies"))
        );
        assert_eq!(parse_up_file_name("20240102_add_index.up.sql"), Some((20_240_102, "add_index")));
        assert_eq!(parse_up_file_name("000001_create_fortune_cookies.down.sql"), None);
        assert_eq!(parse_up_file_name("README.md"), None);
        assert_eq!(parse_up_file_name("v1_bad.up.sql"), None);
    }

    #[tokio::test]
    async fn loads_sorted_and_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("2_second.up.sql"), "SELECT 2;").await.unwrap();
        tokio::fs::write(dir.path().join("1_first.up.sql"), "SELECT 1;").await.unwrap();
        tokio::fs::write(dir.path().join("1_first.down.sql"), "SELECT 0;").await.unwrap();

        let source = MigrationSource::new(dir.path());
        let loaded = source.load().await.unwrap();
        let versions: Vec<i64> = loaded.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(loaded[0].name, "first");

        tokio::fs::write(dir.path().join("0002_again.up.sql"), "SELECT 3;").await.unwrap();
        let err = source.load().await.unwrap_err();
        assert!(!err.needs_recreate());
        assert!(err.to_string().contains("duplicate migration version 2"));
    }

    #[tokio::test]
    async fn missing_source_does_not_ask_for_recreate() {
        let err = MigrationSource::new("/definitely/not/here").load().await.unwrap_err();
        assert!(matches!(err, DbError::Migration { needs_recreate: false, .. }));
    }
}
