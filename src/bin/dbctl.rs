//! Database maintenance commands for local development.
//!
//! The database is configured through `DATABASE_*` environment variables; its name
//! comes from `DATABASE_NAME`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use instrumented_db::admin::{create_database_if_not_exists, drop_database, recreate_database, reset_database};
use instrumented_db::{
    DatabaseType, Db, DbConfig, DbError, MigrationSource, QueryContext, attempt_migrate,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dbctl", about = "Create, migrate, drop and truncate the configured database")]
struct Args {
    /// Overrides `DATABASE_DRIVER`.
    #[arg(long, value_enum)]
    driver: Option<DatabaseType>,

    /// Directory of `<version>_<name>.up.sql` files; defaults to the bundled scripts.
    #[arg(long, env = "DATABASE_MIGRATIONS")]
    migrations: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Create the database; does not run migrations
    Create,
    /// Run all pending migrations
    Migrate,
    /// Drop the database
    Drop,
    /// Empty every table in the database
    Truncate,
    /// Drop, create and run migrations
    Recreate,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "dbctl failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), DbError> {
    let mut cfg = DbConfig::from_env()?;
    if let Some(driver) = args.driver {
        cfg.driver = driver;
    }
    let source = args
        .migrations
        .map_or_else(|| MigrationSource::bundled(cfg.driver), MigrationSource::new);
    let name = cfg.name.clone();

    match args.command {
        Command::Create => {
            create_database_if_not_exists(&cfg, &name).await?;
            info!(database = %name, "database created");
        }
        Command::Migrate => migrate(&cfg, &name, &source).await?,
        Command::Drop => {
            drop_database(&cfg, &name).await?;
            info!(database = %name, "dropped database");
        }
        Command::Truncate => {
            let db = Db::from_config(&cfg, "dbadmin").await?;
            let result = reset_database(&QueryContext::background(), &db).await;
            db.close();
            result?;
            info!(database = %name, "truncated all tables");
        }
        Command::Recreate => {
            recreate_database(&cfg, &name).await?;
            migrate(&cfg, &name, &source).await?;
        }
    }
    Ok(())
}

async fn migrate(cfg: &DbConfig, name: &str, source: &MigrationSource) -> Result<(), DbError> {
    let report = attempt_migrate(cfg, name, source).await?;
    info!(
        database = %name,
        source = %source.dir().display(),
        applied = ?report.applied,
        version = ?report.version,
        "database migration successful"
    );
    Ok(())
}
