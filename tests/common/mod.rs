#![allow(dead_code)]

use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use instrumented_db::admin::create_database;
use instrumented_db::{DatabaseType, Db, DbConfig, DbError, QueryContext};
use tracing::Level;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::writer::MakeWriter;

/// Configuration addressing `SQLite` databases inside `dir`.
pub fn sqlite_config(dir: &Path) -> DbConfig {
    DbConfig {
        driver: DatabaseType::Sqlite,
        data_dir: dir.to_path_buf(),
        ..DbConfig::default()
    }
}

/// Create database `name` under `dir` and open a handle to it.
pub async fn open_sqlite(dir: &Path, name: &str) -> Result<Db, DbError> {
    let cfg = sqlite_config(dir);
    create_database(&cfg, name).await?;
    Db::open(DatabaseType::Sqlite, &cfg.dsn_for(name), "test").await
}

pub async fn count_rows(db: &Db, table: &str) -> Result<i64, DbError> {
    db.query_row(
        &QueryContext::background(),
        &format!("SELECT COUNT(*) FROM {table}"),
        &[],
    )
    .await
    .scan_value()
}

/// Log lines captured by [`capture_logs`].
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }

    pub fn lines_with(&self, needle: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.contains(needle))
            .collect()
    }
}

pub struct CapturedWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedWriter {
            buf: Arc::clone(&self.buf),
        }
    }
}

impl Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route DEBUG and above on the current thread into memory until the guard drops.
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(Level::DEBUG)
        .with_ansi(false)
        .with_target(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
