//! Data source locators: building connection strings from configuration and
//! masking credentials before they reach any diagnostic output.

use std::fmt;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::error::DbError;
use crate::types::DatabaseType;

lazy_static! {
    // The password runs to the last `@` of the locator, so it may itself hold `/` or `@`.
    static ref DSN_PASSWORD: Regex = Regex::new(
        r"(?P<scheme>[A-Za-z][A-Za-z0-9+.-]*://)?(?P<user>[^:/@\s]+):(?P<password>\S*)@"
    )
    .expect("valid password regex");
}

/// Mask the password component of a `user:password@host` locator.
///
/// ```rust
/// use instrumented_db::redact_password;
///
/// assert_eq!(
///     redact_password("postgres://app:hunter2@db:5432/fortune"),
///     "postgres://app:REDACTED@db:5432/fortune"
/// );
/// ```
#[must_use]
pub fn redact_password(dsn: &str) -> String {
    DSN_PASSWORD
        .replace_all(dsn, "${scheme}${user}:REDACTED@")
        .into_owned()
}

/// Connection settings for one backing instance.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub driver: DatabaseType,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    /// Directory holding `SQLite` database files; ignored by server backends.
    pub data_dir: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            host: "localhost".into(),
            port: 5432,
            user: "postgres".into(),
            password: "example".into(),
            name: "fortune_db".into(),
            data_dir: PathBuf::from("."),
        }
    }
}

#[cfg(feature = "sqlite")]
fn default_driver() -> DatabaseType {
    DatabaseType::Sqlite
}

#[cfg(all(not(feature = "sqlite"), feature = "postgres"))]
fn default_driver() -> DatabaseType {
    DatabaseType::Postgres
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"REDACTED")
            .field("name", &self.name)
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

impl DbConfig {
    /// Read `DATABASE_*` environment variables, falling back to the defaults.
    ///
    /// # Errors
    /// Returns `DbError::ConfigError` if `DATABASE_DRIVER` or `DATABASE_PORT` cannot be parsed.
    pub fn from_env() -> Result<Self, DbError> {
        let mut cfg = Self::default();
        if let Ok(driver) = std::env::var("DATABASE_DRIVER") {
            cfg.driver = driver.parse()?;
        }
        if let Ok(host) = std::env::var("DATABASE_HOST") {
            cfg.host = host;
        }
        if let Ok(port) = std::env::var("DATABASE_PORT") {
            cfg.port = port
                .parse()
                .map_err(|e| DbError::ConfigError(format!("DATABASE_PORT {port:?}: {e}")))?;
        }
        if let Ok(user) = std::env::var("DATABASE_USER") {
            cfg.user = user;
        }
        if let Ok(password) = std::env::var("DATABASE_PASSWORD") {
            cfg.password = password;
        }
        if let Ok(name) = std::env::var("DATABASE_NAME") {
            cfg.name = name;
        }
        if let Some(dir) = std::env::var_os("DATABASE_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        Ok(cfg)
    }

    /// Locator for the configured database.
    #[must_use]
    pub fn dsn(&self) -> String {
        self.dsn_for(&self.name)
    }

    /// Locator for a database named `name` on the configured instance.
    #[must_use]
    pub fn dsn_for(&self, name: &str) -> String {
        match self.driver {
            #[cfg(feature = "sqlite")]
            DatabaseType::Sqlite => sqlite_path(&self.data_dir, name)
                .to_string_lossy()
                .into_owned(),
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => format!(
                "postgres://{}:{}@{}:{}/{}",
                urlencoding::encode(&self.user),
                urlencoding::encode(&self.password),
                self.host,
                self.port,
                urlencoding::encode(name)
            ),
        }
    }

    /// Locator for the instance-level maintenance database used to create and
    /// drop databases.
    #[must_use]
    pub fn admin_dsn(&self) -> String {
        match self.driver {
            #[cfg(feature = "sqlite")]
            DatabaseType::Sqlite => self.data_dir.to_string_lossy().into_owned(),
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => self.dsn_for("postgres"),
        }
    }

    /// A copy of this configuration pointing at database `name`.
    #[must_use]
    pub fn with_name(&self, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..self.clone()
        }
    }
}

/// File backing the `SQLite` database `name` inside `dir`.
#[must_use]
pub fn sqlite_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.db"))
}
