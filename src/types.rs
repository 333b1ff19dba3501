use std::fmt;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Scalar values bound into parameterized statements or read back from rows.
///
/// A bulk insert takes one flat `Vec<RowValues>`, so every column type a table can
/// hold has to fit in this enum:
/// ```rust
/// use instrumented_db::prelude::*;
///
/// let values = vec![
///     RowValues::Text("You will meet a tall stranger.".into()),
///     RowValues::Int(7),
///     RowValues::Null,
/// ];
/// # let _ = values;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RowValues::Bool(value) => Some(*value),
            RowValues::Int(1) => Some(true),
            RowValues::Int(0) => Some(false),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let RowValues::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            // Try "YYYY-MM-DD HH:MM:SS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
            // Try "YYYY-MM-DD HH:MM:SS.SSS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            RowValues::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            RowValues::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }
}

/// Default string form, used when previewing statement arguments in logs.
impl fmt::Display for RowValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowValues::Int(i) => write!(f, "{i}"),
            RowValues::Float(v) => write!(f, "{v}"),
            RowValues::Text(s) => f.write_str(s),
            RowValues::Bool(b) => write!(f, "{b}"),
            RowValues::Timestamp(dt) => write!(f, "{}", dt.format("%F %T%.f")),
            RowValues::Null => f.write_str("NULL"),
            RowValues::JSON(v) => write!(f, "{v}"),
            RowValues::Blob(bytes) => write!(f, "[{} bytes]", bytes.len()),
        }
    }
}

impl From<&str> for RowValues {
    fn from(value: &str) -> Self {
        RowValues::Text(value.to_owned())
    }
}

impl From<String> for RowValues {
    fn from(value: String) -> Self {
        RowValues::Text(value)
    }
}

impl From<i64> for RowValues {
    fn from(value: i64) -> Self {
        RowValues::Int(value)
    }
}

impl From<f64> for RowValues {
    fn from(value: f64) -> Self {
        RowValues::Float(value)
    }
}

impl From<bool> for RowValues {
    fn from(value: bool) -> Self {
        RowValues::Bool(value)
    }
}

impl From<NaiveDateTime> for RowValues {
    fn from(value: NaiveDateTime) -> Self {
        RowValues::Timestamp(value)
    }
}

impl<T: Into<RowValues>> From<Option<T>> for RowValues {
    fn from(value: Option<T>) -> Self {
        value.map_or(RowValues::Null, Into::into)
    }
}

/// The database drivers this crate can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// `SQLite` database files
    #[cfg(feature = "sqlite")]
    Sqlite,
    /// `PostgreSQL` database
    #[cfg(feature = "postgres")]
    Postgres,
}

impl DatabaseType {
    /// Conflict clause that turns a duplicate-key insert into a no-op.
    #[must_use]
    pub fn on_conflict_do_nothing(self) -> &'static str {
        "ON CONFLICT DO NOTHING"
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            DatabaseType::Sqlite => "sqlite",
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => "postgres",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DatabaseType {
    type Err = crate::error::DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" | "sqlite3" => Ok(DatabaseType::Sqlite),
            #[cfg(feature = "postgres")]
            "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            other => Err(crate::error::DbError::ConfigError(format!(
                "unsupported database driver {other:?}"
            ))),
        }
    }
}
