//! Query logging: every statement is recorded before and after it runs, with
//! compacted text, a bounded argument preview and a correlation ID that joins the
//! two records.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error};

use crate::error::DbError;
use crate::types::RowValues;

/// Maximum length of a logged query, in characters.
pub const MAX_QUERY_LEN: usize = 300;
/// Maximum number of arguments rendered in the preview.
pub const MAX_ARGS: usize = 20;
/// Maximum length of one rendered argument, in characters.
pub const MAX_ARG_LEN: usize = 50;

const ELLIPSIS: &str = "...";

static QUERY_LOGGING_DISABLED: AtomicBool = AtomicBool::new(false);

/// Silence (or restore) query logging for the whole process.
///
/// Meant for bulk fixture setup; flip it before concurrent use starts, since callers
/// already mid-query may see either setting.
pub fn set_query_logging_disabled(disabled: bool) {
    QUERY_LOGGING_DISABLED.store(disabled, Ordering::Relaxed);
}

#[must_use]
pub fn query_logging_disabled() -> bool {
    QUERY_LOGGING_DISABLED.load(Ordering::Relaxed)
}

/// Structured record emitted when a statement finishes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryLogEntry {
    pub id: String,
    pub query: String,
    pub args: String,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Hands out correlation IDs and emits query records for one or more handles.
#[derive(Debug)]
pub struct QueryLogger {
    instance_id: String,
    counter: AtomicU64,
}

impl QueryLogger {
    #[must_use]
    pub fn new(instance_id: &str) -> Self {
        Self {
            instance_id: short_instance_id(instance_id),
            counter: AtomicU64::new(0),
        }
    }

    /// The shortened instance identifier used as the ID prefix.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// How many correlation IDs this logger has handed out so far.
    #[must_use]
    pub fn queries_issued(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Allocate the next correlation ID.
    #[must_use]
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{n}", self.instance_id)
    }

    /// Record the start of a statement and return the span that finishes it.
    #[must_use]
    pub fn begin(&self, query: &str, args: &[RowValues]) -> QuerySpan {
        let id = self.next_id();
        let enabled = !query_logging_disabled();
        let (query, args) = if enabled {
            let query = compact_query(query);
            let args = format_args_preview(args);
            debug!(id = %id, query = %query, args = %args, "query start");
            (query, args)
        } else {
            (String::new(), String::new())
        };
        QuerySpan {
            id,
            query,
            args,
            start: Instant::now(),
            enabled,
        }
    }
}

/// One in-flight statement, created by [`QueryLogger::begin`].
#[derive(Debug)]
pub struct QuerySpan {
    id: String,
    query: String,
    args: String,
    start: Instant,
    enabled: bool,
}

impl QuerySpan {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Emit the end record and tag a failure with this statement's correlation ID.
    ///
    /// Cancellation errors are logged at debug level and returned unchanged.
    ///
    /// # Errors
    /// Returns the (possibly wrapped) error carried by `result`.
    pub fn finish<T>(self, result: Result<T, DbError>) -> Result<T, DbError> {
        let err = match result {
            Ok(value) => {
                self.emit(None, false);
                return Ok(value);
            }
            Err(err) => err,
        };
        let cancelled = err.is_cancellation();
        self.emit(Some(err.to_string()), cancelled);
        if cancelled {
            Err(err)
        } else {
            Err(DbError::Query {
                id: self.id,
                source: Box::new(err),
            })
        }
    }

    fn emit(&self, error: Option<String>, cancelled: bool) {
        if !self.enabled {
            return;
        }
        let entry = QueryLogEntry {
            id: self.id.clone(),
            query: self.query.clone(),
            args: self.args.clone(),
            duration_seconds: self.elapsed().as_secs_f64(),
            error,
        };
        match &entry.error {
            None => debug!(
                id = %entry.id,
                query = %entry.query,
                args = %entry.args,
                duration_secs = entry.duration_seconds,
                "query done"
            ),
            Some(err) if cancelled => debug!(
                id = %entry.id,
                query = %entry.query,
                args = %entry.args,
                duration_secs = entry.duration_seconds,
                error = %err,
                "query cancelled"
            ),
            Some(err) => error!(
                id = %entry.id,
                query = %entry.query,
                args = %entry.args,
                duration_secs = entry.duration_seconds,
                error = %err,
                "query failed"
            ),
        }
    }
}

/// `""` becomes `local`; anything longer than 8 characters keeps its last 4.
#[must_use]
pub fn short_instance_id(instance_id: &str) -> String {
    let len = instance_id.chars().count();
    if instance_id.is_empty() {
        "local".to_owned()
    } else if len > 8 {
        instance_id.chars().skip(len - 4).collect()
    } else {
        instance_id.to_owned()
    }
}

/// Replace newlines with spaces, collapse whitespace runs and cap the length.
#[must_use]
pub fn compact_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len().min(MAX_QUERY_LEN + ELLIPSIS.len()));
    let mut prev_space = false;
    for c in query.chars() {
        let c = if c == '\n' { ' ' } else { c };
        let is_space = c.is_whitespace();
        if !(is_space && prev_space) {
            out.push(c);
        }
        prev_space = is_space;
    }
    truncate_chars(out, MAX_QUERY_LEN)
}

/// Render at most [`MAX_ARGS`] arguments, each capped at [`MAX_ARG_LEN`] characters.
#[must_use]
pub fn format_args_preview(args: &[RowValues]) -> String {
    let mut parts: Vec<String> = args
        .iter()
        .take(MAX_ARGS)
        .map(|arg| truncate_chars(arg.to_string(), MAX_ARG_LEN))
        .collect();
    if args.len() > MAX_ARGS {
        parts.push(ELLIPSIS.to_owned());
    }
    parts.join(", ")
}

fn truncate_chars(mut s: String, max: usize) -> String {
    if let Some((byte_idx, _)) = s.char_indices().nth(max) {
        s.truncate(byte_idx);
        s.push_str(ELLIPSIS);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_newlines() {
        let q = "SELECT value\n  FROM   fortune_cookies\n\tWHERE id = ?";
        assert_eq!(compact_query(q), "SELECT value FROM fortune_cookies WHERE id = ?");
    }

    #[test]
    fn truncates_long_queries_with_marker() {
        let q = format!("SELECT {}", "x".repeat(400));
        let compact = compact_query(&q);
        assert!(compact.ends_with("..."));
        assert_eq!(compact.chars().count(), MAX_QUERY_LEN + 3);

        let exact = "y".repeat(MAX_QUERY_LEN);
        assert_eq!(compact_query(&exact), exact);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let q = "é".repeat(MAX_QUERY_LEN + 10);
        let compact = compact_query(&q);
        assert_eq!(compact.chars().count(), MAX_QUERY_LEN + 3);
    }

    #[test]
    fn args_preview_is_bounded() {
        let args: Vec<RowValues> = (0..25).map(RowValues::Int).collect();
        let preview = format_args_preview(&args);
        let parts: Vec<&str> = preview.split(", ").collect();
        assert_eq!(parts.len(), MAX_ARGS + 1);
        assert_eq!(parts[0], "0");
        assert_eq!(parts[MAX_ARGS - 1], "19");
        assert_eq!(parts[MAX_ARGS], "...");

        let long = RowValues::Text("z".repeat(80));
        let preview = format_args_preview(std::slice::from_ref(&long));
        assert_eq!(preview, format!("{}...", "z".repeat(MAX_ARG_LEN)));

        assert_eq!(format_args_preview(&[]), "");
    }

    #[test]
    fn instance_ids_are_shortened() {
        assert_eq!(short_instance_id(""), "local");
        assert_eq!(short_instance_id("test"), "test");
        assert_eq!(short_instance_id("12345678"), "12345678");
        assert_eq!(short_instance_id("frontend-7f9c2a"), "9c2a");
    }

    #[test]
    fn correlation_ids_count_from_zero_per_logger() {
        let logger = QueryLogger::new("");
        assert_eq!(logger.next_id(), "local-0");
        assert_eq!(logger.next_id(), "local-1");
        assert_eq!(logger.queries_issued(), 2);

        let other = QueryLogger::new("gke-node-abcd1234");
        assert_eq!(other.next_id(), "1234-0");
    }

    #[test]
    fn failures_are_tagged_and_cancellation_passes_through() {
        let logger = QueryLogger::new("unit");
        let span = logger.begin("SELECT 1", &[]);
        let id = span.id().to_owned();
        let err = span
            .finish::<()>(Err(DbError::ExecutionError("boom".into())))
            .unwrap_err();
        match err {
            DbError::Query { id: got, .. } => assert_eq!(got, id),
            other => panic!("expected Query wrapper, got {other:?}"),
        }

        let span = logger.begin("SELECT 1", &[]);
        let err = span.finish::<()>(Err(DbError::Cancelled)).unwrap_err();
        assert!(matches!(err, DbError::Cancelled));
    }

    #[test]
    fn entry_serializes_without_empty_error() {
        let entry = QueryLogEntry {
            id: "local-0".into(),
            query: "SELECT 1".into(),
            args: String::new(),
            duration_seconds: 0.5,
            error: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"durationSeconds\":0.5"));
        assert!(!json.contains("error"));
    }
}
