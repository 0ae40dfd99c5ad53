//! Typed errors for the crawl pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`); the binary and the
//! scheduler glue wrap these with `anyhow::Context`.

use std::time::Duration;

use thiserror::Error;

/// Errors from fetching one search page.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Timeout, 5xx, connection reset. Retried with backoff.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Explicit "too many requests". Retried after a global cool-down.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Client errors and anything else not worth retrying.
    #[error("terminal fetch error (status {status:?}): {message}")]
    Terminal { status: Option<u16>, message: String },
}

impl FetchError {
    pub fn terminal(message: impl Into<String>) -> Self {
        FetchError::Terminal {
            status: None,
            message: message.into(),
        }
    }
}

/// A single listing that could not be normalized. Counted and skipped.
#[derive(Debug, Clone, Error)]
#[error("malformed record {}: {reason}", id.as_deref().unwrap_or("<no id>"))]
pub struct MalformedRecord {
    pub id: Option<String>,
    pub reason: String,
}

impl MalformedRecord {
    pub fn new(id: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            id: id.map(str::to_string),
            reason: reason.into(),
        }
    }
}

/// Storage backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend unreachable. Fatal for the affected keyword.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Concurrent modification detected by the backend. Not retried.
    #[error("write conflict on {id}: {message}")]
    WriteConflict { id: String, message: String },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database error: {0}")]
    Database(String),
}

impl StorageError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<csv::Error> for StorageError {
    fn from(e: csv::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StorageError::Unavailable(e.to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // serialization_failure, unique_violation
                Some("40001") | Some("23505") => StorageError::WriteConflict {
                    id: String::new(),
                    message: db.message().to_string(),
                },
                // connection_exception class
                Some(code) if code.starts_with("08") => StorageError::Unavailable(e.to_string()),
                _ => StorageError::Database(e.to_string()),
            },
            _ => StorageError::Database(e.to_string()),
        }
    }
}

/// Fatal error for one keyword's pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Orchestrator retries the keyword once for these.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, PipelineError::Storage(e) if e.is_unavailable())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_record_display() {
        let e = MalformedRecord::new(None, "missing jobNo");
        assert_eq!(e.to_string(), "malformed record <no id>: missing jobNo");

        let e = MalformedRecord::new(Some("abc"), "empty title");
        assert_eq!(e.to_string(), "malformed record abc: empty title");
    }

    #[test]
    fn pool_timeouts_map_to_unavailable() {
        let e: StorageError = sqlx::Error::PoolTimedOut.into();
        assert!(e.is_unavailable());
        assert!(PipelineError::from(e).is_storage_unavailable());
    }
}
