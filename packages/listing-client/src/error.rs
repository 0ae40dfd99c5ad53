use std::time::Duration;

use thiserror::Error;

/// Errors returned by a single listing search attempt.
#[derive(Debug, Error)]
pub enum ListingError {
    /// Transport failure: DNS, connect, reset, timeout.
    #[error("HTTP error: {source}")]
    Http {
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        /// Parsed `Retry-After` header, when the server sent one.
        retry_after: Option<Duration>,
    },

    /// The body was not the expected search envelope.
    #[error("failed to decode search response: {0}")]
    Decode(String),
}

impl ListingError {
    /// Explicit "too many requests" signal.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ListingError::Api { status: 429, .. })
    }

    /// Failures worth retrying: timeouts, connection problems, 5xx, and
    /// bodies that failed to decode (usually truncated responses).
    pub fn is_transient(&self) -> bool {
        match self {
            ListingError::Http { source } => {
                source.is_timeout() || source.is_connect() || source.is_request() || source.is_body()
            }
            ListingError::Api { status, .. } => *status >= 500,
            ListingError::Decode(_) => true,
        }
    }

    /// HTTP status if the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ListingError::Api { status, .. } => Some(*status),
            ListingError::Http { source } => source.status().map(|s| s.as_u16()),
            ListingError::Decode(_) => None,
        }
    }
}

impl From<reqwest::Error> for ListingError {
    fn from(source: reqwest::Error) -> Self {
        ListingError::Http { source }
    }
}

pub type Result<T> = std::result::Result<T, ListingError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> ListingError {
        ListingError::Api {
            status,
            message: String::new(),
            retry_after: None,
        }
    }

    #[test]
    fn classifies_statuses() {
        assert!(api(429).is_rate_limited());
        assert!(!api(429).is_transient());
        assert!(api(503).is_transient());
        assert!(!api(404).is_transient());
        assert!(!api(403).is_rate_limited());
        assert!(ListingError::Decode("eof".into()).is_transient());
    }
}
