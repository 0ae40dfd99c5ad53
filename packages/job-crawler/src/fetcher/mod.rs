//! Page fetching: one HTTP(S) request per search page.
//!
//! ```text
//! Fetcher::fetch(query)
//!     │
//!     ├─► wait out global cool-down
//!     ├─► acquire global permit (shared by all keywords)
//!     ├─► PageSource::fetch_once (bounded by request timeout)
//!     └─► classify: ok │ transient → backoff, retry
//!                      │ rate-limited → extend cool-down, retry
//!                      │ terminal → surface immediately
//! ```

pub mod cooldown;
pub mod http;
pub mod retry;

pub use cooldown::Cooldown;
pub use http::HttpPageSource;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::{FetchConfig, RetryConfig};
use crate::error::{FetchError, FetchResult};
use crate::types::{RawPage, SearchQuery};

/// A single attempt against the listing source. No retries, no limits.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_once(&self, query: &SearchQuery) -> FetchResult<RawPage>;
}

#[async_trait]
impl<S: PageSource + ?Sized> PageSource for std::sync::Arc<S> {
    async fn fetch_once(&self, query: &SearchQuery) -> FetchResult<RawPage> {
        (**self).fetch_once(query).await
    }
}

/// Applies the concurrency ceiling, request timeout, retry policy and
/// rate-limit cool-down on top of a [`PageSource`].
///
/// Share one instance (behind an `Arc`) across all keyword workers: the
/// permit pool and the cool-down are global by construction.
pub struct Fetcher<S: PageSource> {
    source: S,
    permits: Semaphore,
    cooldown: Cooldown,
    request_timeout: Duration,
    retry: RetryConfig,
}

impl<S: PageSource> Fetcher<S> {
    pub fn new(source: S, config: &FetchConfig) -> Self {
        Self {
            source,
            permits: Semaphore::new(config.max_concurrency.max(1)),
            cooldown: Cooldown::new(),
            request_timeout: config.request_timeout,
            retry: config.retry.clone(),
        }
    }

    pub fn cooldown(&self) -> &Cooldown {
        &self.cooldown
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    async fn attempt(&self, query: &SearchQuery) -> FetchResult<RawPage> {
        self.cooldown.wait().await;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::terminal("fetch permit pool closed"))?;
        // Another worker may have hit a rate limit while we queued for a permit.
        self.cooldown.wait().await;

        match tokio::time::timeout(self.request_timeout, self.source.fetch_once(query)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Transient(format!(
                "request timed out after {:?}",
                self.request_timeout
            ))),
        }
    }

    /// Fetch one page, retrying transient failures and rate limits.
    pub async fn fetch(&self, query: &SearchQuery) -> FetchResult<RawPage> {
        let mut transient_failures = 0u32;
        let mut rate_limited = 0u32;

        loop {
            match self.attempt(query).await {
                Ok(mut page) => {
                    page.retries = transient_failures + rate_limited;
                    page.rate_limited = rate_limited;
                    debug!(
                        keyword = %query.keyword,
                        page = query.page,
                        items = page.items.len(),
                        retries = page.retries,
                        "Fetched page"
                    );
                    return Ok(page);
                }
                Err(FetchError::RateLimited { retry_after }) => {
                    rate_limited += 1;
                    if rate_limited > self.retry.max_rate_limit_retries {
                        warn!(
                            keyword = %query.keyword,
                            page = query.page,
                            rate_limited,
                            "Rate-limit retries exhausted"
                        );
                        return Err(FetchError::RateLimited { retry_after });
                    }
                    let delay = retry_after.unwrap_or(self.retry.rate_limit_cooldown);
                    warn!(
                        keyword = %query.keyword,
                        page = query.page,
                        cooldown_ms = delay.as_millis() as u64,
                        "Rate limited, starting global cool-down"
                    );
                    self.cooldown.trigger(delay);
                }
                Err(FetchError::Transient(message)) => {
                    transient_failures += 1;
                    if transient_failures >= self.retry.max_attempts {
                        warn!(
                            keyword = %query.keyword,
                            page = query.page,
                            attempts = transient_failures,
                            error = %message,
                            "Fetch attempts exhausted"
                        );
                        return Err(FetchError::Transient(format!(
                            "{message} (after {transient_failures} attempts)"
                        )));
                    }
                    let delay = retry::backoff_for(&self.retry, transient_failures);
                    warn!(
                        keyword = %query.keyword,
                        page = query.page,
                        attempt = transient_failures,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Transient fetch failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(terminal) => {
                    warn!(keyword = %query.keyword, page = query.page, error = %terminal, "Terminal fetch failure");
                    return Err(terminal);
                }
            }
        }
    }
}
