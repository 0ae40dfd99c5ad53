//! Pure REST client for the 104 job bank listing search.
//!
//! A minimal client for the `jobs/search/list` endpoint. One call is one
//! HTTP attempt: retries, concurrency limits and cool-downs belong to the
//! caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use listing_client::{ListingClient, SearchParams};
//!
//! let client = ListingClient::new();
//!
//! let page = client.search_page(&SearchParams::new("rust", 1)).await?;
//! println!("{} listings, {:?} pages", page.list.len(), page.total_page);
//! ```

pub mod error;
pub mod types;

pub use error::{ListingError, Result};
pub use types::{ListingLink, RawListing, SearchData, SearchEnvelope, SearchParams};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, RETRY_AFTER};

pub const SEARCH_API_URL: &str = "https://www.104.com.tw/jobs/search/list";

const REFERER_URL: &str = "https://www.104.com.tw/jobs/search/";

/// Requests sent with one user agent before rotating to another.
const USER_AGENT_ROTATION: usize = 5;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
];

pub struct ListingClient {
    client: reqwest::Client,
    base_url: String,
    request_count: AtomicUsize,
    user_agent_offset: usize,
}

impl Default for ListingClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ListingClient {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Build a client whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        let user_agent_offset = rand::thread_rng().gen_range(0..USER_AGENTS.len());

        Self {
            client,
            base_url: SEARCH_API_URL.to_string(),
            request_count: AtomicUsize::new(0),
            user_agent_offset,
        }
    }

    /// Point the client at a different search endpoint (staging, mocks).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn next_user_agent(&self) -> &'static str {
        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        let index = (count / USER_AGENT_ROTATION + self.user_agent_offset) % USER_AGENTS.len();
        USER_AGENTS[index]
    }

    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static(REFERER_URL));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-TW,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers
    }

    /// Fetch one page of search results.
    pub async fn search_page(&self, params: &SearchParams) -> Result<SearchData> {
        tracing::debug!(keyword = %params.keyword, page = params.page, "Requesting search page");

        let resp = self
            .client
            .get(&self.base_url)
            .headers(self.default_headers())
            .header(reqwest::header::USER_AGENT, self.next_user_agent())
            .query(params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            return Err(ListingError::Api {
                status: status.as_u16(),
                message: body,
                retry_after,
            });
        }

        let body = resp.text().await?;
        let envelope: SearchEnvelope =
            serde_json::from_str(&body).map_err(|e| ListingError::Decode(e.to_string()))?;

        tracing::debug!(
            keyword = %params.keyword,
            page = params.page,
            listings = envelope.data.list.len(),
            total_page = ?envelope.data.total_page,
            total_count = ?envelope.data.total_count,
            "Search page received"
        );

        Ok(envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_user_agent_every_few_requests() {
        let client = ListingClient::new();
        let first: Vec<_> = (0..USER_AGENT_ROTATION).map(|_| client.next_user_agent()).collect();
        assert!(first.iter().all(|ua| *ua == first[0]));

        let next = client.next_user_agent();
        assert_ne!(next, first[0]);
    }

    #[test]
    fn base_url_override() {
        let client = ListingClient::new().with_base_url("http://localhost:9999/search");
        assert_eq!(client.base_url(), "http://localhost:9999/search");
    }
}
