use async_trait::async_trait;
use listing_client::{ListingClient, ListingError, SearchParams};

use super::PageSource;
use crate::error::{FetchError, FetchResult};
use crate::types::{RawPage, SearchQuery};

/// [`PageSource`] backed by the live listing search endpoint.
pub struct HttpPageSource {
    client: ListingClient,
}

impl HttpPageSource {
    pub fn new(client: ListingClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_once(&self, query: &SearchQuery) -> FetchResult<RawPage> {
        let params = SearchParams::new(query.keyword.clone(), query.page);

        let data = self.client.search_page(&params).await.map_err(classify)?;

        let total_pages = data.total_page.map(|p| u32::try_from(p).unwrap_or(u32::MAX));
        Ok(RawPage::new(query, data.list).with_totals(total_pages, data.total_count))
    }
}

/// Sort a client error into the retry classes the fetcher understands.
fn classify(err: ListingError) -> FetchError {
    if err.is_rate_limited() {
        let retry_after = match &err {
            ListingError::Api { retry_after, .. } => *retry_after,
            _ => None,
        };
        return FetchError::RateLimited { retry_after };
    }
    if err.is_transient() {
        return FetchError::Transient(err.to_string());
    }
    FetchError::Terminal {
        status: err.status(),
        message: err.to_string(),
    }
}
