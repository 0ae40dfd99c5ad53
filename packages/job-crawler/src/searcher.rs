//! Pagination for one keyword.

use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use tracing::debug;

use crate::error::FetchResult;
use crate::fetcher::{Fetcher, PageSource};
use crate::types::{RawPage, SearchQuery};

/// Walks a keyword's result pages in cursor order.
pub struct Searcher<S: PageSource> {
    fetcher: Arc<Fetcher<S>>,
    page_limit: u32,
}

impl<S: PageSource + 'static> Searcher<S> {
    pub fn new(fetcher: Arc<Fetcher<S>>, page_limit: u32) -> Self {
        Self {
            fetcher,
            page_limit: page_limit.max(1),
        }
    }

    pub fn fetcher(&self) -> &Arc<Fetcher<S>> {
        &self.fetcher
    }

    pub fn page_limit(&self) -> u32 {
        self.page_limit
    }

    /// Lazy, finite sequence of pages for `keyword`, starting at page 1.
    ///
    /// Page N+1 is only requested once the consumer polls past page N, so
    /// the caller controls pacing and can stop between pages. Ends after:
    /// an empty page (not yielded), a page declaring itself last, the page
    /// limit, or a fetch error (yielded as the final item).
    pub fn search(&self, keyword: &str) -> BoxStream<'static, FetchResult<RawPage>> {
        let fetcher = Arc::clone(&self.fetcher);
        let limit = self.page_limit;
        let mut query = SearchQuery::first(keyword);

        Box::pin(stream! {
            loop {
                let page = match fetcher.fetch(&query).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };

                if page.is_empty() {
                    debug!(keyword = %query.keyword, page = query.page, "Empty page, pagination exhausted");
                    break;
                }

                let last = page.is_last();
                let capped = query.page >= limit;
                yield Ok(page);

                if last {
                    debug!(keyword = %query.keyword, page = query.page, "Reached declared last page");
                    break;
                }
                if capped {
                    debug!(keyword = %query.keyword, limit, "Page limit reached");
                    break;
                }
                query = query.next();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::error::FetchError;
    use crate::testing::{listings, ScriptedSource};
    use futures::StreamExt;

    fn searcher(source: ScriptedSource, limit: u32) -> Searcher<ScriptedSource> {
        Searcher::new(Arc::new(Fetcher::new(source, &FetchConfig::default())), limit)
    }

    #[tokio::test]
    async fn stops_before_first_empty_page() {
        // pages 1..=3 have data, page 4 comes back empty
        let source = ScriptedSource::new().pages(
            "rust",
            vec![listings("a", 20), listings("b", 20), listings("c", 7)],
        );
        let searcher = searcher(source, 150);

        let pages: Vec<_> = searcher.search("rust").collect().await;
        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(|p| p.is_ok()));
        assert_eq!(searcher.fetcher.source().calls("rust", 4), 1);
        assert_eq!(searcher.fetcher.source().calls("rust", 5), 0);
    }

    #[tokio::test]
    async fn stops_at_declared_last_page() {
        let source = ScriptedSource::new()
            .page("rust", 1, listings("a", 20), Some(2))
            .page("rust", 2, listings("b", 20), Some(2))
            .page("rust", 3, listings("c", 20), Some(2));
        let searcher = searcher(source, 150);

        let pages: Vec<_> = searcher.search("rust").collect().await;
        assert_eq!(pages.len(), 2);
        assert_eq!(searcher.fetcher.source().calls("rust", 3), 0);
    }

    #[tokio::test]
    async fn page_limit_caps_runaway_pagination() {
        let source = (1..=10).fold(ScriptedSource::new(), |s, p| {
            s.page("rust", p, listings(&format!("p{p}"), 20), None)
        });
        let searcher = searcher(source, 4);

        let pages: Vec<_> = searcher.search("rust").collect().await;
        assert_eq!(pages.len(), 4);
        assert_eq!(searcher.fetcher.source().calls("rust", 5), 0);
    }

    #[tokio::test]
    async fn terminal_error_ends_sequence_with_error() {
        let source = ScriptedSource::new()
            .page("rust", 1, listings("a", 20), None)
            .fail(
                "rust",
                2,
                FetchError::Terminal {
                    status: Some(400),
                    message: "bad request".into(),
                },
            );
        let searcher = searcher(source, 150);

        let pages: Vec<_> = searcher.search("rust").collect().await;
        assert_eq!(pages.len(), 2);
        assert!(pages[0].is_ok());
        assert!(matches!(pages[1], Err(FetchError::Terminal { .. })));
        assert_eq!(searcher.fetcher.source().calls("rust", 3), 0);
    }

    #[tokio::test]
    async fn pages_are_requested_lazily() {
        let source = ScriptedSource::new().pages("rust", vec![listings("a", 20), listings("b", 20)]);
        let searcher = searcher(source, 150);

        let mut stream = searcher.search("rust");
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.page, 1);
        assert_eq!(searcher.fetcher.source().calls("rust", 2), 0);
    }

    #[tokio::test]
    async fn each_search_restarts_at_page_one() {
        let source = ScriptedSource::new().pages("rust", vec![listings("a", 3)]);
        let searcher = searcher(source, 150);

        let _: Vec<_> = searcher.search("rust").collect().await;
        let _: Vec<_> = searcher.search("rust").collect().await;
        assert_eq!(searcher.fetcher.source().calls("rust", 1), 2);
    }
}
