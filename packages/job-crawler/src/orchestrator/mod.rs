//! Run driver: fans keywords out to a worker pool and commits every page.
//!
//! ```text
//! Orchestrator::run(keywords, concurrency, cancel)
//!     │
//!     ├─► preconditions (keywords, storage health)
//!     ├─► keyword queue ──► N workers ──► results channel
//!     │        each worker, per page:
//!     │          capture raw → normalize → lock identities
//!     │          → get_many → merge → bulk_write
//!     ├─► RunSummary (Completed / PartiallyFailed / Failed)
//!     └─► delisting sweep (Completed runs only)
//! ```
//!
//! A keyword's fatal error never cancels its siblings. Storage outages are
//! retried once per keyword before the keyword is marked failed.

pub mod delisting;
pub mod locks;
pub mod summary;

pub use locks::IdentityLocks;
pub use summary::{KeywordStats, RunStatus, RunSummary};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{effective_page_limit, CrawlerConfig, DelistPolicy};
use crate::error::PipelineError;
use crate::fetcher::{Fetcher, PageSource};
use crate::processor;
use crate::searcher::Searcher;
use crate::storage::JobStore;
use crate::types::{ChangeKind, Identity, RawPage};

pub struct Orchestrator<S: PageSource> {
    searcher: Arc<Searcher<S>>,
    store: Arc<dyn JobStore>,
    locks: Arc<IdentityLocks>,
    delist: DelistPolicy,
}

impl<S: PageSource + 'static> Orchestrator<S> {
    pub fn new(fetcher: Arc<Fetcher<S>>, store: Arc<dyn JobStore>) -> Self {
        Self {
            searcher: Arc::new(Searcher::new(fetcher, effective_page_limit(0))),
            store,
            locks: Arc::new(IdentityLocks::default()),
            delist: DelistPolicy::default(),
        }
    }

    /// Wire a source and store with the configured limits.
    pub fn from_config(source: S, store: Arc<dyn JobStore>, config: &CrawlerConfig) -> Self {
        let fetcher = Arc::new(Fetcher::new(source, &config.fetch));
        Self::new(fetcher, store)
            .with_page_limit(config.page_limit())
            .with_delist_policy(config.delist.clone())
    }

    /// Pages per keyword; 0 means the safety cap.
    pub fn with_page_limit(mut self, max_pages: u32) -> Self {
        let fetcher = Arc::clone(self.searcher.fetcher());
        self.searcher = Arc::new(Searcher::new(fetcher, effective_page_limit(max_pages)));
        self
    }

    pub fn with_delist_policy(mut self, policy: DelistPolicy) -> Self {
        self.delist = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Run every keyword through search, merge and store.
    ///
    /// `cancel` stops new keywords and pages from being dispatched; work
    /// already in flight finishes. Cancelled keywords count as failed.
    pub async fn run(&self, keywords: &[String], concurrency: usize, cancel: CancellationToken) -> RunSummary {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();

        let mut unique: Vec<String> = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            if !unique.contains(keyword) {
                unique.push(keyword.clone());
            }
        }

        info!(%run_id, keywords = unique.len(), concurrency, backend = self.store.backend(), "Run starting");

        if unique.is_empty() {
            error!(%run_id, "Run failed: no keywords");
            return RunSummary::precondition_failed(run_id, started_at, &unique, "no keywords".into());
        }
        if let Err(e) = self.store.health_check().await {
            error!(%run_id, error = %e, "Run failed: storage unreachable");
            return RunSummary::precondition_failed(run_id, started_at, &unique, e.to_string());
        }

        let results = self.dispatch(&unique, concurrency, started_at, &cancel).await;

        let mut by_keyword = BTreeMap::new();
        for keyword in &unique {
            let stats = results.get(keyword).cloned().unwrap_or_else(|| KeywordStats {
                fatal_error: Some("worker terminated before reporting".into()),
                ..Default::default()
            });
            by_keyword.insert(keyword.clone(), stats);
        }

        let mut summary = RunSummary::finished(run_id, started_at, by_keyword, cancel.is_cancelled());

        if self.delist.enabled && summary.status == RunStatus::Completed && !summary.cancelled {
            match delisting::sweep(self.store.as_ref(), &self.delist, &summary).await {
                Ok(n) => summary.delisted = n,
                Err(e) => warn!(%run_id, error = %e, "Delisting sweep failed"),
            }
        }
        summary.finished_at = Utc::now();

        let total = summary.total();
        info!(
            %run_id,
            status = ?summary.status,
            cancelled = summary.cancelled,
            pages = total.pages_fetched,
            new = total.new,
            updated = total.updated,
            unchanged = total.unchanged,
            failed = total.failed,
            delisted = summary.delisted,
            duration_ms = summary.duration().num_milliseconds(),
            "Run finished"
        );
        summary
    }

    /// Worker pool: workers pull keywords from a shared queue and push
    /// their stats onto a results channel.
    async fn dispatch(
        &self,
        keywords: &[String],
        concurrency: usize,
        observed_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> HashMap<String, KeywordStats> {
        let (queue_tx, queue_rx) = mpsc::channel::<String>(keywords.len());
        for keyword in keywords {
            // Capacity equals the keyword count, so this never waits.
            if queue_tx.send(keyword.clone()).await.is_err() {
                break;
            }
        }
        drop(queue_tx);

        let queue = Arc::new(Mutex::new(queue_rx));
        let (results_tx, mut results_rx) = mpsc::channel::<(String, KeywordStats)>(keywords.len());

        let pipeline = KeywordPipeline {
            searcher: Arc::clone(&self.searcher),
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
            observed_at,
        };

        let workers = concurrency.clamp(1, keywords.len());
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let pipeline = pipeline.clone();
            let queue = Arc::clone(&queue);
            let results = results_tx.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let next = queue.lock().await.recv().await;
                    let Some(keyword) = next else { break };

                    let stats = if cancel.is_cancelled() {
                        debug!(worker, keyword = %keyword, "Skipping keyword after cancellation");
                        KeywordStats::cancelled()
                    } else {
                        pipeline.run_keyword(&keyword, &cancel).await
                    };

                    if results.send((keyword, stats)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(results_tx);

        let mut results = HashMap::with_capacity(keywords.len());
        while let Some((keyword, stats)) = results_rx.recv().await {
            results.insert(keyword, stats);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Keyword worker panicked");
            }
        }
        results
    }
}

/// Everything one keyword needs, cheap to clone into each worker.
struct KeywordPipeline<S: PageSource> {
    searcher: Arc<Searcher<S>>,
    store: Arc<dyn JobStore>,
    locks: Arc<IdentityLocks>,
    observed_at: DateTime<Utc>,
}

impl<S: PageSource> Clone for KeywordPipeline<S> {
    fn clone(&self) -> Self {
        Self {
            searcher: Arc::clone(&self.searcher),
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
            observed_at: self.observed_at,
        }
    }
}

impl<S: PageSource + 'static> KeywordPipeline<S> {
    async fn run_keyword(&self, keyword: &str, cancel: &CancellationToken) -> KeywordStats {
        info!(keyword = %keyword, "Keyword started");

        let mut stats = KeywordStats::default();
        let mut result = self.attempt(keyword, cancel, &mut stats).await;

        let retry_reason = match &result {
            Err(e) if e.is_storage_unavailable() && !cancel.is_cancelled() => Some(e.to_string()),
            _ => None,
        };
        if let Some(reason) = retry_reason {
            warn!(keyword = %keyword, error = %reason, "Storage unavailable, retrying keyword once");
            let first = std::mem::take(&mut stats);
            stats.absorb_fetch_counters(&first);
            stats.errors.push(format!("attempt 1: {reason}"));
            result = self.attempt(keyword, cancel, &mut stats).await;
        }

        match result {
            Ok(()) => info!(
                keyword = %keyword,
                pages = stats.pages_fetched,
                new = stats.new,
                updated = stats.updated,
                unchanged = stats.unchanged,
                failed = stats.failed,
                "Keyword finished"
            ),
            Err(e) => {
                error!(keyword = %keyword, pages = stats.pages_fetched, error = %e, "Keyword failed");
                stats.fatal_error = Some(e.to_string());
            }
        }
        stats
    }

    async fn attempt(
        &self,
        keyword: &str,
        cancel: &CancellationToken,
        stats: &mut KeywordStats,
    ) -> Result<(), PipelineError> {
        let mut pages = self.searcher.search(keyword);
        let mut seen: HashSet<Identity> = HashSet::new();
        let mut last: Option<(u32, bool)> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let Some(next) = pages.next().await else {
                stats.exhausted = match last {
                    Some((number, declared_last)) => declared_last || number < self.searcher.page_limit(),
                    None => true,
                };
                if !stats.exhausted {
                    debug!(keyword = %keyword, "Stopped at page limit, keyword left out of delisting");
                }
                return Ok(());
            };
            let page = next?;
            last = Some((page.page, page.is_last()));

            stats.pages_fetched += 1;
            stats.retries += page.retries;
            stats.rate_limited += page.rate_limited;
            stats.discovered += page.items.len() as u64;

            if let Err(e) = self.store.capture_raw(&page).await {
                warn!(keyword = %keyword, page = page.page, error = %e, "Raw capture failed");
                stats.errors.push(format!("raw capture page {}: {e}", page.page));
            }

            self.commit_page(&page, &mut seen, stats).await?;
        }
    }

    /// Normalize, merge and write one page. Identities stay locked from
    /// read to write so concurrent keywords cannot lose each other's merge.
    async fn commit_page(
        &self,
        page: &RawPage,
        seen: &mut HashSet<Identity>,
        stats: &mut KeywordStats,
    ) -> Result<(), PipelineError> {
        let normalized = processor::normalize_page(page);
        stats.failed += normalized.rejected.len() as u64;

        let mut listings = Vec::with_capacity(normalized.listings.len());
        for listing in normalized.listings {
            if seen.insert(listing.id.clone()) {
                listings.push(listing);
            } else {
                stats.duplicates += 1;
            }
        }
        if listings.is_empty() {
            return Ok(());
        }

        let ids: Vec<Identity> = listings.iter().map(|l| l.id.clone()).collect();
        let _guards = self.locks.lock_all(&ids).await;

        let mut existing = self.store.get_many(&ids).await?;
        let mut kinds: HashMap<Identity, ChangeKind> = HashMap::with_capacity(listings.len());
        let mut records = Vec::with_capacity(listings.len());
        for listing in listings {
            let prior = existing.remove(&listing.id);
            let (record, kind) = processor::merge(listing, prior, self.observed_at);
            kinds.insert(record.id.clone(), kind);
            records.push(record);
        }

        let mut unavailable = None;
        for outcome in self.store.bulk_write(&records).await {
            match outcome.result {
                Ok(()) => {
                    if let Some(kind) = kinds.get(&outcome.id) {
                        stats.record(*kind);
                    }
                }
                Err(e) if e.is_unavailable() => {
                    stats.failed += 1;
                    unavailable.get_or_insert(e);
                }
                Err(e) => {
                    warn!(keyword = %page.keyword, id = %outcome.id, error = %e, "Record write failed");
                    stats.failed += 1;
                    stats.errors.push(format!("{}: {e}", outcome.id));
                }
            }
        }

        debug!(
            keyword = %page.keyword,
            page = page.page,
            written = records.len(),
            "Page committed"
        );

        match unavailable {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
