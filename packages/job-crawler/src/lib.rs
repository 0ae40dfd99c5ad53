//! Search, merge and store pipeline for job listings.
//!
//! Collects listings from a paginated, rate-limited search endpoint,
//! merges them against what earlier runs stored, and writes them through a
//! pluggable storage backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use job_crawler::{
//!     CrawlerConfig, HttpPageSource, Orchestrator, open_store,
//! };
//! use listing_client::ListingClient;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = CrawlerConfig::from_env()?;
//! let store = open_store(&config.storage).await?;
//! let client = ListingClient::with_timeout(config.fetch.request_timeout)?;
//! let orchestrator = Orchestrator::from_config(HttpPageSource::new(client), store, &config);
//!
//! let summary = orchestrator
//!     .run(&config.keywords, config.concurrency, CancellationToken::new())
//!     .await;
//! println!("{:?}: {} new", summary.status, summary.total().new);
//! ```
//!
//! # Modules
//!
//! - [`fetcher`] - One request per page, with global concurrency, retries and cool-down
//! - [`searcher`] - Lazy pagination per keyword
//! - [`processor`] - Normalization and merge
//! - [`storage`] - `JobStore` trait with Postgres, file and memory backends
//! - [`orchestrator`] - Worker pool, run summary, delisting sweep
//! - [`scheduler`] - Daily cron trigger and post-run hook
//! - [`testing`] - Scripted page source and listing fixtures

pub mod config;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod processor;
pub mod scheduler;
pub mod searcher;
pub mod storage;
pub mod testing;
pub mod types;

pub use config::{
    CrawlerConfig, DelistPolicy, FetchConfig, RetryConfig, ScheduleConfig, StorageBackend,
};
pub use error::{ConfigError, FetchError, MalformedRecord, PipelineError, StorageError};
pub use fetcher::{Cooldown, Fetcher, HttpPageSource, PageSource};
pub use orchestrator::{KeywordStats, Orchestrator, RunStatus, RunSummary};
pub use scheduler::{CommandHook, PostRunHook};
pub use searcher::Searcher;
pub use storage::{open_store, FileJobStore, JobStore, MemoryJobStore, PostgresJobStore, WriteOutcome};
pub use types::{
    ChangeKind, Identity, JobRecord, LifecycleStatus, Listing, ListingFields, RawPage,
    SalaryPeriod, SalaryRange, SearchQuery,
};
