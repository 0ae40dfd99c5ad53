// Common test utilities
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use job_crawler::testing::ScriptedSource;
use job_crawler::{FetchConfig, Fetcher, JobStore, Orchestrator, RetryConfig};

/// Retry settings small enough to keep failure-path tests fast.
pub fn fast_fetch_config(max_concurrency: usize) -> FetchConfig {
    FetchConfig {
        max_concurrency,
        request_timeout: Duration::from_secs(5),
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
            max_rate_limit_retries: 3,
            rate_limit_cooldown: Duration::from_millis(20),
        },
        api_url: String::new(),
    }
}

/// Orchestrator over a shared scripted source, so the test can inspect
/// call counts after the run.
pub fn orchestrator(
    source: &Arc<ScriptedSource>,
    store: Arc<dyn JobStore>,
) -> Orchestrator<Arc<ScriptedSource>> {
    orchestrator_with(source, store, fast_fetch_config(4))
}

pub fn orchestrator_with(
    source: &Arc<ScriptedSource>,
    store: Arc<dyn JobStore>,
    fetch: FetchConfig,
) -> Orchestrator<Arc<ScriptedSource>> {
    let fetcher = Arc::new(Fetcher::new(Arc::clone(source), &fetch));
    Orchestrator::new(fetcher, store)
}

pub fn keywords(list: &[&str]) -> Vec<String> {
    list.iter().map(|k| k.to_string()).collect()
}

/// Respects RUST_LOG; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
