//! Daily cron trigger using tokio-cron-scheduler.
//!
//! ```text
//! Scheduler (daily at HH:MM)
//!     │
//!     └─► Orchestrator::run(keywords, concurrency)
//!             └─► status ≠ Failed → PostRunHook::after_run (migration)
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::config::CrawlerConfig;
use crate::fetcher::PageSource;
use crate::orchestrator::{Orchestrator, RunSummary};

/// Downstream step triggered after a run that did not fail.
#[async_trait]
pub trait PostRunHook: Send + Sync {
    async fn after_run(&self, summary: &RunSummary) -> Result<()>;
}

/// Runs a shell command, exposing the run id and status as env vars.
pub struct CommandHook {
    command: String,
}

impl CommandHook {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl PostRunHook for CommandHook {
    async fn after_run(&self, summary: &RunSummary) -> Result<()> {
        tracing::info!(command = %self.command, run_id = %summary.run_id, "Starting post-run command");

        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("CRAWLER_RUN_ID", summary.run_id.to_string())
            .env("CRAWLER_RUN_STATUS", summary.status.as_str())
            .status()
            .await
            .with_context(|| format!("Failed to spawn post-run command `{}`", self.command))?;

        if !status.success() {
            bail!("post-run command exited with {status}");
        }
        Ok(())
    }
}

/// One run plus its post-run hook.
pub async fn run_once<S: PageSource + 'static>(
    orchestrator: &Orchestrator<S>,
    config: &CrawlerConfig,
    hook: Option<&dyn PostRunHook>,
    cancel: CancellationToken,
) -> RunSummary {
    let summary = orchestrator.run(&config.keywords, config.concurrency, cancel).await;

    if !summary.permits_migration() {
        tracing::warn!(run_id = %summary.run_id, "Run failed, skipping post-run step");
        return summary;
    }
    if let Some(hook) = hook {
        if let Err(e) = hook.after_run(&summary).await {
            tracing::error!(run_id = %summary.run_id, error = %e, "Post-run step failed");
        }
    }
    summary
}

/// Start the daily crawl. Overlapping triggers are skipped while a run is
/// still going; `shutdown` cancels the active run.
pub async fn start_daily<S: PageSource + 'static>(
    orchestrator: Arc<Orchestrator<S>>,
    config: CrawlerConfig,
    hook: Option<Arc<dyn PostRunHook>>,
    shutdown: CancellationToken,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let cron = config.schedule.cron_expression();
    let running = Arc::new(Mutex::new(()));
    let config = Arc::new(config);

    let crawl_job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let orchestrator = orchestrator.clone();
        let config = config.clone();
        let hook = hook.clone();
        let running = running.clone();
        let cancel = shutdown.child_token();
        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                tracing::warn!("Previous crawl still running, skipping this trigger");
                return;
            };
            tracing::info!("Running scheduled crawl");
            let summary = run_once(&orchestrator, &config, hook.as_deref(), cancel).await;
            tracing::info!(run_id = %summary.run_id, status = ?summary.status, "Scheduled crawl finished");
        })
    })?;

    scheduler.add(crawl_job).await?;
    scheduler.start().await?;

    tracing::info!(cron = %cron, "Crawl scheduler started");
    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::fetcher::Fetcher;
    use crate::orchestrator::RunStatus;
    use crate::storage::MemoryJobStore;
    use crate::testing::{listings, ScriptedSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHook {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PostRunHook for CountingHook {
        async fn after_run(&self, _summary: &RunSummary) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn orchestrator(source: ScriptedSource, store: Arc<MemoryJobStore>) -> Orchestrator<ScriptedSource> {
        Orchestrator::new(Arc::new(Fetcher::new(source, &FetchConfig::default())), store)
    }

    fn config(keywords: &[&str]) -> CrawlerConfig {
        CrawlerConfig {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn hook_runs_after_successful_run() {
        let source = ScriptedSource::new().pages("rust", vec![listings("r", 3)]);
        let orchestrator = orchestrator(source, Arc::new(MemoryJobStore::new()));
        let hook = CountingHook::default();

        let summary = run_once(&orchestrator, &config(&["rust"]), Some(&hook), CancellationToken::new()).await;
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hook_skipped_when_run_fails() {
        let store = Arc::new(MemoryJobStore::new());
        store.set_unhealthy(true);
        let orchestrator = orchestrator(ScriptedSource::new(), store);
        let hook = CountingHook::default();

        let summary = run_once(&orchestrator, &config(&["rust"]), Some(&hook), CancellationToken::new()).await;
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_command_hook_reports_error() {
        let source = ScriptedSource::new().pages("rust", vec![listings("r", 1)]);
        let orchestrator = orchestrator(source, Arc::new(MemoryJobStore::new()));
        let summary = orchestrator.run(&["rust".to_string()], 1, CancellationToken::new()).await;

        assert!(CommandHook::new("exit 3").after_run(&summary).await.is_err());
        assert!(CommandHook::new("test \"$CRAWLER_RUN_STATUS\" = completed")
            .after_run(&summary)
            .await
            .is_ok());
    }
}
