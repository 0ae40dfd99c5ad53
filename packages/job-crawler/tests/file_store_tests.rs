//! Pipeline runs against the file backend, including reopening the output
//! directory between runs.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use job_crawler::testing::{listings, ScriptedSource};
use job_crawler::{FileJobStore, JobStore, LifecycleStatus, RunStatus};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::common::{keywords, orchestrator};

#[tokio::test]
async fn snapshot_survives_reopen_and_rerun_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::new().pages("rust", vec![listings("r", 20), listings("s", 4)]));

    let store = Arc::new(FileJobStore::open(dir.path()).await.unwrap());
    let first = orchestrator(&source, store.clone())
        .run(&keywords(&["rust"]), 1, CancellationToken::new())
        .await;
    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(first.total().new, 24);
    assert!(store.snapshot_path().exists());
    assert!(store.raw_capture_path().exists());

    let reopened = Arc::new(FileJobStore::open(dir.path()).await.unwrap());
    assert_eq!(reopened.scan().await.unwrap().len(), 24);

    let second = orchestrator(&source, reopened.clone())
        .run(&keywords(&["rust"]), 1, CancellationToken::new())
        .await;
    let total = second.total();
    assert_eq!(total.new, 0);
    assert_eq!(total.updated, 0);
    assert_eq!(total.unchanged, 24);

    let record = reopened.get("r-3").await.unwrap().unwrap();
    assert_eq!(record.status, LifecycleStatus::Unchanged);
    assert!(record.keywords.contains("rust"));
}

#[tokio::test]
async fn next_day_run_starts_from_previous_snapshot() {
    let dir = TempDir::new().unwrap();
    let yesterday = Utc::now().date_naive() - Duration::days(1);

    let day_one = Arc::new(ScriptedSource::new().pages("rust", vec![listings("r", 3)]));
    let store = Arc::new(FileJobStore::open_for_date(dir.path(), yesterday).await.unwrap());
    orchestrator(&day_one, store)
        .run(&keywords(&["rust"]), 1, CancellationToken::new())
        .await;

    let day_two = Arc::new(ScriptedSource::new().pages("rust", vec![listings("r", 2)]));
    let today = Arc::new(FileJobStore::open(dir.path()).await.unwrap());
    let summary = orchestrator(&day_two, today.clone())
        .run(&keywords(&["rust"]), 1, CancellationToken::new())
        .await;

    assert_eq!(summary.total().unchanged, 2);
    assert_eq!(summary.delisted, 1);
    assert_eq!(today.get("r-2").await.unwrap().unwrap().status, LifecycleStatus::Delisted);
    assert_ne!(today.run_dir(), dir.path().join(yesterday.format("%Y-%m-%d").to_string()));
}
