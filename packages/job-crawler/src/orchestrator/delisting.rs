//! Post-run delisting sweep.
//!
//! A record is flipped to `Delisted` when the run was fully successful, the
//! record belongs to at least one keyword the run paginated to the end, and
//! it has not been seen since `observed_at - grace`. Records tagged with a
//! keyword that stopped at the page limit are left alone. Records are never
//! deleted.

use std::collections::HashSet;

use tracing::{info, warn};

use super::summary::{RunStatus, RunSummary};
use crate::config::DelistPolicy;
use crate::error::StoreResult;
use crate::storage::JobStore;
use crate::types::{JobRecord, LifecycleStatus};

impl DelistPolicy {
    /// Records from `records` that this run should mark delisted, already
    /// carrying the new status.
    pub fn apply(&self, records: Vec<JobRecord>, run: &RunSummary) -> Vec<JobRecord> {
        if !self.enabled || run.cancelled || run.status != RunStatus::Completed {
            return Vec::new();
        }

        let (exhausted, capped): (Vec<_>, Vec<_>) = run.keywords.iter().partition(|(_, s)| s.exhausted);
        let exhausted: HashSet<&str> = exhausted.into_iter().map(|(k, _)| k.as_str()).collect();
        let capped: HashSet<&str> = capped.into_iter().map(|(k, _)| k.as_str()).collect();
        let cutoff = run.observed_at - self.grace;

        records
            .into_iter()
            .filter(|r| !r.is_delisted())
            .filter(|r| r.last_seen < cutoff)
            .filter(|r| r.keywords.iter().any(|k| exhausted.contains(k.as_str())))
            .filter(|r| !r.keywords.iter().any(|k| capped.contains(k.as_str())))
            .map(|mut r| {
                r.status = LifecycleStatus::Delisted;
                r
            })
            .collect()
    }
}

/// Run the sweep against `store`. Returns how many records were delisted.
pub async fn sweep(store: &dyn JobStore, policy: &DelistPolicy, run: &RunSummary) -> StoreResult<u64> {
    let candidates = policy.apply(store.scan().await?, run);
    if candidates.is_empty() {
        return Ok(0);
    }

    let mut delisted = 0u64;
    for outcome in store.bulk_write(&candidates).await {
        match outcome.result {
            Ok(()) => delisted += 1,
            Err(e) => warn!(id = %outcome.id, error = %e, "Failed to mark listing delisted"),
        }
    }
    info!(run_id = %run.run_id, delisted, "Delisting sweep complete");
    Ok(delisted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::summary::KeywordStats;
    use crate::processor::{merge, normalize};
    use crate::testing::listing;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn record(id: &str, keyword: &str, seen: chrono::DateTime<Utc>) -> JobRecord {
        merge(normalize(&listing(id, "Dev"), keyword).unwrap(), None, seen).0
    }

    fn exhausted() -> KeywordStats {
        KeywordStats {
            exhausted: true,
            ..Default::default()
        }
    }

    fn run(keywords: &[&str], stats: KeywordStats) -> RunSummary {
        RunSummary::finished(
            Uuid::now_v7(),
            Utc::now(),
            keywords.iter().map(|k| (k.to_string(), stats.clone())).collect(),
            false,
        )
    }

    #[test]
    fn delists_unseen_records_of_run_keywords() {
        let run = run(&["Python"], exhausted());
        let yesterday = run.observed_at - Duration::days(1);

        let records = vec![
            record("stale", "Python", yesterday),
            record("fresh", "Python", run.observed_at),
            record("other", "Go", yesterday),
        ];

        let delisted = DelistPolicy::default().apply(records, &run);
        assert_eq!(delisted.len(), 1);
        assert_eq!(delisted[0].id, "stale");
        assert_eq!(delisted[0].status, LifecycleStatus::Delisted);
    }

    #[test]
    fn grace_window_keeps_recent_records() {
        let run = run(&["Python"], exhausted());
        let records = vec![record("1", "Python", run.observed_at - Duration::days(2))];

        let policy = DelistPolicy {
            enabled: true,
            grace: Duration::days(3),
        };
        assert!(policy.apply(records, &run).is_empty());
    }

    #[test]
    fn partial_runs_never_delist() {
        let mut run = run(&["Python"], exhausted());
        run.status = RunStatus::PartiallyFailed;
        let records = vec![record("1", "Python", run.observed_at - Duration::days(9))];

        assert!(DelistPolicy::default().apply(records, &run).is_empty());
    }

    #[test]
    fn page_limited_keywords_are_not_swept() {
        let mut run = run(&["Python", "Go"], exhausted());
        run.keywords.get_mut("Go").unwrap().exhausted = false;
        let stale = run.observed_at - Duration::days(1);

        let mut both = record("both", "Python", stale);
        both.keywords.insert("Go".to_string());
        let records = vec![record("py", "Python", stale), record("go", "Go", stale), both];

        let delisted = DelistPolicy::default().apply(records, &run);
        let ids: Vec<&str> = delisted.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["py"]);
    }

    #[test]
    fn already_delisted_records_are_skipped() {
        let run = run(&["Python"], exhausted());
        let mut r = record("1", "Python", run.observed_at - Duration::days(9));
        r.status = LifecycleStatus::Delisted;

        assert!(DelistPolicy::default().apply(vec![r], &run).is_empty());
    }
}
