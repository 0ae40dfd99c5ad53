use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::types::ChangeKind;

pub const CANCELLED: &str = "cancelled";

/// Terminal state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    PartiallyFailed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::PartiallyFailed => "partially_failed",
            RunStatus::Failed => "failed",
        }
    }

    /// Completed when nothing failed, Failed when nothing succeeded.
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (0, _) => RunStatus::Failed,
            (_, 0) => RunStatus::Completed,
            _ => RunStatus::PartiallyFailed,
        }
    }
}

/// Per-keyword counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeywordStats {
    pub pages_fetched: u32,
    /// Items seen across all pages, malformed ones included
    pub discovered: u64,
    pub new: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Malformed items plus records whose write failed
    pub failed: u64,
    /// Identities already handled earlier in this keyword's pagination
    pub duplicates: u64,
    pub retries: u32,
    pub rate_limited: u32,
    /// Pagination ran out on the source's own signal, not the page limit
    pub exhausted: bool,
    /// Non-fatal problems, in order
    pub errors: Vec<String>,
    /// Set when the keyword's pipeline failed
    pub fatal_error: Option<String>,
}

impl KeywordStats {
    pub fn cancelled() -> Self {
        Self {
            fatal_error: Some(CANCELLED.to_string()),
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.fatal_error.is_none()
    }

    pub fn record(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::New => self.new += 1,
            ChangeKind::Updated => self.updated += 1,
            ChangeKind::Unchanged => self.unchanged += 1,
        }
    }

    /// Fold counters from a discarded attempt into this one.
    pub(crate) fn absorb_fetch_counters(&mut self, other: &KeywordStats) {
        self.retries += other.retries;
        self.rate_limited += other.rate_limited;
        self.errors.extend(other.errors.iter().cloned());
    }

    fn add(&mut self, other: &KeywordStats) {
        self.pages_fetched += other.pages_fetched;
        self.discovered += other.discovered;
        self.new += other.new;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
        self.duplicates += other.duplicates;
        self.retries += other.retries;
        self.rate_limited += other.rate_limited;
    }
}

/// Result of one orchestrator invocation. Built once the run is over.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Timestamp stamped on every record observed in this run
    pub observed_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    /// Records flipped to delisted by the post-run sweep
    pub delisted: u64,
    /// Why the run never started, when a precondition failed
    pub precondition_error: Option<String>,
    pub keywords: BTreeMap<String, KeywordStats>,
}

impl RunSummary {
    pub(crate) fn finished(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        keywords: BTreeMap<String, KeywordStats>,
        cancelled: bool,
    ) -> Self {
        let succeeded = keywords.values().filter(|s| s.succeeded()).count();
        let failed = keywords.len() - succeeded;
        Self {
            run_id,
            status: RunStatus::from_counts(succeeded, failed),
            observed_at: started_at,
            started_at,
            finished_at: Utc::now(),
            cancelled,
            delisted: 0,
            precondition_error: None,
            keywords,
        }
    }

    pub(crate) fn precondition_failed(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        keywords: &[String],
        reason: String,
    ) -> Self {
        let keywords = keywords
            .iter()
            .map(|k| {
                let stats = KeywordStats {
                    fatal_error: Some(reason.clone()),
                    ..Default::default()
                };
                (k.clone(), stats)
            })
            .collect();
        Self {
            run_id,
            status: RunStatus::Failed,
            observed_at: started_at,
            started_at,
            finished_at: Utc::now(),
            cancelled: false,
            delisted: 0,
            precondition_error: Some(reason),
            keywords,
        }
    }

    /// Downstream migration may proceed only after a run that did not fail.
    pub fn permits_migration(&self) -> bool {
        self.status != RunStatus::Failed
    }

    /// Counters summed over every keyword.
    pub fn total(&self) -> KeywordStats {
        let mut total = KeywordStats::default();
        for stats in self.keywords.values() {
            total.add(stats);
        }
        total
    }

    pub fn failed_keywords(&self) -> Vec<&str> {
        self.keywords
            .iter()
            .filter(|(_, s)| !s.succeeded())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> KeywordStats {
        KeywordStats {
            new: 2,
            pages_fetched: 1,
            ..Default::default()
        }
    }

    fn summary(stats: Vec<(&str, KeywordStats)>) -> RunSummary {
        RunSummary::finished(
            Uuid::now_v7(),
            Utc::now(),
            stats.into_iter().map(|(k, s)| (k.to_string(), s)).collect(),
            false,
        )
    }

    #[test]
    fn status_follows_keyword_outcomes() {
        assert_eq!(summary(vec![("a", ok()), ("b", ok())]).status, RunStatus::Completed);
        assert_eq!(
            summary(vec![("a", ok()), ("b", KeywordStats::cancelled())]).status,
            RunStatus::PartiallyFailed
        );
        assert_eq!(
            summary(vec![("a", KeywordStats::cancelled())]).status,
            RunStatus::Failed
        );
    }

    #[test]
    fn migration_allowed_unless_failed() {
        assert!(summary(vec![("a", ok()), ("b", KeywordStats::cancelled())]).permits_migration());
        assert!(!summary(vec![("a", KeywordStats::cancelled())]).permits_migration());
    }

    #[test]
    fn totals_sum_keywords() {
        let s = summary(vec![("a", ok()), ("b", ok())]);
        let total = s.total();
        assert_eq!(total.new, 4);
        assert_eq!(total.pages_fetched, 2);
    }

    #[test]
    fn precondition_failure_marks_every_keyword() {
        let s = RunSummary::precondition_failed(
            Uuid::now_v7(),
            Utc::now(),
            &["a".to_string(), "b".to_string()],
            "storage unavailable".into(),
        );
        assert_eq!(s.status, RunStatus::Failed);
        assert_eq!(s.failed_keywords(), vec!["a", "b"]);
    }
}
