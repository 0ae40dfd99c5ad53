//! Canonical data types shared by every pipeline stage.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Listings per search page. Fixed by the listing endpoint.
pub const PAGE_SIZE: u32 = 20;

/// Stable external listing ID.
pub type Identity = String;

// ============================================================================
// QUERY / RAW PAGE
// ============================================================================

/// One page request for one keyword. Immutable; the searcher derives the
/// next query with [`SearchQuery::next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub keyword: String,
    /// 1-based page cursor
    pub page: u32,
    pub page_size: u32,
}

impl SearchQuery {
    /// First page for a keyword.
    pub fn first(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            page: 1,
            page_size: PAGE_SIZE,
        }
    }

    pub fn next(&self) -> Self {
        Self {
            keyword: self.keyword.clone(),
            page: self.page + 1,
            page_size: self.page_size,
        }
    }
}

/// One page of raw listings exactly as the source returned them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPage {
    pub keyword: String,
    pub page: u32,
    /// Raw listing payloads, in source order
    pub items: Vec<serde_json::Value>,
    /// Declared page count, when the source reports it
    pub total_pages: Option<u32>,
    pub total_count: Option<u64>,
    pub fetched_at: DateTime<Utc>,
    /// Extra attempts spent on this page (transient and rate-limited)
    #[serde(default)]
    pub retries: u32,
    /// How many of those retries followed a rate-limit response
    #[serde(default)]
    pub rate_limited: u32,
}

impl RawPage {
    pub fn new(query: &SearchQuery, items: Vec<serde_json::Value>) -> Self {
        Self {
            keyword: query.keyword.clone(),
            page: query.page,
            items,
            total_pages: None,
            total_count: None,
            fetched_at: Utc::now(),
            retries: 0,
            rate_limited: 0,
        }
    }

    pub fn with_totals(mut self, total_pages: Option<u32>, total_count: Option<u64>) -> Self {
        self.total_pages = total_pages;
        self.total_count = total_count;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True when the page declares itself the last one.
    pub fn is_last(&self) -> bool {
        match self.total_pages {
            Some(total) => self.page >= total,
            None => false,
        }
    }
}

// ============================================================================
// JOB RECORD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalaryPeriod {
    Hourly,
    Daily,
    Monthly,
    Yearly,
    Negotiable,
    Unknown,
}

impl SalaryPeriod {
    /// Map the listing endpoint's `s10` code.
    pub fn from_code(code: Option<u64>) -> Self {
        match code {
            Some(10) => SalaryPeriod::Negotiable,
            Some(30) => SalaryPeriod::Hourly,
            Some(40) => SalaryPeriod::Daily,
            Some(50) => SalaryPeriod::Monthly,
            Some(60) => SalaryPeriod::Yearly,
            _ => SalaryPeriod::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SalaryPeriod::Hourly => "hourly",
            SalaryPeriod::Daily => "daily",
            SalaryPeriod::Monthly => "monthly",
            SalaryPeriod::Yearly => "yearly",
            SalaryPeriod::Negotiable => "negotiable",
            SalaryPeriod::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "hourly" => SalaryPeriod::Hourly,
            "daily" => SalaryPeriod::Daily,
            "monthly" => SalaryPeriod::Monthly,
            "yearly" => SalaryPeriod::Yearly,
            "negotiable" => SalaryPeriod::Negotiable,
            _ => SalaryPeriod::Unknown,
        }
    }
}

/// Salary bounds. `max` is `None` for open-ended ranges ("40k and up").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min: Option<u64>,
    pub max: Option<u64>,
    pub currency: String,
    pub period: SalaryPeriod,
}

/// Lifecycle status assigned during merge (or by the delisting sweep).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    New,
    Updated,
    Unchanged,
    Delisted,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::New => "new",
            LifecycleStatus::Updated => "updated",
            LifecycleStatus::Unchanged => "unchanged",
            LifecycleStatus::Delisted => "delisted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(LifecycleStatus::New),
            "updated" => Some(LifecycleStatus::Updated),
            "unchanged" => Some(LifecycleStatus::Unchanged),
            "delisted" => Some(LifecycleStatus::Delisted),
            _ => None,
        }
    }
}

/// Merge outcome for one observed listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    New,
    Updated,
    Unchanged,
}

impl From<ChangeKind> for LifecycleStatus {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::New => LifecycleStatus::New,
            ChangeKind::Updated => LifecycleStatus::Updated,
            ChangeKind::Unchanged => LifecycleStatus::Unchanged,
        }
    }
}

/// The mutable, source-derived part of a listing. Merge compares these
/// field by field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListingFields {
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub area_code: Option<String>,
    pub salary: Option<SalaryRange>,
    pub posted_on: Option<NaiveDate>,
    pub job_url: Option<String>,
    pub company_url: Option<String>,
    pub apply_url: Option<String>,
}

/// A normalized listing observed under one keyword, not yet merged.
#[derive(Debug, Clone)]
pub struct Listing {
    pub id: Identity,
    pub keyword: String,
    pub fields: ListingFields,
    pub raw: serde_json::Value,
}

/// Canonical stored record.
///
/// Invariants: `first_seen <= last_seen`; `keywords` only grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Identity,
    #[serde(flatten)]
    pub fields: ListingFields,
    pub keywords: BTreeSet<String>,
    /// Last raw payload, kept for audit
    pub raw: serde_json::Value,
    pub status: LifecycleStatus,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// When `fields` last changed
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn is_delisted(&self) -> bool {
        self.status == LifecycleStatus::Delisted
    }
}
