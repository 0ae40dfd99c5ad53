//! Normalization and merge of observed listings against stored records.
//!
//! Both steps are pure: the orchestrator does the storage reads and writes
//! around them.

pub mod normalize;

pub use normalize::normalize;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::error::MalformedRecord;
use crate::types::{ChangeKind, JobRecord, LifecycleStatus, Listing, RawPage};

/// A page split into usable listings and rejected items.
#[derive(Debug, Default)]
pub struct NormalizedPage {
    /// Source order preserved
    pub listings: Vec<Listing>,
    pub rejected: Vec<MalformedRecord>,
}

/// Normalize every item of a page. Rejections never abort the page.
pub fn normalize_page(page: &RawPage) -> NormalizedPage {
    let mut out = NormalizedPage::default();
    for item in &page.items {
        match normalize(item, &page.keyword) {
            Ok(listing) => out.listings.push(listing),
            Err(e) => {
                tracing::warn!(keyword = %page.keyword, page = page.page, error = %e, "Skipping malformed listing");
                out.rejected.push(e);
            }
        }
    }
    out
}

/// Merge one observation into the stored record for the same identity.
///
/// - no stored record: `New`, first/last seen = `observed_at`
/// - fields differ or the record was delisted: `Updated`
/// - otherwise `Unchanged`
///
/// Keywords are always unioned and `last_seen` always bumped. A record
/// first seen in this same run keeps status `new` whatever later keywords
/// report. The returned record is always meant to be written.
pub fn merge(
    listing: Listing,
    existing: Option<JobRecord>,
    observed_at: DateTime<Utc>,
) -> (JobRecord, ChangeKind) {
    let Listing {
        id,
        keyword,
        fields,
        raw,
    } = listing;

    let Some(mut record) = existing else {
        let record = JobRecord {
            id,
            fields,
            keywords: BTreeSet::from([keyword]),
            raw,
            status: LifecycleStatus::New,
            first_seen: observed_at,
            last_seen: observed_at,
            updated_at: observed_at,
        };
        return (record, ChangeKind::New);
    };

    let fields_changed = record.fields != fields;
    let reactivated = record.is_delisted();
    record.keywords.insert(keyword);

    let kind = if fields_changed || reactivated {
        ChangeKind::Updated
    } else {
        ChangeKind::Unchanged
    };

    if fields_changed {
        record.fields = fields;
        record.updated_at = observed_at;
    }
    record.raw = raw;
    record.status = if record.first_seen == observed_at {
        LifecycleStatus::New
    } else {
        kind.into()
    };
    // Never move backwards, even if an older run is replayed.
    record.last_seen = record.last_seen.max(observed_at);

    (record, kind)
}
