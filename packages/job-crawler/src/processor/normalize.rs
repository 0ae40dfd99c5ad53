//! Raw listing payload → canonical fields.

use std::sync::LazyLock;

use chrono::NaiveDate;
use listing_client::RawListing;
use regex::Regex;
use serde_json::Value;

use crate::error::MalformedRecord;
use crate::types::{Listing, ListingFields, SalaryPeriod, SalaryRange};

pub const CURRENCY: &str = "TWD";

/// Upper-bound sentinel the source uses for "and above".
const OPEN_ENDED_SALARY: u64 = 9_999_999;

static CITY_AND_DISTRICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?[市縣])(.*?[區鄉鎮市])$").expect("Invalid city/district regex")
});
static CITY_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?[市縣])$").expect("Invalid city regex"));

/// Normalize one raw item observed under `keyword`.
///
/// Rejects the item when the identity or title is missing; every other
/// field degrades to `None`.
pub fn normalize(raw: &Value, keyword: &str) -> Result<Listing, MalformedRecord> {
    let parsed = RawListing::from_value(raw)
        .map_err(|e| MalformedRecord::new(raw_id(raw).as_deref(), format!("undecodable listing: {e}")))?;

    let id = non_empty(parsed.job_no.as_deref())
        .ok_or_else(|| MalformedRecord::new(None, "missing jobNo"))?;
    let title = non_empty(parsed.job_name.as_deref())
        .ok_or_else(|| MalformedRecord::new(Some(&id), "missing jobName"))?;

    let location = non_empty(parsed.job_addr_desc.as_deref());
    let (city, district) = match location.as_deref() {
        Some(address) => split_city_district(address),
        None => (None, None),
    };

    let link = parsed.link.unwrap_or_default();

    let fields = ListingFields {
        title,
        company: non_empty(parsed.cust_name.as_deref()),
        location,
        city,
        district,
        area_code: non_empty(parsed.job_addr_no.as_deref()),
        salary: salary_range(parsed.salary_low, parsed.salary_high, parsed.salary_code),
        posted_on: parsed
            .appear_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y%m%d").ok()),
        job_url: absolute_url(link.job.as_deref()),
        company_url: absolute_url(link.cust.as_deref()),
        apply_url: absolute_url(link.apply_analyze.as_deref()),
    };

    Ok(Listing {
        id,
        keyword: keyword.to_string(),
        fields,
        raw: raw.clone(),
    })
}

/// `台北市大安區` → (`台北市`, `大安區`); `台北市` → (`台北市`, none);
/// anything else → (none, whole text).
pub fn split_city_district(address: &str) -> (Option<String>, Option<String>) {
    let address = address.trim();
    if let Some(caps) = CITY_AND_DISTRICT.captures(address) {
        return (Some(caps[1].to_string()), Some(caps[2].to_string()));
    }
    if let Some(caps) = CITY_ONLY.captures(address) {
        return (Some(caps[1].to_string()), None);
    }
    (None, non_empty(Some(address)))
}

/// Prefix protocol-relative links with `https:`.
pub fn absolute_url(link: Option<&str>) -> Option<String> {
    let link = non_empty(link)?;
    if link.starts_with("http:") || link.starts_with("https:") {
        Some(link)
    } else {
        Some(format!("https:{link}"))
    }
}

fn salary_range(low: Option<u64>, high: Option<u64>, code: Option<u64>) -> Option<SalaryRange> {
    let min = low.filter(|v| *v > 0);
    let max = high.filter(|v| *v > 0 && *v != OPEN_ENDED_SALARY);
    if min.is_none() && max.is_none() {
        return None;
    }
    Some(SalaryRange {
        min,
        max,
        currency: CURRENCY.to_string(),
        period: SalaryPeriod::from_code(code),
    })
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn raw_id(raw: &Value) -> Option<String> {
    match raw.get("jobNo")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
