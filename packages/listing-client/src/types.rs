use serde::{Deserialize, Deserializer, Serialize};

/// Query parameters for one page of `jobs/search/list`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchParams {
    pub keyword: String,
    pub page: u32,
    /// Search mode; the site uses `s` for plain keyword search.
    pub mode: &'static str,
    #[serde(rename = "jobsource")]
    pub job_source: &'static str,
}

impl SearchParams {
    pub fn new(keyword: impl Into<String>, page: u32) -> Self {
        Self {
            keyword: keyword.into(),
            page,
            mode: "s",
            job_source: "index",
        }
    }
}

/// Response envelope of the search endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchEnvelope {
    pub data: SearchData,
}

/// Payload of one search page.
///
/// Items are kept as raw JSON so that one malformed listing cannot fail the
/// whole page; use [`RawListing::from_value`] to decode them individually.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchData {
    #[serde(default)]
    pub list: Vec<serde_json::Value>,
    #[serde(rename = "totalPage", default, deserialize_with = "lenient_u64")]
    pub total_page: Option<u64>,
    #[serde(rename = "totalCount", default, deserialize_with = "lenient_u64")]
    pub total_count: Option<u64>,
}

/// A single listing as returned by the search endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawListing {
    #[serde(rename = "jobNo", default, deserialize_with = "lenient_string")]
    pub job_no: Option<String>,
    #[serde(rename = "jobName", default)]
    pub job_name: Option<String>,
    #[serde(rename = "custName", default)]
    pub cust_name: Option<String>,
    #[serde(rename = "jobAddrNoDesc", default)]
    pub job_addr_desc: Option<String>,
    #[serde(rename = "jobAddrNo", default, deserialize_with = "lenient_string")]
    pub job_addr_no: Option<String>,
    #[serde(rename = "salaryLow", default, deserialize_with = "lenient_u64")]
    pub salary_low: Option<u64>,
    #[serde(rename = "salaryHigh", default, deserialize_with = "lenient_u64")]
    pub salary_high: Option<u64>,
    /// Salary period code (`s10`): 10 negotiable, 30 hourly, 40 daily,
    /// 50 monthly, 60 yearly.
    #[serde(rename = "s10", default, deserialize_with = "lenient_u64")]
    pub salary_code: Option<u64>,
    /// Posting date as `YYYYMMDD`.
    #[serde(rename = "appearDate", default)]
    pub appear_date: Option<String>,
    #[serde(default)]
    pub link: Option<ListingLink>,
}

impl RawListing {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}

/// Links attached to a listing. Values are usually protocol-relative.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingLink {
    #[serde(rename = "applyAnalyze", default)]
    pub apply_analyze: Option<String>,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub cust: Option<String>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
