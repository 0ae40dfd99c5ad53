//! Testing utilities: a scripted page source and listing fixtures.
//!
//! These drive the full pipeline without network calls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{FetchError, FetchResult};
use crate::fetcher::PageSource;
use crate::types::{RawPage, SearchQuery};

type ScriptKey = (String, u32);
type ScriptStep = Result<(Vec<Value>, Option<u32>), FetchError>;

/// A [`PageSource`] that replays scripted responses per `(keyword, page)`.
///
/// Steps for one page are consumed in order; the last step repeats, so a
/// script can be replayed across several runs. Pages with no script come
/// back empty, which ends pagination.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<ScriptKey, VecDeque<ScriptStep>>>,
    always_fail: HashMap<String, FetchError>,
    calls: Mutex<HashMap<ScriptKey, usize>>,
    in_flight: Mutex<(usize, usize)>,
    delay: Option<Duration>,
    seen_keywords: Mutex<HashSet<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, keyword: &str, page: u32, step: ScriptStep) -> Self {
        self.scripts
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .entry((keyword.to_string(), page))
            .or_default()
            .push_back(step);
        self
    }

    /// Script one page of results.
    pub fn page(self, keyword: &str, page: u32, items: Vec<Value>, total_pages: Option<u32>) -> Self {
        self.push(keyword, page, Ok((items, total_pages)))
    }

    /// Script pages `1..=n` with no declared page count.
    pub fn pages(self, keyword: &str, pages: Vec<Vec<Value>>) -> Self {
        pages
            .into_iter()
            .enumerate()
            .fold(self, |source, (i, items)| source.page(keyword, i as u32 + 1, items, None))
    }

    /// Script a failure for one page attempt.
    pub fn fail(self, keyword: &str, page: u32, error: FetchError) -> Self {
        self.push(keyword, page, Err(error))
    }

    /// Every page of `keyword` fails with `error`.
    pub fn fail_always(mut self, keyword: &str, error: FetchError) -> Self {
        self.always_fail.insert(keyword.to_string(), error);
        self
    }

    /// Sleep this long inside every call.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of attempts made for one page.
    pub fn calls(&self, keyword: &str, page: u32) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(keyword.to_string(), page))
            .copied()
            .unwrap_or(0)
    }

    /// Attempts across every page of a keyword.
    pub fn total_calls(&self, keyword: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|((k, _), _)| k == keyword)
            .map(|(_, n)| *n)
            .sum()
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).1
    }

    pub fn keywords_seen(&self) -> HashSet<String> {
        self.seen_keywords.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn next_step(&self, key: &ScriptKey) -> Option<ScriptStep> {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        let steps = scripts.get_mut(key)?;
        if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().cloned()
        }
    }

    fn enter(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.0 += 1;
        in_flight.1 = in_flight.1.max(in_flight.0);
    }

    fn exit(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.0 = in_flight.0.saturating_sub(1);
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch_once(&self, query: &SearchQuery) -> FetchResult<RawPage> {
        let key = (query.keyword.clone(), query.page);
        *self
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.clone())
            .or_default() += 1;
        self.seen_keywords
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(query.keyword.clone());

        self.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.exit();

        if let Some(error) = self.always_fail.get(&query.keyword) {
            return Err(error.clone());
        }

        match self.next_step(&key) {
            Some(Ok((items, total_pages))) => {
                Ok(RawPage::new(query, items).with_totals(total_pages, None))
            }
            Some(Err(error)) => Err(error),
            None => Ok(RawPage::new(query, Vec::new())),
        }
    }
}

/// A minimal well-formed listing payload.
pub fn listing(id: &str, title: &str) -> Value {
    json!({
        "jobNo": id,
        "jobName": title,
        "custName": "Acme Software",
        "jobAddrNoDesc": "台北市大安區",
        "jobAddrNo": "6001001005",
        "salaryLow": 50000,
        "salaryHigh": 80000,
        "s10": 50,
        "appearDate": "20240115",
        "link": {
            "job": "//www.104.com.tw/job/abc",
            "cust": "//www.104.com.tw/company/xyz",
            "applyAnalyze": "//www.104.com.tw/jobs/apply/analysis/abc"
        }
    })
}

/// [`listing`] with a different monthly salary range.
pub fn listing_with_salary(id: &str, title: &str, low: u64, high: u64) -> Value {
    let mut value = listing(id, title);
    value["salaryLow"] = json!(low);
    value["salaryHigh"] = json!(high);
    value
}

/// `n` distinct listings with ids `{prefix}-0..n`.
pub fn listings(prefix: &str, n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| listing(&format!("{prefix}-{i}"), &format!("{prefix} engineer {i}")))
        .collect()
}
