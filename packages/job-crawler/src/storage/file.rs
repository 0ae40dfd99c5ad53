//! File-system backend.
//!
//! Layout under the output directory, one directory per run date:
//!
//! ```text
//! <output_dir>/
//!   2024-01-14/
//!     jobs.csv     merged snapshot of every known record
//!     raw.jsonl    raw pages captured during that day's runs
//!   2024-01-15/
//!     ...
//! ```
//!
//! On open the latest `jobs.csv` is loaded into an in-memory index that
//! serves all reads. Every write rewrites the current date's snapshot via a
//! temp file and rename, so a half-written snapshot is never observable.
//! Assumes a single writer process per output directory.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{JobStore, WriteOutcome};
use crate::error::{StorageError, StoreResult};
use crate::types::{JobRecord, LifecycleStatus, ListingFields, RawPage, SalaryPeriod, SalaryRange};

pub const SNAPSHOT_FILE: &str = "jobs.csv";
pub const RAW_CAPTURE_FILE: &str = "raw.jsonl";

const DATE_DIR_FORMAT: &str = "%Y-%m-%d";

pub struct FileJobStore {
    run_dir: PathBuf,
    index: RwLock<HashMap<String, JobRecord>>,
    /// Serializes snapshot rewrites and raw appends
    writer: Mutex<()>,
}

impl FileJobStore {
    /// Open for today's (UTC) run directory.
    pub async fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_for_date(root, Utc::now().date_naive()).await
    }

    /// Open for an explicit run date, loading the latest snapshot on or
    /// before that date.
    pub async fn open_for_date(root: impl AsRef<Path>, run_date: NaiveDate) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        let run_dir = root.join(run_date.format(DATE_DIR_FORMAT).to_string());
        tokio::fs::create_dir_all(&run_dir)
            .await
            .map_err(|e| StorageError::Unavailable(format!("{}: {e}", run_dir.display())))?;

        let index = match latest_snapshot(&root, run_date).await? {
            Some(path) => {
                let records = load_snapshot(&path).await?;
                info!(path = %path.display(), records = records.len(), "Loaded job snapshot");
                records
            }
            None => {
                info!(root = %root.display(), "No previous snapshot, starting empty");
                HashMap::new()
            }
        };

        Ok(Self {
            run_dir,
            index: RwLock::new(index),
            writer: Mutex::new(()),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.run_dir.join(SNAPSHOT_FILE)
    }

    pub fn raw_capture_path(&self) -> PathBuf {
        self.run_dir.join(RAW_CAPTURE_FILE)
    }

    /// Apply `records` to a copy of the index, persist it, then publish it.
    /// Caller must hold `writer`.
    async fn commit(&self, records: &[JobRecord]) -> StoreResult<()> {
        let mut next = self.index.read().unwrap_or_else(PoisonError::into_inner).clone();
        for record in records {
            next.insert(record.id.clone(), record.clone());
        }

        write_snapshot(&self.snapshot_path(), &next).await?;

        *self.index.write().unwrap_or_else(PoisonError::into_inner) = next;
        debug!(written = records.len(), path = %self.snapshot_path().display(), "Snapshot committed");
        Ok(())
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn health_check(&self) -> StoreResult<()> {
        let meta = tokio::fs::metadata(&self.run_dir)
            .await
            .map_err(|e| StorageError::Unavailable(format!("{}: {e}", self.run_dir.display())))?;
        if !meta.is_dir() || meta.permissions().readonly() {
            return Err(StorageError::Unavailable(format!(
                "{} is not a writable directory",
                self.run_dir.display()
            )));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<JobRecord>> {
        Ok(self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn get_many(&self, ids: &[String]) -> StoreResult<HashMap<String, JobRecord>> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ids
            .iter()
            .filter_map(|id| index.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }

    async fn upsert(&self, record: &JobRecord) -> StoreResult<()> {
        let _guard = self.writer.lock().await;
        self.commit(std::slice::from_ref(record)).await
    }

    /// One snapshot rewrite for the whole batch. Rows that cannot be encoded
    /// fail individually; a failed rewrite fails every row of the batch.
    async fn bulk_write(&self, records: &[JobRecord]) -> Vec<WriteOutcome> {
        let mut outcomes = Vec::with_capacity(records.len());
        let mut writable = Vec::with_capacity(records.len());
        for record in records {
            match JobRow::try_from(record) {
                Ok(_) => writable.push(record.clone()),
                Err(e) => outcomes.push(WriteOutcome::failed(record.id.clone(), e)),
            }
        }

        let _guard = self.writer.lock().await;
        match self.commit(&writable).await {
            Ok(()) => outcomes.extend(writable.iter().map(|r| WriteOutcome::ok(r.id.clone()))),
            Err(e) => {
                let message = e.to_string();
                outcomes.extend(writable.iter().map(|r| {
                    WriteOutcome::failed(r.id.clone(), StorageError::Unavailable(message.clone()))
                }));
            }
        }
        outcomes
    }

    async fn scan(&self) -> StoreResult<Vec<JobRecord>> {
        Ok(self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn capture_raw(&self, page: &RawPage) -> StoreResult<()> {
        let mut line = serde_json::to_vec(page)?;
        line.push(b'\n');

        let _guard = self.writer.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.raw_capture_path())
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Newest `<date>/jobs.csv` with a date no later than `up_to`.
async fn latest_snapshot(root: &Path, up_to: NaiveDate) -> StoreResult<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::Unavailable(format!("{}: {e}", root.display()))),
    };

    let mut best: Option<(NaiveDate, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(date) = name
            .to_str()
            .and_then(|n| NaiveDate::parse_from_str(n, DATE_DIR_FORMAT).ok())
        else {
            continue;
        };
        if date > up_to {
            continue;
        }
        let snapshot = entry.path().join(SNAPSHOT_FILE);
        if !tokio::fs::try_exists(&snapshot).await.unwrap_or(false) {
            continue;
        }
        if best.as_ref().map_or(true, |(d, _)| date > *d) {
            best = Some((date, snapshot));
        }
    }
    Ok(best.map(|(_, path)| path))
}

async fn load_snapshot(path: &Path) -> StoreResult<HashMap<String, JobRecord>> {
    let bytes = tokio::fs::read(path).await?;
    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let mut records = HashMap::new();
    for row in reader.deserialize::<JobRow>() {
        let record = JobRecord::try_from(row?)?;
        records.insert(record.id.clone(), record);
    }
    Ok(records)
}

async fn write_snapshot(path: &Path, records: &HashMap<String, JobRecord>) -> StoreResult<()> {
    let mut sorted: Vec<&JobRecord> = records.values().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in sorted {
        writer.serialize(JobRow::try_from(record)?)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let tmp = path.with_extension("csv.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Flat tabular form of a [`JobRecord`]. Set and payload columns hold JSON.
#[derive(Debug, Serialize, Deserialize)]
struct JobRow {
    id: String,
    title: String,
    company: Option<String>,
    location: Option<String>,
    city: Option<String>,
    district: Option<String>,
    area_code: Option<String>,
    salary_min: Option<u64>,
    salary_max: Option<u64>,
    salary_currency: Option<String>,
    salary_period: Option<String>,
    posted_on: Option<NaiveDate>,
    job_url: Option<String>,
    company_url: Option<String>,
    apply_url: Option<String>,
    keywords: String,
    status: String,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    raw: String,
}

impl TryFrom<&JobRecord> for JobRow {
    type Error = StorageError;

    fn try_from(r: &JobRecord) -> Result<Self, Self::Error> {
        let f = &r.fields;
        Ok(Self {
            id: r.id.clone(),
            title: f.title.clone(),
            company: f.company.clone(),
            location: f.location.clone(),
            city: f.city.clone(),
            district: f.district.clone(),
            area_code: f.area_code.clone(),
            salary_min: f.salary.as_ref().and_then(|s| s.min),
            salary_max: f.salary.as_ref().and_then(|s| s.max),
            salary_currency: f.salary.as_ref().map(|s| s.currency.clone()),
            salary_period: f.salary.as_ref().map(|s| s.period.as_str().to_string()),
            posted_on: f.posted_on,
            job_url: f.job_url.clone(),
            company_url: f.company_url.clone(),
            apply_url: f.apply_url.clone(),
            keywords: serde_json::to_string(&r.keywords)?,
            status: r.status.as_str().to_string(),
            first_seen: r.first_seen,
            last_seen: r.last_seen,
            updated_at: r.updated_at,
            raw: serde_json::to_string(&r.raw)?,
        })
    }
}

impl TryFrom<JobRow> for JobRecord {
    type Error = StorageError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = LifecycleStatus::parse(&row.status).ok_or_else(|| {
            StorageError::Serialization(format!("unknown status {:?} for {}", row.status, row.id))
        })?;
        let keywords: BTreeSet<String> = serde_json::from_str(&row.keywords)?;

        let salary = row.salary_currency.map(|currency| SalaryRange {
            min: row.salary_min,
            max: row.salary_max,
            currency,
            period: row
                .salary_period
                .as_deref()
                .map(SalaryPeriod::parse)
                .unwrap_or(SalaryPeriod::Unknown),
        });

        Ok(Self {
            fields: ListingFields {
                title: row.title,
                company: row.company,
                location: row.location,
                city: row.city,
                district: row.district,
                area_code: row.area_code,
                salary,
                posted_on: row.posted_on,
                job_url: row.job_url,
                company_url: row.company_url,
                apply_url: row.apply_url,
            },
            id: row.id,
            keywords,
            raw: serde_json::from_str(&row.raw)?,
            status,
            first_seen: row.first_seen,
            last_seen: row.last_seen,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{merge, normalize};
    use crate::testing::listing;
    use crate::types::SearchQuery;

    fn record(id: &str, keyword: &str) -> JobRecord {
        merge(normalize(&listing(id, "Dev"), keyword).unwrap(), None, Utc::now()).0
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[tokio::test]
    async fn read_your_writes_and_snapshot_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open_for_date(dir.path(), day(14)).await.unwrap();

        let r = record("1", "rust");
        store.upsert(&r).await.unwrap();

        assert_eq!(store.get("1").await.unwrap(), Some(r));
        assert!(dir.path().join("2024-01-14").join(SNAPSHOT_FILE).exists());
    }

    #[tokio::test]
    async fn reopen_loads_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = record("1", "rust");
        r.keywords.insert("python".into());
        {
            let store = FileJobStore::open_for_date(dir.path(), day(14)).await.unwrap();
            store.bulk_write(&[r.clone(), record("2", "rust")]).await;
        }

        let store = FileJobStore::open_for_date(dir.path(), day(15)).await.unwrap();
        assert_eq!(store.get("1").await.unwrap(), Some(r));
        assert_eq!(store.scan().await.unwrap().len(), 2);
        // Today's snapshot only appears once something is written.
        assert!(!store.snapshot_path().exists());
    }

    #[tokio::test]
    async fn ignores_snapshots_from_later_dates() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileJobStore::open_for_date(dir.path(), day(20)).await.unwrap();
            store.upsert(&record("future", "rust")).await.unwrap();
        }

        let store = FileJobStore::open_for_date(dir.path(), day(15)).await.unwrap();
        assert!(store.get("future").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn raw_capture_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open_for_date(dir.path(), day(14)).await.unwrap();
        let query = SearchQuery::first("rust");

        store.capture_raw(&RawPage::new(&query, vec![listing("1", "Dev")])).await.unwrap();
        store.capture_raw(&RawPage::new(&query.next(), vec![])).await.unwrap();

        let content = std::fs::read_to_string(store.raw_capture_path()).unwrap();
        let pages: Vec<RawPage> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].page, 2);
    }

    #[tokio::test]
    async fn healthy_when_directory_is_writable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open_for_date(dir.path(), day(14)).await.unwrap();
        store.health_check().await.unwrap();
    }
}
