//! Storage for canonical job records.
//!
//! One trait, independent backends picked at construction time:
//! - [`PostgresJobStore`]: JSONB documents keyed by identity
//! - [`FileJobStore`]: dated directories with a CSV snapshot and raw capture
//! - [`MemoryJobStore`]: in-process, for tests and dry runs

pub mod file;
pub mod memory;
pub mod postgres;

pub use file::FileJobStore;
pub use memory::MemoryJobStore;
pub use postgres::PostgresJobStore;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StorageBackend;
use crate::error::{StorageError, StoreResult};
use crate::types::{Identity, JobRecord, RawPage};

/// Result of writing one record in a batch.
#[derive(Debug)]
pub struct WriteOutcome {
    pub id: Identity,
    pub result: StoreResult<()>,
}

impl WriteOutcome {
    pub fn ok(id: impl Into<Identity>) -> Self {
        Self {
            id: id.into(),
            result: Ok(()),
        }
    }

    pub fn failed(id: impl Into<Identity>, error: StorageError) -> Self {
        Self {
            id: id.into(),
            result: Err(error),
        }
    }
}

/// Read-before-write store for job records.
///
/// Every backend guarantees read-your-writes within one process: a `get`
/// after a successful `upsert` of the same identity returns that record.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Probe the backend before a run starts.
    async fn health_check(&self) -> StoreResult<()>;

    async fn get(&self, id: &str) -> StoreResult<Option<JobRecord>>;

    /// Look up several identities at once. Missing ids are simply absent.
    async fn get_many(&self, ids: &[Identity]) -> StoreResult<HashMap<Identity, JobRecord>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(id).await? {
                found.insert(id.clone(), record);
            }
        }
        Ok(found)
    }

    /// Replace-or-insert one record atomically.
    async fn upsert(&self, record: &JobRecord) -> StoreResult<()>;

    /// Write a batch; one record failing never fails the others.
    async fn bulk_write(&self, records: &[JobRecord]) -> Vec<WriteOutcome> {
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(WriteOutcome {
                id: record.id.clone(),
                result: self.upsert(record).await,
            });
        }
        outcomes
    }

    /// Every stored record.
    async fn scan(&self) -> StoreResult<Vec<JobRecord>>;

    /// Keep a raw page for audit. Backends without raw capture ignore it.
    async fn capture_raw(&self, _page: &RawPage) -> StoreResult<()> {
        Ok(())
    }
}

/// Open the configured backend.
pub async fn open_store(backend: &StorageBackend) -> StoreResult<Arc<dyn JobStore>> {
    match backend {
        StorageBackend::Postgres { database_url } => {
            let store = PostgresJobStore::connect(database_url).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        StorageBackend::File { output_dir } => Ok(Arc::new(FileJobStore::open(output_dir).await?)),
    }
}
