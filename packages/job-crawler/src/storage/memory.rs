//! In-memory storage implementation for testing and development.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::JobStore;
use crate::error::{StorageError, StoreResult};
use crate::types::{JobRecord, RawPage};

/// In-memory job store.
///
/// Data is lost on drop. Supports simple fault injection so tests can
/// exercise the orchestrator's storage failure paths.
#[derive(Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<String, JobRecord>>,
    raw_pages: RwLock<Vec<RawPage>>,
    unhealthy: AtomicBool,
    /// Fail this many upcoming `get_many` calls as unavailable
    unavailable_reads: AtomicUsize,
    conflict_ids: RwLock<HashSet<String>>,
    writes: AtomicUsize,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `health_check` as if the backend were unreachable.
    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    /// Make the next `n` batch reads fail with [`StorageError::Unavailable`].
    pub fn fail_next_reads(&self, n: usize) {
        self.unavailable_reads.store(n, Ordering::SeqCst);
    }

    /// Writes of this identity fail with a write conflict.
    pub fn conflict_on(&self, id: impl Into<String>) {
        self.conflict_ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into());
    }

    /// Seed a record without going through the pipeline.
    pub fn insert(&self, record: JobRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Successful record writes since creation.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn raw_pages(&self) -> Vec<RawPage> {
        self.raw_pages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_read_failure(&self) -> bool {
        self.unavailable_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> StoreResult<()> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store marked unhealthy".into()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<JobRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn get_many(&self, ids: &[String]) -> StoreResult<HashMap<String, JobRecord>> {
        if self.take_read_failure() {
            return Err(StorageError::Unavailable("injected read failure".into()));
        }
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ids
            .iter()
            .filter_map(|id| records.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }

    async fn upsert(&self, record: &JobRecord) -> StoreResult<()> {
        let conflict = self
            .conflict_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&record.id);
        if conflict {
            return Err(StorageError::WriteConflict {
                id: record.id.clone(),
                message: "injected conflict".into(),
            });
        }
        self.insert(record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn scan(&self) -> StoreResult<Vec<JobRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn capture_raw(&self, page: &RawPage) -> StoreResult<()> {
        self.raw_pages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(page.clone());
        Ok(())
    }
}
