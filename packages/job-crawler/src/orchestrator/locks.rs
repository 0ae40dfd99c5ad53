use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

const DEFAULT_SHARDS: usize = 64;

/// Serializes read-merge-write per identity across keyword workers.
///
/// Identities hash onto a fixed set of shards. A batch locks its shards in
/// ascending order, so two batches can never wait on each other in a cycle.
pub struct IdentityLocks {
    shards: Vec<Mutex<()>>,
}

impl Default for IdentityLocks {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

impl IdentityLocks {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn shard_of(&self, id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Hold every shard covering `ids` until the guards drop.
    pub async fn lock_all<S: AsRef<str>>(&self, ids: &[S]) -> Vec<MutexGuard<'_, ()>> {
        let mut shards: Vec<usize> = ids.iter().map(|id| self.shard_of(id.as_ref())).collect();
        shards.sort_unstable();
        shards.dedup();

        let mut guards = Vec::with_capacity(shards.len());
        for shard in shards {
            guards.push(self.shards[shard].lock().await);
        }
        guards
    }
}
