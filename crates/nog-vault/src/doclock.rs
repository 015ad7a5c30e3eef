//! Advisory mutual exclusion over a document's `locks` array. A lock entry
//! is identified by its `core` fields (whatever the caller considers part
//! of the lock's identity, e.g. `{"task": "reindex"}`) plus a `holder`;
//! `core` alone decides whether a slot is already taken, `holder` decides
//! who may release or renew it.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::VaultError;

pub const DEFAULT_LOCK_RENEW_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_LOCK_EXPIRE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    pub holder: String,
    pub core: HashMap<String, String>,
    pub ts: DateTime<Utc>,
}

impl LockEntry {
    fn core_matches(&self, core: &HashMap<String, String>) -> bool {
        &self.core == core
    }

    fn is_expired(&self, now: DateTime<Utc>, expire: Duration) -> bool {
        let expire = chrono::Duration::from_std(expire).unwrap_or(chrono::Duration::zero());
        now - self.ts > expire
    }
}

#[async_trait]
pub trait LockStore: Send + Sync {
    async fn locks(&self, doc_id: &str) -> Result<Vec<LockEntry>, VaultError>;

    /// Replaces the document's lock array with `new`, but only if the
    /// array still matches `expected` (read-modify-write under a
    /// document-level CAS, the same discipline `nog_client::repo` uses
    /// for ref updates).
    async fn compare_and_swap_locks(
        &self,
        doc_id: &str,
        expected: &[LockEntry],
        new: Vec<LockEntry>,
    ) -> Result<bool, VaultError>;
}

pub struct DocLocker<S: LockStore> {
    store: S,
    renew_interval: Duration,
    lock_expire: Duration,
    last_renewed: StdMutex<HashMap<(String, String), Instant>>,
}

impl<S: LockStore> DocLocker<S> {
    pub fn new(store: S) -> Self {
        DocLocker {
            store,
            renew_interval: DEFAULT_LOCK_RENEW_INTERVAL,
            lock_expire: DEFAULT_LOCK_EXPIRE,
            last_renewed: StdMutex::new(HashMap::new()),
        }
    }

    pub fn with_lock_expire(mut self, lock_expire: Duration) -> Self {
        self.lock_expire = lock_expire;
        self
    }

    /// Acquires the lock identified by `core` for `holder`, unless some
    /// entry (regardless of its holder) already has matching `core`
    /// fields and is not past `lock_expire`. A lock entry whose `ts` is
    /// older than `lock_expire` is treated as abandoned: it is dropped
    /// from the document the next time anyone tries to lock or unlock,
    /// same as a holder that crashed without releasing.
    pub async fn try_lock(
        &self,
        doc_id: &str,
        holder: &str,
        core: HashMap<String, String>,
    ) -> Result<bool, VaultError> {
        loop {
            let current = self.store.locks(doc_id).await?;
            let now = Utc::now();
            let live: Vec<LockEntry> = current
                .iter()
                .cloned()
                .filter(|l| !l.is_expired(now, self.lock_expire))
                .collect();
            if live.iter().any(|l| l.core_matches(&core)) {
                return Ok(false);
            }
            let mut next = live;
            next.push(LockEntry {
                holder: holder.to_string(),
                core: core.clone(),
                ts: now,
            });
            if self.store.compare_and_swap_locks(doc_id, &current, next).await? {
                return Ok(true);
            }
            // Lost the race against a concurrent locker; retry against
            // the now-current state.
        }
    }

    /// Releases the lock. Scoped to `holder`, so a retried `unlock` after
    /// a network timeout is a no-op rather than an error the second time.
    pub async fn unlock(
        &self,
        doc_id: &str,
        holder: &str,
        core: &HashMap<String, String>,
    ) -> Result<(), VaultError> {
        loop {
            let current = self.store.locks(doc_id).await?;
            let next: Vec<LockEntry> = current
                .iter()
                .cloned()
                .filter(|l| !(l.holder == holder && l.core_matches(core)))
                .collect();
            if next.len() == current.len() {
                return Ok(());
            }
            if self.store.compare_and_swap_locks(doc_id, &current, next).await? {
                self.last_renewed
                    .lock()
                    .unwrap()
                    .remove(&(doc_id.to_string(), holder.to_string()));
                return Ok(());
            }
        }
    }

    /// Refreshes the lock's timestamp, throttled to once per
    /// `renew_interval` per (doc, holder) pair -- a renewal storm from a
    /// tight caller loop collapses to one write per interval.
    pub async fn renew_lock(
        &self,
        doc_id: &str,
        holder: &str,
        core: &HashMap<String, String>,
    ) -> Result<bool, VaultError> {
        let key = (doc_id.to_string(), holder.to_string());
        {
            let mut last = self.last_renewed.lock().unwrap();
            if let Some(at) = last.get(&key) {
                if at.elapsed() < self.renew_interval {
                    return Ok(false);
                }
            }
            last.insert(key.clone(), Instant::now());
        }

        loop {
            let current = self.store.locks(doc_id).await?;
            let mut next = current.clone();
            let mut found = false;
            for entry in &mut next {
                if entry.holder == holder && entry.core_matches(core) {
                    entry.ts = Utc::now();
                    found = true;
                }
            }
            if !found {
                return Ok(false);
            }
            if self.store.compare_and_swap_locks(doc_id, &current, next).await? {
                return Ok(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct MemoryStore {
        docs: Mutex<HashMap<String, Vec<LockEntry>>>,
    }

    impl MemoryStore {
        fn new() -> Self {
            MemoryStore {
                docs: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl LockStore for MemoryStore {
        async fn locks(&self, doc_id: &str) -> Result<Vec<LockEntry>, VaultError> {
            Ok(self.docs.lock().await.get(doc_id).cloned().unwrap_or_default())
        }

        async fn compare_and_swap_locks(
            &self,
            doc_id: &str,
            expected: &[LockEntry],
            new: Vec<LockEntry>,
        ) -> Result<bool, VaultError> {
            let mut docs = self.docs.lock().await;
            let current = docs.get(doc_id).cloned().unwrap_or_default();
            if current != expected {
                return Ok(false);
            }
            docs.insert(doc_id.to_string(), new);
            Ok(true)
        }
    }

    fn core(task: &str) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("task".to_string(), task.to_string());
        m
    }

    #[tokio::test]
    async fn try_lock_rejects_matching_core_regardless_of_holder() {
        let locker = DocLocker::new(MemoryStore::new());
        assert!(locker.try_lock("doc1", "worker-a", core("reindex")).await.unwrap());
        assert!(!locker.try_lock("doc1", "worker-b", core("reindex")).await.unwrap());
    }

    #[tokio::test]
    async fn unlock_is_scoped_to_holder_and_idempotent() {
        let locker = DocLocker::new(MemoryStore::new());
        locker.try_lock("doc1", "worker-a", core("reindex")).await.unwrap();
        locker.unlock("doc1", "worker-a", &core("reindex")).await.unwrap();
        // Retried unlock after the lock is already gone is a no-op, not an error.
        locker.unlock("doc1", "worker-a", &core("reindex")).await.unwrap();
        assert!(locker.try_lock("doc1", "worker-b", core("reindex")).await.unwrap());
    }

    #[tokio::test]
    async fn try_lock_reaps_expired_entry_with_matching_core() {
        let locker = DocLocker::new(MemoryStore::new()).with_lock_expire(Duration::from_secs(0));
        assert!(locker.try_lock("doc1", "worker-a", core("reindex")).await.unwrap());
        // `lock_expire` is zero, so the entry just inserted already counts
        // as stale by the time the next caller looks.
        assert!(locker.try_lock("doc1", "worker-b", core("reindex")).await.unwrap());
    }

    #[tokio::test]
    async fn renew_lock_is_throttled() {
        let locker = DocLocker::new(MemoryStore::new());
        locker.try_lock("doc1", "worker-a", core("reindex")).await.unwrap();
        assert!(locker.renew_lock("doc1", "worker-a", &core("reindex")).await.unwrap());
        // Immediately retrying is throttled.
        assert!(!locker.renew_lock("doc1", "worker-a", &core("reindex")).await.unwrap());
    }
}
