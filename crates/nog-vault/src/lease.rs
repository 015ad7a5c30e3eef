//! Credential-lease manager.
//!
//! Two locks, two jobs: `read_view` is a small, fast `RwLock` guarding an
//! atomic snapshot swap -- readers of [`VaultManager::read_view`] never see
//! a torn mix of old and new secret data, because the whole snapshot is
//! replaced in one write. `lease_table` is a slower `Mutex` guarding the
//! lease bookkeeping and serializing the network calls (renew, full
//! reread, revoke) against each other and against shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::error::VaultError;

/// Leases with more than this much life left are left alone on a tick.
const RENEW_SKIP_THRESHOLD: Duration = Duration::from_secs(30 * 60);
/// A lease renewed to less than this remaining life is treated the same
/// as a failed renewal: fall back to a full reread instead of trusting
/// the short extension.
const RENEW_FLOOR: Duration = Duration::from_secs(45 * 60);
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct LeaseData {
    pub lease_id: String,
    pub renewable: bool,
    pub lease_duration: Duration,
    pub data: HashMap<String, String>,
}

#[async_trait]
pub trait VaultBackend: Send + Sync {
    async fn read_lease(&self, path: &str) -> Result<LeaseData, VaultError>;
    async fn renew_lease(&self, lease_id: &str) -> Result<LeaseData, VaultError>;
    async fn revoke_lease(&self, lease_id: &str) -> Result<(), VaultError>;
    async fn read_local_auth_token(&self) -> Result<String, VaultError>;
}

pub type KeyMap = HashMap<String, String>;
pub type Destination = Arc<Mutex<HashMap<String, String>>>;

/// An AWS STS-style lease id can never actually be renewed, regardless of
/// what the server's lease metadata claims.
fn effective_renewable(lease_id: &str, server_renewable: bool) -> bool {
    server_renewable && !lease_id.contains("/sts/")
}

struct LeaseEntry {
    lease_id: String,
    data: HashMap<String, String>,
    expires_at: Instant,
    renewable: bool,
    destinations: Vec<(KeyMap, Destination)>,
}

impl LeaseEntry {
    fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

struct LeaseTable {
    auth_token: String,
    entries: HashMap<String, LeaseEntry>,
}

/// An atomic snapshot of every path's current secret data, tagged with a
/// counter that strictly increases on every publish (every `lease_to` and
/// every `tick` that touches at least one lease). Consumers can compare
/// `mtime` across reads to tell whether anything changed without diffing
/// the config maps themselves.
#[derive(Debug, Clone, Default)]
pub struct ReadView {
    pub mtime: u64,
    pub config: HashMap<String, HashMap<String, String>>,
}

pub struct VaultManager<B: VaultBackend> {
    backend: Arc<B>,
    lease_table: Mutex<LeaseTable>,
    read_view: RwLock<Arc<ReadView>>,
    mtime: AtomicU64,
    leaving: AtomicBool,
}

impl<B: VaultBackend> VaultManager<B> {
    pub fn new(backend: Arc<B>) -> Self {
        VaultManager {
            backend,
            lease_table: Mutex::new(LeaseTable {
                auth_token: String::new(),
                entries: HashMap::new(),
            }),
            read_view: RwLock::new(Arc::new(ReadView::default())),
            mtime: AtomicU64::new(0),
            leaving: AtomicBool::new(false),
        }
    }

    /// An atomic snapshot of every path's current secret data.
    pub async fn read_view(&self) -> Arc<ReadView> {
        self.read_view.read().await.clone()
    }

    /// Declares a destination for a secret path, applying `keymap` against
    /// it immediately. Repeated calls for the same `path` reuse the
    /// already-read lease rather than issuing a new read.
    pub async fn lease_to(
        &self,
        path: &str,
        dest: Destination,
        keymap: KeyMap,
    ) -> Result<(), VaultError> {
        if self.leaving.load(Ordering::SeqCst) {
            return Err(VaultError::ShuttingDown);
        }
        let mut table = self.lease_table.lock().await;
        if let Some(entry) = table.entries.get_mut(path) {
            apply_keymap(&entry.data, &keymap, &dest).await;
            entry.destinations.push((keymap, dest));
            return Ok(());
        }

        let fresh = self.backend.read_lease(path).await?;
        let renewable = effective_renewable(&fresh.lease_id, fresh.renewable);
        apply_keymap(&fresh.data, &keymap, &dest).await;
        let entry = LeaseEntry {
            lease_id: fresh.lease_id,
            data: fresh.data,
            expires_at: Instant::now() + fresh.lease_duration,
            renewable,
            destinations: vec![(keymap, dest)],
        };
        table.entries.insert(path.to_string(), entry);
        self.publish_read_view(&table).await;
        Ok(())
    }

    /// One renewal pass over every registered lease. Intended to be
    /// called on a fixed interval (`DEFAULT_TICK_INTERVAL`) by a
    /// long-running task.
    pub async fn tick(&self) -> Result<(), VaultError> {
        if self.leaving.load(Ordering::SeqCst) {
            return Ok(());
        }

        let current_token = self.backend.read_local_auth_token().await?;
        let mut table = self.lease_table.lock().await;
        let token_changed = current_token != table.auth_token;
        table.auth_token = current_token;

        let paths: Vec<String> = table.entries.keys().cloned().collect();
        for path in paths {
            if self.leaving.load(Ordering::SeqCst) {
                break;
            }
            self.tick_one(&mut table, &path, token_changed).await;
        }

        self.publish_read_view(&table).await;
        Ok(())
    }

    async fn tick_one(&self, table: &mut LeaseTable, path: &str, force_reread: bool) {
        let should_reread = force_reread || {
            let entry = table.entries.get(path).expect("path present in table");
            if entry.remaining() > RENEW_SKIP_THRESHOLD {
                return;
            }
            !entry.renewable
        };

        let mut reread = should_reread;
        if !reread {
            let lease_id = table.entries.get(path).unwrap().lease_id.clone();
            match self.backend.renew_lease(&lease_id).await {
                Ok(renewed) => {
                    if renewed.lease_duration < RENEW_FLOOR {
                        // Renewed, but not by enough to trust: fall back
                        // to a full reread on this same tick rather than
                        // risk expiry before the next one.
                        reread = true;
                    } else {
                        let entry = table.entries.get_mut(path).unwrap();
                        entry.data = renewed.data;
                        entry.expires_at = Instant::now() + renewed.lease_duration;
                        self.apply_to_destinations(entry).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(%path, error = %e, "lease renewal failed, rereading");
                    reread = true;
                }
            }
        }

        if reread {
            match self.backend.read_lease(path).await {
                Ok(fresh) => {
                    let renewable = effective_renewable(&fresh.lease_id, fresh.renewable);
                    let entry = table.entries.get_mut(path).unwrap();
                    entry.lease_id = fresh.lease_id;
                    entry.data = fresh.data;
                    entry.expires_at = Instant::now() + fresh.lease_duration;
                    entry.renewable = renewable;
                    self.apply_to_destinations(entry).await;
                }
                Err(e) => {
                    tracing::warn!(%path, error = %e, "lease reread failed, keeping stale lease");
                }
            }
        }
    }

    async fn apply_to_destinations(&self, entry: &LeaseEntry) {
        for (keymap, dest) in &entry.destinations {
            apply_keymap(&entry.data, keymap, dest).await;
        }
    }

    async fn publish_read_view(&self, table: &LeaseTable) {
        let config: HashMap<String, HashMap<String, String>> = table
            .entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.data.clone()))
            .collect();
        let mtime = self.mtime.fetch_add(1, Ordering::SeqCst) + 1;
        *self.read_view.write().await = Arc::new(ReadView { mtime, config });
    }

    /// Marks the manager as leaving (blocking any renewal attempt still in
    /// flight or about to start) and revokes every known lease.
    pub async fn shutdown(&self) -> Result<(), VaultError> {
        self.leaving.store(true, Ordering::SeqCst);
        let table = self.lease_table.lock().await;
        for entry in table.entries.values() {
            if let Err(e) = self.backend.revoke_lease(&entry.lease_id).await {
                tracing::warn!(lease_id = %entry.lease_id, error = %e, "lease revocation failed");
            }
        }
        Ok(())
    }
}

async fn apply_keymap(data: &HashMap<String, String>, keymap: &KeyMap, dest: &Destination) {
    let mut dest = dest.lock().await;
    for (src_key, dest_key) in keymap {
        if let Some(value) = data.get(src_key) {
            dest.insert(dest_key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FakeBackend {
        renew_duration: Mutex<Duration>,
        read_calls: AtomicU32,
        renew_calls: AtomicU32,
    }

    #[async_trait]
    impl VaultBackend for FakeBackend {
        async fn read_lease(&self, path: &str) -> Result<LeaseData, VaultError> {
            self.read_calls.fetch_add(1, Ordering::SeqCst);
            let mut data = HashMap::new();
            data.insert("token".to_string(), format!("{path}-token"));
            Ok(LeaseData {
                lease_id: format!("lease/{path}"),
                renewable: true,
                lease_duration: Duration::from_secs(3600),
                data,
            })
        }

        async fn renew_lease(&self, _lease_id: &str) -> Result<LeaseData, VaultError> {
            self.renew_calls.fetch_add(1, Ordering::SeqCst);
            let duration = *self.renew_duration.lock().await;
            let mut data = HashMap::new();
            data.insert("token".to_string(), "renewed-token".to_string());
            Ok(LeaseData {
                lease_id: "lease/db".to_string(),
                renewable: true,
                lease_duration: duration,
                data,
            })
        }

        async fn revoke_lease(&self, _lease_id: &str) -> Result<(), VaultError> {
            Ok(())
        }

        async fn read_local_auth_token(&self) -> Result<String, VaultError> {
            Ok("token-a".to_string())
        }
    }

    #[tokio::test]
    async fn lease_to_applies_keymap_immediately() {
        let backend = Arc::new(FakeBackend {
            renew_duration: Mutex::new(Duration::from_secs(3600)),
            read_calls: AtomicU32::new(0),
            renew_calls: AtomicU32::new(0),
        });
        let manager = VaultManager::new(backend);
        let dest: Destination = Arc::new(Mutex::new(HashMap::new()));
        let mut keymap = HashMap::new();
        keymap.insert("token".to_string(), "db_token".to_string());

        manager.lease_to("db", dest.clone(), keymap).await.unwrap();

        let dest = dest.lock().await;
        assert_eq!(dest.get("db_token"), Some(&"db-token".to_string()));
    }

    #[tokio::test]
    async fn renewal_under_floor_falls_back_to_full_reread() {
        let backend = Arc::new(FakeBackend {
            // Renews successfully, but only for 10 minutes -- under the
            // 45-minute floor, so the correct behavior is to discard this
            // renewal and perform a full reread instead.
            renew_duration: Mutex::new(Duration::from_secs(10 * 60)),
            read_calls: AtomicU32::new(0),
            renew_calls: AtomicU32::new(0),
        });
        let manager = VaultManager::new(backend.clone());
        let dest: Destination = Arc::new(Mutex::new(HashMap::new()));
        manager
            .lease_to("db", dest.clone(), HashMap::new())
            .await
            .unwrap();
        assert_eq!(backend.read_calls.load(Ordering::SeqCst), 1);

        // Force this lease to look like it's due for renewal.
        {
            let mut table = manager.lease_table.lock().await;
            let entry = table.entries.get_mut("db").unwrap();
            entry.expires_at = Instant::now();
        }

        manager.tick().await.unwrap();

        assert_eq!(backend.renew_calls.load(Ordering::SeqCst), 1);
        // The short renewal must trigger a second read_lease call, not be
        // accepted as-is.
        assert_eq!(backend.read_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn skips_renewal_when_plenty_of_life_remains() {
        let backend = Arc::new(FakeBackend {
            renew_duration: Mutex::new(Duration::from_secs(3600)),
            read_calls: AtomicU32::new(0),
            renew_calls: AtomicU32::new(0),
        });
        let manager = VaultManager::new(backend.clone());
        let dest: Destination = Arc::new(Mutex::new(HashMap::new()));
        manager
            .lease_to("db", dest, HashMap::new())
            .await
            .unwrap();

        manager.tick().await.unwrap();

        assert_eq!(backend.renew_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn published_mtime_strictly_advances_on_renewal() {
        let backend = Arc::new(FakeBackend {
            renew_duration: Mutex::new(Duration::from_secs(3600)),
            read_calls: AtomicU32::new(0),
            renew_calls: AtomicU32::new(0),
        });
        let manager = VaultManager::new(backend);
        let dest: Destination = Arc::new(Mutex::new(HashMap::new()));
        manager
            .lease_to("db", dest, HashMap::new())
            .await
            .unwrap();

        let first = manager.read_view().await.mtime;
        {
            let mut table = manager.lease_table.lock().await;
            let entry = table.entries.get_mut("db").unwrap();
            entry.expires_at = Instant::now();
        }
        manager.tick().await.unwrap();
        let second = manager.read_view().await.mtime;

        assert!(second > first);
    }

    #[tokio::test]
    async fn shutdown_revokes_and_blocks_further_leasing() {
        let backend = Arc::new(FakeBackend {
            renew_duration: Mutex::new(Duration::from_secs(3600)),
            read_calls: AtomicU32::new(0),
            renew_calls: AtomicU32::new(0),
        });
        let manager = VaultManager::new(backend);
        let dest: Destination = Arc::new(Mutex::new(HashMap::new()));
        manager
            .lease_to("db", dest.clone(), HashMap::new())
            .await
            .unwrap();

        manager.shutdown().await.unwrap();

        let err = manager.lease_to("other", dest, HashMap::new()).await;
        assert!(matches!(err, Err(VaultError::ShuttingDown)));
    }
}
