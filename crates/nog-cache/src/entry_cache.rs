//! Two-tier entry cache: an in-memory `DashMap` over a sharded on-disk
//! store. Every disk read is verified against its sha1 before being
//! returned; a mismatch means the cache directory was tampered with or
//! corrupted and is reported rather than silently trusted.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use nog_core::{content_id, Sha1};

use crate::error::CacheError;

/// Shared across repos: content-addressed entries are identical regardless
/// of which repo they were first fetched through.
pub struct EntryCache {
    mem: DashMap<Sha1, Value>,
    disk_root: PathBuf,
}

impl EntryCache {
    pub fn new(disk_root: impl Into<PathBuf>) -> Self {
        EntryCache {
            mem: DashMap::new(),
            disk_root: disk_root.into(),
        }
    }

    fn shard_path(&self, sha1: &Sha1) -> PathBuf {
        let hex = sha1.to_hex();
        self.disk_root.join(&hex[0..2])
    }

    fn entry_path(&self, sha1: &Sha1) -> PathBuf {
        let hex = sha1.to_hex();
        self.shard_path(sha1).join(&hex[2..])
    }

    pub async fn get(&self, sha1: Sha1) -> Result<Option<Value>, CacheError> {
        if let Some(hit) = self.mem.get(&sha1) {
            return Ok(Some(hit.clone()));
        }
        let path = self.entry_path(&sha1);
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        let value: Value = serde_json::from_slice(&bytes)?;
        let actual = content_id(&value)?;
        if actual != sha1 {
            tracing::warn!(sha1 = %sha1, actual = %actual, path = %path.display(), "entry cache corruption");
            return Err(CacheError::Corruption {
                expected: sha1.to_hex(),
                actual: actual.to_hex(),
                path: path.display().to_string(),
            });
        }
        tracing::debug!(sha1 = %sha1, "entry cache disk hit");
        self.mem.insert(sha1, value.clone());
        Ok(Some(value))
    }

    /// Adds a known-good entry to both tiers. `sha1` must already be the
    /// verified content identity of `value` (callers compute it once when
    /// an entry is first posted or fetched, not on every cache write).
    pub async fn add(&self, sha1: Sha1, value: Value) -> Result<(), CacheError> {
        self.mem.insert(sha1, value.clone());
        let shard = self.shard_path(&sha1);
        fs::create_dir_all(&shard)
            .await
            .map_err(|e| CacheError::Io {
                path: shard.display().to_string(),
                source: e,
            })?;
        let final_path = self.entry_path(&sha1);
        if fs::metadata(&final_path).await.is_ok() {
            return Ok(());
        }
        write_atomic(&shard, &final_path, serde_json::to_vec(&value)?.as_slice()).await
    }

    pub fn has_in_memory(&self, sha1: &Sha1) -> bool {
        self.mem.contains_key(sha1)
    }
}

async fn write_atomic(shard: &Path, final_path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let tmp_path = shard.join(format!(".tmp-{}", uuid_like()));
    {
        let mut f = fs::File::create(&tmp_path).await.map_err(|e| CacheError::Io {
            path: tmp_path.display().to_string(),
            source: e,
        })?;
        f.write_all(bytes).await.map_err(|e| CacheError::Io {
            path: tmp_path.display().to_string(),
            source: e,
        })?;
        f.flush().await.map_err(|e| CacheError::Io {
            path: tmp_path.display().to_string(),
            source: e,
        })?;
    }
    let mut perms = fs::metadata(&tmp_path)
        .await
        .map_err(|e| CacheError::Io {
            path: tmp_path.display().to_string(),
            source: e,
        })?
        .permissions();
    perms.set_readonly(true);
    fs::set_permissions(&tmp_path, perms)
        .await
        .map_err(|e| CacheError::Io {
            path: tmp_path.display().to_string(),
            source: e,
        })?;
    fs::rename(&tmp_path, final_path).await.map_err(|e| CacheError::Io {
        path: final_path.display().to_string(),
        source: e,
    })
}

/// A process-unique, non-random tiebreaker for temp file names. Collisions
/// across concurrent writers for the *same* final entry are harmless since
/// `add` short-circuits once the final path exists.
fn uuid_like() -> String {
    let addr = &0u8 as *const u8 as usize;
    format!("{:x}-{:?}", addr, std::thread::current().id())
}
