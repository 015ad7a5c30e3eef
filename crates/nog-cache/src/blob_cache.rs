//! Sharded on-disk blob store. Downloads are verified by hashing the
//! stream as it's written, not by re-reading the file afterwards; a
//! mismatch at the end of the stream means the temp file is discarded and
//! the write never becomes visible under its final sha1-keyed path.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use sha1::{Digest, Sha1 as Sha1Hasher};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use nog_core::Sha1;

use crate::error::CacheError;

pub struct BlobCache {
    root: PathBuf,
}

impl BlobCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        BlobCache { root: root.into() }
    }

    fn shard(&self, sha1: &Sha1) -> PathBuf {
        let hex = sha1.to_hex();
        self.root.join(&hex[0..2])
    }

    pub fn path(&self, sha1: &Sha1) -> PathBuf {
        let hex = sha1.to_hex();
        self.shard(sha1).join(&hex[2..])
    }

    pub async fn has(&self, sha1: &Sha1) -> bool {
        fs::metadata(self.path(sha1)).await.is_ok()
    }

    pub async fn open(&self, sha1: &Sha1) -> Result<fs::File, CacheError> {
        let path = self.path(sha1);
        fs::File::open(&path).await.map_err(|e| CacheError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Streams `chunks` to the sha1-keyed path, verifying the digest as
    /// bytes arrive. Returns `CacheError::Corruption` if the completed
    /// download doesn't hash to `sha1`; the temp file is removed in that
    /// case and the cache is left untouched.
    pub async fn store_stream<S, E>(&self, sha1: Sha1, mut chunks: S) -> Result<(), CacheError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        if self.has(&sha1).await {
            // Drain the stream so the caller's connection can be reused,
            // but skip the write -- the content is already cached.
            while chunks.next().await.is_some() {}
            return Ok(());
        }

        let shard = self.shard(&sha1);
        fs::create_dir_all(&shard).await.map_err(|e| CacheError::Io {
            path: shard.display().to_string(),
            source: e,
        })?;
        let tmp_path = shard.join(format!(".download-{}", sha1.to_hex()));
        let mut file = fs::File::create(&tmp_path).await.map_err(|e| CacheError::Io {
            path: tmp_path.display().to_string(),
            source: e,
        })?;
        let mut hasher = Sha1Hasher::new();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| CacheError::Io {
                path: tmp_path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;
            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(|e| CacheError::Io {
                path: tmp_path.display().to_string(),
                source: e,
            })?;
        }
        file.flush().await.map_err(|e| CacheError::Io {
            path: tmp_path.display().to_string(),
            source: e,
        })?;
        drop(file);

        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest);
        let actual = Sha1::from_bytes(bytes);
        if actual != sha1 {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(CacheError::Corruption {
                expected: sha1.to_hex(),
                actual: actual.to_hex(),
                path: tmp_path.display().to_string(),
            });
        }

        let final_path = self.path(&sha1);
        fs::rename(&tmp_path, &final_path).await.map_err(|e| CacheError::Io {
            path: final_path.display().to_string(),
            source: e,
        })
    }

    /// Materializes the cached blob at `dest`, preferring a hard link
    /// (cheap, same filesystem) and falling back to a copy across
    /// filesystem boundaries.
    pub async fn link(&self, sha1: &Sha1, dest: &Path) -> Result<(), CacheError> {
        let src = self.path(sha1);
        match fs::hard_link(&src, dest).await {
            Ok(()) => Ok(()),
            Err(_) => fs::copy(&src, dest)
                .await
                .map(|_| ())
                .map_err(|e| CacheError::Io {
                    path: dest.display().to_string(),
                    source: e,
                }),
        }
    }
}
