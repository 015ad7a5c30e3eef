//! Multi-part blob upload over presigned S3 URLs. Parts of a single blob
//! are uploaded strictly sequentially -- each PUT's ETag must be verified
//! before the next page of parts is even requested -- while parallelism
//! happens *across* blobs, via a bounded worker pool, never within one
//! blob's parts. Byte ranges come from the server (`start`/`end` on each
//! [`PartDescriptor`]), not a client-chosen part size.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use md5::{Digest as Md5Digest, Md5};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use nog_core::Sha1;

use crate::error::ClientError;
use crate::repo::{CompletedPart, PartDescriptor, RemoteRepo, UploadHandle};

#[derive(Debug, Clone)]
pub struct PendingBlob {
    pub sha1: Sha1,
    pub size: u64,
    pub name: Option<String>,
    pub path: PathBuf,
}

#[derive(Debug)]
pub enum UploadOutcome {
    AlreadyPresent(Sha1),
    Uploaded(Sha1),
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

pub struct BlobUploader {
    repo: Arc<RemoteRepo>,
    concurrency: usize,
    http: reqwest::Client,
}

impl BlobUploader {
    pub fn new(repo: Arc<RemoteRepo>, concurrency: usize) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(300))
            .build()
            .expect("static S3 PUT client config is always valid");
        BlobUploader {
            repo,
            concurrency,
            http,
        }
    }

    pub async fn upload_all(&self, blobs: Vec<PendingBlob>) -> Vec<Result<UploadOutcome, ClientError>> {
        stream::iter(blobs)
            .map(|blob| self.upload_one(blob))
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    async fn upload_one(&self, blob: PendingBlob) -> Result<UploadOutcome, ClientError> {
        let handle = match self
            .repo
            .start_upload(blob.sha1, blob.size, blob.name.as_deref())
            .await?
        {
            None => return Ok(UploadOutcome::AlreadyPresent(blob.sha1)),
            Some(h) => h,
        };

        tracing::info!(sha1 = %blob.sha1, size = blob.size, "starting blob upload");

        let mut file = tokio::fs::File::open(&blob.path).await?;
        let mut completed = Vec::new();
        let UploadHandle { upload, mut parts } = handle;

        loop {
            for part in std::mem::take(&mut parts.items) {
                let etag = self.put_part(&mut file, &part).await?;
                completed.push(CompletedPart {
                    part_number: part.part_number,
                    etag,
                });
            }
            match parts.next.take() {
                Some(next_href) => {
                    parts = self.fetch_next_parts(&next_href).await?;
                }
                None => break,
            }
        }

        self.repo
            .complete_upload(blob.sha1, &upload.href, &completed)
            .await?;
        tracing::info!(sha1 = %blob.sha1, parts = completed.len(), "completed blob upload");
        Ok(UploadOutcome::Uploaded(blob.sha1))
    }

    async fn put_part(&self, file: &mut tokio::fs::File, part: &PartDescriptor) -> Result<String, ClientError> {
        let len = (part.end - part.start) as usize;
        file.seek(std::io::SeekFrom::Start(part.start)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;

        let mut hasher = Md5::new();
        hasher.update(&buf);
        let expected_etag = format!("\"{}\"", hex::encode(hasher.finalize()));

        let resp = self.http.put(&part.href).body(buf).send().await?;
        resp.error_for_status_ref()?;
        let actual_etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if actual_etag != expected_etag {
            return Err(ClientError::EtagMismatch {
                part: part.part_number,
                expected: expected_etag,
                actual: actual_etag,
            });
        }
        Ok(actual_etag)
    }

    async fn fetch_next_parts(&self, next_href: &str) -> Result<crate::repo::PartPage, ClientError> {
        let resp = self.repo.transport_get(next_href).await?;
        let envelope: DataEnvelope<crate::repo::PartPage> = resp.json().await?;
        Ok(envelope.data)
    }
}
