//! Typed facade over a single repo's HTTP surface: refs, commit/tree/object
//! reads (entry-cache-backed, errata-checked), bulk existence/posting, and
//! the presigned-upload handshake. Parallel across blobs; see
//! [`crate::upload`] for the per-blob multi-part PUT sequence.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use nog_cache::EntryCache;
use nog_core::{content_id, Entry, EntryKind, Sha1};

use crate::error::{ClientError, ErrataPolicy};
use crate::transport::Transport;

/// A cross-repo copy-by-reference marker, emitted instead of inline
/// content when an entry originates from a different repo than the one
/// being posted to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub sha1: String,
    #[serde(rename = "repoFullName")]
    pub repo_full_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PostItem {
    Inline(Value),
    Copy { copy: CopyRef },
}

pub struct StatResult {
    pub exists: Vec<Sha1>,
    pub missing: Vec<Sha1>,
}

pub struct RemoteRepo {
    full_name: String,
    transport: Transport,
    entry_cache: EntryCache,
    errata: ErrataPolicy,
    known_in_repo: Mutex<HashSet<Sha1>>,
}

impl RemoteRepo {
    pub fn new(
        full_name: impl Into<String>,
        transport: Transport,
        entry_cache: EntryCache,
        errata: ErrataPolicy,
    ) -> Self {
        RemoteRepo {
            full_name: full_name.into(),
            transport,
            entry_cache,
            errata,
            known_in_repo: Mutex::new(HashSet::new()),
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn is_known_in_repo(&self, sha1: &Sha1) -> bool {
        self.known_in_repo.lock().unwrap().contains(sha1)
    }

    fn mark_known(&self, sha1s: impl IntoIterator<Item = Sha1>) {
        self.known_in_repo.lock().unwrap().extend(sha1s);
    }

    /// Exposes a raw signed GET for callers that page through a follow-up
    /// link returned inline in a response body (e.g. multipart upload part
    /// descriptors).
    pub async fn transport_get(&self, path_and_query: &str) -> Result<reqwest::Response, ClientError> {
        self.transport.get(path_and_query).await
    }

    pub async fn get_ref(&self, name: &str) -> Result<Option<Sha1>, ClientError> {
        let path = format!("/v1/repos/{}/db/refs/{}", self.full_name, name);
        let resp = self.transport.get(&path).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: RefBody = resp.json().await?;
        Ok(Some(body.commit.parse()?))
    }

    /// Compare-and-swap update: fails with `CasConflict` unless the server
    /// currently has `old` for this ref.
    pub async fn update_ref(&self, name: &str, new: Sha1, old: Option<Sha1>) -> Result<(), ClientError> {
        let path = format!("/v1/repos/{}/db/refs/{}", self.full_name, name);
        let body = serde_json::json!({
            "new": new.to_hex(),
            "old": old.map(|s| s.to_hex()),
        });
        let resp = self.transport.patch_json(&path, &body).await?;
        if resp.status() != reqwest::StatusCode::OK {
            let actual = resp.text().await.unwrap_or_default();
            return Err(ClientError::CasConflict {
                name: name.to_string(),
                expected: old.map(|s| s.to_hex()).unwrap_or_else(|| "<none>".into()),
                actual,
            });
        }
        Ok(())
    }

    /// Fetches an entry by sha1, preferring the entry cache, checking the
    /// `errata` field per [`ErrataPolicy`], and stripping `errata` before
    /// caching so a cached read never re-triggers the policy check. Returns
    /// a hydrated [`Entry`] tagged with this repo, matching the lazy ->
    /// loaded transition callers see for any sha1-addressed reference.
    ///
    /// `kind` picks the collection (`commits`, `trees`, `objects`) and
    /// bounds which `_idversion` values are accepted: trees are always
    /// idversion 0, commits and objects may be 0 or 1.
    pub async fn get_entry(&self, sha1: Sha1, kind: EntryKind) -> Result<Entry<Value>, ClientError> {
        let mut entry = Entry::lazy(sha1);
        entry.set_repo(self.full_name.clone());
        if let Some(cached) = self.entry_cache.get(sha1).await? {
            entry.hydrate(cached);
            return Ok(entry);
        }
        let collection = match kind {
            EntryKind::Commit => "commits",
            EntryKind::Tree => "trees",
            EntryKind::Object => "objects",
        };
        let path = format!(
            "/v1/repos/{}/db/{}/{}?format=minimal",
            self.full_name,
            collection,
            sha1.to_hex()
        );
        let resp = self.transport.get(&path).await?;
        let envelope: DataEnvelope<Value> = resp.json().await?;
        let mut value = envelope.data;
        self.check_idversion(&sha1, kind, &value)?;
        self.check_errata(&sha1, &value)?;
        if let Value::Object(map) = &mut value {
            map.remove("errata");
        }
        self.entry_cache.add(sha1, value.clone()).await?;
        entry.hydrate(value);
        Ok(entry)
    }

    fn check_idversion(&self, sha1: &Sha1, kind: EntryKind, value: &Value) -> Result<(), ClientError> {
        let idversion = value.get("_idversion").and_then(Value::as_i64).unwrap_or(0);
        let allowed = match kind {
            EntryKind::Tree => idversion == 0,
            EntryKind::Commit | EntryKind::Object => idversion == 0 || idversion == 1,
        };
        if allowed {
            return Ok(());
        }
        Err(ClientError::UnsupportedIdVersion {
            kind: kind.as_str(),
            sha1: sha1.to_hex(),
            idversion,
        })
    }

    fn check_errata(&self, sha1: &Sha1, value: &Value) -> Result<(), ClientError> {
        let errata = value.get("errata");
        let is_set = match errata {
            None | Some(Value::Null) => false,
            Some(Value::Array(a)) => !a.is_empty(),
            Some(_) => true,
        };
        if !is_set {
            return Ok(());
        }
        let message = errata.map(|e| e.to_string()).unwrap_or_default();
        match self.errata {
            ErrataPolicy::Ignore => Ok(()),
            ErrataPolicy::Warning => {
                tracing::warn!(sha1 = %sha1, %message, "entry has errata, continuing");
                Ok(())
            }
            ErrataPolicy::Error => Err(ClientError::Errata {
                sha1: sha1.to_hex(),
                message,
            }),
        }
    }

    /// Existence check for a batch of `{type, sha1}` entries, `type` being
    /// one of `commit`/`tree`/`object`/`blob`. The server is assumed to
    /// preserve the order of the request's `entries` list; any length
    /// mismatch in the response is reported as `BulkMismatch`.
    pub async fn stat(&self, entries: &[(&str, Sha1)]) -> Result<StatResult, ClientError> {
        let path = format!("/v1/repos/{}/db/stat", self.full_name);
        let body = serde_json::json!({
            "entries": entries
                .iter()
                .map(|(kind, sha1)| serde_json::json!({"type": kind, "sha1": sha1.to_hex()}))
                .collect::<Vec<_>>(),
        });
        let resp = self.transport.post_json(&path, &body).await?;
        let envelope: DataEnvelope<StatBody> = resp.json().await?;
        let reported = envelope.data.entries;
        if reported.len() != entries.len() {
            return Err(ClientError::BulkMismatch {
                expected: entries.len(),
                got: reported.len(),
            });
        }
        let mut exists = Vec::new();
        let mut missing = Vec::new();
        for item in &reported {
            let sha1: Sha1 = item.sha1.parse()?;
            if item.status == "exists" {
                exists.push(sha1);
            } else {
                missing.push(sha1);
            }
        }
        self.mark_known(exists.iter().copied());
        Ok(StatResult { exists, missing })
    }

    /// Bulk-posts entries (inline content or cross-repo copy markers) and
    /// verifies the response has exactly one result per request item, in
    /// the same order. Subject to the server's `POST_BUFFER_SIZE_LIMIT` on
    /// the combined request body.
    pub async fn post_bulk(&self, items: &[PostItem]) -> Result<Vec<Sha1>, ClientError> {
        let path = format!("/v1/repos/{}/db/bulk", self.full_name);
        let body = serde_json::json!({ "entries": items });
        let resp = self.transport.post_json(&path, &body).await?;
        let envelope: DataEnvelope<BulkBody> = resp.json().await?;
        let reported = envelope.data.entries;
        if reported.len() != items.len() {
            return Err(ClientError::BulkMismatch {
                expected: items.len(),
                got: reported.len(),
            });
        }
        let ids: Vec<Sha1> = reported.iter().map(|e| e.sha1.parse()).collect::<Result<_, _>>()?;
        self.mark_known(ids.iter().copied());
        Ok(ids)
    }

    pub async fn post_commit_content(&self, commit_wire: &Value) -> Result<Sha1, ClientError> {
        let sha1 = content_id(commit_wire)?;
        let path = format!("/v1/repos/{}/db/commits", self.full_name);
        self.transport.post_json(&path, commit_wire).await?;
        self.mark_known([sha1]);
        Ok(sha1)
    }

    /// Starts a multi-part upload for a blob, limited to a single part at
    /// a time since parts of one blob upload strictly sequentially.
    /// Returns `None` if the blob already exists (server answers 409).
    pub async fn start_upload(
        &self,
        sha1: Sha1,
        size: u64,
        name: Option<&str>,
    ) -> Result<Option<UploadHandle>, ClientError> {
        let path = format!(
            "/v1/repos/{}/db/blobs/{}/uploads?limit=1",
            self.full_name,
            sha1.to_hex()
        );
        let body = serde_json::json!({ "size": size, "name": name });
        let resp = self.transport.post_json(&path, &body).await?;
        if resp.status() == reqwest::StatusCode::CONFLICT {
            self.mark_known([sha1]);
            return Ok(None);
        }
        let envelope: DataEnvelope<UploadHandle> = resp.json().await?;
        Ok(Some(envelope.data))
    }

    /// Completes a multi-part upload by posting the collected part ETags
    /// to the `href` the server handed back when the upload was started.
    pub async fn complete_upload(
        &self,
        sha1: Sha1,
        complete_href: &str,
        parts: &[CompletedPart],
    ) -> Result<(), ClientError> {
        let body = serde_json::json!({ "s3Parts": parts });
        self.transport.post_json(complete_href, &body).await?;
        self.mark_known([sha1]);
        Ok(())
    }

    pub async fn post_job_status(&self, job_id: &str, status: &str) -> Result<(), ClientError> {
        let path = format!("/v1/repos/{}/jobs/{}/status", self.full_name, job_id);
        self.transport
            .post_json(&path, &serde_json::json!({ "status": status }))
            .await?;
        Ok(())
    }

    pub async fn post_job_progress(&self, job_id: &str, progress: &Value) -> Result<(), ClientError> {
        let path = format!("/v1/repos/{}/jobs/{}/progress", self.full_name, job_id);
        self.transport.post_json(&path, progress).await?;
        Ok(())
    }

    pub async fn post_job_log(&self, job_id: &str, line: &str) -> Result<(), ClientError> {
        let path = format!("/v1/repos/{}/jobs/{}/log", self.full_name, job_id);
        self.transport
            .post_json(&path, &serde_json::json!({ "line": line }))
            .await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct RefBody {
    commit: String,
}

/// Unwraps the `{"data": ...}` envelope the server wraps every response
/// body in.
#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct StatBody {
    entries: Vec<StatEntry>,
}

#[derive(Deserialize)]
struct StatEntry {
    sha1: String,
    status: String,
}

#[derive(Deserialize)]
struct BulkBody {
    entries: Vec<BulkEntry>,
}

#[derive(Deserialize)]
struct BulkEntry {
    sha1: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadHandle {
    pub upload: UploadStart,
    pub parts: PartPage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadStart {
    pub href: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartPage {
    pub items: Vec<PartDescriptor>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartDescriptor {
    #[serde(rename = "partNumber")]
    pub part_number: u32,
    pub start: u64,
    pub end: u64,
    pub href: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::Signer;
    use crate::transport::Transport;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn repo(server: &MockServer) -> RemoteRepo {
        let signer = Signer::new("key1", "secret", 600);
        let transport = Transport::new(server.uri(), signer, 0).unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        RemoteRepo::new(
            "acme/widgets",
            transport,
            EntryCache::new(cache_dir.into_path()),
            ErrataPolicy::Error,
        )
    }

    #[tokio::test]
    async fn get_entry_fetches_caches_and_hydrates() {
        let server = MockServer::start().await;
        let value = serde_json::json!({"text": "hello", "_idversion": 1});
        let sha1 = content_id(&value).unwrap();
        Mock::given(method("GET"))
            .and(path_regex(r"^/v1/repos/acme/widgets/db/objects/.*"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": &value})))
            .expect(1)
            .mount(&server)
            .await;

        let repo = repo(&server);
        let entry = repo.get_entry(sha1, EntryKind::Object).await.unwrap();
        assert_eq!(entry.content(), Some(&value));
        assert_eq!(entry.repo(), Some("acme/widgets"));

        // Second fetch hits the entry cache, not the mock's single expectation.
        let entry2 = repo.get_entry(sha1, EntryKind::Object).await.unwrap();
        assert_eq!(entry2.content(), Some(&value));
    }

    #[tokio::test]
    async fn get_entry_errors_on_errata_by_default() {
        let server = MockServer::start().await;
        let value = serde_json::json!({"text": "hello", "_idversion": 1, "errata": ["oops"]});
        let sha1 = Sha1::digest(b"irrelevant");
        Mock::given(method("GET"))
            .and(path_regex(r"^/v1/repos/acme/widgets/db/objects/.*"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": &value})))
            .mount(&server)
            .await;

        let repo = repo(&server);
        let err = repo.get_entry(sha1, EntryKind::Object).await.unwrap_err();
        assert!(matches!(err, ClientError::Errata { .. }));
    }

    #[tokio::test]
    async fn get_entry_rejects_unsupported_tree_idversion() {
        let server = MockServer::start().await;
        let value = serde_json::json!({"name": "root", "meta": {}, "entries": [], "_idversion": 1});
        let sha1 = Sha1::digest(b"a-tree");
        Mock::given(method("GET"))
            .and(path_regex(r"^/v1/repos/acme/widgets/db/trees/.*"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": &value})))
            .mount(&server)
            .await;

        let repo = repo(&server);
        let err = repo.get_entry(sha1, EntryKind::Tree).await.unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedIdVersion { idversion: 1, .. }));
    }

    #[tokio::test]
    async fn stat_reports_bulk_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/v1/repos/acme/widgets/db/stat$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"entries": []},
            })))
            .mount(&server)
            .await;

        let repo = repo(&server);
        let err = repo
            .stat(&[("object", Sha1::digest(b"a")), ("object", Sha1::digest(b"b"))])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::BulkMismatch { expected: 2, got: 0 }));
    }
}
