use thiserror::Error;

/// Behavior for entries whose `errata` field is set. Controlled by
/// `NOG_ERRATA` (default `error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrataPolicy {
    Error,
    Warning,
    Ignore,
}

impl ErrataPolicy {
    pub fn from_env_value(value: &str) -> Self {
        match value {
            "warning" => ErrataPolicy::Warning,
            "ignore" => ErrataPolicy::Ignore,
            _ => ErrataPolicy::Error,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Core(#[from] nog_core::Error),

    #[error(transparent)]
    Cache(#[from] nog_cache::CacheError),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("entry exceeds POST_BUFFER_SIZE_LIMIT: {size} bytes (limit {limit})")]
    EntryTooLarge { size: usize, limit: usize },

    #[error("bulk post response length {got} did not match request length {expected}")]
    BulkMismatch { expected: usize, got: usize },

    #[error("compare-and-swap conflict updating ref {name}: expected {expected}, server has {actual}")]
    CasConflict {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("etag mismatch uploading part {part}: expected {expected}, got {actual}")]
    EtagMismatch {
        part: u32,
        expected: String,
        actual: String,
    },

    #[error("entry {sha1} has errata: {message}")]
    Errata { sha1: String, message: String },

    #[error("exceeded max retries ({retries}) for {operation}")]
    RetriesExhausted { operation: String, retries: u32 },

    #[error("unexpected response status {status} for {operation}")]
    UnexpectedStatus { operation: String, status: u16 },

    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),

    #[error("unsupported {kind} idversion {idversion} for entry {sha1}")]
    UnsupportedIdVersion {
        kind: &'static str,
        sha1: String,
        idversion: i64,
    },
}
