use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache corruption: expected sha1 {expected}, found {actual} at {path}")]
    Corruption {
        expected: String,
        actual: String,
        path: String,
    },

    #[error("cache io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cache entry codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] nog_core::Error),
}
