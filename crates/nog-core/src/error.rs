use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid sha1: {0}")]
    InvalidSha1(String),

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("json codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
