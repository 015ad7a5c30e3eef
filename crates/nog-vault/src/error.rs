use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown secret path: {0}")]
    UnknownPath(String),

    #[error("manager is shutting down")]
    ShuttingDown,

    #[error("config error: {0}")]
    Config(String),
}
