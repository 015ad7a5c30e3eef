//! Environment-driven configuration, matching the variable names the
//! original `nog.py`/`nogd.py` read via `os.environ.get(...)`.

use std::env;
use std::time::Duration;

use crate::error::{ClientError, ErrataPolicy};

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_POST_BUFFER_SIZE: usize = 10_000;
const DEFAULT_POST_BUFFER_SIZE_LIMIT: usize = 200_000;
const DEFAULT_UPLOAD_CONCURRENCY: usize = 32;
const DEFAULT_AUTH_EXPIRES_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub username: String,
    pub key_id: String,
    pub secret_key: String,
    pub cache_path: std::path::PathBuf,
    pub max_retries: u32,
    pub errata: ErrataPolicy,
    pub post_buffer_size: usize,
    pub post_buffer_size_limit: usize,
    pub upload_concurrency: usize,
    pub auth_expires: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ClientError> {
        let api_url = require_env("NOG_API_URL")?;
        let username = require_env("NOG_USERNAME")?;
        let key_id = require_env("NOG_KEYID")?;
        let secret_key = require_env("NOG_SECRETKEY")?;
        let cache_path = env::var("NOG_CACHE_PATH")
            .unwrap_or_else(|_| "/tmp/nog-cache".to_string())
            .into();
        let max_retries = env_parsed("NOG_MAX_RETRIES", DEFAULT_MAX_RETRIES);
        let errata = env::var("NOG_ERRATA")
            .map(|v| ErrataPolicy::from_env_value(&v))
            .unwrap_or(ErrataPolicy::Error);
        let post_buffer_size = env_parsed("NOG_POST_BUFFER_SIZE", DEFAULT_POST_BUFFER_SIZE);
        let post_buffer_size_limit =
            env_parsed("NOG_POST_BUFFER_SIZE_LIMIT", DEFAULT_POST_BUFFER_SIZE_LIMIT);
        let upload_concurrency = env_parsed("NOG_UPLOAD_CONCURRENCY", DEFAULT_UPLOAD_CONCURRENCY);
        let auth_expires = Duration::from_secs(env_parsed(
            "NOG_AUTH_EXPIRES_SECS",
            DEFAULT_AUTH_EXPIRES_SECS,
        ));

        Ok(Config {
            api_url,
            username,
            key_id,
            secret_key,
            cache_path,
            max_retries,
            errata,
            post_buffer_size,
            post_buffer_size_limit,
            upload_concurrency,
            auth_expires,
        })
    }
}

fn require_env(name: &'static str) -> Result<String, ClientError> {
    env::var(name).map_err(|_| ClientError::MissingConfig(name))
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
