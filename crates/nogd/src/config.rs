//! Reads Vault configuration the way `nogd.py::updateConfFromEnv` does:
//! `NOG_VAULT_CONFIG` is either inline JSON or `@/path/to/file.json`.

use std::env;
use std::fs;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    pub addr: String,
    pub token: String,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

fn default_tick_interval() -> u64 {
    60
}

impl VaultConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let raw = env::var("NOG_VAULT_CONFIG")
            .map_err(|_| anyhow::anyhow!("NOG_VAULT_CONFIG is not set"))?;
        let json = if let Some(path) = raw.strip_prefix('@') {
            fs::read_to_string(path)?
        } else {
            raw
        };
        Ok(serde_json::from_str(&json)?)
    }
}
