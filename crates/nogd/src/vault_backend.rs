//! A `VaultBackend` talking to a real Vault HTTP API. Kept deliberately
//! small: lease read/renew/revoke and the local token, which is all
//! `nog_vault::lease::VaultManager` needs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use nog_vault::{LeaseData, VaultBackend, VaultError};
use serde::Deserialize;

use crate::config::VaultConfig;

pub struct HttpVaultBackend {
    http: reqwest::Client,
    config: VaultConfig,
}

impl HttpVaultBackend {
    pub fn new(config: VaultConfig) -> Result<Self, VaultError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(VaultError::Http)?;
        Ok(HttpVaultBackend { http, config })
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}{}", self.config.addr, suffix)
    }
}

#[derive(Deserialize)]
struct VaultReadResponse {
    lease_id: String,
    renewable: bool,
    lease_duration: u64,
    data: HashMap<String, String>,
}

#[async_trait]
impl VaultBackend for HttpVaultBackend {
    async fn read_lease(&self, path: &str) -> Result<LeaseData, VaultError> {
        let resp = self
            .http
            .get(self.url(&format!("/v1/{path}")))
            .header("X-Vault-Token", &self.config.token)
            .send()
            .await?
            .error_for_status()?;
        let body: VaultReadResponse = resp.json().await?;
        Ok(LeaseData {
            lease_id: body.lease_id,
            renewable: body.renewable,
            lease_duration: Duration::from_secs(body.lease_duration),
            data: body.data,
        })
    }

    async fn renew_lease(&self, lease_id: &str) -> Result<LeaseData, VaultError> {
        let resp = self
            .http
            .put(self.url("/v1/sys/leases/renew"))
            .header("X-Vault-Token", &self.config.token)
            .json(&serde_json::json!({ "lease_id": lease_id }))
            .send()
            .await?
            .error_for_status()?;
        let body: VaultReadResponse = resp.json().await?;
        Ok(LeaseData {
            lease_id: body.lease_id,
            renewable: body.renewable,
            lease_duration: Duration::from_secs(body.lease_duration),
            data: body.data,
        })
    }

    async fn revoke_lease(&self, lease_id: &str) -> Result<(), VaultError> {
        self.http
            .put(self.url("/v1/sys/leases/revoke"))
            .header("X-Vault-Token", &self.config.token)
            .json(&serde_json::json!({ "lease_id": lease_id }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn read_local_auth_token(&self) -> Result<String, VaultError> {
        Ok(self.config.token.clone())
    }
}
