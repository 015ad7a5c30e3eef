//! Daemon entry point: installs structured logging, loads Vault
//! configuration from the environment, and runs the credential-lease
//! renewal loop until SIGTERM.

mod config;
mod vault_backend;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nog_vault::VaultManager;
use tracing_subscriber::EnvFilter;

use crate::config::VaultConfig;
use crate::vault_backend::HttpVaultBackend;

fn install_logging() {
    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_logging();

    let config = VaultConfig::from_env().context("loading NOG_VAULT_CONFIG")?;
    tracing::info!(vault_addr = %config.addr, "starting nogd");

    let backend = Arc::new(HttpVaultBackend::new(config.clone())?);
    let manager = Arc::new(VaultManager::new(backend));

    let renewal_manager = manager.clone();
    let renewal_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(config.tick_interval_secs));
        loop {
            interval.tick().await;
            if let Err(e) = renewal_manager.tick().await {
                tracing::warn!(error = %e, "vault renewal tick failed");
            }
        }
    });

    wait_for_sigterm().await?;
    tracing::info!("received shutdown signal, revoking leases");
    renewal_task.abort();
    manager.shutdown().await.context("vault shutdown")?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = term.recv() => {}
        _ = interrupt.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
