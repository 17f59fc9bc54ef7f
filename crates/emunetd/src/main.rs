//! emunetd: WAN impairment emulation daemon.
//!
//! One process runs one role:
//!   dispatcher  pair API, identity resolution, rule fan-out
//!   agent       per-host rule table and identity reports
//!   cache       identity cache service

use anyhow::{bail, Result};
use tokio::sync::broadcast;

use emunet_core::config::EmunetConfig;

mod agent;
mod cache;
mod dispatcher;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = EmunetConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = EmunetConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        EmunetConfig::default()
    });

    let role = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "dispatcher".to_string());
    tracing::info!(role = %role, "emunetd starting");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    match role.as_str() {
        "dispatcher" => dispatcher::run(&config, shutdown_tx).await,
        "agent" => agent::run(&config, shutdown_tx).await,
        "cache" => cache::run(&config, shutdown_tx).await,
        other => bail!("unknown role {other:?}, expected dispatcher, agent or cache"),
    }
}

/// Resolves when the shutdown broadcast fires (or its sender is gone).
pub(crate) async fn shutdown_signal(mut rx: broadcast::Receiver<()>) {
    let _ = rx.recv().await;
}
