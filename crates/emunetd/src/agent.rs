//! Agent role.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use emunet_api::AgentState;
use emunet_core::config::EmunetConfig;
use emunet_services::rule_loader;
use emunet_services::{Agent, AgentSettings, IdentityCache, RemoteIdentityCache};

pub async fn run(config: &EmunetConfig, shutdown_tx: broadcast::Sender<()>) -> Result<()> {
    let settings = &config.agent;

    let loader = rule_loader::from_config(settings).context("unsupported rule table backend")?;
    tracing::info!(backend = %loader.describe(), "rule table configured (loaded on first use)");

    let cache = RemoteIdentityCache::new(&config.cache.url, config.cache.request_timeout())
        .context("failed to build identity cache client")?;
    let cache: Arc<dyn IdentityCache> = Arc::new(cache);

    let agent = Agent::new(
        AgentSettings {
            max_in_flight: settings.max_in_flight,
            admission_timeout: settings.admission_timeout(),
        },
        Arc::from(loader),
        Some(cache),
    );
    tracing::info!(
        max_in_flight = settings.max_in_flight,
        admission_timeout_ms = settings.admission_timeout_ms,
        "agent ready"
    );

    let app = emunet_api::agent_router(AgentState { agent });
    emunet_api::serve(
        app,
        settings.listen_addr,
        crate::shutdown_signal(shutdown_tx.subscribe()),
    )
    .await
    .with_context(|| format!("agent API on {} failed", settings.listen_addr))
}
