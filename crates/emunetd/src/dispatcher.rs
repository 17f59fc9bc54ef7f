//! Dispatcher role.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use emunet_api::DispatcherState;
use emunet_core::config::EmunetConfig;
use emunet_services::{DispatchEngine, DispatchSettings, HttpAgentTransport, RemoteIdentityCache};

pub async fn run(config: &EmunetConfig, shutdown_tx: broadcast::Sender<()>) -> Result<()> {
    let settings = &config.dispatcher;

    let cache = RemoteIdentityCache::new(&config.cache.url, config.cache.request_timeout())
        .context("failed to build identity cache client")?;
    let transport = HttpAgentTransport::new(settings.agent_port, settings.request_timeout())
        .context("failed to build agent HTTP client")?;

    let engine = DispatchEngine::start(
        Arc::new(cache),
        Arc::new(transport),
        DispatchSettings {
            worker_count: settings.worker_count,
            queue_capacity: settings.queue_capacity,
        },
    );

    match engine.cache().ping().await {
        Ok(()) => tracing::info!(url = %config.cache.url, "identity cache reachable"),
        Err(e) => tracing::warn!(url = %config.cache.url, error = %e, "identity cache not reachable yet"),
    }

    let stats_printer = (settings.stats_interval_secs > 0).then(|| {
        let engine = engine.clone();
        let period = Duration::from_secs(settings.stats_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                engine.print_stats();
            }
        })
    });

    let app = emunet_api::dispatcher_router(DispatcherState {
        engine: engine.clone(),
    });
    let served = emunet_api::serve(
        app,
        settings.listen_addr,
        crate::shutdown_signal(shutdown_tx.subscribe()),
    )
    .await;

    // Whatever ended the server, drain queued jobs before exiting.
    if let Some(task) = stats_printer {
        task.abort();
    }
    engine.shutdown().await;
    engine.print_stats();

    served.with_context(|| format!("dispatcher API on {} failed", settings.listen_addr))
}
