//! Identity cache role.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use emunet_api::CacheState;
use emunet_core::config::EmunetConfig;
use emunet_services::MemoryIdentityCache;

pub async fn run(config: &EmunetConfig, shutdown_tx: broadcast::Sender<()>) -> Result<()> {
    let settings = &config.cache;
    let cache = MemoryIdentityCache::new(settings.ttl());
    tracing::info!(ttl_secs = settings.ttl_secs, "identity cache ready");

    let sweeper = {
        let cache = cache.clone();
        let period = Duration::from_secs(settings.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::info!(purged, remaining = cache.len(), "expired identity records purged");
                }
            }
        })
    };

    let app = emunet_api::cache_router(CacheState { cache });
    let served = emunet_api::serve(
        app,
        settings.listen_addr,
        crate::shutdown_signal(shutdown_tx.subscribe()),
    )
    .await;
    sweeper.abort();

    served.with_context(|| format!("identity cache API on {} failed", settings.listen_addr))
}
