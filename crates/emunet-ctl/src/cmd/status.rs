//! Health of every role.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;

use emunet_core::api::{AgentHealth, CacheHealth, DispatcherHealth};

use super::Targets;
use super::http::url;

/// Health bodies are JSON even on 503, so the status code is not checked.
async fn probe<R: DeserializeOwned>(client: &Client, base: &str, path: &[&str]) -> Result<R> {
    client
        .get(url(base, path)?)
        .send()
        .await
        .with_context(|| format!("{base} unreachable"))?
        .json::<R>()
        .await
        .context("failed to parse response")
}

pub async fn cmd_status(targets: &Targets) -> Result<()> {
    let client = Client::new();

    println!("═══════════════════════════════════════");
    println!("  emunet status");
    println!("═══════════════════════════════════════");

    match probe::<DispatcherHealth>(&client, &targets.dispatcher, &["api", "v1", "health"]).await {
        Ok(h) => {
            println!("  ┌─ dispatcher ({})", targets.dispatcher);
            println!("  │  status     : {}", h.status);
            println!("  │  workers    : {}", h.workers);
            println!("  │  queue      : {} / {}", h.queue_depth, h.queue_capacity);
            println!("  │  enqueued   : {}", h.enqueued);
            println!("  │  delivered  : {}", h.delivered);
            println!("  │  failed     : {}", h.failed);
            println!("  │  rejected   : {}", h.rejected);
            println!("  └─ cache link : {}", if h.cache_reachable { "up" } else { "DOWN" });
        }
        Err(e) => println!("  ✗ dispatcher : {e:#}"),
    }

    match probe::<AgentHealth>(&client, &targets.agent, &["health"]).await {
        Ok(h) => {
            println!("  ┌─ agent ({})", targets.agent);
            println!("  │  status       : {}", h.status);
            println!("  │  rule table   : {}", if h.rule_table_loaded { "loaded" } else { "not loaded" });
            println!("  │  identities   : {}", h.local_identities);
            println!("  │  max in-flight: {}", h.max_in_flight);
            println!(
                "  └─ requests     : {} total, {} active, {} ok, {} failed, {} timed out",
                h.requests.total,
                h.requests.active,
                h.requests.success,
                h.requests.failed,
                h.requests.timed_out,
            );
        }
        Err(e) => println!("  ✗ agent      : {e:#}"),
    }

    match probe::<CacheHealth>(&client, &targets.cache, &["health"]).await {
        Ok(h) => {
            println!("  ┌─ identity cache ({})", targets.cache);
            println!("  │  status  : {}", h.status);
            println!("  │  records : {}", h.records);
            println!("  └─ groups  : {}", h.groups);
        }
        Err(e) => println!("  ✗ cache      : {e:#}"),
    }

    Ok(())
}
