//! Identity lookups and reports.

use anyhow::{Context, Result};
use reqwest::{Client, Method};

use emunet_core::api::{GroupPods, IdentityReport, RuleEntry, StatusResponse};
use emunet_core::{EndpointIdentity, MacAddr};

use super::http::{get_json, send_json, url};
use super::{Targets, split_group};

fn or_dash<T: std::fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn print_identity(id: &EndpointIdentity) {
    println!("  ┌─ {}", id.name);
    println!("  │  group   : {}", or_dash(&id.group));
    println!("  │  host    : {}", or_dash(&id.host));
    println!("  │  ifindex : {}", or_dash(&id.ifindex));
    println!("  │  mac     : {}", or_dash(&id.mac));
    println!("  │  ip      : {}", or_dash(&id.ip));
    println!("  │  phase   : {:?}", id.phase.unwrap_or_default());
    println!("  └─ ready   : {}", or_dash(&id.ready));
}

pub async fn cmd_identity(targets: &Targets, name: &str) -> Result<()> {
    let id: EndpointIdentity = get_json(
        &Client::new(),
        url(&targets.cache, &["api", "v1", "identity", name])?,
    )
    .await?;
    print_identity(&id);
    Ok(())
}

pub async fn cmd_endpoints(targets: &Targets, group: &str) -> Result<()> {
    let (namespace, name) = split_group(group)?;
    let resp: GroupPods = get_json(
        &Client::new(),
        url(&targets.dispatcher, &["api", "v1", "emunets", namespace, name, "pods"])?,
    )
    .await?;

    println!("═══════════════════════════════════════");
    println!("  {} ({} endpoints)", resp.group, resp.pods.len());
    println!("═══════════════════════════════════════");
    for pod in &resp.pods {
        print_identity(pod);
    }
    Ok(())
}

pub async fn cmd_report(targets: &Targets, pod: &str, ifindex: &str, mac: &str) -> Result<()> {
    let ifindex: u32 = ifindex.parse().context("ifindex must be a number")?;
    let mac: MacAddr = mac.parse().context("invalid MAC address")?;
    let req = IdentityReport {
        pod_name: pod.to_string(),
        ifindex,
        src_mac: mac.to_string(),
    };
    let resp: StatusResponse = send_json(
        &Client::new(),
        Method::POST,
        url(&targets.agent, &["api", "podinfo", "add"])?,
        &req,
    )
    .await?;
    println!("✓ {pod} reported as {ifindex}/{mac} : {}", resp.status);
    Ok(())
}

pub async fn cmd_rules(targets: &Targets) -> Result<()> {
    let entries: Vec<RuleEntry> =
        get_json(&Client::new(), url(&targets.agent, &["api", "ebpf", "entry"])?).await?;

    if entries.is_empty() {
        println!("No rules installed on {}.", targets.agent);
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Rules on {} ({})", targets.agent, entries.len());
    println!("═══════════════════════════════════════");
    println!("  {:>7}  {:<17}  {:>7}  {:>6}  {:>5}  {:>12}", "ifindex", "src mac", "delay", "jitter", "loss", "rate bit/s");
    for e in &entries {
        println!(
            "  {:>7}  {:<17}  {:>7}  {:>6}  {:>5}  {:>12}",
            e.ifindex, e.src_mac, e.delay, e.jitter, e.loss_rate, e.throttle_rate_bps,
        );
    }
    Ok(())
}
