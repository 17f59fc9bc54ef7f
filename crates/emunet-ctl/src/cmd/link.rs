//! Pair rule commands against the dispatcher.

use anyhow::{Result, anyhow};
use reqwest::{Client, Method};

use emunet_core::api::{PairDeleteRequest, PairRequest, StatusResponse};

use super::http::{send_json, url};
use super::{Flags, Targets};

fn pair_url(targets: &Targets) -> Result<reqwest::Url> {
    url(&targets.dispatcher, &["api", "v1", "ebpf", "entry", "by-pods"])
}

pub fn pair_request(pod1: &str, pod2: &str, flags: &Flags<'_>) -> Result<PairRequest> {
    let req = PairRequest {
        pod1: pod1.to_string(),
        pod2: pod2.to_string(),
        throttle_rate_bps: flags.get("rate", 0)?,
        delay: flags.get("delay", 0)?,
        loss_rate: flags.get("loss", 0)?,
        jitter: flags.get("jitter", 0)?,
    };
    req.validate().map_err(|e| anyhow!(e))?;
    Ok(req)
}

pub async fn cmd_link_set(targets: &Targets, pod1: &str, pod2: &str, flags: &Flags<'_>) -> Result<()> {
    let req = pair_request(pod1, pod2, flags)?;
    let resp: StatusResponse =
        send_json(&Client::new(), Method::POST, pair_url(targets)?, &req).await?;

    println!("✓ {} ⇄ {} : {}", pod1, pod2, resp.status);
    println!(
        "  delay {} (x10us)  jitter {} (x10us)  loss {} (/10000)  rate {} bit/s",
        req.delay, req.jitter, req.loss_rate, req.throttle_rate_bps,
    );
    Ok(())
}

pub async fn cmd_link_clear(targets: &Targets, pod1: &str, pod2: &str) -> Result<()> {
    let req = PairDeleteRequest {
        pod1: pod1.to_string(),
        pod2: pod2.to_string(),
    };
    req.validate().map_err(|e| anyhow!(e))?;
    let resp: StatusResponse =
        send_json(&Client::new(), Method::DELETE, pair_url(targets)?, &req).await?;

    println!("{}", clear_summary(pod1, pod2, &resp.status));
    Ok(())
}

fn clear_summary(pod1: &str, pod2: &str, status: &str) -> String {
    match status {
        "skipped" => format!(
            "- {pod1} ⇄ {pod2} : skipped (pair not resolvable or dispatcher busy)"
        ),
        other => format!("✓ {pod1} ⇄ {pod2} : {other}"),
    }
}
