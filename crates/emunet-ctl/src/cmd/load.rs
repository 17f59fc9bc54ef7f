//! Load generation: random pair creation and group teardown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use rand::Rng;
use reqwest::{Client, Method, Url};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use emunet_core::api::{GroupPods, PairDeleteRequest, PairRequest, StatusResponse};

use super::http::{get_json, send_json, url};
use super::{Flags, Targets, split_group};

/// Rate applied to every generated pair: 10 Mbit/s.
pub const GEN_RATE_BPS: u32 = 10_000_000;

const DEFAULT_CONCURRENCY: usize = 64;

#[derive(Debug, Default)]
struct Report {
    ok: usize,
    skipped: usize,
    failed: usize,
    elapsed: Duration,
}

impl Report {
    fn print(&self, what: &str) {
        let total = self.ok + self.skipped + self.failed;
        let secs = self.elapsed.as_secs_f64();
        let rate = if secs > 0.0 { total as f64 / secs } else { 0.0 };

        println!("═══════════════════════════════════════");
        println!("  {what}");
        println!("═══════════════════════════════════════");
        println!("  requests   : {total}");
        println!("  accepted   : {}", self.ok);
        println!("  skipped    : {}", self.skipped);
        println!("  failed     : {}", self.failed);
        println!("  elapsed    : {:.3}s", secs);
        println!("  throughput : {:.1} req/s", rate);
    }
}

async fn group_members(client: &Client, targets: &Targets, group: &str) -> Result<Vec<String>> {
    let (namespace, name) = split_group(group)?;
    let resp: GroupPods = get_json(
        client,
        url(&targets.dispatcher, &["api", "v1", "emunets", namespace, name, "pods"])?,
    )
    .await?;
    let names: Vec<String> = resp.pods.into_iter().map(|p| p.name).collect();
    if names.len() < 2 {
        bail!("group {group} has {} endpoint(s), need at least 2", names.len());
    }
    Ok(names)
}

/// `count` random ordered pairs of distinct members with randomized impairment.
pub fn random_pairs<R: Rng>(rng: &mut R, members: &[String], count: usize) -> Vec<PairRequest> {
    if members.len() < 2 {
        return Vec::new();
    }
    (0..count)
        .map(|_| {
            let a = rng.gen_range(0..members.len());
            // Second pick skips `a` so the pair is never a self-loop.
            let mut b = rng.gen_range(0..members.len() - 1);
            if b >= a {
                b += 1;
            }
            PairRequest {
                pod1: members[a].clone(),
                pod2: members[b].clone(),
                throttle_rate_bps: GEN_RATE_BPS,
                delay: rng.gen_range(1000..11000),
                loss_rate: rng.gen_range(500..3000),
                jitter: rng.gen_range(10..110),
            }
        })
        .collect()
}

/// Every unordered pair of members, once.
pub fn unique_pairs(members: &[String]) -> Vec<PairDeleteRequest> {
    let mut pairs = Vec::new();
    for (i, a) in members.iter().enumerate() {
        for b in &members[i + 1..] {
            pairs.push(PairDeleteRequest {
                pod1: a.clone(),
                pod2: b.clone(),
            });
        }
    }
    pairs
}

async fn fan_out<T>(client: &Client, method: Method, target: Url, bodies: Vec<T>, concurrency: usize) -> Report
where
    T: Serialize + Send + Sync + 'static,
{
    let gate = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let started = Instant::now();

    for body in bodies {
        let Ok(permit) = gate.clone().acquire_owned().await else {
            break;
        };
        let client = client.clone();
        let method = method.clone();
        let target = target.clone();
        tasks.spawn(async move {
            let _permit = permit;
            send_json::<T, StatusResponse>(&client, method, target, &body).await
        });
    }

    let mut report = Report::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(resp)) if resp.status == "skipped" => report.skipped += 1,
            Ok(Ok(_)) => report.ok += 1,
            Ok(Err(e)) => {
                if report.failed == 0 {
                    eprintln!("first failure: {e:#}");
                }
                report.failed += 1;
            }
            Err(_) => report.failed += 1,
        }
    }
    report.elapsed = started.elapsed();
    report
}

pub async fn cmd_generate(targets: &Targets, group: &str, count: &str, flags: &Flags<'_>) -> Result<()> {
    let count: usize = count.parse().map_err(|_| anyhow::anyhow!("count must be a number"))?;
    let concurrency = flags.get("concurrency", DEFAULT_CONCURRENCY)?;
    let client = Client::new();

    let members = group_members(&client, targets, group).await?;
    let pairs = random_pairs(&mut rand::thread_rng(), &members, count);
    println!("Creating {} random pairs across {} endpoints of {group}…", pairs.len(), members.len());

    let target = url(&targets.dispatcher, &["api", "v1", "ebpf", "entry", "by-pods"])?;
    let report = fan_out(&client, Method::POST, target, pairs, concurrency).await;
    report.print(&format!("gen {group}"));
    Ok(())
}

pub async fn cmd_clean(targets: &Targets, group: &str, flags: &Flags<'_>) -> Result<()> {
    let concurrency = flags.get("concurrency", DEFAULT_CONCURRENCY)?;
    let client = Client::new();

    let members = group_members(&client, targets, group).await?;
    let pairs = unique_pairs(&members);
    println!("Clearing {} pairs across {} endpoints of {group}…", pairs.len(), members.len());

    let target = url(&targets.dispatcher, &["api", "v1", "ebpf", "entry", "by-pods"])?;
    let report = fan_out(&client, Method::DELETE, target, pairs, concurrency).await;
    report.print(&format!("clean {group}"));
    Ok(())
}
