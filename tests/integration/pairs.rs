use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json as body;
use tokio::sync::Semaphore;

use emunet_services::dispatch::{DeliveryError, RuleJob};

use crate::*;

const MAC_A: &str = "02:00:00:00:00:0a";
const MAC_B: &str = "02:00:00:00:00:0b";

async fn agent_rules(agent: &Server) -> Vec<Value> {
    match get(&format!("{}/api/ebpf/entry", agent.url)).await {
        Ok((200, text)) => json(&text).as_array().cloned().unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// A pair create installs one rule per direction: keyed by the receiving
/// endpoint's ifindex and the sending endpoint's MAC. Delete removes both.
#[tokio::test]
async fn test_pair_lifecycle_over_http() -> Result<()> {
    let (cache, _) = spawn_cache().await;
    let (agent, _) = spawn_agent(&cache.url).await;
    let (dispatcher, engine) = spawn_dispatcher(&cache.url, agent.addr.port()).await;

    register(&agent, &cache, "pod-a", 11, MAC_A, "lab/wan").await?;
    register(&agent, &cache, "pod-b", 12, MAC_B, "lab/wan").await?;

    let pairs_url = format!("{}/api/v1/ebpf/entry/by-pods", dispatcher.url);
    let (status, text) = post(
        &pairs_url,
        body!({ "pod1": "pod-a", "pod2": "pod-b", "delay": 2000, "jitter": 50, "lossRate": 100, "throttleRateBps": 10000000 }),
    )
    .await?;
    assert_eq!(status, 200, "{text}");
    assert_eq!(json(&text)["status"], "queued");

    let agent = &agent;
    eventually(Duration::from_secs(5), || async move { agent_rules(agent).await.len() == 2 }).await?;
    let rules = agent_rules(agent).await;

    // Sorted by ifindex: toward pod-a first, then toward pod-b.
    assert_eq!(rules[0]["ifindex"], 11);
    assert_eq!(rules[0]["srcMac"], MAC_B);
    assert_eq!(rules[1]["ifindex"], 12);
    assert_eq!(rules[1]["srcMac"], MAC_A);
    for rule in &rules {
        assert_eq!(rule["delay"], 2000);
        assert_eq!(rule["jitter"], 50);
        assert_eq!(rule["lossRate"], 100);
        assert_eq!(rule["throttleRateBps"], 10_000_000);
    }

    // Updating replaces in place.
    let (status, _) = post(&pairs_url, body!({ "pod1": "pod-b", "pod2": "pod-a", "delay": 500 })).await?;
    assert_eq!(status, 200);
    eventually(Duration::from_secs(5), || async move {
        let rules = agent_rules(agent).await;
        rules.len() == 2 && rules.iter().all(|r| r["delay"] == 500 && r["lossRate"] == 0)
    })
    .await?;

    let (status, text) = delete(&pairs_url, Some(body!({ "pod1": "pod-a", "pod2": "pod-b" }))).await?;
    assert_eq!(status, 200);
    assert_eq!(json(&text)["status"], "queued");
    eventually(Duration::from_secs(5), || async move { agent_rules(agent).await.is_empty() }).await?;

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_group_listing() -> Result<()> {
    let (cache, _) = spawn_cache().await;
    let (agent, _) = spawn_agent(&cache.url).await;
    let (dispatcher, _) = spawn_dispatcher(&cache.url, agent.addr.port()).await;

    register(&agent, &cache, "pod-a", 11, MAC_A, "lab/wan").await?;
    register(&agent, &cache, "pod-b", 12, MAC_B, "lab/wan").await?;
    register(&agent, &cache, "pod-c", 13, "02:00:00:00:00:0c", "lab/other").await?;

    let (status, text) = get(&format!("{}/api/v1/emunets/lab/wan/pods", dispatcher.url)).await?;
    assert_eq!(status, 200, "{text}");
    let listing = json(&text);
    assert_eq!(listing["group"], "lab/wan");
    let names: Vec<&str> = listing["pods"]
        .as_array()
        .context("pods array")?
        .iter()
        .filter_map(|p| p["name"].as_str())
        .collect();
    assert_eq!(names, ["pod-a", "pod-b"]);
    assert_eq!(listing["pods"][0]["host"], "127.0.0.1");
    assert_eq!(listing["pods"][0]["mac"], MAC_A);

    let (status, _) = get(&format!("{}/api/v1/emunets/lab/empty/pods", dispatcher.url)).await?;
    assert_eq!(status, 404);
    Ok(())
}

/// Unknown endpoints are 404, half-registered ones 412, and a delete that
/// cannot resolve the target is a successful no-op.
#[tokio::test]
async fn test_resolution_failures() -> Result<()> {
    let (cache, _) = spawn_cache().await;
    let (agent, _) = spawn_agent(&cache.url).await;
    let (dispatcher, _) = spawn_dispatcher(&cache.url, agent.addr.port()).await;
    let pairs_url = format!("{}/api/v1/ebpf/entry/by-pods", dispatcher.url);

    register(&agent, &cache, "pod-a", 11, MAC_A, "lab/wan").await?;

    let (status, _) = post(&pairs_url, body!({ "pod1": "pod-a", "pod2": "ghost", "delay": 100 })).await?;
    assert_eq!(status, 404);

    // Orchestration only: no ifindex or MAC yet.
    let (status, _) = put(
        &format!("{}/api/v1/identity/pod-half/orchestration", cache.url),
        body!({ "host": "127.0.0.1" }),
    )
    .await?;
    assert_eq!(status, 200);
    let (status, text) = post(&pairs_url, body!({ "pod1": "pod-a", "pod2": "pod-half", "delay": 100 })).await?;
    assert_eq!(status, 412, "{text}");

    let (status, text) = delete(&pairs_url, Some(body!({ "pod1": "pod-a", "pod2": "ghost" }))).await?;
    assert_eq!(status, 200);
    assert_eq!(json(&text)["status"], "skipped");

    let (status, _) = post(&pairs_url, body!({ "pod1": "pod-a", "pod2": "pod-a", "lossRate": 10001 })).await?;
    assert_eq!(status, 400);
    let (status, _) = post(&pairs_url, body!({ "pod1": "", "pod2": "pod-a" })).await?;
    assert_eq!(status, 400);

    // Bodies the JSON extractor cannot decode are client errors too.
    let (status, text) = post(&pairs_url, body!({ "pod1": "pod-a" })).await?;
    assert_eq!(status, 400, "{text}");
    let (status, _) = post(&pairs_url, body!({ "pod1": "pod-a", "pod2": "pod-b", "delay": "soon" })).await?;
    assert_eq!(status, 400);
    let (status, _) = delete(&pairs_url, Some(body!({ "pod2": "pod-a" }))).await?;
    assert_eq!(status, 400);

    assert!(agent_rules(&agent).await.is_empty());
    Ok(())
}

// ── Backpressure ──────────────────────────────────────────────────────────────

/// Holds every delivery until permits are released.
struct GatedTransport {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl AgentTransport for GatedTransport {
    async fn deliver(&self, _job: &RuleJob) -> std::result::Result<(), DeliveryError> {
        let _permit = self.gate.acquire().await;
        Ok(())
    }
}

/// A full queue answers 503 immediately; once workers drain it, requests
/// are accepted again.
#[tokio::test]
async fn test_overload_then_recovery() -> Result<()> {
    let (cache, _) = spawn_cache().await;
    let (agent, _) = spawn_agent(&cache.url).await;
    register(&agent, &cache, "pod-a", 11, MAC_A, "lab/wan").await?;
    register(&agent, &cache, "pod-b", 12, MAC_B, "lab/wan").await?;

    let gate = Arc::new(Semaphore::new(0));
    let transport = Arc::new(GatedTransport { gate: gate.clone() });
    let (dispatcher, engine) = spawn_dispatcher_with(&cache.url, transport, 1, 2).await;
    let pairs_url = format!("{}/api/v1/ebpf/entry/by-pods", dispatcher.url);
    let pair = body!({ "pod1": "pod-a", "pod2": "pod-b", "delay": 100 });

    let mut saw_overload = false;
    for _ in 0..10 {
        let (status, _) = post(&pairs_url, pair.clone()).await?;
        if status == 503 {
            saw_overload = true;
            break;
        }
        assert_eq!(status, 200);
    }
    assert!(saw_overload, "queue never filled");

    gate.add_permits(1_000);
    let engine = &engine;
    eventually(Duration::from_secs(5), || async move { engine.queue_depth() == 0 }).await?;

    let (status, _) = post(&pairs_url, pair).await?;
    assert_eq!(status, 200);
    Ok(())
}
