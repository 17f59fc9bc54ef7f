use std::time::Duration;

use serde_json::json as body;

use crate::*;

#[tokio::test]
async fn test_direct_entry_upsert_and_delete() -> Result<()> {
    let (cache, _) = spawn_cache().await;
    let (agent, _) = spawn_agent(&cache.url).await;
    let entry_url = format!("{}/api/ebpf/entry", agent.url);

    let (status, text) = post(
        &entry_url,
        body!({ "ifindex": 3, "srcMac": "02:00:00:00:00:33", "delay": 1500, "lossRate": 250 }),
    )
    .await?;
    assert_eq!(status, 200, "{text}");
    assert_eq!(json(&text)["status"], "ok");

    let (_, text) = get(&entry_url).await?;
    let rules = json(&text);
    assert_eq!(rules.as_array().map(Vec::len), Some(1));
    assert_eq!(rules[0]["delay"], 1500);
    assert_eq!(rules[0]["lossRate"], 250);
    assert_eq!(rules[0]["jitter"], 0);

    // Deleting an absent key succeeds too.
    for _ in 0..2 {
        let (status, _) = delete(&entry_url, Some(body!({ "ifindex": 3, "srcMac": "02:00:00:00:00:33" }))).await?;
        assert_eq!(status, 200);
    }
    let (_, text) = get(&entry_url).await?;
    assert_eq!(json(&text), body!([]));
    Ok(())
}

#[tokio::test]
async fn test_entry_validation() -> Result<()> {
    let (cache, _) = spawn_cache().await;
    let (agent, _) = spawn_agent(&cache.url).await;
    let entry_url = format!("{}/api/ebpf/entry", agent.url);

    let (status, _) = post(&entry_url, body!({ "ifindex": 3, "srcMac": "not-a-mac", "delay": 1 })).await?;
    assert_eq!(status, 400);
    let (status, _) = post(&entry_url, body!({ "ifindex": 3, "srcMac": "02:00:00:00:00:33", "lossRate": 20000 })).await?;
    assert_eq!(status, 400);

    let (_, text) = get(&format!("{}/health", agent.url)).await?;
    let health = json(&text);
    assert_eq!(health["requests"]["failed"], 0);
    assert_eq!(health["requests"]["active"], 0);
    Ok(())
}

/// A report lands in the agent's local store and, asynchronously, in the
/// identity cache as the network half of the record.
#[tokio::test]
async fn test_identity_report_reaches_cache() -> Result<()> {
    let (cache, store) = spawn_cache().await;
    let (agent, local) = spawn_agent(&cache.url).await;

    let (status, _) = post(
        &format!("{}/api/podinfo/add", agent.url),
        body!({ "podName": "pod-r", "ifindex": 42, "srcMac": "02:AA:BB:CC:DD:EE" }),
    )
    .await?;
    assert_eq!(status, 200);

    let (status, text) = get(&format!("{}/api/podinfo/pod-r", agent.url)).await?;
    assert_eq!(status, 200);
    assert_eq!(json(&text)["srcMac"], "02:aa:bb:cc:dd:ee");
    assert!(local.identity("pod-r").is_some());

    let store = &store;
    eventually(Duration::from_secs(5), || async move {
        matches!(store.get_merged("pod-r").await, Ok(Some(r)) if r.ifindex == Some(42))
    })
    .await?;

    let (status, _) = delete(&format!("{}/api/podinfo/pod-r", agent.url), None).await?;
    assert_eq!(status, 200);
    let (status, _) = get(&format!("{}/api/podinfo/pod-r", agent.url)).await?;
    assert_eq!(status, 404);

    let (status, _) = post(
        &format!("{}/api/podinfo/add", agent.url),
        body!({ "podName": "pod-r", "ifindex": 42, "srcMac": "zz" }),
    )
    .await?;
    assert_eq!(status, 400);
    Ok(())
}
