use crate::*;

#[tokio::test]
async fn test_health_endpoints() -> Result<()> {
    let (cache, _) = spawn_cache().await;
    let (agent, _) = spawn_agent(&cache.url).await;
    let (dispatcher, _) = spawn_dispatcher(&cache.url, agent.addr.port()).await;

    let (status, text) = get(&format!("{}/api/v1/health", dispatcher.url)).await?;
    assert_eq!(status, 200, "{text}");
    let health = json(&text);
    assert_eq!(health["workers"], 4);
    assert_eq!(health["queueCapacity"], 128);
    assert_eq!(health["cacheReachable"], true);

    let (status, text) = get(&format!("{}/health", agent.url)).await?;
    assert_eq!(status, 200);
    assert_eq!(json(&text)["ruleTableLoaded"], false);

    let (status, text) = get(&format!("{}/health", cache.url)).await?;
    assert_eq!(status, 200);
    assert_eq!(json(&text)["status"], "ok");
    Ok(())
}

/// With no identity cache behind it the dispatcher reports 503 and refuses
/// pair requests instead of hanging.
#[tokio::test]
async fn test_dispatcher_without_cache() -> Result<()> {
    let (dispatcher, _) = spawn_dispatcher("http://127.0.0.1:9", 9).await;

    let (status, text) = get(&format!("{}/api/v1/health", dispatcher.url)).await?;
    assert_eq!(status, 503);
    assert_eq!(json(&text)["cacheReachable"], false);

    let (status, _) = post(
        &format!("{}/api/v1/ebpf/entry/by-pods", dispatcher.url),
        serde_json::json!({ "pod1": "a", "pod2": "b" }),
    )
    .await?;
    assert_eq!(status, 503);
    Ok(())
}
