
use serde_json::json as body;

use emunet_core::{LifecyclePhase, MacAddr, NetworkIdentity, OrchestrationIdentity};

use crate::*;

/// Both producers write concurrently through the HTTP client; neither
/// erases the other's fields.
#[tokio::test]
async fn test_producers_merge_through_remote_client() -> Result<()> {
    let (server, store) = spawn_cache().await;
    let remote = remote_cache(&server.url);

    let mac: MacAddr = "02:00:00:00:00:21".parse()?;
    let net = NetworkIdentity { ifindex: 21, mac };
    let orch = OrchestrationIdentity {
        group: Some("lab/wan".into()),
        host: "node-2".into(),
        ip: Some("10.1.0.21".parse()?),
        phase: LifecyclePhase::Running,
        ready: true,
    };

    let (a, b) = tokio::join!(
        remote.put_network_identity("pod-x", net),
        remote.put_orchestration_identity("pod-x", orch),
    );
    a?;
    b?;

    let merged = remote.get_merged("pod-x").await?.context("record missing")?;
    assert_eq!(merged.ifindex, Some(21));
    assert_eq!(merged.mac, Some(mac));
    assert_eq!(merged.host.as_deref(), Some("node-2"));
    assert_eq!(merged.group.as_deref(), Some("lab/wan"));
    assert_eq!(merged.phase, Some(LifecyclePhase::Running));
    assert!(merged.last_updated_ms > 0);

    assert_eq!(remote.list_by_group("lab/wan").await?, vec!["pod-x".to_string()]);
    assert!(store.get_merged("pod-x").await?.is_some());
    assert!(remote.ping().await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_identity_http_surface() -> Result<()> {
    let (server, _) = spawn_cache().await;

    let (status, _) = get(&format!("{}/api/v1/identity/nobody", server.url)).await?;
    assert_eq!(status, 404);

    let (status, _) = put(
        &format!("{}/api/v1/identity/pod-y/network", server.url),
        body!({ "ifindex": 7, "mac": "02:00:00:00:00:07" }),
    )
    .await?;
    assert_eq!(status, 200);

    // Bad MAC and empty host are rejected before they reach the store.
    let (status, _) = put(
        &format!("{}/api/v1/identity/pod-y/network", server.url),
        body!({ "ifindex": 7, "mac": "02:00:00:00:07" }),
    )
    .await?;
    assert_eq!(status, 400);
    let (status, _) = put(
        &format!("{}/api/v1/identity/pod-y/orchestration", server.url),
        body!({ "host": "" }),
    )
    .await?;
    assert_eq!(status, 400);

    let (status, text) = get(&format!("{}/api/v1/identity/pod-y", server.url)).await?;
    assert_eq!(status, 200);
    let record = json(&text);
    assert_eq!(record["name"], "pod-y");
    assert_eq!(record["ifindex"], 7);
    assert_eq!(record["host"], Value::Null);

    let (status, _) = delete(&format!("{}/api/v1/identity/pod-y", server.url), None).await?;
    assert_eq!(status, 200);
    let (status, _) = get(&format!("{}/api/v1/identity/pod-y", server.url)).await?;
    assert_eq!(status, 404);
    Ok(())
}

#[tokio::test]
async fn test_group_teardown() -> Result<()> {
    let (server, store) = spawn_cache().await;
    let remote = remote_cache(&server.url);

    for (i, name) in ["n1", "n2", "n3"].iter().enumerate() {
        remote
            .put_orchestration_identity(
                name,
                OrchestrationIdentity {
                    group: Some("lab/gone".into()),
                    host: format!("node-{i}"),
                    ip: None,
                    phase: LifecyclePhase::Pending,
                    ready: false,
                },
            )
            .await?;
    }

    let (status, text) = get(&format!("{}/api/v1/groups/lab%2Fgone/members", server.url)).await?;
    assert_eq!(status, 200);
    assert_eq!(json(&text)["members"], body!(["n1", "n2", "n3"]));

    assert_eq!(remote.delete_group("lab/gone").await?, 3);
    assert!(remote.list_by_group("lab/gone").await?.is_empty());
    assert!(store.is_empty());

    // Deleting again is harmless.
    assert_eq!(remote.delete_group("lab/gone").await?, 0);

    let (status, text) = get(&format!("{}/health", server.url)).await?;
    assert_eq!(status, 200);
    assert_eq!(json(&text)["records"], 0);
    Ok(())
}
