//! emunet integration test harness.
//!
//! Every test starts its own dispatcher, agent and identity cache in-process
//! on 127.0.0.1:0 listeners and talks to them over real HTTP. Nothing here
//! needs root: the agent runs with an in-process rule table.
//!
//!   cargo test --test integration

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use axum::Router;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use emunet_api::{AgentState, CacheState, DispatcherState};
use emunet_services::rule_loader::InProcessLoader;
use emunet_services::{
    Agent, AgentSettings, AgentTransport, DispatchEngine, DispatchSettings, HttpAgentTransport,
    IdentityCache, MemoryIdentityCache, RemoteIdentityCache,
};

mod agent;
mod cache;
mod health;
mod pairs;

// ── Harness ───────────────────────────────────────────────────────────────────

/// One role served on an ephemeral loopback port. Shuts down on drop.
pub struct Server {
    pub addr: SocketAddr,
    pub url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn serve(app: Router) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(emunet_api::serve_on(listener, app, async move {
        let _ = rx.await;
    }));
    Server {
        addr,
        url: format!("http://{addr}"),
        shutdown: Some(tx),
    }
}

/// Identity cache service with a long TTL.
pub async fn spawn_cache() -> (Server, MemoryIdentityCache) {
    let cache = MemoryIdentityCache::new(Duration::from_secs(3600));
    let server = serve(emunet_api::cache_router(CacheState {
        cache: cache.clone(),
    }))
    .await;
    (server, cache)
}

pub fn remote_cache(cache_url: &str) -> Arc<dyn IdentityCache> {
    Arc::new(RemoteIdentityCache::new(cache_url, Duration::from_secs(2)).expect("cache client"))
}

/// Agent with an in-process rule table, reporting to `cache_url`.
pub async fn spawn_agent(cache_url: &str) -> (Server, Agent) {
    let agent = Agent::new(
        AgentSettings {
            max_in_flight: 64,
            admission_timeout: Duration::from_millis(500),
        },
        Arc::new(InProcessLoader { capacity: 1024 }),
        Some(remote_cache(cache_url)),
    );
    let server = serve(emunet_api::agent_router(AgentState {
        agent: agent.clone(),
    }))
    .await;
    (server, agent)
}

/// Dispatcher delivering over HTTP to agents on `agent_port`.
pub async fn spawn_dispatcher(cache_url: &str, agent_port: u16) -> (Server, DispatchEngine) {
    let transport =
        HttpAgentTransport::new(agent_port, Duration::from_secs(2)).expect("agent client");
    spawn_dispatcher_with(cache_url, Arc::new(transport), 4, 128).await
}

pub async fn spawn_dispatcher_with(
    cache_url: &str,
    transport: Arc<dyn AgentTransport>,
    worker_count: usize,
    queue_capacity: usize,
) -> (Server, DispatchEngine) {
    let engine = DispatchEngine::start(
        remote_cache(cache_url),
        transport,
        DispatchSettings {
            worker_count,
            queue_capacity,
        },
    );
    let server = serve(emunet_api::dispatcher_router(DispatcherState {
        engine: engine.clone(),
    }))
    .await;
    (server, engine)
}

// ── HTTP helpers ──────────────────────────────────────────────────────────────

pub async fn call(method: reqwest::Method, url: &str, body: Option<Value>) -> Result<(u16, String)> {
    let client = reqwest::Client::new();
    let mut req = client.request(method, url);
    if let Some(body) = body {
        req = req.json(&body);
    }
    let resp = req.send().await.with_context(|| format!("request to {url}"))?;
    let status = resp.status().as_u16();
    let text = resp.text().await.context("response body")?;
    Ok((status, text))
}

pub async fn get(url: &str) -> Result<(u16, String)> {
    call(reqwest::Method::GET, url, None).await
}

pub async fn post(url: &str, body: Value) -> Result<(u16, String)> {
    call(reqwest::Method::POST, url, Some(body)).await
}

pub async fn put(url: &str, body: Value) -> Result<(u16, String)> {
    call(reqwest::Method::PUT, url, Some(body)).await
}

pub async fn delete(url: &str, body: Option<Value>) -> Result<(u16, String)> {
    call(reqwest::Method::DELETE, url, body).await
}

pub fn json(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|e| panic!("not JSON ({e}): {text}"))
}

/// Poll `check` every 20 ms until it returns true or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Register an endpoint the way both producers would: the agent report
/// supplies ifindex and MAC, the orchestration write supplies host and group.
pub async fn register(agent: &Server, cache: &Server, name: &str, ifindex: u32, mac: &str, group: &str) -> Result<()> {
    let (status, body) = post(
        &format!("{}/api/podinfo/add", agent.url),
        serde_json::json!({ "podName": name, "ifindex": ifindex, "srcMac": mac }),
    )
    .await?;
    assert_eq!(status, 200, "podinfo add: {body}");

    let (status, body) = put(
        &format!("{}/api/v1/identity/{name}/orchestration", cache.url),
        serde_json::json!({
            "group": group,
            "host": "127.0.0.1",
            "ip": "10.0.0.1",
            "phase": "Running",
            "ready": true,
        }),
    )
    .await?;
    assert_eq!(status, 200, "orchestration put: {body}");

    // The agent's cache write is fire-and-forget.
    let url = format!("{}/api/v1/identity/{name}", cache.url);
    eventually(Duration::from_secs(5), || {
        let url = url.clone();
        async move {
            match get(&url).await {
                Ok((200, body)) => json(&body)["ifindex"] == ifindex,
                _ => false,
            }
        }
    })
    .await
}
