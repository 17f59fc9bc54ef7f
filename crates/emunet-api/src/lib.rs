//! emunet-api: HTTP surfaces of the three daemon roles.
//!
//! - dispatcher: pair create/delete, group listing, health
//! - agent: rule entries, local identity reports, health
//! - cache: identity records and group index, health

pub mod handlers;

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub use handlers::{AgentState, CacheState, DispatcherState};

pub fn dispatcher_router(state: DispatcherState) -> Router {
    let api_routes = Router::new()
        .route(
            "/ebpf/entry/by-pods",
            post(handlers::handle_pair_create).delete(handlers::handle_pair_delete),
        )
        .route(
            "/emunets/{namespace}/{name}/pods",
            get(handlers::handle_group_pods),
        )
        .route("/health", get(handlers::handle_dispatcher_health))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
}

pub fn agent_router(state: AgentState) -> Router {
    let api_routes = Router::new()
        .route(
            "/ebpf/entry",
            post(handlers::handle_entry_upsert)
                .delete(handlers::handle_entry_delete)
                .get(handlers::handle_entry_list),
        )
        .route("/podinfo/add", post(handlers::handle_podinfo_add))
        .route(
            "/podinfo/{pod_name}",
            get(handlers::handle_podinfo_get).delete(handlers::handle_podinfo_delete),
        )
        .with_state(state.clone());

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(handlers::handle_agent_health).with_state(state))
        .layer(TraceLayer::new_for_http())
}

pub fn cache_router(state: CacheState) -> Router {
    let api_routes = Router::new()
        .route(
            "/identity/{name}",
            get(handlers::handle_identity_get).delete(handlers::handle_identity_delete),
        )
        .route(
            "/identity/{name}/network",
            put(handlers::handle_identity_put_network),
        )
        .route(
            "/identity/{name}/orchestration",
            put(handlers::handle_identity_put_orchestration),
        )
        .route(
            "/groups/{group}/members",
            get(handlers::handle_group_members),
        )
        .route(
            "/groups/{group}",
            axum::routing::delete(handlers::handle_group_delete),
        )
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::handle_cache_health).with_state(state))
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve `app` until `shutdown` resolves.
pub async fn serve<F>(app: Router, addr: SocketAddr, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, app, shutdown).await
}

/// Serve on an already-bound listener.
pub async fn serve_on<F>(listener: TcpListener, app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!(addr = %listener.local_addr()?, "API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
