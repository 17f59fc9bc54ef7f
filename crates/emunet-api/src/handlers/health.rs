//! Health endpoints for each role.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use emunet_core::api::{AgentHealth, CacheHealth, DispatcherHealth};

use super::{AgentState, CacheState, DispatcherState};

/// 503 while the identity cache is unreachable: nothing can be resolved.
pub async fn handle_dispatcher_health(
    State(state): State<DispatcherState>,
) -> (StatusCode, Json<DispatcherHealth>) {
    let health = state.engine.health().await;
    let status = if health.cache_reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

pub async fn handle_agent_health(State(state): State<AgentState>) -> Json<AgentHealth> {
    Json(state.agent.health())
}

pub async fn handle_cache_health(State(state): State<CacheState>) -> Json<CacheHealth> {
    Json(CacheHealth {
        status: "ok".into(),
        records: state.cache.len(),
        groups: state.cache.group_count(),
    })
}
