//! HTTP API handlers: one module per surface.

pub mod cache;
pub mod entries;
pub mod health;
pub mod pairs;
pub mod podinfo;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::Json;

use emunet_services::{
    Agent, AgentError, CacheError, DispatchEngine, DispatchError, MemoryIdentityCache,
};

#[derive(Clone)]
pub struct DispatcherState {
    pub engine: DispatchEngine,
}

#[derive(Clone)]
pub struct AgentState {
    pub agent: Agent,
}

#[derive(Clone)]
pub struct CacheState {
    pub cache: MemoryIdentityCache,
}

// ── Error mapping ─────────────────────────────────────────────────────────────

pub type ApiError = (StatusCode, String);

fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, msg.into())
}

/// Unwrap a JSON body. Malformed, mistyped or incomplete bodies are 400.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| bad_request(e.body_text()))
}

fn dispatch_error(e: DispatchError) -> ApiError {
    let status = match &e {
        DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
        DispatchError::NotSchedulable { .. } => StatusCode::PRECONDITION_FAILED,
        DispatchError::Overloaded | DispatchError::Closed | DispatchError::Cache(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    (status, e.to_string())
}

fn agent_error(e: AgentError) -> ApiError {
    let status = match &e {
        AgentError::Busy => StatusCode::SERVICE_UNAVAILABLE,
        AgentError::InvalidMac(_) | AgentError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AgentError::TableUnavailable(_) | AgentError::Table(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}

fn cache_error(e: CacheError) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// The dispatcher's view of a cache failure: it cannot resolve anything.
fn cache_unavailable(e: CacheError) -> ApiError {
    (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

// Re-export handler functions for use in router setup.
pub use cache::{
    handle_group_delete, handle_group_members, handle_identity_delete, handle_identity_get,
    handle_identity_put_network, handle_identity_put_orchestration,
};
pub use entries::{handle_entry_delete, handle_entry_list, handle_entry_upsert};
pub use health::{handle_agent_health, handle_cache_health, handle_dispatcher_health};
pub use pairs::{handle_group_pods, handle_pair_create, handle_pair_delete};
pub use podinfo::{handle_podinfo_add, handle_podinfo_delete, handle_podinfo_get};
