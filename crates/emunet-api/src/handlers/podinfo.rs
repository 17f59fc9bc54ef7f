//! Agent handlers: identity reports from the interface plumbing.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use emunet_core::api::{IdentityReport, LocalIdentity, StatusResponse};
use emunet_core::MacAddr;

use super::{bad_request, json_body, ApiError, AgentState};

// ── /api/podinfo/add (POST) ───────────────────────────────────────────────────

pub async fn handle_podinfo_add(
    State(state): State<AgentState>,
    payload: Result<Json<IdentityReport>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let req = json_body(payload)?;
    if req.pod_name.is_empty() {
        return Err(bad_request("podName must be non-empty"));
    }
    let mac: MacAddr = req
        .src_mac
        .parse()
        .map_err(|e| bad_request(format!("invalid srcMac: {e}")))?;

    state.agent.report_identity(&req.pod_name, mac, req.ifindex);
    tracing::info!(pod = %req.pod_name, ifindex = req.ifindex, mac = %mac, "identity reported");
    Ok(Json(StatusResponse::ok()))
}

// ── /api/podinfo/{pod_name} (GET) ─────────────────────────────────────────────

pub async fn handle_podinfo_get(
    State(state): State<AgentState>,
    Path(pod_name): Path<String>,
) -> Result<Json<LocalIdentity>, ApiError> {
    state
        .agent
        .identity(&pod_name)
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("{pod_name} not reported here")))
}

// ── /api/podinfo/{pod_name} (DELETE) ──────────────────────────────────────────

pub async fn handle_podinfo_delete(
    State(state): State<AgentState>,
    Path(pod_name): Path<String>,
) -> Json<StatusResponse> {
    if state.agent.forget_identity(&pod_name) {
        tracing::info!(pod = %pod_name, "identity forgotten");
    }
    Json(StatusResponse::ok())
}
