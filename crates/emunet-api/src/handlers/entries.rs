//! Agent handlers: direct rule table access.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use emunet_core::api::{RuleEntry, RuleKey, StatusResponse};
use emunet_core::RuleOp;

use super::{agent_error, json_body, ApiError, AgentState};

// ── /api/ebpf/entry (POST) ────────────────────────────────────────────────────

pub async fn handle_entry_upsert(
    State(state): State<AgentState>,
    payload: Result<Json<RuleEntry>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let req = json_body(payload)?;
    state
        .agent
        .apply_entry(req.ifindex, &req.src_mac, RuleOp::Upsert(req.params()))
        .await
        .map_err(agent_error)?;
    Ok(Json(StatusResponse::ok()))
}

// ── /api/ebpf/entry (DELETE) ──────────────────────────────────────────────────

pub async fn handle_entry_delete(
    State(state): State<AgentState>,
    payload: Result<Json<RuleKey>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let req = json_body(payload)?;
    state
        .agent
        .apply_entry(req.ifindex, &req.src_mac, RuleOp::Delete)
        .await
        .map_err(agent_error)?;
    Ok(Json(StatusResponse::ok()))
}

// ── /api/ebpf/entry (GET) ─────────────────────────────────────────────────────

pub async fn handle_entry_list(
    State(state): State<AgentState>,
) -> Result<Json<Vec<RuleEntry>>, ApiError> {
    let mut entries: Vec<RuleEntry> = state
        .agent
        .rules()
        .await
        .map_err(agent_error)?
        .into_iter()
        .map(|(key, params)| RuleEntry::new(key.ifindex(), key.src_mac(), params))
        .collect();
    entries.sort_by(|a, b| (a.ifindex, &a.src_mac).cmp(&(b.ifindex, &b.src_mac)));
    Ok(Json(entries))
}
