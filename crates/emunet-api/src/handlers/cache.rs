//! Identity cache service handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use emunet_core::api::{GroupDeleted, GroupMembers, StatusResponse};
use emunet_core::{EndpointIdentity, NetworkIdentity, OrchestrationIdentity};
use emunet_services::IdentityCache;

use super::{bad_request, cache_error, json_body, ApiError, CacheState};

// ── /api/v1/identity/{name}/network (PUT) ─────────────────────────────────────

pub async fn handle_identity_put_network(
    State(state): State<CacheState>,
    Path(name): Path<String>,
    payload: Result<Json<NetworkIdentity>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let req = json_body(payload)?;
    state
        .cache
        .put_network_identity(&name, req)
        .await
        .map_err(cache_error)?;
    Ok(Json(StatusResponse::ok()))
}

// ── /api/v1/identity/{name}/orchestration (PUT) ───────────────────────────────

pub async fn handle_identity_put_orchestration(
    State(state): State<CacheState>,
    Path(name): Path<String>,
    payload: Result<Json<OrchestrationIdentity>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let req = json_body(payload)?;
    if req.host.is_empty() {
        return Err(bad_request("host must be non-empty"));
    }
    state
        .cache
        .put_orchestration_identity(&name, req)
        .await
        .map_err(cache_error)?;
    Ok(Json(StatusResponse::ok()))
}

// ── /api/v1/identity/{name} (GET, DELETE) ─────────────────────────────────────

pub async fn handle_identity_get(
    State(state): State<CacheState>,
    Path(name): Path<String>,
) -> Result<Json<EndpointIdentity>, ApiError> {
    state
        .cache
        .get_merged(&name)
        .await
        .map_err(cache_error)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("{name} not found")))
}

pub async fn handle_identity_delete(
    State(state): State<CacheState>,
    Path(name): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.cache.delete(&name).await.map_err(cache_error)?;
    Ok(Json(StatusResponse::ok()))
}

// ── /api/v1/groups/{group} ────────────────────────────────────────────────────

pub async fn handle_group_members(
    State(state): State<CacheState>,
    Path(group): Path<String>,
) -> Result<Json<GroupMembers>, ApiError> {
    let members = state
        .cache
        .list_by_group(&group)
        .await
        .map_err(cache_error)?;
    Ok(Json(GroupMembers { group, members }))
}

pub async fn handle_group_delete(
    State(state): State<CacheState>,
    Path(group): Path<String>,
) -> Result<Json<GroupDeleted>, ApiError> {
    let removed = state
        .cache
        .delete_group(&group)
        .await
        .map_err(cache_error)?;
    tracing::info!(group = %group, removed, "group removed");
    Ok(Json(GroupDeleted { group, removed }))
}
