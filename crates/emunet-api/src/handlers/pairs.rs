//! Dispatcher handlers: pair rules and group listing.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use emunet_core::api::{GroupPods, PairDeleteRequest, PairRequest, StatusResponse};
use emunet_services::{DeleteOutcome, IdentityCache};

use super::{
    bad_request, cache_unavailable, dispatch_error, json_body, ApiError, DispatcherState,
};

// ── /api/v1/ebpf/entry/by-pods (POST) ────────────────────────────────────────

pub async fn handle_pair_create(
    State(state): State<DispatcherState>,
    payload: Result<Json<PairRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let req = json_body(payload)?;
    req.validate().map_err(bad_request)?;

    state
        .engine
        .create_or_update(&req.pod1, &req.pod2, req.params())
        .await
        .map_err(dispatch_error)?;

    tracing::debug!(pod1 = %req.pod1, pod2 = %req.pod2, "pair rule queued");
    Ok(Json(StatusResponse::queued()))
}

// ── /api/v1/ebpf/entry/by-pods (DELETE) ──────────────────────────────────────

pub async fn handle_pair_delete(
    State(state): State<DispatcherState>,
    payload: Result<Json<PairDeleteRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let req = json_body(payload)?;
    req.validate().map_err(bad_request)?;

    let body = match state.engine.delete(&req.pod1, &req.pod2).await {
        DeleteOutcome::Queued => StatusResponse::queued(),
        DeleteOutcome::Skipped => StatusResponse::skipped(),
    };
    Ok(Json(body))
}

// ── /api/v1/emunets/{namespace}/{name}/pods (GET) ────────────────────────────

pub async fn handle_group_pods(
    State(state): State<DispatcherState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<GroupPods>, ApiError> {
    let group = format!("{namespace}/{name}");
    let cache = state.engine.cache();

    let members = cache
        .list_by_group(&group)
        .await
        .map_err(cache_unavailable)?;

    let mut pods = Vec::with_capacity(members.len());
    for member in &members {
        // Members can expire between the index read and the record read.
        if let Some(record) = cache.get_merged(member).await.map_err(cache_unavailable)? {
            pods.push(record);
        }
    }

    if members.is_empty() {
        return Err((StatusCode::NOT_FOUND, format!("group {group} has no members")));
    }
    Ok(Json(GroupPods { group, pods }))
}
