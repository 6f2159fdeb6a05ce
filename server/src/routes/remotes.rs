//! HQ-mode-only endpoints: remotes register, heartbeat, and are unregistered here. Mounted
//! unconditionally by the router; each handler itself checks `state.hq_mode` so a standalone
//! instance still answers with a clear `invalid-request` instead of silently doing nothing.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use vibetunnel_core::error::CoreError;
use vibetunnel_core::hq::{RegisterRemote, Remote};

use crate::error::AppResult;
use crate::state::AppState;

fn require_hq_mode(state: &AppState) -> AppResult<()> {
    if !state.hq_mode {
        return Err(CoreError::InvalidRequest("this instance is not running in HQ mode".into()).into());
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub id: String,
    pub name: String,
    pub url: String,
    pub token: String,
}

/// `POST /api/remotes/register`
pub async fn register_remote(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> AppResult<Json<Value>> {
    require_hq_mode(&state)?;
    let remote: Remote = state.remotes.register(RegisterRemote {
        id: body.id,
        name: body.name,
        url: body.url,
        token: body.token,
    })?;
    tracing::info!(remote = %remote.id, name = %remote.name, "remote registered");
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatBody {
    #[serde(default)]
    pub session_count: Option<u32>,
    /// Session ids this remote currently owns, unprefixed. Beyond the `{sessionCount}` the API
    /// contract guarantees; optional so a minimal heartbeat that only reports a count still parses.
    #[serde(default)]
    pub session_ids: Vec<String>,
}

fn verify_remote_bearer(headers: &HeaderMap, remote: &Remote) -> AppResult<()> {
    let header_value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(CoreError::Unauthorized)?;
    vibetunnel_core::auth::verify_bearer(header_value, &remote.token)?;
    Ok(())
}

/// `POST /api/remotes/{id}/heartbeat`
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<HeartbeatBody>,
) -> AppResult<Json<Value>> {
    require_hq_mode(&state)?;
    let remote = state.remotes.get(&id)?;
    verify_remote_bearer(&headers, &remote)?;
    let _ = body.session_count;
    state.remotes.heartbeat(&id, body.session_ids)?;
    Ok(Json(json!({ "success": true })))
}

/// `DELETE /api/remotes/{id}`
pub async fn unregister_remote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_hq_mode(&state)?;
    let remote = state.remotes.get(&id)?;
    verify_remote_bearer(&headers, &remote)?;
    state.remotes.unregister(&id)?;
    Ok(Json(json!({ "success": true })))
}
