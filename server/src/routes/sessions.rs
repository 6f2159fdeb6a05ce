//! Session CRUD, IO, and snapshot endpoints. Namespaced (`remoteId:sessionId`) ids never reach
//! these handlers: the HQ proxy middleware (see [`crate::hq_proxy`]) intercepts and forwards them
//! before routing gets here.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use vibetunnel_core::cast;
use vibetunnel_core::pty;
use vibetunnel_core::session::{CreateSessionParams, SessionRecord, SessionStatus};
use vibetunnel_core::vt::{Parser, Screen};

use crate::error::AppResult;
use crate::state::AppState;

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionListItem {
    id: String,
    command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    started_at: String,
    last_modified: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<u32>,
    width: u16,
    height: u16,
}

impl From<SessionRecord> for SessionListItem {
    fn from(r: SessionRecord) -> Self {
        Self {
            id: r.id.to_string(),
            command: r.command,
            working_dir: r.working_dir.map(|p| p.to_string_lossy().into_owned()),
            name: r.name,
            status: r.status,
            exit_code: r.exit_code,
            started_at: r.started_at,
            last_modified: r.last_modified,
            pid: r.pid,
            width: r.cols,
            height: r.rows,
        }
    }
}

/// `GET /api/sessions`. In HQ mode, merges in each online remote's own session list under
/// namespaced ids; a remote that fails to answer is logged and skipped, never fails the request.
pub async fn list_sessions(State(state): State<AppState>) -> AppResult<Json<Vec<Value>>> {
    let mut items: Vec<Value> = state
        .sessions
        .list()?
        .into_iter()
        .map(|r| serde_json::to_value(SessionListItem::from(r)).unwrap_or(Value::Null))
        .collect();

    if state.hq_mode {
        for remote in state.remotes.list() {
            if remote.status != vibetunnel_core::hq::RemoteStatus::Online {
                continue;
            }
            let url = format!("{}/api/sessions", remote.url.trim_end_matches('/'));
            let resp = state
                .http_client
                .get(&url)
                .bearer_auth(&remote.token)
                .timeout(Duration::from_secs(5))
                .send()
                .await;
            match resp {
                Ok(r) if r.status().is_success() => match r.json::<Vec<Value>>().await {
                    Ok(remote_sessions) => {
                        for mut session in remote_sessions {
                            if let Some(id) = session.get("id").and_then(|v| v.as_str()).map(str::to_string) {
                                session["id"] = Value::String(vibetunnel_core::hq::format_namespaced(&remote.id, &id));
                            }
                            items.push(session);
                        }
                    }
                    Err(e) => tracing::warn!(remote = %remote.id, error = %e, "failed to parse remote session list"),
                },
                Ok(r) => tracing::warn!(remote = %remote.id, status = %r.status(), "remote session list request failed"),
                Err(e) => tracing::warn!(remote = %remote.id, error = %e, "remote session list request failed"),
            }
        }
    }

    items.sort_by(|a, b| {
        let la = a.get("lastModified").and_then(|v| v.as_str()).unwrap_or_default();
        let lb = b.get("lastModified").and_then(|v| v.as_str()).unwrap_or_default();
        lb.cmp(la)
    });

    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    pub command: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Accepted for API compatibility; spawning a visible terminal window is a UI concern outside
    /// this core.
    #[serde(default)]
    #[allow(dead_code)]
    pub spawn_terminal: Option<bool>,
    #[serde(default)]
    pub cols: Option<u16>,
    #[serde(default)]
    pub rows: Option<u16>,
}

/// `POST /api/sessions`.
pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> AppResult<Response> {
    let params = CreateSessionParams {
        command: body.command,
        working_dir: body.working_dir.map(std::path::PathBuf::from),
        name: body.name,
        cols: body.cols.unwrap_or(DEFAULT_COLS).max(1),
        rows: body.rows.unwrap_or(DEFAULT_ROWS).max(1),
    };
    let record = state.sessions.create(params).await?;
    Ok((StatusCode::CREATED, Json(json!({ "sessionId": record.id.to_string() }))).into_response())
}

/// How long to wait for a killed process to be reaped (by the exit-watcher task) before giving up
/// on removing its directory. The PTY bridge's own graceful-kill deadline has already elapsed by
/// the time this polls, so this only covers the exit-watcher's polling granularity.
const POST_KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// `DELETE /api/sessions/{id}`: graceful kill, then remove the session directory once the
/// exit-watcher has observed the child's exit. A subsequent `GET /api/sessions` never lists it.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let sid = state.sessions.resolve_id(&id)?;
    state.sessions.kill(sid).await?;

    let deadline = tokio::time::Instant::now() + POST_KILL_REAP_TIMEOUT;
    loop {
        match state.sessions.get(sid) {
            Ok(record) if record.status == SessionStatus::Exited => break,
            Ok(_) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            _ => break,
        }
    }
    let _ = state.sessions.remove(sid).await;

    Ok(Json(json!({ "success": true, "message": "session killed" })))
}

/// `DELETE /api/sessions/{id}/cleanup`: removes the directory without killing anything first;
/// fails with `conflict` if the session is still running.
pub async fn cleanup_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let sid = state.sessions.resolve_id(&id)?;
    state.sessions.remove(sid).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct InputBody {
    pub text: String,
}

/// `POST /api/sessions/{id}/input`. `text` is checked against the fixed symbolic-key set first;
/// only a non-matching value is sent as literal bytes (per §9's resolution of the `/input`
/// overload: the symbolic-key interpretation always wins on a collision).
pub async fn send_input(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<InputBody>,
) -> AppResult<Json<Value>> {
    let sid = state.sessions.resolve_id(&id)?;
    let bytes = match pty::symbolic_key_bytes(&body.text) {
        Some(seq) => seq.to_vec(),
        None => body.text.into_bytes(),
    };
    state.sessions.send_input(sid, &bytes).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct ResizeBody {
    pub cols: u16,
    pub rows: u16,
}

/// `POST /api/sessions/{id}/resize`.
pub async fn resize_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResizeBody>,
) -> AppResult<Json<Value>> {
    let sid = state.sessions.resolve_id(&id)?;
    if body.cols == 0 || body.rows == 0 {
        return Err(vibetunnel_core::error::CoreError::InvalidRequest("cols and rows must be at least 1".into()).into());
    }
    state.sessions.resize(sid, body.cols, body.rows).await?;
    Ok(Json(json!({ "success": true })))
}

/// Replays a cast file's events through the VT parser to reconstruct the screen as of the last
/// recorded event, for the binary snapshot response. Text-cast snapshots don't need this: they
/// just zero the recorded events' own timestamps (see [`cast::render_zeroed`]).
fn replay_screen(header: &cast::CastHeader, events: &[cast::CastEvent]) -> Screen {
    let mut screen = Screen::new(header.width as usize, header.height as usize);
    let mut parser = Parser::new();
    for event in events {
        match event.kind {
            cast::EventKind::Output => parser.feed(&mut screen, event.data.as_bytes()),
            cast::EventKind::Resize => {
                if let Some((cols, rows)) = event.data.split_once('x') {
                    if let (Ok(cols), Ok(rows)) = (cols.parse(), rows.parse()) {
                        screen.resize(cols, rows);
                    }
                }
            }
            cast::EventKind::Input | cast::EventKind::Marker => {}
        }
    }
    screen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(time: f64, kind: cast::EventKind, data: &str) -> cast::CastEvent {
        cast::CastEvent { time, kind, data: data.to_string() }
    }

    #[test]
    fn replay_screen_applies_output_events_in_order() {
        let header = cast::CastHeader { version: 2, width: 10, height: 2, timestamp: 0, env: None };
        let events = vec![event(0.0, cast::EventKind::Output, "hi")];
        let screen = replay_screen(&header, &events);
        let snapshot = screen.snapshot();
        let text: String = snapshot.cells[0].iter().map(|c| c.ch).collect();
        assert!(text.starts_with("hi"));
    }

    #[test]
    fn replay_screen_honors_an_inline_resize_event() {
        let header = cast::CastHeader { version: 2, width: 10, height: 2, timestamp: 0, env: None };
        let events = vec![event(0.0, cast::EventKind::Resize, "40x12")];
        let screen = replay_screen(&header, &events);
        assert_eq!(screen.cols(), 40);
        assert_eq!(screen.rows(), 12);
    }

    #[test]
    fn replay_screen_ignores_input_and_marker_events() {
        let header = cast::CastHeader { version: 2, width: 10, height: 2, timestamp: 0, env: None };
        let events = vec![
            event(0.0, cast::EventKind::Input, "q"),
            event(0.1, cast::EventKind::Marker, "section"),
        ];
        let screen = replay_screen(&header, &events);
        assert_eq!(screen.cols(), 10);
        assert_eq!(screen.rows(), 2);
        let snapshot = screen.snapshot();
        assert!(snapshot.cells.iter().all(|row| row.iter().all(|c| c.is_blank())));
    }
}

/// `GET /api/sessions/{id}/snapshot`: the text cast by default, or the binary frame of §4.5 when
/// the caller sends `Accept: application/octet-stream`.
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let sid = state.sessions.resolve_id(&id)?;
    state.sessions.get(sid)?;
    let stream_path = state.sessions.stream_path(sid);
    let (header, events) = cast::read_cast_file(&stream_path)?;

    let wants_binary = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/octet-stream"))
        .unwrap_or(false);

    if wants_binary {
        let screen = replay_screen(&header, &events);
        let bytes = vibetunnel_core::snapshot::encode(&screen.snapshot());
        Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
    } else {
        let text = cast::render_zeroed(&header, &events);
        Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response())
    }
}

/// `POST /api/cleanup-exited`: the destructive catalog-wide sweep (as opposed to
/// `SessionManager::cleanup_exited`, which only refreshes status and is used internally by
/// `list`).
pub async fn cleanup_exited(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let removed = state.sessions.remove_exited().await?;
    Ok(Json(json!({
        "cleanedSessions": removed.into_iter().map(|id| id.to_string()).collect::<Vec<_>>(),
    })))
}
