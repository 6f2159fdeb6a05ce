//! Namespaced session ids (`remoteId:sessionId`) never reach the local session handlers: this
//! middleware recognizes the `/api/sessions/{id}...` path shape, and when the id segment is
//! namespaced, forwards the whole request to the owning remote (with the id rewritten back to its
//! unprefixed form) instead of letting routing continue locally.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use vibetunnel_core::error::CoreError;
use vibetunnel_core::hq::registry::RemoteStatus;
use vibetunnel_core::hq::{parse_namespaced, proxy};

use crate::error::AppError;
use crate::state::AppState;

const SESSIONS_PREFIX: &str = "/api/sessions/";

/// Given a request path and query string, decides whether the id segment right after
/// `/api/sessions/` is namespaced (`remoteId:sessionId`) and, if so, returns the remote id to
/// forward to plus the path rewritten back to the remote's own unprefixed session id.
fn route_target(path: &str, query: Option<&str>) -> Option<(&str, String)> {
    let rest = path.strip_prefix(SESSIONS_PREFIX)?;
    let id_segment = rest.split('/').next().unwrap_or(rest);
    let (remote_id, local_id) = parse_namespaced(id_segment)?;
    let query = query.map(|q| format!("?{q}")).unwrap_or_default();
    Some((remote_id, format!("{}{}", path.replacen(id_segment, local_id, 1), query)))
}

pub async fn proxy_namespaced_sessions(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let Some((remote_id, local_path)) = route_target(&path, request.uri().query()) else {
        return next.run(request).await;
    };

    let remote = match state.remotes.get(remote_id) {
        Ok(r) => r,
        Err(e) => return AppError::from(e).into_response(),
    };
    if remote.status == RemoteStatus::Offline {
        return AppError::from(CoreError::RemoteOffline(remote_id.to_string())).into_response();
    }

    let method = request.method().clone();

    let body_bytes = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(b) => b.to_vec(),
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let body = if body_bytes.is_empty() { None } else { Some(body_bytes) };

    match proxy::forward(&state.http_client, &remote, method, &local_path, body).await {
        Ok(resp) => {
            let mut builder = Response::builder().status(resp.status);
            if let Some(ct) = resp.content_type {
                builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
            }
            builder
                .body(Body::from(resp.body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => AppError::from(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_a_namespaced_id_back_to_the_remotes_own_id() {
        let (remote, path) = route_target("/api/sessions/laptop:abcd-1234", None).unwrap();
        assert_eq!(remote, "laptop");
        assert_eq!(path, "/api/sessions/abcd-1234");
    }

    #[test]
    fn preserves_a_trailing_subpath_and_query_string() {
        let (remote, path) =
            route_target("/api/sessions/laptop:abcd-1234/snapshot", Some("format=text")).unwrap();
        assert_eq!(remote, "laptop");
        assert_eq!(path, "/api/sessions/abcd-1234/snapshot?format=text");
    }

    #[test]
    fn leaves_an_unnamespaced_id_alone() {
        assert!(route_target("/api/sessions/abcd-1234", None).is_none());
    }

    #[test]
    fn ignores_paths_outside_the_sessions_prefix() {
        assert!(route_target("/api/health", None).is_none());
        assert!(route_target("/api/remotes/laptop:abcd", None).is_none());
    }
}
