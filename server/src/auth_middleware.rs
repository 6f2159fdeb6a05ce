//! Dashboard Basic Auth middleware. `/api/health` and `/info` bypass this entirely (see router
//! wiring in [`crate::web_server`], which mounts them outside the authenticated router).

use axum::extract::State;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

pub async fn require_dashboard_auth(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(auth) = &state.dashboard_auth else {
        return next.run(request).await;
    };

    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match header.and_then(|h| auth.verify_basic(h).ok()) {
        Some(()) => next.run(request).await,
        None => {
            let mut response = StatusCode::UNAUTHORIZED.into_response();
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"vibetunnel Dashboard\""),
            );
            response
        }
    }
}
