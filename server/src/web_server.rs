//! Assembles the Axum [`Router`]: the session/filesystem/remote API, the unauthenticated health
//! endpoints, and the two cross-cutting middlewares (dashboard Basic Auth, HQ namespaced-session
//! proxying) wrapping everything else.

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth_middleware::require_dashboard_auth;
use crate::hq_proxy::proxy_namespaced_sessions;
use crate::routes::{fs, health, remotes, sessions, stream};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let started_at = state.started_at;

    let protected = Router::new()
        .route("/api/sessions", get(sessions::list_sessions).post(sessions::create_session))
        .route("/api/sessions/{id}", delete(sessions::delete_session))
        .route("/api/sessions/{id}/cleanup", delete(sessions::cleanup_session))
        .route("/api/sessions/{id}/input", post(sessions::send_input))
        .route("/api/sessions/{id}/resize", post(sessions::resize_session))
        .route("/api/sessions/{id}/snapshot", get(sessions::get_snapshot))
        .route("/api/sessions/{id}/stream", get(stream::stream_session))
        .route("/api/cleanup-exited", post(sessions::cleanup_exited))
        .route("/api/fs/browse", get(fs::browse))
        .route("/api/mkdir", post(fs::mkdir))
        .route("/api/files/read", post(fs::read_file))
        .route("/api/files/write", post(fs::write_file))
        .route("/api/files/delete", post(fs::delete_file))
        .route("/api/remotes/register", post(remotes::register_remote))
        .route("/api/remotes/{id}/heartbeat", post(remotes::heartbeat))
        .route("/api/remotes/{id}", delete(remotes::unregister_remote))
        .layer(middleware::from_fn_with_state(state.clone(), proxy_namespaced_sessions))
        .layer(middleware::from_fn_with_state(state.clone(), require_dashboard_auth));

    // /api/health and /info bypass dashboard auth entirely: a load balancer or the HQ's own
    // health-check loop must be able to reach them without a password.
    let public = Router::new()
        .route("/api/health", get(health::health))
        .route("/info", get(move || health::info(started_at)));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
