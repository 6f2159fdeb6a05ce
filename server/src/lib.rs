//! vibetunnel HTTP server: the session API, SSE streaming, and HQ federation built on top of
//! `vibetunnel-core`.

pub mod auth_middleware;
pub mod error;
pub mod hq_proxy;
pub mod routes;
pub mod state;
mod web_server;

pub use state::AppState;
pub use web_server::build_router;
