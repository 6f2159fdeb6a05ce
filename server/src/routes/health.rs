//! Unauthenticated status endpoints.

use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthBody {
    status: &'static str,
}

pub async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

#[derive(Serialize)]
pub struct InfoBody {
    name: &'static str,
    version: &'static str,
    uptime_secs: u64,
}

pub async fn info(started_at: std::time::Instant) -> Json<InfoBody> {
    Json(InfoBody {
        name: "vibetunnel",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: started_at.elapsed().as_secs(),
    })
}
