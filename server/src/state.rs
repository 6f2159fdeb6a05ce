//! Explicit dependency root threaded through every handler as axum `State`. No global singleton:
//! `main` builds exactly one of these and clones it into the router.

use std::sync::Arc;

use vibetunnel_core::auth::DashboardAuth;
use vibetunnel_core::config::Config;
use vibetunnel_core::hq::RemoteRegistry;
use vibetunnel_core::session::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub remotes: RemoteRegistry,
    pub http_client: reqwest::Client,
    pub dashboard_auth: Option<Arc<DashboardAuth>>,
    pub hq_mode: bool,
    pub started_at: std::time::Instant,
}

impl AppState {
    pub fn new(config: &Config, sessions: SessionManager) -> Self {
        Self {
            sessions,
            remotes: RemoteRegistry::new(),
            http_client: reqwest::Client::new(),
            dashboard_auth: config.dashboard_password.clone().map(|p| Arc::new(DashboardAuth::new(p))),
            hq_mode: config.hq_mode,
            started_at: std::time::Instant::now(),
        }
    }
}
