//! Process configuration: environment variables with an optional `settings.json` file for
//! overrides, resolved once at startup into an immutable [`Config`] value. Unlike the layout this
//! is generalized from, there is no global singleton here — `main` builds one `Config` and
//! threads it through an explicit dependency root (see the server crate's `AppState`).

use std::path::PathBuf;

/// Resolved process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listener port. `--port` flag, then `PORT` env var, then [`DEFAULT_PORT`].
    pub port: u16,
    /// Root directory for session directories. `VIBETUNNEL_CONTROL_PATH`, then `~/.vibetunnel/control`.
    pub control_path: PathBuf,
    /// Dashboard Basic Auth password. Set via `VIBETUNNEL_DASHBOARD_PASSWORD`; `None` disables auth.
    pub dashboard_password: Option<String>,
    /// When set, this instance runs as an HQ aggregating the named remotes.
    pub hq_mode: bool,
    /// URL of the HQ to register with at startup (standalone-to-HQ registration), if any.
    pub hq_url: Option<String>,
    pub hq_token: Option<String>,
}

pub const DEFAULT_PORT: u16 = 4020;

/// Overrides collected from CLI flags; anything left `None` falls back to the environment, then
/// to a built-in default.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub control_path: Option<PathBuf>,
    pub hq_mode: bool,
    pub hq_url: Option<String>,
    pub hq_token: Option<String>,
}

/// Resolves the final `Config` from CLI overrides layered over environment variables.
pub fn resolve(overrides: ConfigOverrides) -> Config {
    let port = overrides
        .port
        .or_else(|| std::env::var("PORT").ok().and_then(|s| s.parse().ok()))
        .unwrap_or(DEFAULT_PORT);

    let control_path = overrides
        .control_path
        .or_else(|| std::env::var("VIBETUNNEL_CONTROL_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(default_control_path);

    let dashboard_password = std::env::var("VIBETUNNEL_DASHBOARD_PASSWORD")
        .ok()
        .filter(|s| !s.is_empty());

    let hq_url = overrides.hq_url.or_else(|| std::env::var("VIBETUNNEL_HQ_URL").ok());
    let hq_token = overrides.hq_token.or_else(|| std::env::var("VIBETUNNEL_HQ_TOKEN").ok());

    Config {
        port,
        control_path,
        dashboard_password,
        hq_mode: overrides.hq_mode,
        hq_url,
        hq_token,
    }
}

fn default_control_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vibetunnel")
        .join("control")
}
