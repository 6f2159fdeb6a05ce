//! vibetunnel-server binary: parses CLI flags, resolves configuration, and runs the HTTP server.

mod hq_lifecycle;

use std::net::SocketAddr;

use clap::Parser;

use vibetunnel_core::config::{self, ConfigOverrides};
use vibetunnel_core::port;
use vibetunnel_core::session::SessionManager;

use vibetunnel_server::{build_router, AppState};

#[derive(Debug, Parser)]
#[command(name = "vibetunnel-server", about = "vibetunnel session server")]
struct Cli {
    /// HTTP listener port (defaults to $PORT, then 4020).
    #[arg(long)]
    port: Option<u16>,

    /// Root directory for session directories (defaults to $VIBETUNNEL_CONTROL_PATH, then
    /// ~/.vibetunnel/control).
    #[arg(long)]
    control_path: Option<std::path::PathBuf>,

    /// Run as an HQ, aggregating sessions from remotes that register with it.
    #[arg(long)]
    hq: bool,

    /// URL of an upstream HQ to register this instance with at startup.
    #[arg(long)]
    hq_url: Option<String>,

    /// Bearer token this instance registers with its upstream HQ, and that the HQ must present
    /// back when proxying requests here.
    #[arg(long)]
    remote_token: Option<String>,

    /// Name this instance registers under with its upstream HQ. Defaults to the configured host.
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("vibetunnel=info".parse()?))
        .init();

    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        port: cli.port,
        control_path: cli.control_path.clone(),
        hq_mode: cli.hq,
        hq_url: cli.hq_url.clone(),
        hq_token: cli.remote_token.clone(),
    };
    let cfg = config::resolve(overrides);

    let port = resolve_port(cfg.port).await;

    let sessions = SessionManager::new(cfg.control_path.clone())?;
    let state = AppState::new(&cfg, sessions);

    if let (Some(hq_url), Some(hq_token)) = (cfg.hq_url.clone(), cfg.hq_token.clone()) {
        let client = state.http_client.clone();
        let host = std::env::var("VIBETUNNEL_PUBLIC_HOST").unwrap_or_else(|_| "localhost".to_string());
        let self_id = uuid::Uuid::new_v4().to_string();
        let self_name = cli.name.clone().unwrap_or_else(|| host.clone());
        let self_url = format!("http://{host}:{port}");
        tokio::spawn(async move {
            hq_lifecycle::register_with_hq(&client, &hq_url, &hq_token, &self_id, &self_name, &self_url).await;
        });
    }

    if cfg.hq_mode {
        tokio::spawn(hq_lifecycle::run_health_check_loop(state.http_client.clone(), state.remotes.clone()));
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, control_path = %cfg.control_path.display(), hq_mode = cfg.hq_mode, "starting vibetunnel-server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let router = build_router(state);
    axum::serve(listener, router).await?;

    Ok(())
}

/// Resolves the port to actually bind: if the requested one is held by a stale process of our own,
/// reap it and reuse it; if it's held by something else, fall back to the first suggested
/// alternative rather than failing outright.
async fn resolve_port(requested: u16) -> u16 {
    match port::check_port(requested) {
        Some(conflict) if conflict.self_managed => {
            tracing::warn!(pid = conflict.pid, "terminating our own stale process bound to this port");
            let _ = port::terminate_owner(&conflict);
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            requested
        }
        Some(conflict) => {
            let alternative = conflict.alternative_ports.first().copied().unwrap_or(requested);
            tracing::warn!(
                port = requested,
                process = %conflict.process_name,
                pid = conflict.pid,
                alternative,
                "requested port is in use by another process; falling back to an alternative port"
            );
            alternative
        }
        None => requested,
    }
}
