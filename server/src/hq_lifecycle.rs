//! Startup HQ registration (this instance announcing itself to an upstream HQ) and the periodic
//! health-check loop an HQ instance runs over its own registered remotes.

use std::time::Duration;

use vibetunnel_core::hq::{proxy, RemoteRegistry};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Registers this instance with an upstream HQ at startup. Failure is logged and otherwise
/// ignored: an instance that can't reach its HQ still serves its own local sessions fine.
pub async fn register_with_hq(
    client: &reqwest::Client,
    hq_url: &str,
    hq_token: &str,
    self_id: &str,
    self_name: &str,
    self_url: &str,
) {
    let url = format!("{}/api/remotes/register", hq_url.trim_end_matches('/'));
    let body = serde_json::json!({
        "id": self_id,
        "name": self_name,
        "url": self_url,
        "token": hq_token,
    });
    match client.post(&url).json(&body).send().await {
        Ok(resp) if resp.status().is_success() => {
            tracing::info!(hq_url, self_name, "registered with HQ");
        }
        Ok(resp) => tracing::warn!(status = %resp.status(), "HQ registration rejected"),
        Err(e) => tracing::warn!(error = %e, "failed to reach HQ for registration"),
    }
}

/// Runs forever: probes every registered remote's health endpoint on a fixed cadence, recording
/// misses and flipping a remote offline after two in a row via
/// [`RemoteRegistry::record_missed_probe`].
pub async fn run_health_check_loop(client: reqwest::Client, remotes: RemoteRegistry) {
    let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        for remote in remotes.list() {
            if proxy::probe_health(&client, &remote).await {
                remotes.record_successful_probe(&remote.id);
            } else if remotes.record_missed_probe(&remote.id) {
                tracing::warn!(remote = %remote.id, "remote marked offline after missed health checks");
            }
        }
    }
}
