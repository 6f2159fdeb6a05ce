//! Forwards a session-scoped request to the remote that owns it, using the bearer token it
//! registered with.

use std::time::Duration;

use crate::error::{CoreError, CoreResult};
use crate::hq::registry::{Remote, RemoteRegistry};

pub const PROXY_TIMEOUT: Duration = Duration::from_secs(30);

/// A proxied response: status code plus body bytes, forwarded verbatim to the original caller.
pub struct ProxiedResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

/// Proxies `method local_path` (e.g. `GET /api/sessions/{id}/snapshot`, already stripped of the
/// `remoteId:` prefix) to the given remote. Returns `remote-offline`/`timeout` per §7 on failure.
pub async fn forward(
    client: &reqwest::Client,
    remote: &Remote,
    method: reqwest::Method,
    local_path: &str,
    body: Option<Vec<u8>>,
) -> CoreResult<ProxiedResponse> {
    let url = format!("{}{}", remote.url.trim_end_matches('/'), local_path);

    let mut req = client
        .request(method, &url)
        .bearer_auth(&remote.token)
        .timeout(PROXY_TIMEOUT);
    if let Some(b) = body {
        req = req.body(b);
    }

    let resp = req.send().await.map_err(|e| {
        if e.is_timeout() {
            CoreError::Timeout(format!("proxy request to remote {} timed out", remote.id))
        } else {
            CoreError::RemoteOffline(remote.id.clone())
        }
    })?;

    let status = resp.status().as_u16();
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let body = resp.bytes().await.map_err(|e| CoreError::internal(e.to_string()))?.to_vec();

    Ok(ProxiedResponse { status, body, content_type })
}

/// Probes a remote's health endpoint; used by the periodic offline-detection loop.
pub async fn probe_health(client: &reqwest::Client, remote: &Remote) -> bool {
    let url = format!("{}/api/health", remote.url.trim_end_matches('/'));
    match client.get(&url).timeout(Duration::from_secs(5)).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

/// Resolves a (possibly namespaced) session id against the registry. Returns `None` if the id is
/// unprefixed (handled locally) or `Some((remote, local_session_id))` otherwise.
pub fn resolve_remote<'a>(registry: &RemoteRegistry, id: &'a str) -> CoreResult<Option<(Remote, &'a str)>> {
    let Some((remote_id, local_id)) = super::registry::parse_namespaced(id) else {
        return Ok(None);
    };
    let remote = registry.get(remote_id)?;
    Ok(Some((remote, local_id)))
}
