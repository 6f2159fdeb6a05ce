//! HQ-mode remote registry: tracks other vibetunnel instances ("remotes") that have registered
//! with this one, and the sessions each claims to own.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remote {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub registered_at: String,
    pub last_heartbeat: String,
    pub session_ids: Vec<String>,
    pub status: RemoteStatus,
    /// Consecutive missed heartbeats/health probes; two in a row moves the remote offline.
    #[serde(skip)]
    pub missed_heartbeats: u32,
}

/// Registration request from a remote.
#[derive(Debug, Clone)]
pub struct RegisterRemote {
    pub id: String,
    pub name: String,
    pub url: String,
    pub token: String,
}

/// Two consecutive missed heartbeats moves a remote offline.
pub const MISSED_HEARTBEATS_OFFLINE_THRESHOLD: u32 = 2;

#[derive(Clone, Default)]
pub struct RemoteRegistry {
    remotes: Arc<DashMap<String, Remote>>,
}

impl RemoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new remote. Fails with `conflict` if the name is already taken by a different id.
    pub fn register(&self, req: RegisterRemote) -> CoreResult<Remote> {
        if let Some(existing) = self.remotes.iter().find(|r| r.name == req.name && r.id != req.id) {
            return Err(CoreError::Conflict(format!("remote name '{}' already registered", existing.name)));
        }
        let now = chrono::Utc::now().to_rfc3339();
        let remote = Remote {
            id: req.id.clone(),
            name: req.name,
            url: req.url,
            token: req.token,
            registered_at: now.clone(),
            last_heartbeat: now,
            session_ids: Vec::new(),
            status: RemoteStatus::Online,
            missed_heartbeats: 0,
        };
        self.remotes.insert(req.id, remote.clone());
        Ok(remote)
    }

    pub fn heartbeat(&self, id: &str, session_ids: Vec<String>) -> CoreResult<()> {
        let mut remote = self.remotes.get_mut(id).ok_or_else(|| CoreError::RemoteNotFound(id.to_string()))?;
        remote.last_heartbeat = chrono::Utc::now().to_rfc3339();
        remote.session_ids = session_ids;
        remote.status = RemoteStatus::Online;
        remote.missed_heartbeats = 0;
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> CoreResult<()> {
        self.remotes.remove(id).ok_or_else(|| CoreError::RemoteNotFound(id.to_string()))?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> CoreResult<Remote> {
        self.remotes.get(id).map(|r| r.clone()).ok_or_else(|| CoreError::RemoteNotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<Remote> {
        self.remotes.iter().map(|r| r.clone()).collect()
    }

    /// Called by the periodic health-check loop: records a missed probe and flips the remote
    /// offline once the threshold is reached. Returns the ids that just transitioned.
    pub fn record_missed_probe(&self, id: &str) -> bool {
        if let Some(mut remote) = self.remotes.get_mut(id) {
            remote.missed_heartbeats += 1;
            if remote.missed_heartbeats >= MISSED_HEARTBEATS_OFFLINE_THRESHOLD {
                remote.status = RemoteStatus::Offline;
                return true;
            }
        }
        false
    }

    pub fn record_successful_probe(&self, id: &str) {
        if let Some(mut remote) = self.remotes.get_mut(id) {
            remote.missed_heartbeats = 0;
            remote.status = RemoteStatus::Online;
        }
    }
}

/// Namespaced session id: `remoteId:sessionId`. `local` is never a valid remote id prefix since
/// unprefixed ids are handled locally by definition.
pub fn parse_namespaced(id: &str) -> Option<(&str, &str)> {
    let (remote, session) = id.split_once(':')?;
    if remote.is_empty() || session.is_empty() {
        return None;
    }
    Some((remote, session))
}

pub fn format_namespaced(remote_id: &str, session_id: &str) -> String {
    format!("{remote_id}:{session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_id_round_trips() {
        let formatted = format_namespaced("r1", "abcd-1234");
        assert_eq!(parse_namespaced(&formatted), Some(("r1", "abcd-1234")));
    }

    #[test]
    fn plain_uuid_is_not_namespaced() {
        assert_eq!(parse_namespaced("abcd-1234"), None);
    }

    #[test]
    fn duplicate_name_is_conflict() {
        let registry = RemoteRegistry::new();
        registry
            .register(RegisterRemote { id: "a".into(), name: "home".into(), url: "http://x".into(), token: "t".into() })
            .unwrap();
        let err = registry
            .register(RegisterRemote { id: "b".into(), name: "home".into(), url: "http://y".into(), token: "t".into() })
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    }
}
