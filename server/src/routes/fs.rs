//! Filesystem browse/read/write/delete/mkdir, scoped to paths the caller can already reach from
//! the shell the sessions run in. `~` expands to the home directory; any `..` segment is rejected
//! outright rather than resolved, since resolving it would require deciding which root it's
//! relative to.

use std::path::{Path, PathBuf};

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use vibetunnel_core::error::CoreError;

use crate::error::AppResult;
use crate::state::AppState;

fn resolve_path(raw: &str) -> AppResult<PathBuf> {
    if raw.split('/').any(|seg| seg == "..") {
        return Err(CoreError::InvalidRequest("path must not contain '..' segments".into()).into());
    }
    let expanded = if let Some(rest) = raw.strip_prefix('~') {
        let home = dirs::home_dir().ok_or_else(|| CoreError::internal("no home directory"))?;
        if let Some(rest) = rest.strip_prefix('/') {
            home.join(rest)
        } else if rest.is_empty() {
            home
        } else {
            return Err(CoreError::InvalidRequest("invalid '~' path".into()).into());
        }
    } else {
        PathBuf::from(raw)
    };
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_any_dotdot_segment_anywhere_in_the_path() {
        assert!(resolve_path("/home/user/../etc/passwd").is_err());
        assert!(resolve_path("a/b/../c").is_err());
        assert!(resolve_path("..").is_err());
    }

    #[test]
    fn expands_bare_tilde_to_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(resolve_path("~").unwrap(), home);
    }

    #[test]
    fn expands_tilde_slash_prefix_relative_to_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(resolve_path("~/projects/crate").unwrap(), home.join("projects/crate"));
    }

    #[test]
    fn rejects_tilde_followed_by_non_slash() {
        assert!(resolve_path("~someuser/foo").is_err());
    }

    #[test]
    fn leaves_absolute_paths_without_tilde_untouched() {
        assert_eq!(resolve_path("/var/log/app.log").unwrap(), PathBuf::from("/var/log/app.log"));
    }
}

#[derive(Debug, Deserialize)]
pub struct BrowseQuery {
    #[serde(default = "default_browse_path")]
    pub path: String,
}

fn default_browse_path() -> String {
    "~".to_string()
}

#[derive(Debug, Serialize)]
pub struct BrowseEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
}

/// `GET /api/fs/browse?path=...`
pub async fn browse(
    State(_state): State<AppState>,
    Query(query): Query<BrowseQuery>,
) -> AppResult<Json<Vec<BrowseEntry>>> {
    let dir = resolve_path(&query.path)?;
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(&dir).await.map_err(CoreError::from)?;
    while let Some(entry) = read_dir.next_entry().await.map_err(CoreError::from)? {
        let metadata = entry.metadata().await.map_err(CoreError::from)?;
        entries.push(BrowseEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path().to_string_lossy().into_owned(),
            is_dir: metadata.is_dir(),
        });
    }
    entries.sort_by(|a, b| (!a.is_dir, &a.name).cmp(&(!b.is_dir, &b.name)));
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct PathBody {
    pub path: String,
}

/// `POST /api/mkdir`
pub async fn mkdir(State(_state): State<AppState>, Json(body): Json<PathBody>) -> AppResult<Json<serde_json::Value>> {
    let dir = resolve_path(&body.path)?;
    tokio::fs::create_dir_all(&dir).await.map_err(CoreError::from)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Serialize)]
pub struct ReadFileResponse {
    pub content: String,
}

/// `POST /api/files/read`
pub async fn read_file(
    State(_state): State<AppState>,
    Json(body): Json<PathBody>,
) -> AppResult<Json<ReadFileResponse>> {
    let path = resolve_path(&body.path)?;
    let content = tokio::fs::read_to_string(&path).await.map_err(CoreError::from)?;
    Ok(Json(ReadFileResponse { content }))
}

#[derive(Debug, Deserialize)]
pub struct WriteFileBody {
    pub path: String,
    pub content: String,
}

/// `POST /api/files/write`
pub async fn write_file(
    State(_state): State<AppState>,
    Json(body): Json<WriteFileBody>,
) -> AppResult<Json<serde_json::Value>> {
    let path = resolve_path(&body.path)?;
    if let Some(parent) = Path::new(&path).parent() {
        tokio::fs::create_dir_all(parent).await.map_err(CoreError::from)?;
    }
    tokio::fs::write(&path, body.content).await.map_err(CoreError::from)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// `POST /api/files/delete`
pub async fn delete_file(
    State(_state): State<AppState>,
    Json(body): Json<PathBody>,
) -> AppResult<Json<serde_json::Value>> {
    let path = resolve_path(&body.path)?;
    let metadata = tokio::fs::metadata(&path).await.map_err(CoreError::from)?;
    if metadata.is_dir() {
        tokio::fs::remove_dir_all(&path).await.map_err(CoreError::from)?;
    } else {
        tokio::fs::remove_file(&path).await.map_err(CoreError::from)?;
    }
    Ok(Json(serde_json::json!({ "success": true })))
}
