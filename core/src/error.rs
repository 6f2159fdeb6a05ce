//! Error taxonomy shared by the session core and the HTTP layer.
//!
//! Every fallible operation in the core returns `Result<T, CoreError>`. The server crate wraps
//! this in its own `AppError` (which also knows how to turn a variant into an axum response);
//! keeping the taxonomy itself in core means CLI-only code paths get the same error kinds.

use std::fmt;

/// Stable, machine-readable error kind. Serialized as the `code` field of API error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidRequest,
    Unauthorized,
    Conflict,
    SessionGone,
    RemoteOffline,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::InvalidRequest => "invalid-request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Conflict => "conflict",
            ErrorKind::SessionGone => "session-gone",
            ErrorKind::RemoteOffline => "remote-offline",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("remote not found: {0}")]
    RemoteNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("session has already exited")]
    SessionGone,

    #[error("remote {0} is offline")]
    RemoteOffline(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::SessionNotFound(_) | CoreError::RemoteNotFound(_) => ErrorKind::NotFound,
            CoreError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            CoreError::Unauthorized => ErrorKind::Unauthorized,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::SessionGone => ErrorKind::SessionGone,
            CoreError::RemoteOffline(_) => ErrorKind::RemoteOffline,
            CoreError::Timeout(_) => ErrorKind::Timeout,
            CoreError::Io(_) | CoreError::Json(_) | CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn internal(msg: impl fmt::Display) -> Self {
        CoreError::Internal(msg.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
