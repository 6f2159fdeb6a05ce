//! Maps [`vibetunnel_core::error::CoreError`] onto HTTP responses per the error taxonomy: every
//! handler returns `Result<T, AppError>` instead of ad hoc `(StatusCode, String)` tuples.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use vibetunnel_core::error::{CoreError, ErrorKind};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct AppError(#[from] CoreError);

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::SessionGone => StatusCode::GONE,
            ErrorKind::RemoteOffline => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Internal => {
                tracing::error!(error = %self.0, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let code = self.0.kind().as_code();
        let body = ErrorBody { error: self.0.to_string(), code };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
