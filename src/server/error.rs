//! Translation of [`CleanerError`] into HTTP responses

use crate::error::{CleanerError, ErrorKind};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

/// HTTP status for an error class
#[must_use]
pub fn status_code(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::InvalidInput | ErrorKind::UpstreamFetchFailure => StatusCode::BAD_REQUEST,
        ErrorKind::ModelFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_type: Option<&'static str>,
}

/// A [`CleanerError`] on its way out of a handler
///
/// `debug` controls whether model failure detail reaches the body.
#[derive(Debug)]
pub struct ApiError {
    pub error: CleanerError,
    pub debug: bool,
}

impl ApiError {
    #[must_use]
    pub fn new(error: CleanerError, debug: bool) -> Self {
        Self { error, debug }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.error.kind();
        let status = status_code(kind);

        if status.is_server_error() {
            tracing::error!(
                status = status.as_u16(),
                error_type = self.error.type_name(),
                error = %self.error,
                "Request failed"
            );
        } else {
            tracing::warn!(
                status = status.as_u16(),
                error_type = self.error.type_name(),
                error = %self.error,
                "Request rejected"
            );
        }

        let (detail, error_type) = match &self.error {
            CleanerError::ModelFailure { detail, error_type } if self.debug => {
                (Some(detail.clone()), Some(*error_type))
            },
            _ => (None, None),
        };

        let body = ErrorBody {
            ok: false,
            error: self.error.reason(),
            upstream_status: self.error.upstream_status(),
            detail,
            error_type,
        };

        (status, Json(body)).into_response()
    }
}
