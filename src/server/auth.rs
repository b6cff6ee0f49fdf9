//! Shared-token check for protected routes

use super::error::ApiError;
use super::AppState;
use crate::error::CleanerError;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

/// Header carrying the shared secret
pub const TOKEN_HEADER: &str = "x-cleaner-token";

/// Whether `headers` satisfy the configured token
///
/// With no token configured every request passes.
#[must_use]
pub fn token_matches(expected: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    let Some(presented) = headers.get(TOKEN_HEADER) else {
        return false;
    };
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Reject requests without the shared token before the body is read
pub async fn require_token(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if token_matches(state.token.as_deref(), request.headers()) {
        next.run(request).await
    } else {
        ApiError::new(CleanerError::Unauthorized, state.debug).into_response()
    }
}
