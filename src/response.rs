//! Result artifact and its HTTP rendering
//!
//! Every successful clean is returned with a content fingerprint as a strong
//! `ETag` (`"<hex>"`) and a long-lived immutable cache directive. The fingerprint covers the
//! normalized input rather than the model output, so identical inputs share a
//! cache key across model runs.

use crate::source::SourceKind;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Cache directive attached to every successful clean
pub const CACHE_CONTROL_IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// Lowercase hex SHA-256 of `bytes`
#[must_use]
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// How the cut-out is returned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Raw PNG body
    #[default]
    Binary,
    /// JSON envelope with the PNG base64-encoded
    Json,
}

impl OutputMode {
    /// `json` (any case) selects the envelope; anything else is binary
    #[must_use]
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some(value) if value.trim().eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Binary,
        }
    }
}

/// JSON rendering of a successful clean
#[derive(Debug, Serialize)]
pub struct JsonEnvelope<'a> {
    pub ok: bool,
    pub source: SourceKind,
    pub etag: &'a str,
    pub image_base64: String,
}

/// Output of a successful clean
#[derive(Debug, Clone)]
pub struct ResultArtifact {
    /// Cut-out PNG
    pub png: Vec<u8>,
    /// Fingerprint of the normalized input PNG
    pub fingerprint: String,
    pub source: SourceKind,
}

impl ResultArtifact {
    /// Strong entity tag for the `ETag` header: the fingerprint in double quotes
    #[must_use]
    pub fn entity_tag(&self) -> String {
        format!("\"{}\"", self.fingerprint)
    }

    /// Whether an `If-None-Match` header value matches this artifact
    ///
    /// Accepts the bare fingerprint, a quoted or weak (`W/`) tag, comma-separated
    /// lists, and `*`.
    #[must_use]
    pub fn matches(&self, if_none_match: &str) -> bool {
        if_none_match.split(',').any(|candidate| {
            let candidate = candidate.trim();
            if candidate == "*" {
                return true;
            }
            let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
            candidate.trim_matches('"') == self.fingerprint
        })
    }

    /// Render as an HTTP response
    #[must_use]
    pub fn into_response(self, mode: OutputMode, if_none_match: Option<&str>) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_IMMUTABLE),
        );
        // A quoted hex digest is always a valid header value
        if let Ok(etag) = HeaderValue::from_str(&self.entity_tag()) {
            headers.insert(header::ETAG, etag);
        }

        if if_none_match.is_some_and(|value| self.matches(value)) {
            return (StatusCode::NOT_MODIFIED, headers).into_response();
        }

        match mode {
            OutputMode::Binary => {
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
                (StatusCode::OK, headers, self.png).into_response()
            },
            OutputMode::Json => {
                let envelope = JsonEnvelope {
                    ok: true,
                    source: self.source,
                    etag: &self.fingerprint,
                    image_base64: STANDARD.encode(&self.png),
                };
                (StatusCode::OK, headers, Json(envelope)).into_response()
            },
        }
    }
}
