//! Binding of `/clean` requests to an [`ImageSource`] and [`OutputMode`]
//!
//! Accepted shapes:
//! - `GET` with query parameters
//! - `POST` urlencoded form (query parameters fill in missing fields)
//! - `POST` JSON object
//! - `POST` multipart with a `file` part and/or `image_url`/`return` parts

use super::error::ApiError;
use super::AppState;
use crate::error::{CleanerError, Result};
use crate::response::OutputMode;
use crate::source::{check_declared_content_type, ImageSource, UploadedFile};
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{FromRequest, Multipart, Query, Request};
use axum::http::{header, Method, StatusCode};
use axum::{Form, Json};
use serde::Deserialize;

/// Text parameters of a clean request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CleanParams {
    pub image_url: Option<String>,
    #[serde(rename = "return")]
    pub return_mode: Option<String>,
}

impl CleanParams {
    /// Fill fields missing (or empty) here from `fallback`
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        fn non_empty(value: Option<String>) -> Option<String> {
            value.filter(|v| !v.trim().is_empty())
        }
        Self {
            image_url: non_empty(self.image_url).or_else(|| non_empty(fallback.image_url)),
            return_mode: non_empty(self.return_mode).or_else(|| non_empty(fallback.return_mode)),
        }
    }
}

/// A bound `/clean` request
#[derive(Debug)]
pub struct CleanRequest {
    pub source: ImageSource,
    pub mode: OutputMode,
}

impl FromRequest<AppState> for CleanRequest {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> std::result::Result<Self, ApiError> {
        bind(req, state)
            .await
            .map_err(|error| ApiError::new(error, state.debug))
    }
}

async fn bind(req: Request, state: &AppState) -> Result<CleanRequest> {
    let limit = state.pipeline.fetcher().max_bytes();
    let query = Query::<CleanParams>::try_from_uri(req.uri())
        .map(|Query(params)| params)
        .map_err(|e| CleanerError::InvalidRequest(e.body_text()))?;

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .unwrap_or_default();

    if req.method() == Method::GET || content_type.is_empty() {
        return finish(None, query);
    }

    match content_type.as_str() {
        "multipart/form-data" => {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| rejection(e.status(), e.body_text(), limit))?;
            let (upload, params) = read_multipart(multipart, limit).await?;
            finish(upload, params.or(query))
        },
        "application/x-www-form-urlencoded" => {
            let Form(params) = Form::<CleanParams>::from_request(req, state)
                .await
                .map_err(|e| rejection(e.status(), e.body_text(), limit))?;
            finish(None, params.or(query))
        },
        "application/json" => {
            let Json(params) = Json::<CleanParams>::from_request(req, state)
                .await
                .map_err(|e| rejection(e.status(), e.body_text(), limit))?;
            finish(None, params.or(query))
        },
        _ => finish(None, query),
    }
}

fn finish(upload: Option<UploadedFile>, params: CleanParams) -> Result<CleanRequest> {
    let mode = OutputMode::from_flag(params.return_mode.as_deref());
    let source = ImageSource::from_parts(upload, params.image_url)?;
    Ok(CleanRequest { source, mode })
}

fn rejection(status: StatusCode, text: String, limit: usize) -> CleanerError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        CleanerError::InputTooLarge { limit }
    } else {
        CleanerError::InvalidRequest(text)
    }
}

fn multipart_error(error: &MultipartError, limit: usize) -> CleanerError {
    rejection(error.status(), error.body_text(), limit)
}

async fn read_multipart(
    mut multipart: Multipart,
    limit: usize,
) -> Result<(Option<UploadedFile>, CleanParams)> {
    let mut upload: Option<UploadedFile> = None;
    let mut params = CleanParams::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&e, limit))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                if let Some(file) = read_file_field(field, limit).await? {
                    if upload.is_some() {
                        return Err(CleanerError::ConflictingSources);
                    }
                    upload = Some(file);
                }
            },
            Some("image_url") => {
                params.image_url =
                    Some(field.text().await.map_err(|e| multipart_error(&e, limit))?);
            },
            Some("return") => {
                params.return_mode =
                    Some(field.text().await.map_err(|e| multipart_error(&e, limit))?);
            },
            _ => {},
        }
    }

    Ok((upload, params))
}

/// Read a `file` part, checking its declared type before the body
///
/// Browsers submit a part with an empty filename when no file was chosen;
/// such a part counts as absent.
async fn read_file_field(field: Field<'_>, limit: usize) -> Result<Option<UploadedFile>> {
    let filename = field.file_name().map(str::to_string);
    if filename.as_deref() == Some("") {
        return Ok(None);
    }

    let content_type = field.content_type().map(str::to_string);
    check_declared_content_type(content_type.as_deref())?;

    let bytes = field.bytes().await.map_err(|e| multipart_error(&e, limit))?;
    if bytes.len() > limit {
        return Err(CleanerError::InputTooLarge { limit });
    }

    Ok(Some(UploadedFile {
        bytes: bytes.to_vec(),
        content_type,
        filename,
    }))
}
