//! Route handlers

use super::error::ApiError;
use super::extract::CleanRequest;
use super::AppState;
use crate::config::ServerConfig;
use crate::error::CleanerError;
use crate::normalize::encode_png;
use crate::pipeline::CleanPipeline;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Json, Response};
use image::{Rgba, RgbaImage};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::info;

/// Static description of the running service, served by `/info`
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub model: String,
    pub model_source: String,
    pub variant: String,
    pub backend: &'static str,
    pub execution_provider: String,
    pub input_shape: [usize; 4],
    pub max_side: u32,
    pub max_input_bytes: usize,
    pub debug: bool,
    pub auth_enabled: bool,
    pub version: &'static str,
}

impl ServiceInfo {
    #[must_use]
    pub fn new(config: &ServerConfig, pipeline: &CleanPipeline) -> Self {
        let session = pipeline.session();
        let model = session.info();
        let (n, c, h, w) = model.input_shape;
        Self {
            model: model.name.clone(),
            model_source: config.model_spec.source.display_name(),
            variant: model.precision.clone(),
            backend: session.backend_name(),
            execution_provider: session.execution_provider().to_string(),
            input_shape: [n, c, h, w],
            max_side: pipeline.normalizer().max_side(),
            max_input_bytes: pipeline.fetcher().max_bytes(),
            debug: config.debug,
            auth_enabled: config.auth_enabled(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SelfTestReport {
    pub ok: bool,
    pub elapsed_ms: u64,
    pub output_bytes: usize,
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

pub async fn clean(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: CleanRequest,
) -> Result<Response, ApiError> {
    let artifact = state
        .pipeline
        .run(request.source)
        .await
        .map_err(|error| ApiError::new(error, state.debug))?;

    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    Ok(artifact.into_response(request.mode, if_none_match))
}

/// Push a 1x1 opaque image through the normalizer and the model
pub async fn selftest(State(state): State<AppState>) -> Result<Json<SelfTestReport>, ApiError> {
    let start = Instant::now();
    let debug = state.debug;
    let fail = move |error: CleanerError| ApiError::new(error, debug);

    let pixel =
        encode_png(&RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255]))).map_err(fail)?;
    let normalized = state.pipeline.normalize(pixel).await.map_err(fail)?;
    let png = state
        .pipeline
        .session()
        .remove_background(normalized)
        .await
        .map_err(fail)?;

    let report = SelfTestReport {
        ok: true,
        elapsed_ms: start.elapsed().as_millis() as u64,
        output_bytes: png.len(),
    };
    info!(elapsed_ms = report.elapsed_ms, "Self-test passed");
    Ok(Json(report))
}

pub async fn info(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.info.as_ref().clone())
}
