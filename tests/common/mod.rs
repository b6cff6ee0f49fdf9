//! Shared helpers for router-level tests

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use bgremove_cleaner::{
    app, BackendType, InferenceConfig, MockBackend, ModelSession, ServerConfig,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const TOKEN: &str = "test-token";
pub const TOKEN_HEADER: &str = "x-cleaner-token";
const BOUNDARY: &str = "cleaner-test-boundary";

/// A router around a mock backend plus its inference call counter
pub struct TestApp {
    pub router: Router,
    calls: Arc<AtomicUsize>,
}

impl TestApp {
    pub fn new(backend: MockBackend, config: &ServerConfig) -> Self {
        let calls = backend.call_counter();
        let session = ModelSession::new(Box::new(backend), &InferenceConfig::default())
            .expect("mock session");
        let router = app(config, Arc::new(session)).expect("router");
        Self { router, calls }
    }

    pub fn with_defaults() -> Self {
        Self::new(MockBackend::new(), &config())
    }

    pub fn model_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }
}

pub fn config() -> ServerConfig {
    config_builder().build().expect("valid test config")
}

pub fn config_builder() -> bgremove_cleaner::ServerConfigBuilder {
    ServerConfig::builder()
        .token(TOKEN)
        .backend_type(BackendType::Mock)
}

/// A product-style photo: a colored block on a white background
pub fn product_photo(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let inside_x = x >= width / 4 && x < width * 3 / 4;
        let inside_y = y >= height / 4 && y < height * 3 / 4;
        if inside_x && inside_y {
            Rgb([200, 40, 40])
        } else {
            Rgb([255, 255, 255])
        }
    })
}

pub fn encode(image: RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .expect("encode test image");
    bytes
}

/// One part of a multipart body
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub data: Vec<u8>,
}

impl<'a> Part<'a> {
    pub fn file(data: Vec<u8>, content_type: &'a str) -> Self {
        Self {
            name: "file",
            filename: Some("upload.bin"),
            content_type: Some(content_type),
            data,
        }
    }

    pub fn text(name: &'a str, value: &str) -> Self {
        Self {
            name,
            filename: None,
            content_type: None,
            data: value.as_bytes().to_vec(),
        }
    }
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = part.filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// `POST /clean` with a multipart body and the test token
pub fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(TOKEN_HEADER, TOKEN)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .expect("request")
}

pub fn upload_request(data: Vec<u8>, content_type: &str) -> Request<Body> {
    multipart_request("/clean", &[Part::file(data, content_type)])
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(TOKEN_HEADER, token);
    }
    builder.body(Body::empty()).expect("request")
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body")
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("JSON body")
}

/// Serve `router` on an ephemeral local port
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });
    addr
}
