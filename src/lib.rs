#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Background Removal Service
//!
//! An HTTP front-end that accepts an image by URL or upload, removes its
//! background with an ONNX segmentation model, and returns a PNG with alpha.
//!
//! Most of the crate is the path between "arbitrary bytes from an untrusted
//! source" and "bounded input fed to the model":
//!
//! 1. [`SourceFetcher`] obtains bytes from exactly one source, under a size
//!    bound and a timeout
//! 2. [`ImageNormalizer`] decodes them, converts to RGBA8, bounds the longest
//!    side and re-encodes a canonical PNG
//! 3. [`ModelSession`] runs the model on the blocking pool and applies the mask
//! 4. [`ResultArtifact`] fingerprints the normalized PNG for `ETag` and
//!    renders raw PNG or a JSON envelope
//!
//! ## Features
//!
//! - **Multiple Backends**: ONNX Runtime (GPU acceleration), Tract (Pure Rust),
//!   and a model-free mock for tests and local development
//! - **Hardware Acceleration**: CUDA, `CoreML`, and CPU execution providers
//! - **Model Management**: `HuggingFace`-layout model folders in an XDG cache,
//!   downloaded on first start
//! - **Format Support**: JPEG, PNG, WebP, BMP, TIFF, GIF input
//!
//! ## Embedding the router
//!
//! ```rust,no_run
//! use bgremove_cleaner::{app, BackendType, ModelSession, ServerConfig, DefaultBackendFactory};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServerConfig::builder()
//!     .token("s3cret")
//!     .backend_type(BackendType::Onnx)
//!     .build()?;
//! let session = Arc::new(ModelSession::from_config(&config, &DefaultBackendFactory)?);
//! let router = app(&config, session)?;
//!
//! let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract`: Pure Rust backend
//! - `cli` (default): server binary, argument parsing and subscriber setup
//! - `tracing-json`: JSON log output
//! - `webp-support` (default): WebP input support

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod processor;
pub mod response;
pub mod server;
pub mod source;
pub mod tracing_config;
pub mod types;
pub mod utils;

use std::sync::Arc;

// Public API exports
pub use backends::*;
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use config::{ExecutionProvider, InferenceConfig, ServerConfig, ServerConfigBuilder};
pub use download::ModelDownloader;
pub use error::{CleanerError, ErrorKind, Result};
pub use inference::InferenceBackend;
pub use models::{ModelInfo, ModelManager, ModelSource, ModelSpec, PreprocessingConfig};
pub use normalize::{ImageNormalizer, NormalizedImage};
pub use pipeline::CleanPipeline;
pub use processor::{BackendFactory, BackendType, DefaultBackendFactory, ModelSession};
pub use response::{fingerprint, OutputMode, ResultArtifact};
pub use server::{AppState, CleanerServer};
pub use source::{ImageSource, RawPayload, SourceFetcher, SourceKind, UploadedFile};
pub use tracing_config::{TracingConfig, TracingFormat};
pub use types::SegmentationMask;
pub use utils::{ExecutionProviderManager, ModelSpecParser, ProviderInfo};

/// Build the complete HTTP router around an already loaded model session
///
/// # Examples
///
/// ```rust
/// use bgremove_cleaner::{app, InferenceConfig, MockBackend, ModelSession, ServerConfig};
/// use std::sync::Arc;
///
/// let config = ServerConfig::default();
/// let session = ModelSession::new(Box::new(MockBackend::new()), &InferenceConfig::default())?;
/// let router = app(&config, Arc::new(session))?;
/// # Ok::<(), bgremove_cleaner::CleanerError>(())
/// ```
pub fn app(config: &ServerConfig, session: Arc<ModelSession>) -> Result<axum::Router> {
    let pipeline = Arc::new(CleanPipeline::with_session(config, session)?);
    Ok(server::router(AppState::new(config, pipeline)))
}
