//! Model session: the long-lived handle that turns a normalized image into a cut-out
//!
//! One [`ModelSession`] is built at startup and shared by every request through
//! an `Arc`. Backends mutate their runtime state during inference, so the
//! backend sits behind a mutex; inference itself runs on tokio's blocking
//! thread pool so that request handling threads never wait on the model.

use crate::{
    cache::ModelCache,
    config::{ExecutionProvider, InferenceConfig, ServerConfig},
    error::{CleanerError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, ModelManager, PreprocessingConfig},
    normalize::{encode_png, NormalizedImage},
    utils::{ImagePreprocessor, MaskPostprocessor},
};
use image::RgbaImage;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Backend type enumeration for runtime selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    #[default]
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
    /// Deterministic mock, no model file
    Mock,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create a backend of `backend_type`; model-backed types require a manager
    ///
    /// # Errors
    /// - Backend type not compiled into this build
    /// - Missing model manager for a model-backed backend
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: Option<ModelManager>,
    ) -> Result<Box<dyn InferenceBackend>>;

    /// Backend types this factory can create
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory for the backends compiled into this build
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    #[cfg_attr(
        not(any(feature = "onnx", feature = "tract")),
        allow(unused_variables)
    )]
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: Option<ModelManager>,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::with_model_manager(
                require_model(backend_type, model_manager)?,
            ))),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(
                crate::backends::TractBackend::with_model_manager(require_model(
                    backend_type,
                    model_manager,
                )?),
            )),
            BackendType::Mock => Ok(Box::new(crate::backends::MockBackend::new())),
            #[allow(unreachable_patterns)]
            other => Err(CleanerError::invalid_config(format!(
                "{other} backend is not enabled in this build"
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends.push(BackendType::Mock);
        backends
    }
}

#[cfg(any(feature = "onnx", feature = "tract"))]
fn require_model(backend_type: BackendType, manager: Option<ModelManager>) -> Result<ModelManager> {
    manager.ok_or_else(|| {
        CleanerError::invalid_config(format!("{backend_type} backend requires a model"))
    })
}

/// Shared handle around a loaded inference backend
pub struct ModelSession {
    backend: Mutex<Box<dyn InferenceBackend>>,
    preprocessing: PreprocessingConfig,
    info: ModelInfo,
    backend_name: &'static str,
    execution_provider: ExecutionProvider,
}

impl std::fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSession")
            .field("backend", &self.backend_name)
            .field("model", &self.info.name)
            .field("execution_provider", &self.execution_provider)
            .finish_non_exhaustive()
    }
}

impl ModelSession {
    /// Initialize `backend` and wrap it for shared use
    ///
    /// # Errors
    /// - Backend initialization or model loading failures
    /// - Missing preprocessing metadata
    pub fn new(mut backend: Box<dyn InferenceBackend>, config: &InferenceConfig) -> Result<Self> {
        if let Some(load_time) = backend.initialize(config)? {
            info!(
                backend = backend.name(),
                load_ms = load_time.as_millis() as u64,
                "Inference backend initialized"
            );
        }

        let preprocessing = backend.preprocessing_config()?;
        let info = backend.model_info()?;
        debug!(
            model = %info.name,
            precision = %info.precision,
            target = ?preprocessing.target_size,
            "Model session ready"
        );

        Ok(Self {
            backend_name: backend.name(),
            backend: Mutex::new(backend),
            preprocessing,
            info,
            execution_provider: config.execution_provider,
        })
    }

    /// Resolve the configured model and build a session with `factory`
    ///
    /// # Errors
    /// - Model not found or invalid
    /// - Backend creation or initialization failures
    pub fn from_config(config: &ServerConfig, factory: &dyn BackendFactory) -> Result<Self> {
        let model_manager = if config.backend_type == BackendType::Mock {
            None
        } else {
            let cache = ModelCache::open(config.cache_dir.as_deref())?;
            Some(ModelManager::from_spec(
                &config.model_spec,
                &cache,
                Some(config.inference.execution_provider),
            )?)
        };

        info!(
            backend = %config.backend_type,
            model = %config.model_spec.source.display_name(),
            "Loading model session"
        );
        let backend = factory.create_backend(config.backend_type, model_manager)?;
        Self::new(backend, &config.inference)
    }

    #[must_use]
    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    #[must_use]
    pub fn preprocessing(&self) -> &PreprocessingConfig {
        &self.preprocessing
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    #[must_use]
    pub fn execution_provider(&self) -> ExecutionProvider {
        self.execution_provider
    }

    /// Remove the background of `image` on the blocking pool
    ///
    /// Returns the cut-out as PNG bytes. Every failure, including a panic
    /// inside the backend, comes back as [`CleanerError::ModelFailure`].
    ///
    /// # Errors
    /// - [`CleanerError::ModelFailure`]
    pub async fn remove_background(self: &Arc<Self>, image: NormalizedImage) -> Result<Vec<u8>> {
        let session = Arc::clone(self);
        let span = tracing::Span::current();
        let outcome = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            session.remove_background_blocking(&image.image)
        })
        .await;

        match outcome {
            Ok(result) => result.map_err(CleanerError::into_model_failure),
            Err(join_error) => Err(Self::join_error_to_failure(join_error)),
        }
    }

    fn join_error_to_failure(join_error: tokio::task::JoinError) -> CleanerError {
        if join_error.is_panic() {
            let payload = join_error.into_panic();
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "backend panicked".to_string());
            CleanerError::ModelFailure {
                detail,
                error_type: "Panic",
            }
        } else {
            CleanerError::ModelFailure {
                detail: join_error.to_string(),
                error_type: "Cancelled",
            }
        }
    }

    /// Preprocess, infer, build the mask, apply it, and encode PNG
    ///
    /// # Errors
    /// - Preprocessing, inference or mask errors from the backend
    /// - PNG encoding failure
    #[instrument(skip_all, fields(backend = self.backend_name, width = image.width(), height = image.height()))]
    pub fn remove_background_blocking(&self, image: &RgbaImage) -> Result<Vec<u8>> {
        let start = Instant::now();
        let (tensor, letterbox) =
            ImagePreprocessor::preprocess_for_inference(image, &self.preprocessing)?;

        let output = {
            let mut backend = self.backend.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
                warn!("Model session lock was poisoned by an earlier panic; continuing");
                poisoned.into_inner()
            });
            backend.infer(&tensor)?
        };

        let mask = MaskPostprocessor::tensor_to_mask(&output, &letterbox, image.dimensions())?;
        let cutout = mask.apply_to_image(image)?;
        let png = encode_png(&cutout)?;

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            foreground = mask.foreground_ratio(),
            output_bytes = png.len(),
            "Background removed"
        );
        Ok(png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockBackend;
    use crate::error::ErrorKind;
    use crate::normalize::ImageNormalizer;
    use image::{DynamicImage, Rgba};
    use std::sync::atomic::Ordering;

    fn red_square_on_white() -> RgbaImage {
        let mut image = RgbaImage::from_pixel(64, 48, Rgba([255, 255, 255, 255]));
        for y in 12..36 {
            for x in 16..48 {
                image.put_pixel(x, y, Rgba([220, 20, 20, 255]));
            }
        }
        image
    }

    fn normalized(image: RgbaImage) -> NormalizedImage {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        ImageNormalizer::default().normalize(&bytes).unwrap()
    }

    fn session(backend: MockBackend) -> Arc<ModelSession> {
        Arc::new(ModelSession::new(Box::new(backend), &InferenceConfig::default()).unwrap())
    }

    #[test]
    fn test_blocking_removal_cuts_out_background() {
        let session = session(MockBackend::new());
        let png = session
            .remove_background_blocking(&red_square_on_white())
            .unwrap();

        let output = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(output.dimensions(), (64, 48));
        assert_eq!(output.get_pixel(0, 0)[3], 0);
        assert_eq!(output.get_pixel(32, 24).0, [220, 20, 20, 255]);
    }

    #[tokio::test]
    async fn test_async_removal_runs_once() {
        let backend = MockBackend::new();
        let calls = backend.call_counter();
        let session = session(backend);

        let png = session
            .remove_background(normalized(red_square_on_white()))
            .await
            .unwrap();
        assert!(png.starts_with(b"\x89PNG"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backend_error_becomes_model_failure() {
        let session = session(MockBackend::failing("CUDA out of memory"));
        let err = session
            .remove_background(normalized(red_square_on_white()))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ModelFailure);
        match err {
            CleanerError::ModelFailure { detail, error_type } => {
                assert_eq!(error_type, "Inference");
                assert!(detail.contains("CUDA out of memory"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_model_failure_and_session_survives() {
        let session = session(MockBackend::panicking());
        for _ in 0..2 {
            let err = session
                .remove_background(normalized(red_square_on_white()))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ModelFailure);
            assert_eq!(err.type_name(), "Panic");
        }
    }

    #[test]
    fn test_default_factory_mock_and_missing_model() {
        let factory = DefaultBackendFactory;
        assert!(factory.available_backends().contains(&BackendType::Mock));
        assert!(factory.create_backend(BackendType::Mock, None).is_ok());
        assert!(factory.create_backend(BackendType::Onnx, None).is_err());
        assert!(factory.create_backend(BackendType::Tract, None).is_err());
    }

    #[test]
    fn test_model_backends_explain_why_they_cannot_start() {
        let factory = DefaultBackendFactory;
        for (backend_type, enabled) in [
            (BackendType::Onnx, cfg!(feature = "onnx")),
            (BackendType::Tract, cfg!(feature = "tract")),
        ] {
            let Err(err) = factory.create_backend(backend_type, None) else {
                panic!("{backend_type} built without a model");
            };
            assert!(matches!(err, CleanerError::InvalidConfig(_)), "{err:?}");
            let expected = if enabled {
                "requires a model"
            } else {
                "not enabled in this build"
            };
            assert!(err.to_string().contains(expected), "{err}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_session_serves_overlapping_calls() {
        let backend = MockBackend::new();
        let calls = backend.call_counter();
        let session = session(backend);

        let tasks: Vec<_> = (0..8u32)
            .map(|i| {
                let session = Arc::clone(&session);
                let width = 40 + i * 8;
                tokio::spawn(async move {
                    let mut image = RgbaImage::from_pixel(width, 32, Rgba([255, 255, 255, 255]));
                    image.put_pixel(width / 2, 16, Rgba([10, 10, 200, 255]));
                    let png = session.remove_background(normalized(image)).await.unwrap();
                    (width, image::load_from_memory(&png).unwrap().to_rgba8())
                })
            })
            .collect();

        for task in tasks {
            let (width, output) = task.await.unwrap();
            assert_eq!(output.dimensions(), (width, 32));
            assert_eq!(output.get_pixel(0, 0)[3], 0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_from_config_with_mock() {
        let config = ServerConfig::builder()
            .backend_type(BackendType::Mock)
            .build()
            .unwrap();
        let session = ModelSession::from_config(&config, &DefaultBackendFactory).unwrap();
        assert_eq!(session.backend_name(), "mock");
        assert_eq!(session.preprocessing().target_size, [320, 320]);
    }
}
