//! ONNX Runtime backend
//!
//! Runs the segmentation model with ONNX Runtime, optionally accelerated by the
//! CUDA or `CoreML` execution providers. Provider availability is checked at
//! load time; a requested provider that is missing falls back to CPU with a
//! warning rather than failing startup.

use crate::config::{ExecutionProvider, InferenceConfig};
use crate::error::{CleanerError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;
use std::time::{Duration, Instant};

/// ONNX Runtime backend for running background removal models
#[derive(Debug)]
pub struct OnnxBackend {
    session: Option<Session>,
    model_manager: ModelManager,
}

impl OnnxBackend {
    /// List ONNX Runtime execution providers as `(name, available, description)`
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Platform: {} / {}, {} CPU cores",
            std::env::consts::OS,
            std::env::consts::ARCH,
            std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(1)
        );

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                Self::cuda_available(),
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                Self::coreml_available(),
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    fn cuda_available() -> bool {
        OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
    }

    fn coreml_available() -> bool {
        OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
    }

    /// Create a backend for the model resolved by `model_manager`
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            session: None,
            model_manager,
        }
    }

    fn configure_providers(
        session_builder: SessionBuilder,
        provider: ExecutionProvider,
    ) -> Result<SessionBuilder> {
        let set_providers = |builder: SessionBuilder, providers: Vec<ExecutionProviderDispatch>| {
            builder.with_execution_providers(providers).map_err(|e| {
                CleanerError::inference(format!(
                    "Failed to set {provider} execution provider: {e}"
                ))
            })
        };

        match provider {
            ExecutionProvider::Auto => {
                let mut providers = Vec::new();
                if Self::cuda_available() {
                    log::info!("CUDA execution provider is available and will be used");
                    providers.push(CUDAExecutionProvider::default().build());
                }
                if Self::coreml_available() {
                    log::info!("CoreML execution provider is available and will be used");
                    providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
                }
                if providers.is_empty() {
                    log::info!("No hardware acceleration available, using CPU");
                    Ok(session_builder)
                } else {
                    set_providers(session_builder, providers)
                }
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                Ok(session_builder)
            },
            ExecutionProvider::Cuda => {
                if Self::cuda_available() {
                    log::info!("Using CUDA execution provider");
                    set_providers(session_builder, vec![CUDAExecutionProvider::default().build()])
                } else {
                    log::warn!(
                        "CUDA execution provider requested but not available, falling back to CPU"
                    );
                    Ok(session_builder)
                }
            },
            ExecutionProvider::CoreMl => {
                if Self::coreml_available() {
                    log::info!("Using CoreML execution provider");
                    set_providers(
                        session_builder,
                        vec![CoreMLExecutionProvider::default().with_subgraphs(true).build()],
                    )
                } else {
                    log::warn!(
                        "CoreML execution provider requested but not available, falling back to CPU"
                    );
                    Ok(session_builder)
                }
            },
        }
    }

    fn load_model(&mut self, config: &InferenceConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = self.model_manager.load_model()?;

        let session_builder = Session::builder()
            .map_err(|e| {
                CleanerError::inference(format!("Failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                CleanerError::inference(format!("Failed to set optimization level: {e}"))
            })?;
        let session_builder = Self::configure_providers(session_builder, config.execution_provider)?;

        let cores = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter_threads = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };

        let session = session_builder
            .with_parallel_execution(true)
            .map_err(|e| {
                CleanerError::inference(format!("Failed to enable parallel execution: {e}"))
            })?
            .with_intra_threads(intra_threads)
            .map_err(|e| CleanerError::inference(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| CleanerError::inference(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                CleanerError::inference(format!("Failed to create session from model data: {e}"))
            })?;

        log::debug!(
            "ONNX session ready: provider {}, {intra_threads} intra-op / {inter_threads} inter-op threads, model {}",
            config.execution_provider,
            self.model_manager.model_file_path().display()
        );

        self.session = Some(session);
        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Model loading complete: {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &InferenceConfig) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }
        self.load_model(config).map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CleanerError::internal("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        let input_value = Value::from_array(input.clone()).map_err(|e| {
            CleanerError::processing(format!("Failed to convert input tensor: {e}"))
        })?;

        // Positional inputs and outputs keep us independent of tensor names
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| CleanerError::inference(format!("ONNX inference failed: {e}")))?;

        let keys: Vec<_> = outputs.keys().collect();
        let first_key = keys
            .first()
            .ok_or_else(|| CleanerError::processing("No output tensors found"))?;
        let output_tensor = outputs
            .get(first_key)
            .ok_or_else(|| CleanerError::processing("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| {
                CleanerError::processing(format!("Failed to extract output tensor: {e}"))
            })?;

        let shape = output_tensor.shape().to_vec();
        let [n, c, h, w] = shape.as_slice() else {
            return Err(CleanerError::processing(format!(
                "Expected 4D output tensor, got {}D",
                shape.len()
            )));
        };
        let result = Array4::from_shape_vec(
            (*n, *c, *h, *w),
            output_tensor.iter().copied().collect(),
        )
        .map_err(|e| CleanerError::processing(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "Inference complete: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(result)
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_manager
            .get_info()
            .map_or((1, 3, 1024, 1024), |info| info.input_shape)
    }

    fn preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.model_manager.get_preprocessing_config()
    }

    fn model_info(&self) -> Result<ModelInfo> {
        self.model_manager.get_info()
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}
