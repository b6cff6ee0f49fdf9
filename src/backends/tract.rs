//! Tract backend (pure Rust ONNX inference, CPU only)

use crate::config::InferenceConfig;
use crate::error::{CleanerError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use ndarray::Array4;
use std::time::{Duration, Instant};
use tract_onnx::prelude::*;

type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for running background removal models using pure Rust inference
#[derive(Debug)]
pub struct TractBackend {
    model: Option<TractModel>,
    model_manager: ModelManager,
}

impl TractBackend {
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            model: None,
            model_manager,
        }
    }

    fn load_model(&mut self) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = self.model_manager.load_model()?;

        log::info!(
            "Initializing Tract backend with {}",
            self.model_manager.model_file_path().display()
        );

        let [height, width] = self.model_manager.get_preprocessing_config()?.target_size;
        let input_fact = f32::fact([1, 3, height as usize, width as usize]);

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| CleanerError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, input_fact.into())
            .map_err(|e| CleanerError::model(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| CleanerError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| CleanerError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, _config: &InferenceConfig) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }
        self.load_model().map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| CleanerError::inference("Tract model not initialized"))?;

        let inference_start = Instant::now();
        let input_data: Vec<f32> = input.iter().copied().collect();
        let input_tensor = Tensor::from_shape(input.shape(), &input_data)
            .map_err(|e| CleanerError::inference(format!("Failed to build input tensor: {e}")))?;

        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| CleanerError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| CleanerError::inference("No output tensor found"))?
            .into_arc_tensor();

        let shape = output_tensor.shape().to_vec();
        let [n, c, h, w] = shape.as_slice() else {
            return Err(CleanerError::inference(format!(
                "Expected 4D output tensor, got {}D",
                shape.len()
            )));
        };
        let output_data = output_tensor.as_slice::<f32>().map_err(|e| {
            CleanerError::inference(format!("Failed to read output tensor: {e}"))
        })?;

        let output_array = Array4::from_shape_vec((*n, *c, *h, *w), output_data.to_vec())
            .map_err(|e| {
                CleanerError::inference(format!("Failed to reshape output tensor: {e}"))
            })?;

        log::debug!(
            "Tract inference completed in {}ms",
            inference_start.elapsed().as_millis()
        );
        Ok(output_array)
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
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}
