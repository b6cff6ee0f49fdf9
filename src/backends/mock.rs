//! Mock backend for tests and local development
//!
//! Needs no model file. Treats every non-white pixel of the letterboxed input
//! as foreground, which is enough to exercise the whole pipeline end to end
//! and to produce visibly plausible cut-outs of objects on white backgrounds.

use crate::config::InferenceConfig;
use crate::error::{CleanerError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, PreprocessingConfig};
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Channel value above which a denormalized pixel counts as background white
const WHITE_THRESHOLD: f32 = 0.94;

#[derive(Debug, Clone)]
enum MockBehavior {
    Segment,
    Fail(String),
    Panic,
}

/// Deterministic stand-in for a segmentation model
#[derive(Debug, Clone)]
pub struct MockBackend {
    preprocessing_config: PreprocessingConfig,
    behavior: MockBehavior,
    initialized: bool,
    calls: Arc<AtomicUsize>,
}

impl MockBackend {
    /// A mock with a 320x320 input and `ImageNet` normalization
    #[must_use]
    pub fn new() -> Self {
        Self {
            preprocessing_config: PreprocessingConfig {
                target_size: [320, 320],
                normalization_mean: [0.485, 0.456, 0.406],
                normalization_std: [0.229, 0.224, 0.225],
            },
            behavior: MockBehavior::Segment,
            initialized: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A mock whose inference always returns an inference error with `message`
    #[must_use]
    pub fn failing<S: Into<String>>(message: S) -> Self {
        Self {
            behavior: MockBehavior::Fail(message.into()),
            ..Self::new()
        }
    }

    /// A mock whose inference panics
    #[must_use]
    pub fn panicking() -> Self {
        Self {
            behavior: MockBehavior::Panic,
            ..Self::new()
        }
    }

    /// Use a different model input size (`[height, width]`)
    #[must_use]
    pub fn with_target_size(mut self, target_size: [u32; 2]) -> Self {
        self.preprocessing_config.target_size = target_size;
        self
    }

    /// Shared counter of `infer` calls; clones of this backend share it
    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    fn is_background(&self, rgb: [f32; 3]) -> bool {
        let mean = self.preprocessing_config.normalization_mean;
        let std = self.preprocessing_config.normalization_std;
        (0..3).all(|c| rgb[c] * std[c] + mean[c] >= WHITE_THRESHOLD)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &InferenceConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::ZERO))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match &self.behavior {
            MockBehavior::Segment => {},
            MockBehavior::Fail(message) => return Err(CleanerError::inference(message.clone())),
            MockBehavior::Panic => panic!("mock backend panicked during inference"),
        }

        let (n, c, h, w) = input.dim();
        if c != 3 {
            return Err(CleanerError::inference(format!(
                "Expected 3 input channels, got {c}"
            )));
        }

        let output = Array4::from_shape_fn((n, 1, h, w), |(b, _, y, x)| {
            let pixel = [
                input.get([b, 0, y, x]).copied().unwrap_or(0.0),
                input.get([b, 1, y, x]).copied().unwrap_or(0.0),
                input.get([b, 2, y, x]).copied().unwrap_or(0.0),
            ];
            if self.is_background(pixel) {
                0.0
            } else {
                1.0
            }
        });

        Ok(output)
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        let [h, w] = self.preprocessing_config.target_size;
        (1, 3, h as usize, w as usize)
    }

    fn preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.preprocessing_config)
    }

    fn model_info(&self) -> Result<ModelInfo> {
        let (n, _, h, w) = self.input_shape();
        Ok(ModelInfo {
            name: "mock".to_string(),
            precision: "fp32".to_string(),
            size_bytes: 0,
            input_shape: (n, 3, h, w),
            output_shape: (n, 1, h, w),
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(backend: &MockBackend, rgb: [f32; 3]) -> [f32; 3] {
        let config = backend.preprocessing_config().unwrap();
        let mut out = [0.0; 3];
        for c in 0..3 {
            out[c] = (rgb[c] - config.normalization_mean[c]) / config.normalization_std[c];
        }
        out
    }

    #[test]
    fn test_white_is_background() {
        let mut backend = MockBackend::new().with_target_size([1, 2]);
        backend.initialize(&InferenceConfig::default()).unwrap();

        let white = normalized(&backend, [1.0, 1.0, 1.0]);
        let red = normalized(&backend, [0.9, 0.1, 0.1]);
        let mut input = Array4::<f32>::zeros((1, 3, 1, 2));
        for c in 0..3 {
            input[[0, c, 0, 0]] = white[c];
            input[[0, c, 0, 1]] = red[c];
        }

        let output = backend.infer(&input).unwrap();
        assert_eq!(output.shape(), &[1, 1, 1, 2]);
        assert!(output[[0, 0, 0, 0]].abs() < f32::EPSILON);
        assert!((output[[0, 0, 0, 1]] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_failing_backend_counts_calls() {
        let mut backend = MockBackend::failing("boom");
        let calls = backend.call_counter();
        let input = Array4::<f32>::zeros((1, 3, 4, 4));

        let err = backend.infer(&input).unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "mock backend panicked")]
    fn test_panicking_backend() {
        let mut backend = MockBackend::panicking();
        let _ = backend.infer(&Array4::<f32>::zeros((1, 3, 2, 2)));
    }

    #[test]
    fn test_initialize_once() {
        let mut backend = MockBackend::new();
        assert!(!backend.is_initialized());
        assert!(backend
            .initialize(&InferenceConfig::default())
            .unwrap()
            .is_some());
        assert!(backend
            .initialize(&InferenceConfig::default())
            .unwrap()
            .is_none());
        assert_eq!(backend.model_info().unwrap().input_shape, (1, 3, 320, 320));
    }
}
