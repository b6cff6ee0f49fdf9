//! Inference backend abstraction

use crate::{
    config::InferenceConfig,
    error::Result,
    models::{ModelInfo, PreprocessingConfig},
};
use ndarray::Array4;
use std::time::Duration;

/// A loaded segmentation model that maps an NCHW image tensor to a mask tensor
///
/// Backends hold mutable runtime state, so `infer` takes `&mut self`; callers
/// that share a backend across threads serialize access themselves.
pub trait InferenceBackend: Send {
    /// Load the model; returns the load time, or `None` if already loaded
    ///
    /// # Errors
    /// - Model loading or validation errors
    /// - Execution provider setup failures
    fn initialize(&mut self, config: &InferenceConfig) -> Result<Option<Duration>>;

    /// Run inference on a `(1, 3, H, W)` tensor, returning `(1, 1, H, W)`
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Runtime failures inside the model
    /// - Unexpected output tensor shape
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Expected input shape (NCHW)
    fn input_shape(&self) -> (usize, usize, usize, usize);

    /// How images must be prepared for this backend's model
    ///
    /// # Errors
    /// - Missing or invalid preprocessing metadata
    fn preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// Model name, precision and shapes
    ///
    /// # Errors
    /// - Model metadata unavailable
    fn model_info(&self) -> Result<ModelInfo>;

    fn is_initialized(&self) -> bool;

    /// Short backend name for logs and diagnostics
    fn name(&self) -> &'static str;
}
