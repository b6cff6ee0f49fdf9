//! Shared helpers for model input/output and argument parsing

pub mod models;
pub mod postprocessing;
pub mod preprocessing;
pub mod providers;

pub use models::ModelSpecParser;
pub use postprocessing::MaskPostprocessor;
pub use preprocessing::{ImagePreprocessor, Letterbox};
pub use providers::{ExecutionProviderManager, ProviderInfo};
