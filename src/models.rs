//! Model resolution and metadata
//!
//! A [`ModelSpec`] names a model either by filesystem path or by cache id.
//! [`ModelManager`] resolves it to a directory in the `HuggingFace` layout,
//! picks the ONNX variant to load, and reads the preprocessing parameters the
//! model was trained with.

use crate::cache::{self, ModelCache, DEFAULT_MODEL_ID};
use crate::config::ExecutionProvider;
use crate::error::{CleanerError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Model source specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSource {
    /// Model directory on the filesystem
    External(PathBuf),
    /// Model in the cache, by id
    Downloaded(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Downloaded(model_id) => format!("cached:{model_id}"),
        }
    }
}

/// Model source plus optional variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub variant: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Downloaded(DEFAULT_MODEL_ID.to_string()),
            variant: None,
        }
    }
}

/// Model information and metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: usize,
    /// NCHW
    pub input_shape: (usize, usize, usize, usize),
    pub output_shape: (usize, usize, usize, usize),
}

/// Input preparation parameters a model expects
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PreprocessingConfig {
    /// Model input size as `[height, width]`
    pub target_size: [u32; 2],
    /// Per-channel mean in the 0-1 range
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation in the 0-1 range
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    /// `ISNet` defaults: 1024x1024, mean 0.5, std 1.0
    fn default() -> Self {
        Self {
            target_size: [1024, 1024],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }
}

/// A resolved, loadable model
#[derive(Debug, Clone)]
pub struct ModelManager {
    source: ModelSource,
    model_path: PathBuf,
    variant: String,
    model_config: serde_json::Value,
    preprocessor_config: serde_json::Value,
}

impl ModelManager {
    /// Resolve a model specification against the cache
    ///
    /// `execution_provider` steers automatic variant selection when the model spec
    /// does not name one.
    ///
    /// # Errors
    /// - External path does not exist or is not a model directory
    /// - Model id not present in the cache
    /// - Missing or invalid `config.json` / `preprocessor_config.json`
    /// - Requested variant not available
    pub fn from_spec(
        spec: &ModelSpec,
        cache: &ModelCache,
        execution_provider: Option<ExecutionProvider>,
    ) -> Result<Self> {
        let model_path = match &spec.source {
            ModelSource::External(path) => {
                if !path.is_dir() {
                    return Err(CleanerError::model(format!(
                        "Model path '{}' does not exist or is not a directory",
                        path.display()
                    )));
                }
                path.clone()
            },
            ModelSource::Downloaded(model_id) => {
                if !cache.is_model_cached(model_id) {
                    let available = cache
                        .scan_cached_models()?
                        .into_iter()
                        .map(|m| m.model_id)
                        .collect::<Vec<_>>();
                    return Err(CleanerError::model(format!(
                        "Model '{model_id}' not found in cache {}. Available models: {available:?}",
                        cache.cache_dir().display()
                    )));
                }
                cache.get_model_path(model_id)
            },
        };

        let (model_config, preprocessor_config) = Self::load_configurations(&model_path)?;
        let variant = Self::resolve_variant(
            &model_path,
            spec.variant.as_deref(),
            execution_provider,
        )?;

        log::debug!(
            "Resolved model {} to {} (variant {variant})",
            spec.source.display_name(),
            model_path.display()
        );

        Ok(Self {
            source: spec.source.clone(),
            model_path,
            variant,
            model_config,
            preprocessor_config,
        })
    }

    fn load_configurations(model_path: &Path) -> Result<(serde_json::Value, serde_json::Value)> {
        let config_path = model_path.join("config.json");
        let config_content = fs::read_to_string(&config_path).map_err(|e| {
            CleanerError::file_io_error("read model config.json", &config_path, &e)
        })?;
        let model_config: serde_json::Value = serde_json::from_str(&config_content)
            .map_err(|e| CleanerError::model(format!("Failed to parse config.json: {e}")))?;

        let preprocessor_path = model_path.join("preprocessor_config.json");
        let preprocessor_content = fs::read_to_string(&preprocessor_path).map_err(|e| {
            CleanerError::file_io_error("read preprocessor_config.json", &preprocessor_path, &e)
        })?;
        let preprocessor_config: serde_json::Value = serde_json::from_str(&preprocessor_content)
            .map_err(|e| {
                CleanerError::model(format!("Failed to parse preprocessor_config.json: {e}"))
            })?;

        Ok((model_config, preprocessor_config))
    }

    /// Pick the variant: explicit request, then provider preference, then fp16 > fp32 > first
    fn resolve_variant(
        model_path: &Path,
        requested: Option<&str>,
        execution_provider: Option<ExecutionProvider>,
    ) -> Result<String> {
        let onnx_dir = model_path.join("onnx");
        let available = cache::scan_variants(&onnx_dir);
        if available.is_empty() {
            return Err(CleanerError::model(format!(
                "No ONNX model files found in {}",
                onnx_dir.display()
            )));
        }
        let has = |v: &str| available.iter().any(|a| a == v);

        if let Some(variant) = requested {
            if has(variant) {
                return Ok(variant.to_string());
            }
            return Err(CleanerError::model(format!(
                "Requested variant '{variant}' not available. Available: {available:?}"
            )));
        }

        // CoreML runs fp32 graphs better; CPU and CUDA prefer the smaller fp16
        let preferred = match execution_provider {
            Some(ExecutionProvider::CoreMl) => Some("fp32"),
            Some(ExecutionProvider::Auto) if cfg!(target_os = "macos") => Some("fp32"),
            Some(_) => Some("fp16"),
            None => None,
        };
        if let Some(preferred) = preferred.filter(|p| has(p)) {
            return Ok(preferred.to_string());
        }

        for fallback in ["fp16", "fp32"] {
            if has(fallback) {
                return Ok(fallback.to_string());
            }
        }

        available
            .into_iter()
            .next()
            .ok_or_else(|| CleanerError::internal("variant list unexpectedly empty"))
    }

    /// Path to the ONNX file for the selected variant
    #[must_use]
    pub fn model_file_path(&self) -> PathBuf {
        self.model_path
            .join("onnx")
            .join(cache::variant_file_name(&self.variant))
    }

    /// Read the model bytes
    ///
    /// # Errors
    /// - Model file missing or unreadable
    pub fn load_model(&self) -> Result<Vec<u8>> {
        let model_file_path = self.model_file_path();
        fs::read(&model_file_path)
            .map_err(|e| CleanerError::file_io_error("read model file", &model_file_path, &e))
    }

    /// Model name, precision, size and tensor shapes
    ///
    /// # Errors
    /// - Model file missing
    /// - Invalid size in `preprocessor_config.json`
    pub fn get_info(&self) -> Result<ModelInfo> {
        let model_file_path = self.model_file_path();
        let size_bytes = fs::metadata(&model_file_path)
            .map_err(|e| CleanerError::file_io_error("stat model file", &model_file_path, &e))?
            .len() as usize;

        let model_type = self
            .model_config
            .get("model_type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");

        let [height, width] = parse_image_size(&self.preprocessor_config)?;
        let (height, width) = (height as usize, width as usize);

        Ok(ModelInfo {
            name: format!("{model_type}-{}", self.variant),
            precision: self.variant.clone(),
            size_bytes,
            input_shape: (1, 3, height, width),
            output_shape: (1, 1, height, width),
        })
    }

    /// Preprocessing parameters from `preprocessor_config.json`
    ///
    /// # Errors
    /// - Missing or invalid `size`, `image_mean` or `image_std`
    pub fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig {
            target_size: parse_image_size(&self.preprocessor_config)?,
            normalization_mean: parse_channel_triplet(&self.preprocessor_config, "image_mean")?,
            normalization_std: parse_channel_triplet(&self.preprocessor_config, "image_std")?,
        })
    }

    #[must_use]
    pub fn source(&self) -> &ModelSource {
        &self.source
    }

    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

/// `size.height` / `size.width` as `[height, width]`
fn parse_image_size(preprocessor: &serde_json::Value) -> Result<[u32; 2]> {
    let size = preprocessor
        .get("size")
        .ok_or_else(|| CleanerError::model("Missing size in preprocessor config"))?;

    let dimension = |key: &str| -> Result<u32> {
        let value = size
            .get(key)
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| {
                CleanerError::model(format!("Missing or invalid {key} in size config"))
            })?;
        match u32::try_from(value) {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(CleanerError::model(format!("Invalid {key} {value} in size config"))),
        }
    };

    Ok([dimension("height")?, dimension("width")?])
}

/// Three per-channel values stored in the 0-255 range, returned in 0-1
fn parse_channel_triplet(preprocessor: &serde_json::Value, key: &str) -> Result<[f32; 3]> {
    let values = preprocessor
        .get(key)
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            CleanerError::model(format!("Missing or invalid {key} in preprocessor config"))
        })?;

    let mut triplet = [0.0_f32; 3];
    for (slot, value) in triplet.iter_mut().zip(values.iter()) {
        let raw = value
            .as_f64()
            .ok_or_else(|| CleanerError::model(format!("{key} must contain numbers")))?;
        *slot = (raw / 255.0) as f32;
    }
    if values.len() < 3 {
        return Err(CleanerError::model(format!(
            "{key} must have at least 3 values"
        )));
    }

    Ok(triplet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PREPROCESSOR: &str = r#"{
        "size": {"height": 1024, "width": 1024},
        "image_mean": [128, 128, 128],
        "image_std": [256, 256, 256]
    }"#;

    fn cached_model(variants: &[&str]) -> (TempDir, ModelCache) {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let model_path = cache.get_model_path("imgly--test-model");
        fs::create_dir_all(model_path.join("onnx")).unwrap();
        fs::write(model_path.join("config.json"), r#"{"model_type": "isnet"}"#).unwrap();
        fs::write(model_path.join("preprocessor_config.json"), PREPROCESSOR).unwrap();
        for variant in variants {
            fs::write(
                model_path.join("onnx").join(cache::variant_file_name(variant)),
                b"not really onnx",
            )
            .unwrap();
        }
        (temp_dir, cache)
    }

    fn downloaded(variant: Option<&str>) -> ModelSpec {
        ModelSpec {
            source: ModelSource::Downloaded("imgly--test-model".to_string()),
            variant: variant.map(str::to_string),
        }
    }

    #[test]
    fn test_model_source_display_name() {
        let external = ModelSource::External(PathBuf::from("/opt/models/isnet"));
        assert_eq!(external.display_name(), "external:isnet");
        let cached = ModelSource::Downloaded("imgly--isnet-general-onnx".to_string());
        assert_eq!(cached.display_name(), "cached:imgly--isnet-general-onnx");
    }

    #[test]
    fn test_default_spec_points_at_isnet() {
        let spec = ModelSpec::default();
        assert_eq!(
            spec.source,
            ModelSource::Downloaded("imgly--isnet-general-onnx".to_string())
        );
        assert!(spec.variant.is_none());
    }

    #[test]
    fn test_resolve_cached_model() {
        let (_dir, cache) = cached_model(&["fp32", "fp16"]);
        let manager = ModelManager::from_spec(&downloaded(None), &cache, None).unwrap();
        assert_eq!(manager.variant(), "fp16");
        assert!(manager.model_file_path().ends_with("onnx/model_fp16.onnx"));

        let info = manager.get_info().unwrap();
        assert_eq!(info.name, "isnet-fp16");
        assert_eq!(info.input_shape, (1, 3, 1024, 1024));
        assert_eq!(info.output_shape, (1, 1, 1024, 1024));
        assert_eq!(info.size_bytes, b"not really onnx".len());

        let preprocessing = manager.get_preprocessing_config().unwrap();
        assert_eq!(preprocessing.target_size, [1024, 1024]);
        assert!((preprocessing.normalization_mean[0] - 128.0 / 255.0).abs() < 1e-6);
        assert!((preprocessing.normalization_std[2] - 256.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_explicit_and_provider_variants() {
        let (_dir, cache) = cached_model(&["fp32", "fp16"]);

        let manager = ModelManager::from_spec(&downloaded(Some("fp32")), &cache, None).unwrap();
        assert_eq!(manager.variant(), "fp32");

        let manager =
            ModelManager::from_spec(&downloaded(None), &cache, Some(ExecutionProvider::CoreMl))
                .unwrap();
        assert_eq!(manager.variant(), "fp32");

        let err = ModelManager::from_spec(&downloaded(Some("int8")), &cache, None).unwrap_err();
        assert!(err.to_string().contains("int8"));
    }

    #[test]
    fn test_missing_model_lists_available() {
        let (_dir, cache) = cached_model(&["fp32"]);
        let spec = ModelSpec {
            source: ModelSource::Downloaded("nope".to_string()),
            variant: None,
        };
        let err = ModelManager::from_spec(&spec, &cache, None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("nope"));
        assert!(message.contains("imgly--test-model"));
    }

    #[test]
    fn test_external_model_directory() {
        let (_dir, cache) = cached_model(&["quantized"]);
        let spec = ModelSpec {
            source: ModelSource::External(cache.get_model_path("imgly--test-model")),
            variant: None,
        };
        let manager = ModelManager::from_spec(&spec, &cache, None).unwrap();
        assert_eq!(manager.variant(), "quantized");
        assert_eq!(manager.load_model().unwrap(), b"not really onnx");

        let missing = ModelSpec {
            source: ModelSource::External(PathBuf::from("/definitely/not/here")),
            variant: None,
        };
        assert!(ModelManager::from_spec(&missing, &cache, None).is_err());
    }

    #[test]
    fn test_invalid_preprocessor_values() {
        let config: serde_json::Value =
            serde_json::from_str(r#"{"size": {"height": 0, "width": 10}}"#).unwrap();
        assert!(parse_image_size(&config).is_err());

        let config: serde_json::Value = serde_json::from_str(r#"{"image_mean": [1, 2]}"#).unwrap();
        assert!(parse_channel_triplet(&config, "image_mean").is_err());
    }
}
