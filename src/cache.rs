//! On-disk model cache
//!
//! Models live in an XDG-compliant directory, one sub-directory per model id,
//! each in the `HuggingFace` layout:
//!
//! ```text
//! <cache>/models/imgly--isnet-general-onnx/
//!     config.json
//!     preprocessor_config.json
//!     onnx/model.onnx
//!     onnx/model_fp16.onnx
//! ```

use crate::error::{CleanerError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Model loaded when nothing else is configured
pub const DEFAULT_MODEL_ID: &str = "imgly--isnet-general-onnx";

/// Repository [`DEFAULT_MODEL_ID`] is downloaded from
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/imgly/isnet-general-onnx";

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (directory name)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    /// Available ONNX model variants (fp16, fp32, ...)
    pub variants: Vec<String>,
    /// Size of the model directory in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the default cache
    ///
    /// - Linux: `~/.cache/bgremove-cleaner/models/`
    /// - macOS: `~/Library/Caches/bgremove-cleaner/models/`
    /// - Windows: `%LOCALAPPDATA%/bgremove-cleaner/models/`
    ///
    /// # Errors
    /// - The platform has no user cache directory
    /// - The cache directory cannot be created
    pub fn new() -> Result<Self> {
        let root = dirs::cache_dir()
            .ok_or_else(|| {
                CleanerError::invalid_config(
                    "Failed to determine cache directory. Set CLEANER_CACHE_DIR.",
                )
            })?
            .join("bgremove-cleaner");
        Self::with_custom_cache_dir(&root)
    }

    /// Open a cache rooted at `cache_dir`; models live in `cache_dir/models`
    ///
    /// # Errors
    /// - The models directory cannot be created
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");

        if !models_dir.exists() {
            fs::create_dir_all(&models_dir).map_err(|e| {
                CleanerError::file_io_error("create cache directory", &models_dir, &e)
            })?;
        }

        Ok(Self {
            cache_dir: models_dir,
        })
    }

    /// Open the cache at `cache_dir` if given, else the default location
    ///
    /// # Errors
    /// - See [`ModelCache::new`] and [`ModelCache::with_custom_cache_dir`]
    pub fn open(cache_dir: Option<&Path>) -> Result<Self> {
        match cache_dir {
            Some(dir) => Self::with_custom_cache_dir(dir),
            None => Self::new(),
        }
    }

    /// Directory holding the model sub-directories
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Generate a model ID from a URL
    ///
    /// `HuggingFace` repository URLs map to `owner--name`; any other URL maps to
    /// a short hash-based id.
    ///
    /// ```
    /// use bgremove_cleaner::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/imgly/isnet-general-onnx");
    /// assert_eq!(id, "imgly--isnet-general-onnx");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        const HF_PREFIX: &str = "https://huggingface.co/";
        let url = url.trim_end_matches('/');
        if let Some(repo) = url.strip_prefix(HF_PREFIX) {
            return repo.replace('/', "--");
        }

        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(url.as_bytes());
        let hash_string = format!("url-{digest:x}");
        hash_string.get(..16).unwrap_or(&hash_string).to_string()
    }

    /// Whether `model_id` exists in the cache with the required files
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        is_model_directory(&self.get_model_path(model_id))
    }

    /// Path to a cached model directory (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    /// List every valid model in the cache, sorted by id
    ///
    /// # Errors
    /// - The cache directory cannot be read
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            CleanerError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if !is_model_directory(&path) {
                log::debug!("Skipping invalid model directory: {}", path.display());
                continue;
            }
            let Some(model_id) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            models.push(CachedModelInfo {
                model_id: model_id.to_string(),
                variants: scan_variants(&path.join("onnx")),
                size_bytes: directory_size(&path).unwrap_or(0),
                path,
            });
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }
}

/// Whether `model_path` holds config, preprocessor config, and an `onnx/` directory
#[must_use]
pub fn is_model_directory(model_path: &Path) -> bool {
    model_path.join("config.json").exists()
        && model_path.join("preprocessor_config.json").exists()
        && model_path.join("onnx").is_dir()
}

/// Variant names of the ONNX files in `onnx_dir`
///
/// `model.onnx` is `fp32`, `model_fp16.onnx` is `fp16`, `model_<v>.onnx` is `<v>`.
#[must_use]
pub fn scan_variants(onnx_dir: &Path) -> Vec<String> {
    let mut variants = Vec::new();
    let Ok(entries) = fs::read_dir(onnx_dir) else {
        return variants;
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name == "model.onnx" {
            variants.push("fp32".to_string());
        } else if let Some(variant) = file_name
            .strip_prefix("model_")
            .and_then(|s| s.strip_suffix(".onnx"))
        {
            variants.push(variant.to_string());
        }
    }

    variants.sort();
    variants
}

/// ONNX file name for a variant, inverse of [`scan_variants`]
#[must_use]
pub fn variant_file_name(variant: &str) -> String {
    match variant {
        "fp32" => "model.onnx".to_string(),
        other => format!("model_{other}.onnx"),
    }
}

fn directory_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            total += directory_size(&path)?;
        } else {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS.get(unit_index).unwrap_or(&"B");
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_model(cache: &ModelCache, model_id: &str, files: &[&str]) -> PathBuf {
        let model_path = cache.get_model_path(model_id);
        fs::create_dir_all(model_path.join("onnx")).unwrap();
        fs::write(model_path.join("config.json"), "{}").unwrap();
        fs::write(model_path.join("preprocessor_config.json"), "{}").unwrap();
        for file in files {
            fs::write(model_path.join("onnx").join(file), "fake onnx data").unwrap();
        }
        model_path
    }

    #[test]
    fn test_url_to_model_id() {
        assert_eq!(
            ModelCache::url_to_model_id("https://huggingface.co/imgly/isnet-general-onnx"),
            "imgly--isnet-general-onnx"
        );
        assert_eq!(
            ModelCache::url_to_model_id("https://huggingface.co/ZhengPeng7/BiRefNet/"),
            "ZhengPeng7--BiRefNet"
        );

        let id = ModelCache::url_to_model_id("https://example.com/model.onnx");
        assert!(id.starts_with("url-"));
        assert_eq!(id.len(), 16);
        assert_eq!(id, ModelCache::url_to_model_id("https://example.com/model.onnx"));
        assert_eq!(id, ModelCache::url_to_model_id("https://example.com/model.onnx/"));
        assert_eq!(ModelCache::url_to_model_id(DEFAULT_MODEL_URL), DEFAULT_MODEL_ID);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
    }

    #[test]
    fn test_custom_cache_dir() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("custom_cache");

        let cache = ModelCache::with_custom_cache_dir(&root).unwrap();
        assert!(root.join("models").is_dir());
        assert_eq!(cache.cache_dir(), root.join("models"));
    }

    #[test]
    fn test_scan_cached_models() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        assert!(cache.scan_cached_models().unwrap().is_empty());

        write_model(&cache, "b-model", &["model.onnx", "model_fp16.onnx"]);
        write_model(&cache, "a-model", &["model_quantized.onnx"]);

        let invalid = cache.get_model_path("not-a-model");
        fs::create_dir_all(&invalid).unwrap();
        fs::write(invalid.join("readme.txt"), "nope").unwrap();

        let models = cache.scan_cached_models().unwrap();
        let ids: Vec<_> = models.iter().map(|m| m.model_id.as_str()).collect();
        assert_eq!(ids, ["a-model", "b-model"]);
        assert_eq!(models[0].variants, ["quantized"]);
        assert_eq!(models[1].variants, ["fp16", "fp32"]);
        assert!(models[1].size_bytes > 0);

        assert!(cache.is_model_cached("b-model"));
        assert!(!cache.is_model_cached("not-a-model"));
        assert!(!cache.is_model_cached("missing"));
    }

    #[test]
    fn test_variant_file_names() {
        assert_eq!(variant_file_name("fp32"), "model.onnx");
        assert_eq!(variant_file_name("fp16"), "model_fp16.onnx");
        assert_eq!(variant_file_name("int8"), "model_int8.onnx");
    }
}
