//! Model argument parsing

use crate::{
    cache::ModelCache,
    models::{ModelSource, ModelSpec},
};
use std::path::{Path, PathBuf};

/// Turns the `--model` / `--variant` arguments into a [`ModelSpec`]
pub struct ModelSpecParser;

impl ModelSpecParser {
    /// Parse a model argument with optional `:variant` suffix
    ///
    /// An existing filesystem path is an external model, a `HuggingFace` URL
    /// becomes its cache id, anything else is taken as a cache id.
    ///
    /// ```rust
    /// use bgremove_cleaner::models::ModelSource;
    /// use bgremove_cleaner::utils::ModelSpecParser;
    ///
    /// let spec = ModelSpecParser::parse("imgly--birefnet-portrait:fp32");
    /// assert_eq!(spec.variant.as_deref(), Some("fp32"));
    ///
    /// let spec = ModelSpecParser::parse("https://huggingface.co/imgly/isnet-general-onnx");
    /// assert_eq!(
    ///     spec.source,
    ///     ModelSource::Downloaded("imgly--isnet-general-onnx".to_string())
    /// );
    /// ```
    #[must_use]
    pub fn parse(model_arg: &str) -> ModelSpec {
        if model_arg.starts_with("http://") || model_arg.starts_with("https://") {
            return ModelSpec {
                source: ModelSource::Downloaded(ModelCache::url_to_model_id(model_arg)),
                variant: None,
            };
        }

        // Paths may legitimately contain ':' on Windows; only split when the
        // whole argument is not an existing path
        if !Path::new(model_arg).exists() {
            if let Some((name, variant)) = model_arg.rsplit_once(':') {
                if !name.is_empty() && !variant.is_empty() {
                    return ModelSpec {
                        source: Self::source_for(name),
                        variant: Some(variant.to_string()),
                    };
                }
            }
        }

        ModelSpec {
            source: Self::source_for(model_arg),
            variant: None,
        }
    }

    /// Parse and apply an explicit `--variant`, which wins over a suffix
    #[must_use]
    pub fn parse_with_variant(model_arg: &str, variant: Option<&str>) -> ModelSpec {
        let mut spec = Self::parse(model_arg);
        if let Some(variant) = variant.filter(|v| !v.is_empty()) {
            spec.variant = Some(variant.to_string());
        }
        spec
    }

    fn source_for(name: &str) -> ModelSource {
        if Path::new(name).exists() {
            ModelSource::External(PathBuf::from(name))
        } else {
            ModelSource::Downloaded(name.to_string())
        }
    }
}
