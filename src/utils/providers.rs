//! Execution provider parsing and discovery

use crate::{
    config::ExecutionProvider,
    error::{CleanerError, Result},
    processor::BackendType,
};

/// Information about a backend/provider combination
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub execution_provider: ExecutionProvider,
    pub available: bool,
    pub description: String,
}

/// Utility for parsing and listing execution providers
pub struct ExecutionProviderManager;

impl ExecutionProviderManager {
    /// Parse a provider string in `backend:provider` form
    ///
    /// Accepted values: `onnx:auto`, `onnx:cpu`, `onnx:cuda`, `onnx:coreml`,
    /// `tract:cpu`, and `mock`. A bare backend name uses its default provider.
    ///
    /// ```rust
    /// use bgremove_cleaner::utils::ExecutionProviderManager;
    /// use bgremove_cleaner::{BackendType, ExecutionProvider};
    ///
    /// let (backend, provider) = ExecutionProviderManager::parse_provider_string("onnx:cuda").unwrap();
    /// assert_eq!(backend, BackendType::Onnx);
    /// assert_eq!(provider, ExecutionProvider::Cuda);
    /// ```
    ///
    /// # Errors
    /// - Unknown backend or provider name
    pub fn parse_provider_string(provider_str: &str) -> Result<(BackendType, ExecutionProvider)> {
        let normalized = provider_str.trim().to_ascii_lowercase();
        let (backend, provider) = match normalized.split_once(':') {
            Some((backend, provider)) => (backend, Some(provider)),
            None => (normalized.as_str(), None),
        };

        match backend {
            "onnx" => {
                let execution_provider = match provider.unwrap_or("auto") {
                    "auto" => ExecutionProvider::Auto,
                    "cpu" => ExecutionProvider::Cpu,
                    "cuda" => ExecutionProvider::Cuda,
                    "coreml" => ExecutionProvider::CoreMl,
                    other => {
                        return Err(CleanerError::invalid_config(format!(
                            "Unknown ONNX provider: {other}. Supported: auto, cpu, cuda, coreml"
                        )));
                    },
                };
                Ok((BackendType::Onnx, execution_provider))
            },
            "tract" => match provider.unwrap_or("cpu") {
                "cpu" => Ok((BackendType::Tract, ExecutionProvider::Cpu)),
                other => Err(CleanerError::invalid_config(format!(
                    "Unknown Tract provider: {other}. Tract only supports 'cpu'"
                ))),
            },
            "mock" => match provider {
                None | Some("cpu") => Ok((BackendType::Mock, ExecutionProvider::Cpu)),
                Some(other) => Err(CleanerError::invalid_config(format!(
                    "Unknown mock provider: {other}"
                ))),
            },
            other => Err(CleanerError::invalid_config(format!(
                "Unknown backend: {other}. Supported backends: onnx, tract, mock"
            ))),
        }
    }

    /// Every provider combination this build knows about, with availability
    #[must_use]
    pub fn list_all_providers() -> Vec<ProviderInfo> {
        let mut providers = Vec::new();

        #[cfg(feature = "onnx")]
        {
            let availability: std::collections::HashMap<String, bool> =
                crate::backends::OnnxBackend::list_providers()
                    .into_iter()
                    .map(|(name, available, _)| (name.to_lowercase(), available))
                    .collect();
            let available = |name: &str| availability.get(name).copied().unwrap_or(false);

            for (provider, description) in [
                (ExecutionProvider::Auto, "ONNX Runtime with auto-selected provider"),
                (ExecutionProvider::Cpu, "ONNX Runtime CPU execution"),
                (ExecutionProvider::Cuda, "ONNX Runtime CUDA GPU acceleration"),
                (ExecutionProvider::CoreMl, "ONNX Runtime CoreML (Apple Silicon) acceleration"),
            ] {
                let is_available = match provider {
                    ExecutionProvider::Auto => availability.values().any(|&a| a),
                    other => available(&other.to_string()),
                };
                providers.push(ProviderInfo {
                    name: format!("onnx:{provider}"),
                    backend_type: BackendType::Onnx,
                    execution_provider: provider,
                    available: is_available,
                    description: description.to_string(),
                });
            }
        }

        #[cfg(not(feature = "onnx"))]
        providers.push(ProviderInfo {
            name: "onnx:auto".to_string(),
            backend_type: BackendType::Onnx,
            execution_provider: ExecutionProvider::Auto,
            available: false,
            description: "ONNX Runtime (feature disabled)".to_string(),
        });

        providers.push(ProviderInfo {
            name: "tract:cpu".to_string(),
            backend_type: BackendType::Tract,
            execution_provider: ExecutionProvider::Cpu,
            available: cfg!(feature = "tract"),
            description: if cfg!(feature = "tract") {
                "Pure Rust CPU inference".to_string()
            } else {
                "Pure Rust CPU inference (feature disabled)".to_string()
            },
        });

        providers.push(ProviderInfo {
            name: "mock".to_string(),
            backend_type: BackendType::Mock,
            execution_provider: ExecutionProvider::Cpu,
            available: true,
            description: "Deterministic brightness-threshold mask, no model file needed"
                .to_string(),
        });

        providers
    }
}
