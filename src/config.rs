//! Configuration types for the cleaning service

use crate::error::{CleanerError, Result};
use crate::models::ModelSpec;
use crate::normalize::DEFAULT_MAX_SIDE;
use crate::processor::BackendType;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default upper bound for an uploaded or fetched image (25 MiB)
pub const DEFAULT_MAX_INPUT_BYTES: usize = 25 * 1024 * 1024;

/// Default total timeout for fetching a remote image
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default listen address
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Settings handed to a backend when it loads its model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl InferenceConfig {
    /// Split a total thread budget into intra-op and inter-op counts
    ///
    /// `0` keeps both on auto-detection; otherwise inter-op gets half the
    /// budget, at least one thread.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads;
        self.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }
}

/// Process-wide configuration, read once at startup
#[derive(Clone)]
pub struct ServerConfig {
    /// Shared secret expected in `X-Cleaner-Token`; `None` disables the check
    pub token: Option<String>,

    /// Which model to load
    pub model_spec: ModelSpec,

    /// Which inference backend runs the model
    pub backend_type: BackendType,

    /// Backend tuning
    pub inference: InferenceConfig,

    /// Upper bound on the longest side of a normalized image
    pub max_side: u32,

    /// Upper bound on the size of an uploaded or fetched payload
    pub max_input_bytes: usize,

    /// Total timeout for a remote fetch, redirects included
    pub fetch_timeout: Duration,

    /// Include model failure detail in 502 bodies
    pub debug: bool,

    /// Listen address
    pub bind_addr: SocketAddr,

    /// Override for the model cache root
    pub cache_dir: Option<PathBuf>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("model_spec", &self.model_spec)
            .field("backend_type", &self.backend_type)
            .field("inference", &self.inference)
            .field("max_side", &self.max_side)
            .field("max_input_bytes", &self.max_input_bytes)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("debug", &self.debug)
            .field("bind_addr", &self.bind_addr)
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            token: None,
            model_spec: ModelSpec::default(),
            backend_type: BackendType::default(),
            inference: InferenceConfig::default(),
            max_side: DEFAULT_MAX_SIDE,
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            debug: false,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            cache_dir: None,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use bgremove_cleaner::ServerConfig;
    ///
    /// let config = ServerConfig::builder()
    ///     .token("s3cret")
    ///     .max_side(1024)
    ///     .build()
    ///     .unwrap();
    /// assert!(config.auth_enabled());
    /// ```
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Whether requests must present the shared token
    #[must_use]
    pub fn auth_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - `max_side` is zero
    /// - `max_input_bytes` is zero
    /// - `fetch_timeout` is zero
    pub fn validate(&self) -> Result<()> {
        if self.max_side == 0 {
            return Err(CleanerError::invalid_config("max side must be at least 1"));
        }

        if self.max_input_bytes == 0 {
            return Err(CleanerError::invalid_config(
                "max input bytes must be at least 1",
            ));
        }

        if self.fetch_timeout.is_zero() {
            return Err(CleanerError::invalid_config(
                "fetch timeout must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// Builder for `ServerConfig`
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the shared token; an empty string disables the check
    #[must_use]
    pub fn token<S: Into<String>>(mut self, token: S) -> Self {
        let token = token.into();
        self.config.token = if token.is_empty() { None } else { Some(token) };
        self
    }

    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.inference.execution_provider = provider;
        self
    }

    /// Set the total inference thread budget (0 = auto)
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.inference = self.config.inference.with_threads(threads);
        self
    }

    #[must_use]
    pub fn max_side(mut self, max_side: u32) -> Self {
        self.config.max_side = max_side;
        self
    }

    #[must_use]
    pub fn max_input_bytes(mut self, max_input_bytes: usize) -> Self {
        self.config.max_input_bytes = max_input_bytes;
        self
    }

    #[must_use]
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    #[must_use]
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    #[must_use]
    pub fn cache_dir(mut self, cache_dir: Option<PathBuf>) -> Self {
        self.config.cache_dir = cache_dir;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Any of the checks in [`ServerConfig::validate`]
    pub fn build(self) -> Result<ServerConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
