//! Fetch → normalize → remove → respond
//!
//! [`CleanPipeline`] owns the fetcher and normalizer and holds a shared handle
//! to the model session. It is built once at startup and shared by every
//! request.

use crate::config::ServerConfig;
use crate::error::{CleanerError, Result};
use crate::normalize::{ImageNormalizer, NormalizedImage};
use crate::processor::{BackendFactory, DefaultBackendFactory, ModelSession};
use crate::response::{fingerprint, ResultArtifact};
use crate::source::{ImageSource, SourceFetcher};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// Orchestrates one clean from source to artifact
#[derive(Debug)]
pub struct CleanPipeline {
    fetcher: SourceFetcher,
    normalizer: ImageNormalizer,
    session: Arc<ModelSession>,
}

impl CleanPipeline {
    #[must_use]
    pub fn new(
        fetcher: SourceFetcher,
        normalizer: ImageNormalizer,
        session: Arc<ModelSession>,
    ) -> Self {
        Self {
            fetcher,
            normalizer,
            session,
        }
    }

    /// Build fetcher and normalizer from `config` around an existing session
    ///
    /// # Errors
    /// - Invalid configuration values
    /// - HTTP client construction failure
    pub fn with_session(config: &ServerConfig, session: Arc<ModelSession>) -> Result<Self> {
        config.validate()?;
        let fetcher = SourceFetcher::new(config.fetch_timeout, config.max_input_bytes)?;
        let normalizer = ImageNormalizer::new(config.max_side)?;
        Ok(Self::new(fetcher, normalizer, session))
    }

    /// Load the configured model and build the whole pipeline
    ///
    /// # Errors
    /// - Same as [`CleanPipeline::with_session`]
    /// - Model resolution or backend initialization failures
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Self::from_config_with_factory(config, &DefaultBackendFactory)
    }

    /// Like [`CleanPipeline::from_config`] with a custom backend factory
    ///
    /// # Errors
    /// - Same as [`CleanPipeline::from_config`]
    pub fn from_config_with_factory(
        config: &ServerConfig,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        config.validate()?;
        let session = Arc::new(ModelSession::from_config(config, factory)?);
        Self::with_session(config, session)
    }

    #[must_use]
    pub fn session(&self) -> &Arc<ModelSession> {
        &self.session
    }

    #[must_use]
    pub fn normalizer(&self) -> ImageNormalizer {
        self.normalizer
    }

    #[must_use]
    pub fn fetcher(&self) -> &SourceFetcher {
        &self.fetcher
    }

    /// Run one source through every stage
    ///
    /// # Errors
    /// - Fetch and normalization errors (caller input)
    /// - [`CleanerError::ModelFailure`] from the model session
    #[instrument(skip_all, fields(source = %source.kind()))]
    pub async fn run(&self, source: ImageSource) -> Result<ResultArtifact> {
        let start = Instant::now();
        let payload = self.fetcher.fetch(source).await?;
        let kind = payload.kind;

        let normalized = self.normalize(payload.bytes).await?;
        let fingerprint = fingerprint(&normalized.png);
        let dimensions = normalized.dimensions();

        let png = self.session.remove_background(normalized).await?;

        info!(
            width = dimensions.0,
            height = dimensions.1,
            output_bytes = png.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Clean completed"
        );

        Ok(ResultArtifact {
            png,
            fingerprint,
            source: kind,
        })
    }

    /// Normalize on the blocking pool
    ///
    /// # Errors
    /// - Normalizer errors, or [`CleanerError::NormalizationFailed`] when the
    ///   blocking task itself fails
    pub async fn normalize(&self, bytes: Vec<u8>) -> Result<NormalizedImage> {
        let normalizer = self.normalizer;
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            normalizer.normalize(&bytes)
        })
        .await
        .map_err(|e| CleanerError::NormalizationFailed(format!("normalization task failed: {e}")))?
    }
}
