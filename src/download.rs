//! Model downloading for `HuggingFace`-layout repositories
//!
//! A repository URL such as `https://huggingface.co/imgly/isnet-general-onnx`
//! is fetched file by file from `<url>/resolve/main/` into a staging
//! directory next to the cache entry, which is renamed into place only once
//! every required file has arrived.

use crate::cache::ModelCache;
use crate::error::{CleanerError, Result};
use reqwest::Client;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// Configuration files every model needs
const REQUIRED_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// ONNX variants to try; at least one must be present
const ONNX_FILES: &[(&str, &str)] = &[
    ("onnx/model.onnx", "fp32"),
    ("onnx/model_fp16.onnx", "fp16"),
];

/// Total timeout per file; model weights run to hundreds of megabytes
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Fetches model repositories into a [`ModelCache`]
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// # Errors
    /// - HTTP client construction fails
    pub fn new(cache: ModelCache, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bgremove-cleaner/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CleanerError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, cache })
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Download the repository at `repo_url` unless it is already cached
    ///
    /// Returns the cache id the model is stored under.
    ///
    /// # Errors
    /// - `repo_url` is not an http(s) URL
    /// - A configuration file cannot be fetched, or no ONNX variant can
    /// - The staging directory cannot be written or moved into the cache
    #[instrument(skip(self))]
    pub async fn download_model(&self, repo_url: &str) -> Result<String> {
        let base = repo_url.trim_end_matches('/');
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(CleanerError::invalid_config(format!(
                "Model URL '{repo_url}' must be an http(s) repository URL"
            )));
        }

        let model_id = ModelCache::url_to_model_id(base);
        if self.cache.is_model_cached(&model_id) {
            debug!(model_id, "Model already cached");
            return Ok(model_id);
        }

        let final_dir = self.cache.get_model_path(&model_id);
        let staging_dir = self.cache.cache_dir().join(format!(".{model_id}.partial"));
        reset_dir(&staging_dir)?;

        info!(model_id, "Downloading model");
        if let Err(e) = self.download_files(base, &staging_dir).await {
            if let Err(cleanup) = fs::remove_dir_all(&staging_dir) {
                warn!(error = %cleanup, "Failed to remove staging directory");
            }
            return Err(e);
        }

        if final_dir.exists() {
            fs::remove_dir_all(&final_dir).map_err(|e| {
                CleanerError::file_io_error("remove incomplete model directory", &final_dir, &e)
            })?;
        }
        fs::rename(&staging_dir, &final_dir).map_err(|e| {
            CleanerError::file_io_error("move downloaded model into cache", &final_dir, &e)
        })?;

        info!(model_id, path = %final_dir.display(), "Model downloaded");
        Ok(model_id)
    }

    async fn download_files(&self, base: &str, dir: &Path) -> Result<()> {
        let raw_base = format!("{base}/resolve/main");

        for file_name in REQUIRED_FILES {
            self.download_file(&format!("{raw_base}/{file_name}"), &dir.join(file_name))
                .await?;
        }

        let mut variants = 0;
        for (file_path, variant) in ONNX_FILES {
            match self
                .download_file(&format!("{raw_base}/{file_path}"), &dir.join(file_path))
                .await
            {
                Ok(bytes) => {
                    variants += 1;
                    info!(variant, bytes, "Downloaded model variant");
                },
                Err(e) => warn!(variant, error = %e, "Model variant not downloaded"),
            }
        }

        if variants == 0 {
            return Err(CleanerError::model(format!(
                "No ONNX model variant could be downloaded from {base}"
            )));
        }
        Ok(())
    }

    /// Stream one file to `local_path`, returning its size
    async fn download_file(&self, url: &str, local_path: &Path) -> Result<u64> {
        debug!(url, path = %local_path.display(), "Downloading file");

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CleanerError::file_io_error("create directory", parent, &e))?;
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CleanerError::network_failure(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CleanerError::UpstreamRejected {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| CleanerError::file_io_error("create file", local_path, &e))?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CleanerError::network_failure(url, e))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| CleanerError::file_io_error("write to file", local_path, &e))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| CleanerError::file_io_error("flush file", local_path, &e))?;
        Ok(written)
    }
}

fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .map_err(|e| CleanerError::file_io_error("remove stale staging directory", dir, &e))?;
    }
    fs::create_dir_all(dir)
        .map_err(|e| CleanerError::file_io_error("create staging directory", dir, &e))
}
