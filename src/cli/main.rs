//! Background removal HTTP service
//!
//! Parses arguments (with environment fallbacks), downloads the model on first
//! start, loads it once and serves until Ctrl+C or SIGTERM.

use super::config::CliConfigBuilder;
use crate::{
    cache::{self, ModelCache, DEFAULT_MODEL_ID, DEFAULT_MODEL_URL},
    config::{ServerConfig, DEFAULT_BIND_ADDR, DEFAULT_MAX_INPUT_BYTES},
    download::{ModelDownloader, DEFAULT_DOWNLOAD_TIMEOUT},
    models::ModelSource,
    normalize::DEFAULT_MAX_SIDE,
    pipeline::CleanPipeline,
    processor::BackendType,
    server::CleanerServer,
    tracing_config::{TracingConfig, TracingFormat},
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Background removal HTTP service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-cleaner")]
pub struct Cli {
    /// Shared secret expected in the X-Cleaner-Token header (unset or empty disables auth)
    #[arg(long, env = "CLEANER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Model id in the cache, HuggingFace URL, or path to a model folder (optionally `:variant`)
    #[arg(short, long, env = "CLEANER_MODEL", default_value = DEFAULT_MODEL_ID)]
    pub model: String,

    /// Model variant (fp16, fp32) [default: best for the execution provider]
    #[arg(long, env = "CLEANER_MODEL_VARIANT")]
    pub variant: Option<String>,

    /// Execution provider in format backend:provider (e.g., onnx:auto, onnx:cuda, tract:cpu, mock)
    #[arg(short, long, env = "CLEANER_EXECUTION_PROVIDER", default_value = "onnx:auto")]
    pub execution_provider: String,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long, env = "CLEANER_THREADS", default_value_t = 0)]
    pub threads: usize,

    /// Longest side of a normalized image, in pixels
    #[arg(long, env = "CLEANER_MAX_SIDE", default_value_t = DEFAULT_MAX_SIDE)]
    pub max_side: u32,

    /// Largest accepted upload or remote image, in bytes
    #[arg(long, env = "CLEANER_MAX_INPUT_BYTES", default_value_t = DEFAULT_MAX_INPUT_BYTES)]
    pub max_input_bytes: usize,

    /// Total timeout for fetching an image_url, in seconds
    #[arg(long, env = "CLEANER_FETCH_TIMEOUT", value_name = "SECONDS", default_value_t = 30)]
    pub fetch_timeout: u64,

    /// Include model failure detail in 502 responses (CLEANER_DEBUG accepts 1/0, true/false, yes/no, on/off)
    #[arg(
        long,
        env = "CLEANER_DEBUG",
        action = clap::ArgAction::SetTrue,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub debug: bool,

    /// Address to listen on
    #[arg(long, env = "CLEANER_BIND", default_value = DEFAULT_BIND_ADDR)]
    pub bind: SocketAddr,

    /// Use custom model cache directory
    #[arg(long, env = "CLEANER_CACHE_DIR", value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format (console, compact, json)
    #[arg(long, env = "CLEANER_LOG_FORMAT", default_value = "console")]
    pub log_format: TracingFormat,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(cli.log_format)
        .with_rust_log()
        .with_instance_id(uuid::Uuid::new_v4().to_string())
        .init()
        .context("Failed to initialize tracing subscriber")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    if cli.list_models {
        return list_cached_models(&cli);
    }

    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    if !config.auth_enabled() {
        warn!("CLEANER_TOKEN is not set: /clean, /selftest and /info accept unauthenticated requests");
    }
    info!(
        backend = %config.backend_type,
        provider = %config.inference.execution_provider,
        model = %config.model_spec.source.display_name(),
        max_side = config.max_side,
        debug = config.debug,
        "Starting bgremove-cleaner"
    );

    ensure_model_available(&config, &cli.model).await?;

    let start = Instant::now();
    let pipeline = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || CleanPipeline::from_config(&config))
            .await
            .context("Model loading task failed")?
            .context("Failed to load model session")?
    };
    info!(
        load_ms = start.elapsed().as_millis() as u64,
        model = %pipeline.session().info().name,
        "Model session loaded"
    );

    CleanerServer::new(&config, Arc::new(pipeline))
        .run()
        .await
        .with_context(|| format!("HTTP server on {} failed", config.bind_addr))
}

/// Download the configured cache model if it is not there yet
async fn ensure_model_available(config: &ServerConfig, model_arg: &str) -> Result<()> {
    if config.backend_type == BackendType::Mock {
        return Ok(());
    }
    let ModelSource::Downloaded(model_id) = &config.model_spec.source else {
        return Ok(());
    };

    let cache =
        ModelCache::open(config.cache_dir.as_deref()).context("Failed to initialize model cache")?;
    if cache.is_model_cached(model_id) {
        return Ok(());
    }

    let Some(url) = download_url(model_arg, model_id) else {
        anyhow::bail!(
            "Model '{model_id}' is not in {} and has no known download URL; \
             pass a HuggingFace URL or a model directory with --model",
            cache.cache_dir().display()
        );
    };

    info!(model_id, url, "Model not cached, downloading");
    let start = Instant::now();
    ModelDownloader::new(cache, DEFAULT_DOWNLOAD_TIMEOUT)?
        .download_model(url)
        .await
        .with_context(|| format!("Failed to download model from {url}"))?;
    info!(
        model_id,
        download_ms = start.elapsed().as_millis() as u64,
        "Model ready"
    );
    Ok(())
}

/// Repository to fetch a missing cache model from
fn download_url<'a>(model_arg: &'a str, model_id: &str) -> Option<&'a str> {
    if model_arg.starts_with("https://") || model_arg.starts_with("http://") {
        Some(model_arg)
    } else if model_id == DEFAULT_MODEL_ID {
        Some(DEFAULT_MODEL_URL)
    } else {
        None
    }
}

/// Display execution provider diagnostics
fn show_provider_diagnostics() {
    println!("Backend and Execution Provider Diagnostics");
    println!("------------------------------------------");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("System: {cpu_count} CPU cores detected");

    println!("\nExecution Providers:");
    for provider_info in ExecutionProviderManager::list_all_providers() {
        let status = if provider_info.available {
            "available"
        } else {
            "not available"
        };
        println!(
            "  - {}: {} - {}",
            provider_info.name, status, provider_info.description
        );
    }

    println!("\nUsage Examples:");
    println!("  --execution-provider onnx:auto    # Auto-select best ONNX provider (default)");
    println!("  --execution-provider onnx:cuda    # Use NVIDIA CUDA");
    println!("  --execution-provider onnx:cpu     # Force ONNX CPU execution");
    println!("  --execution-provider tract:cpu    # Use pure Rust Tract backend");
    println!("  --execution-provider mock         # No model; white background threshold");
}

/// List cached models available to the service
fn list_cached_models(cli: &Cli) -> Result<()> {
    let cache =
        ModelCache::open(cli.cache_dir.as_deref()).context("Failed to initialize model cache")?;
    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("Cached Models ({})", cache.cache_dir().display());
    println!("------------------------------------------");

    if models.is_empty() {
        println!("No cached models found.");
        println!(
            "\nPlace a HuggingFace-layout model folder under the cache directory, \
             or pass --model /path/to/model"
        );
        return Ok(());
    }

    for model in models {
        println!("Model ID: {}", model.model_id);
        println!("  Cache location: {}", model.path.display());
        if !model.variants.is_empty() {
            println!("  Variants: {}", model.variants.join(", "));
        }
        if model.size_bytes > 0 {
            println!("  Size: {}", cache::format_size(model.size_bytes));
        }
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::sync::Mutex;

    // Serializes tests that read or write CLEANER_DEBUG
    static DEBUG_ENV: Mutex<()> = Mutex::new(());

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let _guard = DEBUG_ENV.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let cli = Cli::try_parse_from(["bgremove-cleaner"]).unwrap();
        assert_eq!(cli.model, DEFAULT_MODEL_ID);
        assert_eq!(cli.execution_provider, "onnx:auto");
        assert_eq!(cli.max_side, 2048);
        assert_eq!(cli.max_input_bytes, 26_214_400);
        assert_eq!(cli.fetch_timeout, 30);
        assert_eq!(cli.bind.to_string(), "0.0.0.0:8000");
        assert_eq!(cli.log_format, TracingFormat::Console);
        assert!(!cli.debug);
    }

    #[test]
    fn test_verbosity_and_flags() {
        let cli = Cli::try_parse_from(["bgremove-cleaner", "-vv", "--show-providers"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.show_providers);
    }

    #[test]
    fn test_debug_flag_and_boolish_env() {
        let _guard = DEBUG_ENV.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let cli = Cli::try_parse_from(["bgremove-cleaner", "--debug"]).unwrap();
        assert!(cli.debug);

        let cases = [("1", true), ("yes", true), ("on", true), ("0", false), ("no", false)];
        for (value, expected) in cases {
            std::env::set_var("CLEANER_DEBUG", value);
            let parsed = Cli::try_parse_from(["bgremove-cleaner"]);
            std::env::remove_var("CLEANER_DEBUG");
            assert_eq!(parsed.unwrap().debug, expected, "CLEANER_DEBUG={value}");
        }
    }

    #[test]
    fn test_download_url() {
        assert_eq!(
            download_url(DEFAULT_MODEL_ID, DEFAULT_MODEL_ID),
            Some(DEFAULT_MODEL_URL)
        );

        let url = "https://huggingface.co/imgly/isnet-general-onnx";
        assert_eq!(download_url(url, &ModelCache::url_to_model_id(url)), Some(url));
        assert_eq!(
            download_url("http://127.0.0.1:9000/acme/seg", "url-0123456789ab"),
            Some("http://127.0.0.1:9000/acme/seg")
        );

        assert_eq!(download_url("someone--custom-model", "someone--custom-model"), None);
    }

    #[tokio::test]
    async fn test_mock_backend_skips_model_download() {
        let cli = Cli::try_parse_from([
            "bgremove-cleaner",
            "--execution-provider",
            "mock",
            "--model",
            "someone--never-cached",
        ])
        .unwrap();
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert!(ensure_model_available(&config, &cli.model).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_uncached_model_is_reported() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache_dir = temp_dir.path().to_string_lossy().to_string();
        let cli = Cli::try_parse_from([
            "bgremove-cleaner",
            "--execution-provider",
            "onnx:cpu",
            "--model",
            "someone--never-cached",
            "--cache-dir",
            cache_dir.as_str(),
        ])
        .unwrap();
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        let err = ensure_model_available(&config, &cli.model).await.unwrap_err();
        assert!(format!("{err:#}").contains("no known download URL"));
    }

    #[test]
    fn test_bad_bind_address() {
        assert!(Cli::try_parse_from(["bgremove-cleaner", "--bind", "not-an-addr"]).is_err());
    }
}
