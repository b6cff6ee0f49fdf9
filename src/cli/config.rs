//! Conversion of CLI arguments into a [`ServerConfig`]

use crate::cli::main_impl::Cli;
use crate::{
    config::ServerConfig,
    utils::{ExecutionProviderManager, ModelSpecParser},
};
use anyhow::{Context, Result};
use std::time::Duration;

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build a validated `ServerConfig` from parsed arguments
    pub(crate) fn from_cli(cli: &Cli) -> Result<ServerConfig> {
        let (backend_type, execution_provider) =
            ExecutionProviderManager::parse_provider_string(&cli.execution_provider)
                .context("Invalid execution provider format")?;

        let model_spec = ModelSpecParser::parse_with_variant(&cli.model, cli.variant.as_deref());

        ServerConfig::builder()
            .token(cli.token.clone().unwrap_or_default())
            .model_spec(model_spec)
            .backend_type(backend_type)
            .execution_provider(execution_provider)
            .num_threads(cli.threads)
            .max_side(cli.max_side)
            .max_input_bytes(cli.max_input_bytes)
            .fetch_timeout(Duration::from_secs(cli.fetch_timeout))
            .debug(cli.debug)
            .bind_addr(cli.bind)
            .cache_dir(cli.cache_dir.clone())
            .build()
            .context("Invalid configuration")
    }
}
