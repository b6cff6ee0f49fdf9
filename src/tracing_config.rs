//! Tracing subscriber configuration
//!
//! The library only emits events; the binary installs a subscriber through
//! [`TracingConfig::init`].

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output format of the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Human-readable output with colors
    #[default]
    Console,
    /// Plain compact output for log collectors without ANSI support
    Compact,
    /// JSON lines for structured log pipelines
    #[cfg(feature = "tracing-json")]
    Json,
}

impl std::str::FromStr for TracingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" | "pretty" => Ok(Self::Console),
            "compact" | "plain" => Ok(Self::Compact),
            #[cfg(feature = "tracing-json")]
            "json" => Ok(Self::Json),
            #[cfg(not(feature = "tracing-json"))]
            "json" => Err("JSON log format requires the 'tracing-json' feature".to_string()),
            other => Err(format!(
                "Unknown log format '{other}'. Expected console, compact or json"
            )),
        }
    }
}

/// Tracing configuration builder
#[derive(Debug, Default)]
pub struct TracingConfig {
    /// Verbosity level (`-v` count)
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Explicit filter directives; take precedence over verbosity
    pub env_filter: Option<String>,
    /// Identifier logged once at startup to correlate one process's lines
    pub instance_id: Option<String>,
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_instance_id<S: Into<String>>(mut self, instance_id: S) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Use `RUST_LOG` as the filter when it is set and non-empty
    #[must_use]
    pub fn with_rust_log(self) -> Self {
        match std::env::var("RUST_LOG") {
            Ok(filter) if !filter.trim().is_empty() => self.with_env_filter(filter),
            _ => self,
        }
    }

    /// Filter directives for the configured verbosity
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info,ort=warn",             // Default: requests, startup, warnings
            1 => "debug,ort=info,hyper=info", // -v: pipeline stages
            _ => "trace",                     // -vv+: everything
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - A global subscriber is already installed
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(directives) => EnvFilter::try_new(directives)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };

        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(fmt_layer).try_init()?;
            },
        }

        if let Some(instance_id) = &self.instance_id {
            tracing::info!(instance_id = %instance_id, "Cleaner instance started");
        }

        Ok(())
    }
}
