//! Error types for the cleaning service
//!
//! Every component returns [`CleanerError`]. The HTTP boundary maps each error
//! to one [`ErrorKind`], and the kind alone decides the status code the caller
//! sees. Detail text is for server-side logs; [`CleanerError::reason`] is the
//! only text that is always safe to put in a response body.

use thiserror::Error;

/// Result type alias for cleaning operations
pub type Result<T> = std::result::Result<T, CleanerError>;

/// Caller-visible error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or incorrect shared secret
    Unauthorized,
    /// The caller supplied a bad request or bad image
    InvalidInput,
    /// The remote image host could not be reached or refused the request
    UpstreamFetchFailure,
    /// The background-removal model failed
    ModelFailure,
    /// Startup and configuration failures; never produced while serving a request
    Internal,
}

/// Errors produced by the fetch → normalize → remove → respond pipeline
#[derive(Error, Debug)]
pub enum CleanerError {
    #[error("missing or invalid cleaner token")]
    Unauthorized,

    #[error("request carried neither a file nor an image_url")]
    MissingSource,

    #[error("request carried more than one image source")]
    ConflictingSources,

    #[error("input from {0} is empty")]
    EmptyInput(&'static str),

    #[error("declared content type '{0}' is not an image type")]
    WrongContentType(String),

    #[error("invalid image_url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("input exceeds the {limit} byte limit")]
    InputTooLarge { limit: usize },

    #[error("malformed request: {0}")]
    InvalidRequest(String),

    #[error("network failure fetching '{url}': {source}")]
    NetworkFailure {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream rejected '{url}' with HTTP {status}")]
    UpstreamRejected { url: String, status: u16 },

    #[error("unsupported or corrupt image: {0}")]
    UnsupportedImage(String),

    #[error("image normalization failed: {0}")]
    NormalizationFailed(String),

    #[error("background removal failed ({error_type}): {detail}")]
    ModelFailure {
        detail: String,
        error_type: &'static str,
    },

    /// Backend inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Model loading or metadata errors
    #[error("Model error: {0}")]
    Model(String),

    /// Tensor and mask processing errors
    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CleanerError {
    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    pub fn invalid_url<U: Into<String>, R: Into<String>>(url: U, reason: R) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn network_failure<U: Into<String>>(url: U, source: reqwest::Error) -> Self {
        Self::NetworkFailure {
            url: url.into(),
            source,
        }
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Wrap any error raised while running the model into a [`CleanerError::ModelFailure`]
    ///
    /// Errors that already are model failures pass through unchanged.
    #[must_use]
    pub fn into_model_failure(self) -> Self {
        match self {
            failure @ Self::ModelFailure { .. } => failure,
            other => Self::ModelFailure {
                error_type: other.type_name(),
                detail: other.to_string(),
            },
        }
    }

    /// Caller-visible class of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::MissingSource
            | Self::ConflictingSources
            | Self::EmptyInput(_)
            | Self::WrongContentType(_)
            | Self::InvalidUrl { .. }
            | Self::InputTooLarge { .. }
            | Self::InvalidRequest(_)
            | Self::UnsupportedImage(_)
            | Self::NormalizationFailed(_) => ErrorKind::InvalidInput,
            Self::NetworkFailure { .. } | Self::UpstreamRejected { .. } => {
                ErrorKind::UpstreamFetchFailure
            },
            Self::ModelFailure { .. } | Self::Inference(_) | Self::Processing(_) => {
                ErrorKind::ModelFailure
            },
            Self::Model(_) | Self::InvalidConfig(_) | Self::Io(_) | Self::Internal(_) => {
                ErrorKind::Internal
            },
        }
    }

    /// Short machine-readable reason that never carries internal detail
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::MissingSource => "provide image_url or file",
            Self::ConflictingSources => "provide only one of file or image_url",
            Self::EmptyInput(_) => "empty input",
            Self::WrongContentType(_) => "file must be an image",
            Self::InvalidUrl { .. } => "invalid image_url",
            Self::InputTooLarge { .. } => "input too large",
            Self::InvalidRequest(_) => "invalid request",
            Self::UnsupportedImage(_) | Self::NormalizationFailed(_) => {
                "unsupported or corrupt image"
            },
            Self::NetworkFailure { .. } | Self::UpstreamRejected { .. } => {
                "failed to fetch image_url"
            },
            Self::ModelFailure { .. } | Self::Inference(_) | Self::Processing(_) => {
                "background removal failed"
            },
            Self::Model(_) | Self::InvalidConfig(_) | Self::Io(_) | Self::Internal(_) => {
                "internal error"
            },
        }
    }

    /// HTTP status returned by the remote host, when the failure carries one
    #[must_use]
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::UpstreamRejected { status, .. } => Some(*status),
            Self::NetworkFailure { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Name of the variant, used as the `error_type` in debug responses
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Unauthorized",
            Self::MissingSource => "MissingSource",
            Self::ConflictingSources => "ConflictingSources",
            Self::EmptyInput(_) => "EmptyInput",
            Self::WrongContentType(_) => "WrongContentType",
            Self::InvalidUrl { .. } => "InvalidUrl",
            Self::InputTooLarge { .. } => "InputTooLarge",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::NetworkFailure { .. } => "NetworkFailure",
            Self::UpstreamRejected { .. } => "UpstreamRejected",
            Self::UnsupportedImage(_) => "UnsupportedImage",
            Self::NormalizationFailed(_) => "NormalizationFailed",
            Self::ModelFailure { error_type, .. } => *error_type,
            Self::Inference(_) => "Inference",
            Self::Model(_) => "Model",
            Self::Processing(_) => "Processing",
            Self::InvalidConfig(_) => "InvalidConfig",
            Self::Io(_) => "Io",
            Self::Internal(_) => "Internal",
        }
    }
}
