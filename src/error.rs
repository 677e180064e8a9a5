//! Error types for pipeline and detection operations

use crate::providers::ProviderKind;
use thiserror::Error;

/// Result type alias for AutoRender operations
pub type Result<T> = std::result::Result<T, AutoRenderError>;

/// Error types surfaced by the pipeline engine and detection orchestrator
#[derive(Error, Debug)]
pub enum AutoRenderError {
    /// Malformed or missing required input. Raised before any provider runs.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A detection or crop found nothing to work with
    #[error("Not found: {0}")]
    NotFound(String),

    /// A required provider is absent or failed to load
    #[error("Provider unavailable ({provider}): {reason}")]
    ProviderUnavailable {
        provider: ProviderKind,
        reason: String,
    },

    /// A provider raised an error during inference
    #[error("Provider failure ({provider}): {message}")]
    ProviderFailure {
        provider: ProviderKind,
        message: String,
    },

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Input/output errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by callers to pick a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameter,
    NotFound,
    ProviderUnavailable,
    ProviderFailure,
    Internal,
}

impl ErrorKind {
    /// Whether retrying the same request later may succeed
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ProviderUnavailable)
    }

    /// HTTP status conventionally used for this kind
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidParameter => 400,
            Self::NotFound => 404,
            Self::ProviderUnavailable => 503,
            Self::ProviderFailure | Self::Internal => 500,
        }
    }
}

impl AutoRenderError {
    /// Create a new invalid parameter error
    pub fn invalid_parameter<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new provider-unavailable error
    pub fn provider_unavailable<S: Into<String>>(provider: ProviderKind, reason: S) -> Self {
        Self::ProviderUnavailable {
            provider,
            reason: reason.into(),
        }
    }

    /// Create a new provider failure error
    pub fn provider_failure<S: Into<String>>(provider: ProviderKind, message: S) -> Self {
        Self::ProviderFailure {
            provider,
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create configuration error with valid ranges
    pub fn parameter_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidParameter(format!(
            "Invalid {}: {} (valid range: {})",
            parameter, value, valid_range
        ))
    }

    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ProviderUnavailable { .. } => ErrorKind::ProviderUnavailable,
            Self::ProviderFailure { .. } => ErrorKind::ProviderFailure,
            // Undecodable input is mapped to InvalidParameter where it is decoded
            Self::Image(_) | Self::Io(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Re-attribute an error raised inside a provider call.
    ///
    /// Typed provider errors pass through; anything else becomes a
    /// `ProviderFailure` naming `provider`.
    #[must_use]
    pub fn attribute_to(self, provider: ProviderKind) -> Self {
        match self {
            Self::ProviderUnavailable { .. } | Self::ProviderFailure { .. } => self,
            other => Self::provider_failure(provider, other.to_string()),
        }
    }
}
