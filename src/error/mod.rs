//! Error types and handling for the instrument cache
//!
//! Cache misses are never errors: lookups return `Option`. The variants here
//! cover construction-time misconfiguration and the I/O and encoding failures
//! the durable tier reports internally before downgrading them to a miss.

use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Durable store and filesystem errors
    Storage,
    /// Configuration and setup errors
    Configuration,
    /// Record encoding and decoding errors
    Serialization,
    /// Internal invariant errors
    Internal,
}

impl ErrorCategory {
    /// Whether an error in this category is recovered locally by the cache
    /// rather than surfaced to the caller.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Storage | Self::Serialization)
    }
}

/// Cache error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Unsupported record version: {0}")]
    UnsupportedVersion(u32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("Failed to parse config: {}", err))
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(format!("Failed to serialize config: {}", err))
    }
}

impl Error {
    /// Get a stable error code for telemetry
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "C001",
            Self::Serialization(_) => "C002",
            Self::CorruptRecord(_) => "C003",
            Self::UnsupportedVersion(_) => "C004",
            Self::Config(_) | Self::InvalidConfiguration(_) => "C005",
            Self::InternalError(_) => "C006",
        }
    }

    /// Get the error category for monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io(_) => ErrorCategory::Storage,
            Self::Serialization(_) | Self::CorruptRecord(_) | Self::UnsupportedVersion(_) => {
                ErrorCategory::Serialization
            }
            Self::Config(_) | Self::InvalidConfiguration(_) => ErrorCategory::Configuration,
            Self::InternalError(_) => ErrorCategory::Internal,
        }
    }

    /// Create a validation error for a configuration field
    pub fn invalid_config(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Error::InvalidConfiguration(format!(
            "field '{}' violates constraint '{}'",
            field.into(),
            constraint.into()
        ))
    }
}
