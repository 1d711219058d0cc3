//! Unified error handling for the obscura crate
//!
//! This module provides a unified error type that consolidates the adapter-level
//! [`SourceError`] with caller errors (invalid queries and IDs), configuration errors
//! and operation-level failures.
//!
//! # Architecture
//!
//! - [`EngineErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum
//!
//! # Usage
//!
//! ```rust,ignore
//! use obscura::error::{EngineErrorTrait, Error};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retry later: {err}");
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::models::IdError;
pub use crate::utils::error::SourceError;

use crate::models::SourceKind;

/// Common trait for obscura error types
pub trait EngineErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transport, timeout and throttling errors
    Network,
    /// Budget exhaustion
    Quota,
    /// Caller errors rejected before any external call
    Validation,
    /// Payload decoding errors
    Parsing,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Get a short description for the category
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Network => "network error",
            Self::Quota => "quota error",
            Self::Validation => "validation error",
            Self::Parsing => "parsing error",
            Self::Config => "configuration error",
            Self::Other => "other error",
        }
    }
}

impl EngineErrorTrait for SourceError {
    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::QuotaExhausted { .. }
        )
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::SourceUnavailable { .. } => ErrorCategory::Network,
            Self::QuotaExhausted { .. } => ErrorCategory::Quota,
            Self::Decode { .. } => ErrorCategory::Parsing,
            Self::Unauthorized { .. } => ErrorCategory::Config,
            Self::NotFound { .. } | Self::Unsupported { .. } => ErrorCategory::Other,
        }
    }
}

/// Unified error type for the obscura crate
#[derive(Error, Debug)]
pub enum Error {
    /// Adapter and governance errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Impossible or out-of-bounds query, rejected before any external call
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Malformed candidate ID
    #[error("Invalid ID: {0}")]
    InvalidId(#[from] IdError),

    /// Every requested source failed and nothing was collected
    #[error("All sources failed: {}", summarize(.0))]
    AllSourcesFailed(Vec<SourceError>),

    /// No configured adapter can serve the request
    #[error("No source available for {0}")]
    NoSource(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

fn summarize(errors: &[SourceError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl EngineErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Source(e) => e.is_recoverable(),
            Self::AllSourcesFailed(errors) => errors.iter().any(|e| e.is_recoverable()),
            Self::InvalidQuery(_) | Self::InvalidId(_) | Self::NoSource(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Http(_) => true, // HTTP errors are often transient
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Source(e) => e.category(),
            Self::AllSourcesFailed(errors) => {
                if !errors.is_empty()
                    && errors
                        .iter()
                        .all(|e| matches!(e, SourceError::QuotaExhausted { .. }))
                {
                    ErrorCategory::Quota
                } else {
                    ErrorCategory::Network
                }
            }
            Self::InvalidQuery(_) | Self::InvalidId(_) => ErrorCategory::Validation,
            Self::NoSource(_) | Self::Config(_) => ErrorCategory::Config,
            Self::Io(_) | Self::Http(_) => ErrorCategory::Network,
            Self::Json(_) => ErrorCategory::Parsing,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create an invalid-query error
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// No adapter registered for `source`
    pub fn no_source(source: SourceKind) -> Self {
        Self::NoSource(source.to_string())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
