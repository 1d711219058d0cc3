//! Error types for source adapters
//!
//! This module defines the failure taxonomy shared by every adapter and the
//! governance layer wrapped around them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::SourceKind;

/// Errors that can occur while talking to an external source
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceError {
    /// The identifier does not correspond to live content (terminal)
    #[error("{origin} has no item {id}")]
    NotFound { origin: SourceKind, id: String },

    /// The source's unit budget for the current window is spent
    #[error("{origin} quota exhausted until {resets_at}")]
    QuotaExhausted {
        origin: SourceKind,
        resets_at: DateTime<Utc>,
    },

    /// Transport failure, timeout, throttling or an open circuit (retryable)
    #[error("{origin} unavailable: {reason}")]
    SourceUnavailable {
        origin: SourceKind,
        reason: String,
        /// Set for 429-class responses so the breaker can count them
        throttled: bool,
    },

    /// The adapter does not implement this operation
    #[error("{origin} does not support {operation}")]
    Unsupported {
        origin: SourceKind,
        operation: &'static str,
    },

    /// Credentials are missing or were rejected (terminal)
    #[error("{origin} rejected the credentials: {reason}")]
    Unauthorized { origin: SourceKind, reason: String },

    /// The source answered but the payload could not be understood
    #[error("{origin} returned an unreadable payload: {reason}")]
    Decode { origin: SourceKind, reason: String },
}

impl SourceError {
    /// Transport-level failure
    pub fn unavailable(origin: SourceKind, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            origin,
            reason: reason.into(),
            throttled: false,
        }
    }

    /// 429-class response
    pub fn throttled(origin: SourceKind, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            origin,
            reason: reason.into(),
            throttled: true,
        }
    }

    /// Unparseable payload
    pub fn decode(origin: SourceKind, reason: impl Into<String>) -> Self {
        Self::Decode {
            origin,
            reason: reason.into(),
        }
    }

    /// Map a reqwest failure onto the taxonomy
    pub fn from_http(origin: SourceKind, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::unavailable(origin, "request timed out")
        } else if err.is_decode() {
            Self::decode(origin, err.to_string())
        } else {
            Self::unavailable(origin, err.to_string())
        }
    }

    /// Map a non-success HTTP status onto the taxonomy
    ///
    /// 404/410 are terminal; 429 and quota-flavoured 403 count as throttling; other
    /// 401/403 are credential failures; 5xx are transient; anything else is treated as a
    /// decode failure.
    pub fn from_status(origin: SourceKind, status: u16, id: Option<&str>, body: &str) -> Self {
        match status {
            404 | 410 => Self::NotFound {
                origin,
                id: id.unwrap_or_default().to_string(),
            },
            429 => Self::throttled(origin, "429 Too Many Requests"),
            403 if body.to_lowercase().contains("quota") => {
                Self::throttled(origin, "403 quota exceeded")
            }
            401 | 403 => Self::Unauthorized {
                origin,
                reason: format!("status {status}"),
            },
            500 | 502 | 503 | 504 => Self::unavailable(origin, format!("server error {status}")),
            _ => Self::decode(origin, format!("unexpected status {status}")),
        }
    }

    /// Source the error originated from
    pub fn source_kind(&self) -> SourceKind {
        match self {
            Self::NotFound { origin, .. }
            | Self::QuotaExhausted { origin, .. }
            | Self::SourceUnavailable { origin, .. }
            | Self::Unsupported { origin, .. }
            | Self::Unauthorized { origin, .. }
            | Self::Decode { origin, .. } => *origin,
        }
    }

    /// Whether a bounded local retry may succeed
    ///
    /// Quota exhaustion is retryable only after the window resets, never within a call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. })
    }

    /// Whether this is a 429-class response
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::SourceUnavailable { throttled: true, .. })
    }

    /// Short machine-readable label
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::Unsupported { .. } => "unsupported",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Decode { .. } => "decode",
        }
    }
}
