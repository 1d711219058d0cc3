//! Operation lifecycle: cancellation and final status
//!
//! A [`Cancellation`] owns a `watch` flag; every [`CancelToken`] cloned from it observes
//! the flag. Operations check the token between external calls and race it against
//! in-flight calls with `tokio::select!`, returning what they collected so far.
//!
//! Every search, crawl and probe ends with an [`OperationStatus`] next to its results.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::utils::error::SourceError;

/// How an operation ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationStatus {
    /// Every source or branch answered
    Complete,
    /// Some sources or branches failed; the results are valid but incomplete
    PartialFailure { failures: Vec<SourceError> },
    /// Stopped by the caller; results collected before the signal are kept
    Cancelled,
    /// Stopped because a unit budget ran out
    QuotaExhausted,
}

impl OperationStatus {
    /// Status of an operation that collected results
    ///
    /// Cancellation wins over quota exhaustion, which wins over other failures.
    pub fn resolve(cancelled: bool, quota_stopped: bool, failures: Vec<SourceError>) -> Self {
        if cancelled {
            Self::Cancelled
        } else if quota_stopped {
            Self::QuotaExhausted
        } else if failures.is_empty() {
            Self::Complete
        } else {
            Self::PartialFailure { failures }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::PartialFailure { .. } => "partial_failure",
            Self::Cancelled => "cancelled",
            Self::QuotaExhausted => "quota_exhausted",
        }
    }
}

/// Owner side of a cancellation flag
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Token handed to an operation
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.rx.clone(),
        }
    }

    /// Signal every token; idempotent
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Observer side of a cancellation flag
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Token that is never cancelled
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled; pends forever for [`CancelToken::never`]
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without cancelling
                std::future::pending::<()>().await;
            }
        }
    }
}
