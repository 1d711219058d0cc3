//! Governance wrapper around a source adapter
//!
//! Every call goes through the same path:
//! 1. reject unsupported operations without spending units
//! 2. acquire a permit, sleeping on `Wait` up to `max_permit_wait`
//! 3. run the call under `call_timeout`
//! 4. report the outcome to the breaker
//! 5. retry `SourceUnavailable` with bounded backoff; never retry a denied permit

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{SharedSource, SourceResult};
use crate::config::Config;
use crate::models::{CandidateId, MediaRecord, Query, SourceKind};
use crate::quota::{DenyReason, OperationKind, Permit, RateLimiter};
use crate::utils::error::SourceError;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Timeouts and retry policy applied to every governed call
#[derive(Debug, Clone)]
pub struct GovernorSettings {
    pub call_timeout: Duration,
    pub max_permit_wait: Duration,
    pub retry: RetryConfig,
}

impl GovernorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            max_permit_wait: config.max_permit_wait(),
            retry: config.retry.clone(),
        }
    }
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Failure of one attempt, split by stage so permit denials are never retried
enum Attempt {
    Permit(SourceError),
    Call(SourceError),
}

impl Attempt {
    fn into_inner(self) -> SourceError {
        match self {
            Self::Permit(e) | Self::Call(e) => e,
        }
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permit(e) => write!(f, "permit: {e}"),
            Self::Call(e) => write!(f, "{e}"),
        }
    }
}

/// Holds the half-open probe slot for one admitted call
///
/// Dropped without [`ProbeLease::settle`] (the call future was cancelled mid-flight), it
/// hands the slot back so the breaker can admit the next probe.
struct ProbeLease {
    limiter: Arc<RateLimiter>,
    source: SourceKind,
    armed: bool,
}

impl ProbeLease {
    fn settle(mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeLease {
    fn drop(&mut self) {
        if self.armed {
            debug!(source = %self.source, "Probe call dropped before reporting");
            self.limiter.abandon_probe(self.source);
        }
    }
}

/// Adapter plus the shared limiter it must answer to
#[derive(Clone)]
pub struct GovernedSource {
    inner: SharedSource,
    limiter: Arc<RateLimiter>,
    settings: GovernorSettings,
}

impl fmt::Debug for GovernedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernedSource")
            .field("kind", &self.inner.kind())
            .field("settings", &self.settings)
            .finish()
    }
}

impl GovernedSource {
    pub fn new(inner: SharedSource, limiter: Arc<RateLimiter>, settings: GovernorSettings) -> Self {
        Self {
            inner,
            limiter,
            settings,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.inner.kind()
    }

    pub fn supports(&self, op: OperationKind) -> bool {
        self.inner.supports(op)
    }

    /// Governed keyword search
    ///
    /// Charged one listing per native page needed to reach `limit`.
    pub async fn search(&self, query: &Query, limit: usize) -> SourceResult<Vec<MediaRecord>> {
        let pages = limit.max(1).div_ceil(self.inner.page_size().max(1));
        let per_page = self
            .limiter
            .cost_of(self.kind(), OperationKind::Search)
            .await;
        let units = per_page.saturating_mul(u32::try_from(pages).unwrap_or(u32::MAX));
        self.call(OperationKind::Search, units, || self.inner.search(query, limit))
            .await
    }

    /// Governed details lookup
    pub async fn fetch_details(&self, id: &str) -> SourceResult<MediaRecord> {
        let units = self.limiter.cost_of(self.kind(), OperationKind::Details).await;
        self.call(OperationKind::Details, units, || self.inner.fetch_details(id))
            .await
    }

    /// Governed related-content lookup
    pub async fn related(&self, id: &CandidateId, limit: usize) -> SourceResult<Vec<CandidateId>> {
        let units = self.limiter.cost_of(self.kind(), OperationKind::Related).await;
        self.call(OperationKind::Related, units, || self.inner.related(id, limit))
            .await
    }

    /// Governed channel upload listing
    pub async fn channel_uploads(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> SourceResult<Vec<MediaRecord>> {
        let units = self
            .limiter
            .cost_of(self.kind(), OperationKind::ChannelUploads)
            .await;
        self.call(OperationKind::ChannelUploads, units, || {
            self.inner.channel_uploads(channel_id, limit)
        })
        .await
    }

    async fn call<T, F, Fut>(&self, op: OperationKind, units: u32, f: F) -> SourceResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let kind = self.kind();
        if !self.inner.supports(op) {
            return Err(SourceError::Unsupported {
                origin: kind,
                operation: op.as_str(),
            });
        }

        let this = self;
        let f = &f;
        with_retry_if(
            &self.settings.retry,
            move || async move { this.attempt(op, units, f).await },
            |failure| matches!(failure, Attempt::Call(e) if e.is_retryable()),
        )
        .await
        .map_err(Attempt::into_inner)
    }

    async fn attempt<T, F, Fut>(&self, op: OperationKind, units: u32, f: &F) -> Result<T, Attempt>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let kind = self.kind();
        let probe = self.permit(units).await.map_err(Attempt::Permit)?;
        let lease = probe.then(|| ProbeLease {
            limiter: Arc::clone(&self.limiter),
            source: kind,
            armed: true,
        });

        let outcome = match tokio::time::timeout(self.settings.call_timeout, f()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SourceError::unavailable(
                kind,
                format!(
                    "{op} timed out after {}ms",
                    self.settings.call_timeout.as_millis()
                ),
            )),
        };

        match &outcome {
            Err(e) if e.is_throttled() => {
                warn!(source = %kind, operation = %op, error = %e, "Source throttled");
                self.limiter.record_throttled(kind).await;
            }
            Err(SourceError::SourceUnavailable { .. }) => {
                self.limiter.release_probe(kind).await;
            }
            // Any other answer proves the source is reachable
            _ => self.limiter.record_success(kind).await,
        }
        if let Some(lease) = lease {
            lease.settle();
        }

        outcome.map_err(Attempt::Call)
    }

    /// Wait for a permit, bounded by `max_permit_wait`
    ///
    /// Returns whether the permit is the breaker's half-open probe.
    async fn permit(&self, units: u32) -> SourceResult<bool> {
        let kind = self.kind();
        let deadline = tokio::time::Instant::now() + self.settings.max_permit_wait;

        loop {
            match self.limiter.acquire(kind, units).await {
                Permit::Granted { probe, .. } => return Ok(probe),
                Permit::Wait(wait) => {
                    if tokio::time::Instant::now() + wait > deadline {
                        return Err(SourceError::unavailable(
                            kind,
                            "rate limit wait exceeds max_permit_wait",
                        ));
                    }
                    debug!(source = %kind, wait_ms = wait.as_millis() as u64, "Waiting for permit");
                    tokio::time::sleep(wait).await;
                }
                Permit::Denied(DenyReason::QuotaExhausted { resets_at }) => {
                    return Err(SourceError::QuotaExhausted {
                        origin: kind,
                        resets_at,
                    });
                }
                Permit::Denied(DenyReason::BreakerOpen { retry_at }) => {
                    let reason = match retry_at {
                        Some(at) => format!("circuit open until {at}"),
                        None => String::from("circuit half-open, probe in flight"),
                    };
                    return Err(SourceError::unavailable(kind, reason));
                }
                Permit::Denied(DenyReason::Unregistered) => {
                    return Err(SourceError::unavailable(kind, "no quota registered"));
                }
            }
        }
    }
}
