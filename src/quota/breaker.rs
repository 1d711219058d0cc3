//! Per-source circuit breaker for throttled sources
//!
//! Closed → Open after `failure_threshold` consecutive throttled responses. Open rejects
//! every call until its cool-down expires, then the next call is admitted as the single
//! HalfOpen probe. A successful probe closes the breaker; a throttled probe reopens it
//! with a doubled cool-down, capped at `max_backoff`. A probe that never reports back is
//! abandoned after `probe_timeout` and the next call probes in its place.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::models::SourceKind;

/// Breaker state visible to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open { until: DateTime<Utc> },
    HalfOpen,
}

impl BreakerState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open { .. } => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { until } => write!(f, "open until {until}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Outcome of asking the breaker for admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// Admitted as the single HalfOpen probe; its outcome must be reported
    Probe,
    /// Rejected; `retry_at` is known while Open, unknown while a probe is in flight
    Reject { retry_at: Option<DateTime<Utc>> },
}

/// Circuit breaker for one source
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    source: SourceKind,
    state: BreakerState,
    consecutive_failures: u32,
    backoff: Duration,
    probe_started: Option<DateTime<Utc>>,
    failure_threshold: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    probe_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(source: SourceKind, config: &BreakerConfig) -> Self {
        let base_backoff = Duration::seconds(config.base_backoff_secs as i64);
        Self {
            source,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            backoff: base_backoff,
            probe_started: None,
            failure_threshold: config.failure_threshold.max(1),
            base_backoff,
            max_backoff: Duration::seconds(config.max_backoff_secs as i64),
            probe_timeout: Duration::seconds(config.probe_timeout_secs.max(1) as i64),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Current cool-down length
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Decide whether a call may go out at `now`
    ///
    /// An expired Open breaker moves to HalfOpen and admits exactly one probe.
    pub fn admit(&mut self, now: DateTime<Utc>) -> Admission {
        match self.state {
            BreakerState::Closed => Admission::Admit,
            BreakerState::Open { until } if now < until => Admission::Reject {
                retry_at: Some(until),
            },
            BreakerState::Open { .. } => {
                self.transition(BreakerState::HalfOpen);
                self.probe_started = Some(now);
                Admission::Probe
            }
            BreakerState::HalfOpen => match self.probe_started {
                Some(started) if now < started + self.probe_timeout => {
                    Admission::Reject { retry_at: None }
                }
                stale => {
                    if let Some(started) = stale {
                        warn!(
                            source = %self.source,
                            started = %started,
                            "Abandoning unanswered half-open probe"
                        );
                    }
                    self.probe_started = Some(now);
                    Admission::Probe
                }
            },
        }
    }

    /// Whether a HalfOpen probe currently holds the slot
    pub fn probe_in_flight(&self) -> bool {
        self.probe_started.is_some()
    }

    /// The source answered without throttling
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        if self.state == BreakerState::HalfOpen {
            self.probe_started = None;
            self.backoff = self.base_backoff;
            self.transition(BreakerState::Closed);
        }
    }

    /// The source returned a 429-class response
    pub fn record_throttled(&mut self, now: DateTime<Utc>) {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    self.backoff = self.base_backoff;
                    self.transition(BreakerState::Open {
                        until: now + self.backoff,
                    });
                }
            }
            BreakerState::HalfOpen => {
                self.probe_started = None;
                self.backoff = (self.backoff * 2).min(self.max_backoff);
                self.transition(BreakerState::Open {
                    until: now + self.backoff,
                });
            }
            // Late responses from calls admitted before the breaker opened
            BreakerState::Open { .. } => {}
        }
    }

    /// The probe ended without telling us anything (timeout, transport error, dropped)
    ///
    /// Frees the probe slot so the next call probes again.
    pub fn release_probe(&mut self) {
        if self.state == BreakerState::HalfOpen {
            self.probe_started = None;
        }
    }

    fn transition(&mut self, next: BreakerState) {
        match next {
            BreakerState::Open { until } => warn!(
                source = %self.source,
                until = %until,
                backoff_secs = self.backoff.num_seconds(),
                "Circuit breaker opened"
            ),
            _ => info!(source = %self.source, state = next.label(), "Circuit breaker transition"),
        }
        crate::metrics::record_breaker_transition(self.source, next.label());
        self.state = next;
    }
}
