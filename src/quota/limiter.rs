//! Permit issuing for every external call
//!
//! Each source owns a governor token bucket, a [`QuotaBudget`] and a [`CircuitBreaker`],
//! held together behind one `tokio::sync::Mutex`. A permit check is a single critical
//! section over that source only: concurrent operations against other sources never
//! contend, and concurrent debits against the same source cannot double-spend.

use chrono::{DateTime, Utc};
use governor::clock::{Clock as _, DefaultClock};
use governor::state::{direct::NotKeyed, InMemoryState};
use governor::Quota;
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::breaker::{Admission, BreakerState, CircuitBreaker};
use super::budget::{CostTable, OperationKind, QuotaBudget};
use crate::clock::SharedClock;
use crate::config::{BreakerConfig, Config, SourceQuotaConfig};
use crate::models::SourceKind;

type DirectLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Answer to a permit request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permit {
    /// Units were debited; the call may proceed
    ///
    /// `probe` marks the single HalfOpen probe, whose outcome must be reported through
    /// `record_success`, `record_throttled` or `release_probe`.
    Granted {
        units: u64,
        remaining: u64,
        probe: bool,
    },
    /// Token bucket is empty; ask again after the duration
    Wait(Duration),
    /// The call must not be made
    Denied(DenyReason),
}

/// Why a permit was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    QuotaExhausted { resets_at: DateTime<Utc> },
    BreakerOpen { retry_at: Option<DateTime<Utc>> },
    Unregistered,
}

impl DenyReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::BreakerOpen { .. } => "breaker_open",
            Self::Unregistered => "unregistered",
        }
    }
}

/// Read-only view of one source's accounting state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub source: SourceKind,
    pub units_remaining: u64,
    pub ceiling: u64,
    pub window_reset_at: DateTime<Utc>,
    pub breaker: BreakerState,
}

struct SourceState {
    budget: QuotaBudget,
    breaker: CircuitBreaker,
    bucket: DirectLimiter,
}

/// Shared permit issuer for all sources
pub struct RateLimiter {
    sources: HashMap<SourceKind, Mutex<SourceState>>,
    clock: SharedClock,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RateLimiter {
    /// Create an empty limiter; every source must be registered before use
    pub fn new(clock: SharedClock) -> Self {
        Self {
            sources: HashMap::new(),
            clock,
        }
    }

    /// Register every source with the configured budgets and breaker policy
    pub fn from_config(config: &Config, clock: SharedClock) -> Self {
        SourceKind::all().into_iter().fold(Self::new(clock), |limiter, kind| {
            limiter.with_source(kind, config.quota.get(kind), &config.breaker)
        })
    }

    /// Register (or replace) one source
    pub fn with_source(
        mut self,
        source: SourceKind,
        quota: &SourceQuotaConfig,
        breaker: &BreakerConfig,
    ) -> Self {
        let now = self.clock.now();
        let rate = NonZeroU32::new(quota.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(quota.burst).unwrap_or(rate);

        let state = SourceState {
            budget: QuotaBudget::new(
                source,
                quota.window_units,
                chrono::Duration::seconds(quota.window_secs as i64),
                quota.costs,
                now,
            ),
            breaker: CircuitBreaker::new(source, breaker),
            bucket: governor::RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
        };
        self.sources.insert(source, Mutex::new(state));
        self
    }

    /// Cost of `op` on `source` (zero when unregistered)
    pub async fn cost_of(&self, source: SourceKind, op: OperationKind) -> u32 {
        match self.sources.get(&source) {
            Some(state) => state.lock().await.budget.cost_table().cost(op),
            None => 0,
        }
    }

    /// Cost table of `source`
    pub async fn cost_table(&self, source: SourceKind) -> Option<CostTable> {
        let state = self.sources.get(&source)?;
        let table = *state.lock().await.budget.cost_table();
        Some(table)
    }

    /// Request a permit for one operation, priced from the source's cost table
    pub async fn acquire_for(&self, source: SourceKind, op: OperationKind) -> Permit {
        let cost = self.cost_of(source, op).await;
        self.acquire(source, cost).await
    }

    /// Request a permit for a call costing `cost` units
    ///
    /// Order: budget check, breaker admission, token bucket, debit. The budget is only
    /// debited when a call is actually allowed to go out.
    pub async fn acquire(&self, source: SourceKind, cost: u32) -> Permit {
        let Some(state) = self.sources.get(&source) else {
            return self.deny(source, DenyReason::Unregistered);
        };

        let now = self.clock.now();
        let mut state = state.lock().await;
        let units = u64::from(cost);

        state.budget.refresh(now);
        if !state.budget.can_afford(units) {
            let resets_at = state.budget.window_reset_at();
            drop(state);
            return self.deny(source, DenyReason::QuotaExhausted { resets_at });
        }

        let probe = match state.breaker.admit(now) {
            Admission::Admit => false,
            Admission::Probe => true,
            Admission::Reject { retry_at } => {
                drop(state);
                return self.deny(source, DenyReason::BreakerOpen { retry_at });
            }
        };

        if let Err(not_until) = state.bucket.check() {
            // A probe that never went out must not hold the half-open slot
            state.breaker.release_probe();
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            debug!(source = %source, wait_ms = wait.as_millis() as u64, "Token bucket empty");
            return Permit::Wait(wait);
        }

        match state.budget.try_debit(units, now) {
            Ok(remaining) => {
                debug!(source = %source, units, remaining, probe, "Permit granted");
                crate::metrics::record_units_debited(source, units);
                Permit::Granted {
                    units,
                    remaining,
                    probe,
                }
            }
            Err(resets_at) => {
                state.breaker.release_probe();
                drop(state);
                self.deny(source, DenyReason::QuotaExhausted { resets_at })
            }
        }
    }

    /// Report a call that completed without throttling
    pub async fn record_success(&self, source: SourceKind) {
        if let Some(state) = self.sources.get(&source) {
            state.lock().await.breaker.record_success();
        }
    }

    /// Report a 429-class response
    pub async fn record_throttled(&self, source: SourceKind) {
        if let Some(state) = self.sources.get(&source) {
            let now = self.clock.now();
            state.lock().await.breaker.record_throttled(now);
        }
    }

    /// Report a call that failed without evidence either way
    pub async fn release_probe(&self, source: SourceKind) {
        if let Some(state) = self.sources.get(&source) {
            state.lock().await.breaker.release_probe();
        }
    }

    /// Free a probe slot from a synchronous drop path
    ///
    /// Releases in place when the source lock is free, otherwise hands the release to
    /// the runtime. Outside a runtime the breaker's probe timeout reclaims the slot.
    pub fn abandon_probe(self: &Arc<Self>, source: SourceKind) {
        let Some(state) = self.sources.get(&source) else {
            return;
        };
        if let Ok(mut state) = state.try_lock() {
            state.breaker.release_probe();
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let limiter = Arc::clone(self);
            handle.spawn(async move { limiter.release_probe(source).await });
        }
    }

    /// Accounting state of one source
    pub async fn snapshot_of(&self, source: SourceKind) -> Option<QuotaSnapshot> {
        let state = self.sources.get(&source)?;
        let mut state = state.lock().await;
        state.budget.refresh(self.clock.now());
        Some(QuotaSnapshot {
            source,
            units_remaining: state.budget.units_remaining(),
            ceiling: state.budget.ceiling(),
            window_reset_at: state.budget.window_reset_at(),
            breaker: state.breaker.state(),
        })
    }

    /// Accounting state of every registered source, in source order
    pub async fn snapshot(&self) -> Vec<QuotaSnapshot> {
        let mut snapshots = Vec::with_capacity(self.sources.len());
        for kind in SourceKind::all() {
            if let Some(snapshot) = self.snapshot_of(kind).await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    fn deny(&self, source: SourceKind, reason: DenyReason) -> Permit {
        debug!(source = %source, reason = reason.label(), "Permit denied");
        crate::metrics::record_permit_denied(source, reason.label());
        Permit::Denied(reason)
    }
}
