//! Quota and rate governance for external sources
//!
//! - [`QuotaBudget`] - hard unit ceiling per fixed window
//! - [`CircuitBreaker`] - closed → open → half-open cool-down on throttling
//! - [`RateLimiter`] - token bucket plus both of the above, issuing [`Permit`]s

pub mod breaker;
pub mod budget;
pub mod limiter;

pub use breaker::{Admission, BreakerState, CircuitBreaker};
pub use budget::{CostTable, OperationKind, QuotaBudget};
pub use limiter::{DenyReason, Permit, QuotaSnapshot, RateLimiter};
