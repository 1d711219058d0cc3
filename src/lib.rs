//! obscura - discovery engine for low-visibility media
//!
//! Surfaces uploads that popularity-ranked search hides: near-zero engagement, raw
//! camera filenames, content only reachable through relation graphs, ID adjacency or
//! narrow time windows. Every external call is governed by a per-source quota ledger,
//! token bucket and circuit breaker.
//!
//! # Architecture
//!
//! The library is organized leaf to root:
//!
//! - [`clock`] - Injected wall clock
//! - [`models`] - Candidate IDs, records, queries and fingerprints
//! - [`quota`] - Quota budgets, circuit breakers and the shared rate limiter
//! - [`sources`] - Source adapters (API, scrape, archive) and the governance wrapper
//! - [`dedup`] - Per-operation identity cache
//! - [`scoring`] - Obscurity score and metadata anomaly flags
//! - [`query`] - Query generation strategies
//! - [`search`] - Multi-source search orchestration
//! - [`crawler`] - Related-content graph crawl
//! - [`probe`] - Brute-force ID probing
//! - [`autopsy`] - Channel upload fingerprinting
//! - [`engine`] - Facade exposing the four operations
//!
//! # Example
//!
//! ```no_run
//! use obscura::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> obscura::error::Result<()> {
//!     let engine = DiscoveryEngine::builder(Config::default()).build()?;
//!     let outcome = engine
//!         .crawl("dQw4w9WgXcQ", 2, 5, CancelToken::never())
//!         .await?;
//!     println!("visited {} nodes", outcome.nodes.len());
//!     Ok(())
//! }
//! ```

pub mod autopsy;
pub mod clock;
pub mod config;
pub mod crawler;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod models;
pub mod operation;
pub mod probe;
pub mod query;
pub mod quota;
pub mod scoring;
pub mod search;
pub mod sources;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::{CancelToken, Cancellation, DiscoveryEngine, OperationStatus};
    pub use crate::error::{EngineErrorTrait, Error, ErrorCategory, Result};
    pub use crate::models::{
        CandidateId, ChannelFingerprint, MediaRecord, Query, ScoredRecord, SortKey, SourceKind,
    };
    pub use crate::probe::ProbeMode;
    pub use crate::sources::SourceAdapter;
    pub use crate::utils::error::SourceError;
}

// Direct re-exports for convenience
pub use engine::DiscoveryEngine;
pub use models::{CandidateId, MediaRecord, Query, ScoredRecord, SourceKind};
