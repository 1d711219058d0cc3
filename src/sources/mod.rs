//! External sources of candidate records
//!
//! Every source implements [`SourceAdapter`]. Adapters only speak their transport;
//! permits, timeouts, retries and breaker bookkeeping are added by [`GovernedSource`],
//! which is the only way the engine ever reaches an adapter.

pub mod api;
pub mod archive;
pub mod credentials;
pub mod governed;
pub mod memory;
pub mod scrape;

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{CandidateId, MediaRecord, Query, SourceKind};
use crate::quota::OperationKind;
use crate::utils::error::SourceError;

pub use api::ApiSource;
pub use archive::ArchiveSource;
pub use credentials::{CredentialProvider, EnvCredentials, StaticCredentials};
pub use governed::{GovernedSource, GovernorSettings};
pub use memory::{FailureKey, MemorySource};
pub use scrape::ScrapeSource;

/// Result type for adapter calls
pub type SourceResult<T> = Result<T, SourceError>;

/// Uniform access to one external source
///
/// `search` returns a finite batch in the source's native order, at most `limit` long.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which source this adapter talks to
    fn kind(&self) -> SourceKind;

    /// Whether `op` is implemented; unsupported operations are rejected before any permit
    fn supports(&self, op: OperationKind) -> bool {
        matches!(op, OperationKind::Search | OperationKind::Details)
    }

    /// Records per page of a native listing; a search for `limit` records is charged
    /// one listing per page
    fn page_size(&self) -> usize {
        usize::MAX
    }

    /// Keyword search
    async fn search(&self, query: &Query, limit: usize) -> SourceResult<Vec<MediaRecord>>;

    /// Look up one item by its identifier
    async fn fetch_details(&self, id: &str) -> SourceResult<MediaRecord>;

    /// Candidates the source considers related to `id`
    async fn related(&self, id: &CandidateId, limit: usize) -> SourceResult<Vec<CandidateId>> {
        let _ = (id, limit);
        Err(SourceError::Unsupported {
            origin: self.kind(),
            operation: "related",
        })
    }

    /// Most recent uploads of a channel
    async fn channel_uploads(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> SourceResult<Vec<MediaRecord>> {
        let _ = (channel_id, limit);
        Err(SourceError::Unsupported {
            origin: self.kind(),
            operation: "channel_uploads",
        })
    }
}

/// Shared adapter handle
pub type SharedSource = Arc<dyn SourceAdapter>;
