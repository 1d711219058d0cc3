//! In-memory source with scripted failures
//!
//! Used as a deterministic fixture for orchestrator, crawl and probe tests, and for
//! replaying captured results without touching the network.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{SourceAdapter, SourceResult};
use crate::models::{CandidateId, MediaRecord, Query, SourceKind};
use crate::quota::OperationKind;
use crate::utils::error::SourceError;

/// Which call a scripted failure applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailureKey {
    Search,
    Details(String),
    Related(String),
    Uploads(String),
}

#[derive(Debug)]
struct Script {
    error: SourceError,
    /// `None` fails forever
    remaining: Option<u32>,
}

/// Fixture adapter answering from memory
#[derive(Debug)]
pub struct MemorySource {
    kind: SourceKind,
    search_results: Vec<MediaRecord>,
    records: HashMap<String, MediaRecord>,
    related: HashMap<String, Vec<CandidateId>>,
    uploads: HashMap<String, Vec<MediaRecord>>,
    supports_related: bool,
    failures: Mutex<HashMap<FailureKey, VecDeque<Script>>>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl MemorySource {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            search_results: Vec::new(),
            records: HashMap::new(),
            related: HashMap::new(),
            uploads: HashMap::new(),
            supports_related: true,
            failures: Mutex::new(HashMap::new()),
            latency: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Records returned, in order, by every search
    pub fn with_search_results(mut self, records: Vec<MediaRecord>) -> Self {
        for record in &records {
            self.records
                .entry(record.id.as_str().to_string())
                .or_insert_with(|| record.clone());
        }
        self.search_results = records;
        self
    }

    /// Record answered by `fetch_details`
    pub fn with_record(mut self, record: MediaRecord) -> Self {
        self.records.insert(record.id.as_str().to_string(), record);
        self
    }

    /// Outgoing related edges of `id`
    pub fn with_related(mut self, id: &CandidateId, related: Vec<CandidateId>) -> Self {
        self.related.insert(id.as_str().to_string(), related);
        self
    }

    /// Uploads of a channel, in any order
    pub fn with_uploads(mut self, channel_id: &str, uploads: Vec<MediaRecord>) -> Self {
        self.uploads.insert(channel_id.to_string(), uploads);
        self
    }

    /// Behave like a source without a related-content endpoint
    pub fn without_related(mut self) -> Self {
        self.supports_related = false;
        self
    }

    /// Delay every answer
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `times` calls matching `key`
    pub fn fail_times(self, key: FailureKey, times: u32, error: SourceError) -> Self {
        self.push_script(key, error, Some(times));
        self
    }

    /// Fail every call matching `key`
    pub fn fail_always(self, key: FailureKey, error: SourceError) -> Self {
        self.push_script(key, error, None);
        self
    }

    /// Adapter calls made so far, including failed ones
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn push_script(&self, key: FailureKey, error: SourceError, remaining: Option<u32>) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures
            .entry(key)
            .or_default()
            .push_back(Script { error, remaining });
    }

    async fn enter(&self, key: FailureKey) -> SourceResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let Some(queue) = failures.get_mut(&key) else {
            return Ok(());
        };
        let Some(script) = queue.front_mut() else {
            return Ok(());
        };

        let (fire, spent) = match script.remaining {
            Some(0) => (false, true),
            Some(n) => {
                script.remaining = Some(n - 1);
                (true, n == 1)
            }
            None => (true, false),
        };
        let error = script.error.clone();
        if spent {
            queue.pop_front();
        }

        if fire {
            Err(error)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SourceAdapter for MemorySource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn supports(&self, op: OperationKind) -> bool {
        match op {
            OperationKind::Related => self.supports_related,
            _ => true,
        }
    }

    async fn search(&self, _query: &Query, limit: usize) -> SourceResult<Vec<MediaRecord>> {
        self.enter(FailureKey::Search).await?;
        Ok(self.search_results.iter().take(limit).cloned().collect())
    }

    async fn fetch_details(&self, id: &str) -> SourceResult<MediaRecord> {
        self.enter(FailureKey::Details(id.to_string())).await?;
        self.records
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                origin: self.kind,
                id: id.to_string(),
            })
    }

    async fn related(&self, id: &CandidateId, limit: usize) -> SourceResult<Vec<CandidateId>> {
        self.enter(FailureKey::Related(id.as_str().to_string()))
            .await?;
        Ok(self
            .related
            .get(id.as_str())
            .map(|ids| ids.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn channel_uploads(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> SourceResult<Vec<MediaRecord>> {
        self.enter(FailureKey::Uploads(channel_id.to_string()))
            .await?;
        self.uploads
            .get(channel_id)
            .map(|uploads| uploads.iter().take(limit).cloned().collect())
            .ok_or_else(|| SourceError::NotFound {
                origin: self.kind,
                id: channel_id.to_string(),
            })
    }
}
