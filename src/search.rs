//! Multi-source search orchestration
//!
//! A search fans the query out to every enabled source with at most `max_workers`
//! calls in flight. Answers are buffered per source and merged in enabled-source order
//! (then each source's native order), so completion order never leaks into the result.
//! The merged stream then goes through the operation's [`Deduplicator`], the client-side
//! filters, the scorer, and finally a stable sort on the requested key.
//!
//! A failing source degrades the result instead of failing it: its error is kept in a
//! [`SourceReport`] and the status becomes `PartialFailure`. Only when every source
//! fails and nothing was collected does the search return [`Error::AllSourcesFailed`].

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::dedup::Deduplicator;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{MediaRecord, Query, QueryFilters, ScoredRecord, SortKey, SourceKind};
use crate::operation::{CancelToken, OperationStatus};
use crate::scoring::{anomalies, ObscurityScorer};
use crate::sources::{GovernedSource, SourceResult};
use crate::utils::error::SourceError;

// ============================================================================
// Outcome types
// ============================================================================

/// What one source contributed to a search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub source: SourceKind,
    /// Queries this source answered
    pub answered: usize,
    /// Queries this source failed
    pub failed: usize,
    /// Records returned before deduplication and filtering
    pub fetched: usize,
    /// Records that made it into the result
    pub kept: usize,
    /// Most recent failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<SourceError>,
}

impl SourceReport {
    fn new(source: SourceKind) -> Self {
        Self {
            source,
            answered: 0,
            failed: 0,
            fetched: 0,
            kept: 0,
            last_error: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.failed == 0
    }
}

/// Result of a search or a batch of searches
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub operation_id: Uuid,
    pub results: Vec<ScoredRecord>,
    /// One report per enabled source, in enabled order
    pub reports: Vec<SourceReport>,
    pub status: OperationStatus,
}

// ============================================================================
// Filters and ordering
// ============================================================================

/// Check `record` against `filters`
///
/// Returns the labels of the filters it satisfied, or `None` when any active filter
/// rejects it. `date_from` is inclusive, `date_to` exclusive. Records without an upload
/// time never pass a date or age filter.
pub fn filter_matches(
    record: &MediaRecord,
    filters: &QueryFilters,
    now: DateTime<Utc>,
    ghost_view_ceiling: u64,
) -> Option<BTreeSet<String>> {
    let mut matched = BTreeSet::new();

    if let Some(ceiling) = filters.effective_max_views() {
        if record.view_count > ceiling {
            return None;
        }
        let label = if filters.exact_zero { "exact_zero" } else { "max_views" };
        matched.insert(label.to_string());
    }

    if filters.ghost_only {
        if !record.is_ghost(ghost_view_ceiling) {
            return None;
        }
        matched.insert("ghost".to_string());
    }

    if !filters.filename_patterns.is_empty() {
        let pattern = filters.filename_patterns.iter().find(|pattern| {
            starts_with_ignore_case(&record.title, pattern)
                || record
                    .raw_filename_hint
                    .as_deref()
                    .is_some_and(|hint| starts_with_ignore_case(hint, pattern))
        })?;
        matched.insert(format!("pattern:{pattern}"));
    }

    if filters.date_from.is_some() || filters.date_to.is_some() {
        let uploaded = record.uploaded_at?;
        if filters.date_from.is_some_and(|from| uploaded < from)
            || filters.date_to.is_some_and(|to| uploaded >= to)
        {
            return None;
        }
        matched.insert("date_range".to_string());
    }

    if let Some(min_age) = filters.min_age_days {
        if record.age_days(now)? < i64::from(min_age) {
            return None;
        }
        matched.insert("min_age".to_string());
    }

    if let Some(needle) = &filters.title_contains {
        if !record
            .title
            .to_lowercase()
            .contains(&needle.trim().to_lowercase())
        {
            return None;
        }
        matched.insert("title_contains".to_string());
    }

    Some(matched)
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    let text = text.trim_start();
    text.len() >= prefix.len()
        && text.is_char_boundary(prefix.len())
        && text[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Stable sort on `key`; ties keep merged fetch order
pub fn sort_results(results: &mut [ScoredRecord], key: SortKey) {
    match key {
        // Unknown upload times sort last
        SortKey::Date => results.sort_by(|a, b| b.record.uploaded_at.cmp(&a.record.uploaded_at)),
        SortKey::Views => results.sort_by_key(|r| r.record.view_count),
        SortKey::Score => results.sort_by(|a, b| b.obscurity_score.cmp(&a.obscurity_score)),
        SortKey::Relevance => {}
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

type Slot = Option<SourceResult<Vec<MediaRecord>>>;

/// Fans queries out over the governed sources
#[derive(Debug, Clone)]
pub struct SearchOrchestrator {
    sources: Vec<GovernedSource>,
    scorer: ObscurityScorer,
    clock: SharedClock,
    workers: usize,
    max_results_per_source: usize,
    max_queries: usize,
}

impl SearchOrchestrator {
    pub fn new(sources: Vec<GovernedSource>, scorer: ObscurityScorer, clock: SharedClock) -> Self {
        let workers = sources.len().max(1);
        Self {
            sources,
            scorer,
            clock,
            workers,
            max_results_per_source: 200,
            max_queries: 50,
        }
    }

    /// Concurrent source calls per query
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Ceiling on records requested from one source for one query
    pub fn with_max_results_per_source(mut self, max: usize) -> Self {
        self.max_results_per_source = max.max(1);
        self
    }

    /// Ceiling on queries in one batch
    pub fn with_max_queries(mut self, max: usize) -> Self {
        self.max_queries = max;
        self
    }

    /// Search one query across `enabled`
    pub async fn run(
        &self,
        query: &Query,
        enabled: &[SourceKind],
        cancel: &CancelToken,
    ) -> Result<SearchOutcome> {
        self.run_many(std::slice::from_ref(query), enabled, cancel)
            .await
    }

    /// Search a batch of queries through one shared deduplicator
    ///
    /// Queries run one after another; a source that reports quota exhaustion is dropped
    /// for the rest of the batch. The merged result is sorted by the first query's key.
    pub async fn run_many(
        &self,
        queries: &[Query],
        enabled: &[SourceKind],
        cancel: &CancelToken,
    ) -> Result<SearchOutcome> {
        let _timer = metrics::start_operation_timer("search");

        if queries.is_empty() || queries.len() > self.max_queries {
            return Err(Error::invalid_query(format!(
                "batch of {} queries, allowed 1..={}",
                queries.len(),
                self.max_queries
            )));
        }
        for query in queries {
            query.check().map_err(Error::invalid_query)?;
        }
        let plan = self.plan(enabled)?;

        let operation_id = Uuid::new_v4();
        let now = self.clock.now();
        let ghost_ceiling = self.scorer.weights().ghost_view_ceiling;
        let mut dedup = Deduplicator::new();
        let mut results = Vec::new();
        let mut reports: Vec<SourceReport> =
            plan.iter().map(|s| SourceReport::new(s.kind())).collect();
        let mut failures = Vec::new();
        let mut exhausted: HashSet<SourceKind> = HashSet::new();
        let mut cancelled = false;
        let mut quota_stopped = false;

        for query in queries {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let active: Vec<&GovernedSource> = plan
                .iter()
                .copied()
                .filter(|s| !exhausted.contains(&s.kind()))
                .collect();
            if active.is_empty() {
                quota_stopped = true;
                break;
            }

            let (slots, interrupted) = self.fetch(query, &active, cancel).await;

            for (source, slot) in active.iter().zip(slots) {
                let kind = source.kind();
                let Some(report) = reports.iter_mut().find(|r| r.source == kind) else {
                    continue;
                };
                match slot {
                    None => {}
                    Some(Err(e)) => {
                        warn!(source = %kind, query = %query.text, error = %e, "Source failed");
                        if matches!(e, SourceError::QuotaExhausted { .. }) {
                            exhausted.insert(kind);
                        }
                        report.failed += 1;
                        report.last_error = Some(e.clone());
                        failures.push(e);
                    }
                    Some(Ok(records)) => {
                        report.answered += 1;
                        report.fetched += records.len();
                        let mut kept = 0;
                        for record in records {
                            if !dedup.insert(&record.id) {
                                continue;
                            }
                            let Some(matched) =
                                filter_matches(&record, &query.filters, now, ghost_ceiling)
                            else {
                                continue;
                            };
                            kept += 1;
                            results.push(self.score(record, matched, now));
                        }
                        report.kept += kept;
                        metrics::record_discovered(kind, kept);
                        debug!(source = %kind, query = %query.text, kept, "Source merged");
                    }
                }
            }

            if interrupted {
                cancelled = true;
                break;
            }
        }

        let answered: usize = reports.iter().map(|r| r.answered).sum();
        if !cancelled && answered == 0 && !failures.is_empty() {
            return Err(Error::AllSourcesFailed(failures));
        }

        sort_results(&mut results, queries[0].sort);
        let status = OperationStatus::resolve(cancelled, quota_stopped, failures);
        info!(
            operation = %operation_id,
            queries = queries.len(),
            results = results.len(),
            status = status.label(),
            "Search finished"
        );

        Ok(SearchOutcome {
            operation_id,
            results,
            reports,
            status,
        })
    }

    /// Resolve `enabled` to registered sources, dropping repeats
    fn plan(&self, enabled: &[SourceKind]) -> Result<Vec<&GovernedSource>> {
        if enabled.is_empty() {
            return Err(Error::invalid_query("no sources enabled"));
        }
        let mut seen = HashSet::new();
        let mut plan = Vec::with_capacity(enabled.len());
        for kind in enabled {
            if !seen.insert(*kind) {
                continue;
            }
            let source = self
                .sources
                .iter()
                .find(|s| s.kind() == *kind)
                .ok_or_else(|| Error::no_source(*kind))?;
            plan.push(source);
        }
        Ok(plan)
    }

    /// Query every source in `plan`, buffering answers by plan position
    ///
    /// Returns the slots and whether cancellation interrupted the fan-out. Sources that
    /// had not answered by then keep an empty slot.
    async fn fetch(
        &self,
        query: &Query,
        plan: &[&GovernedSource],
        cancel: &CancelToken,
    ) -> (Vec<Slot>, bool) {
        let limit = query.limit.min(self.max_results_per_source);
        let mut slots: Vec<Slot> = (0..plan.len()).map(|_| None).collect();
        let mut calls = stream::iter(plan.iter().enumerate())
            .map(|(position, source)| async move { (position, source.search(query, limit).await) })
            .buffer_unordered(self.workers);

        let mut interrupted = false;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                next = calls.next() => next,
            };
            let Some((position, result)) = next else {
                break;
            };
            slots[position] = Some(result);
        }
        (slots, interrupted)
    }

    fn score(
        &self,
        record: MediaRecord,
        matched_filters: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> ScoredRecord {
        ScoredRecord {
            obscurity_score: self.scorer.score(&record, now),
            flags: anomalies(&record, now),
            matched_filters,
            record,
        }
    }
}
