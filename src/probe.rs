//! Brute-force ID probing
//!
//! Two ways to produce candidates from the 11-symbol ID space:
//!
//! - **random guess**: every symbol drawn uniformly from the alphabet; hits are
//!   astronomically unlikely and nothing here assumes one
//! - **neighbor scan**: the seed read as an 11-digit base-64 numeral, stepped up and down
//!   by one, wrapping modulo 64^11
//!
//! Candidates are verified through a governed details lookup. Quota exhaustion stops new
//! lookups; answers already in flight are still counted, and the run reports how many
//! candidates were left unverified.

use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use uuid::Uuid;

use crate::dedup::Deduplicator;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{CandidateId, MediaRecord, ID_ALPHABET, ID_LENGTH};
use crate::operation::{CancelToken, OperationStatus};
use crate::sources::GovernedSource;
use crate::utils::error::SourceError;

/// Size of the candidate ID space, 64^11
pub const ID_SPACE: u128 = 1 << (6 * ID_LENGTH);

// ============================================================================
// ID arithmetic
// ============================================================================

fn digit_value(symbol: u8) -> u128 {
    ID_ALPHABET
        .iter()
        .position(|&s| s == symbol)
        .unwrap_or(0) as u128
}

/// Numeric value of an ID read as a big-endian base-64 numeral
pub fn id_to_number(id: &CandidateId) -> u128 {
    id.as_bytes()
        .iter()
        .fold(0u128, |acc, &symbol| acc * 64 + digit_value(symbol))
}

/// ID whose numeric value is `value` modulo 64^11
pub fn id_from_number(value: u128) -> CandidateId {
    let mut value = value % ID_SPACE;
    let mut symbols = [ID_ALPHABET[0]; ID_LENGTH];
    for slot in symbols.iter_mut().rev() {
        *slot = ID_ALPHABET[(value % 64) as usize];
        value /= 64;
    }
    CandidateId::from_symbols(symbols)
}

/// One uniformly random candidate
pub fn random_id<R: Rng + ?Sized>(rng: &mut R) -> CandidateId {
    let mut symbols = [ID_ALPHABET[0]; ID_LENGTH];
    for slot in &mut symbols {
        *slot = ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())];
    }
    CandidateId::from_symbols(symbols)
}

/// `count` distinct random candidates
pub fn random_ids<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<CandidateId> {
    let mut dedup = Deduplicator::new();
    let mut ids = Vec::with_capacity(count);
    while ids.len() < count {
        let id = random_id(rng);
        if dedup.insert_candidate(&id) {
            ids.push(id);
        }
    }
    ids
}

/// The `k` IDs immediately below and above `seed`, nearest first
///
/// Produces exactly `2k` distinct IDs, none equal to `seed`, as long as `2k < 64^11`.
pub fn neighbors(seed: &CandidateId, k: usize) -> Vec<CandidateId> {
    let center = id_to_number(seed);
    let mut ids = Vec::with_capacity(k * 2);
    for step in 1..=k as u128 {
        ids.push(id_from_number(center + ID_SPACE - step));
        ids.push(id_from_number(center + step));
    }
    ids
}

// ============================================================================
// Prober
// ============================================================================

/// Candidate source of one brute-force run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProbeMode {
    Random { count: usize },
    Neighbors { seed: CandidateId, k: usize },
}

impl ProbeMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Random { .. } => "random",
            Self::Neighbors { .. } => "neighbors",
        }
    }

    /// Number of candidates the mode produces
    pub fn candidate_count(&self) -> usize {
        match self {
            Self::Random { count } => *count,
            Self::Neighbors { k, .. } => k.saturating_mul(2),
        }
    }
}

/// Result of one brute-force run
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub operation_id: Uuid,
    pub mode: &'static str,
    /// Candidates generated
    pub candidates: usize,
    /// Candidates that resolved to live content
    pub hits: Vec<MediaRecord>,
    /// Candidates confirmed not to exist
    pub misses: usize,
    /// Candidates without a definitive answer
    pub unverified: usize,
    pub status: OperationStatus,
}

/// Generates and verifies candidate IDs against one source
#[derive(Debug, Clone)]
pub struct BruteForceProber {
    source: GovernedSource,
    workers: usize,
    max_batch: usize,
}

impl BruteForceProber {
    pub fn new(source: GovernedSource) -> Self {
        Self {
            source,
            workers: 1,
            max_batch: 500,
        }
    }

    /// Concurrent verification calls
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Ceiling on candidates per run
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// Produce the candidates for `mode`, rejecting sizes above the batch ceiling
    pub fn candidates<R: Rng + ?Sized>(
        &self,
        mode: &ProbeMode,
        rng: &mut R,
    ) -> Result<Vec<CandidateId>> {
        let count = mode.candidate_count();
        if count == 0 || count > self.max_batch {
            return Err(Error::invalid_query(format!(
                "{} probe of {count} candidates, allowed 1..={}",
                mode.label(),
                self.max_batch
            )));
        }
        Ok(match mode {
            ProbeMode::Random { count } => random_ids(rng, *count),
            ProbeMode::Neighbors { seed, k } => neighbors(seed, *k),
        })
    }

    /// Generate and verify candidates for `mode`
    pub async fn run<R: Rng + ?Sized>(
        &self,
        mode: &ProbeMode,
        rng: &mut R,
        cancel: &CancelToken,
    ) -> Result<ProbeOutcome> {
        let candidates = self.candidates(mode, rng)?;
        Ok(self.verify(mode.label(), candidates, cancel).await)
    }

    /// Look up every candidate, halting on quota exhaustion and stopping on cancellation
    pub async fn verify(
        &self,
        mode: &'static str,
        candidates: Vec<CandidateId>,
        cancel: &CancelToken,
    ) -> ProbeOutcome {
        let total = candidates.len();
        let source = &self.source;
        let halted = AtomicBool::new(false);
        let halted = &halted;
        // Lookups started before a halt still report; later ones are skipped unpaid
        let mut lookups = stream::iter(candidates)
            .map(|id| async move {
                if halted.load(Ordering::Acquire) {
                    return (id, None);
                }
                let result = source.fetch_details(id.as_str()).await;
                (id, Some(result))
            })
            .buffered(self.workers);

        let mut hits = Vec::new();
        let mut misses = 0usize;
        let mut failures: Vec<SourceError> = Vec::new();
        let mut cancelled = false;
        let mut quota_stopped = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = lookups.next() => next,
            };
            let Some((id, result)) = next else {
                break;
            };
            let Some(result) = result else {
                continue;
            };

            match result {
                Ok(record) => {
                    info!(candidate = %id, title = %record.title, "Probe hit");
                    hits.push(record);
                }
                Err(SourceError::NotFound { .. }) => misses += 1,
                Err(e @ SourceError::QuotaExhausted { .. }) => {
                    if !quota_stopped {
                        warn!(candidate = %id, error = %e, "Quota exhausted, stopping probe");
                    }
                    quota_stopped = true;
                    halted.store(true, Ordering::Release);
                }
                Err(e @ SourceError::Unauthorized { .. }) => {
                    if !halted.swap(true, Ordering::AcqRel) {
                        warn!(error = %e, "Credentials rejected, stopping probe");
                        failures.push(e);
                    }
                }
                Err(e) => {
                    warn!(candidate = %id, error = %e, "Probe lookup failed");
                    failures.push(e);
                }
            }
        }
        drop(lookups);

        metrics::record_probe_hits(mode, hits.len());
        let unverified = total - hits.len() - misses;
        info!(
            mode,
            candidates = total,
            hits = hits.len(),
            misses,
            unverified,
            "Probe finished"
        );

        ProbeOutcome {
            operation_id: Uuid::new_v4(),
            mode,
            candidates: total,
            hits,
            misses,
            unverified,
            status: OperationStatus::resolve(cancelled, quota_stopped, failures),
        }
    }
}
