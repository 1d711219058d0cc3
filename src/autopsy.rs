//! Channel autopsy
//!
//! Pure behavioural analysis of a channel's upload history. Fetching the uploads is the
//! engine's job; everything here is deterministic given the timestamps (and, for the
//! upload signals, the records) plus the capture time.
//!
//! - **intervals**: seconds between consecutive uploads, sorted by time
//! - **bot likelihood**: 100 at coefficient of variation ≤ `cv_bot`, 0 at ≥ `cv_human`,
//!   linear between; `neutral` with fewer than `min_intervals` intervals
//! - **burst days**: days with at least two uploads and more than `burst_multiple` times
//!   the average daily rate over the observed span
//! - **dormancy**: whole days from the last upload to the capture time

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::OnceLock;

use crate::models::{ChannelFingerprint, MediaRecord, UploadPattern};
use crate::scoring::is_default_filename;

/// Thresholds of the interval and burst analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopsyThresholds {
    /// Coefficient of variation at or below which uploads look scheduled
    pub cv_bot: f64,

    /// Coefficient of variation at or above which uploads look human
    pub cv_human: f64,

    /// Intervals needed before the variance means anything
    pub min_intervals: usize,

    /// Multiple of the average daily rate that makes a day a burst
    pub burst_multiple: f64,

    /// Bot likelihood reported when intervals are undefined
    pub neutral: u8,
}

impl Default for AutopsyThresholds {
    fn default() -> Self {
        Self {
            cv_bot: 0.05,
            cv_human: 0.5,
            min_intervals: 2,
            burst_multiple: 3.0,
            neutral: 50,
        }
    }
}

impl AutopsyThresholds {
    pub fn validate(&self) -> Result<(), String> {
        if self.cv_bot.is_nan() || self.cv_bot < 0.0 || self.cv_bot >= self.cv_human {
            return Err(format!(
                "autopsy.cv_bot ({}) must be >= 0 and below autopsy.cv_human ({})",
                self.cv_bot, self.cv_human
            ));
        }
        if self.min_intervals == 0 {
            return Err("autopsy.min_intervals must be greater than 0".to_string());
        }
        if self.burst_multiple.is_nan() || self.burst_multiple <= 0.0 {
            return Err("autopsy.burst_multiple must be greater than 0".to_string());
        }
        if self.neutral > 100 {
            return Err("autopsy.neutral must be within 0..=100".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Upload signals
// ============================================================================

/// Title, duration and timing habits of a channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadSignals {
    pub flags: Vec<String>,
    /// 0 = human habits, 100 = fully automated habits
    pub score: u8,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Flag automation habits in a channel's uploads
pub fn upload_signals(records: &[MediaRecord]) -> UploadSignals {
    static NUMBERED: OnceLock<Regex> = OnceLock::new();
    let numbered_re = NUMBERED.get_or_init(|| Regex::new(r"\d{3,}").expect("Invalid regex pattern"));

    let mut signals = UploadSignals::default();
    if records.is_empty() {
        return signals;
    }
    let total = records.len();
    let mut score: u32 = 0;

    let mut title_counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        *title_counts.entry(record.title.as_str()).or_default() += 1;
    }
    let repeated = title_counts.values().copied().max().unwrap_or(0);
    if repeated > 3 {
        signals.flags.push(format!("REPEATED_TITLE:{repeated}x"));
        score += 25;
    }

    let numbered = records
        .iter()
        .filter(|r| numbered_re.is_match(&r.title))
        .count();
    if numbered * 2 > total {
        signals
            .flags
            .push(format!("SEQUENTIAL_NUMBERS:{numbered}/{total}"));
        score += 20;
    }

    let short = records
        .iter()
        .filter(|r| r.title.chars().count() < 5)
        .count();
    if short * 2 > total {
        signals.flags.push(format!("SHORT_TITLES:{short}/{total}"));
        score += 15;
    }

    let durations: HashSet<u64> = records.iter().map(|r| r.duration_seconds).collect();
    if durations.len() <= 3 && total > 5 {
        signals
            .flags
            .push(format!("SAME_DURATION:{}_unique", durations.len()));
        score += 20;
    }

    let hours: Vec<u32> = records
        .iter()
        .filter_map(|r| r.uploaded_at.map(|at| at.hour()))
        .collect();
    let mut hour_counts: HashMap<u32, usize> = HashMap::new();
    for hour in &hours {
        *hour_counts.entry(*hour).or_default() += 1;
    }
    let top_hour = percent(hour_counts.values().copied().max().unwrap_or(0), hours.len());
    if top_hour > 80.0 {
        signals.flags.push(format!("SAME_HOUR:{top_hour:.0}%"));
        score += 15;
    }

    let defaults = records
        .iter()
        .filter(|r| {
            is_default_filename(&r.title)
                || r.raw_filename_hint
                    .as_deref()
                    .is_some_and(is_default_filename)
        })
        .count();
    let default_pct = percent(defaults, total);
    if default_pct > 80.0 {
        signals.flags.push(format!("DEFAULT_NAMES:{default_pct:.0}%"));
        score += 15;
    }

    signals.score = score.min(100) as u8;
    signals
}

fn classify(score: u8) -> UploadPattern {
    match score {
        60.. => UploadPattern::Automated,
        30..=59 => UploadPattern::SemiAutomated,
        _ => UploadPattern::Human,
    }
}

// ============================================================================
// Interval analysis
// ============================================================================

/// Stateless analyzer configured with thresholds
#[derive(Debug, Clone, Default)]
pub struct ChannelAutopsy {
    thresholds: AutopsyThresholds,
}

impl ChannelAutopsy {
    pub fn new(thresholds: AutopsyThresholds) -> Self {
        Self { thresholds }
    }

    /// Fingerprint from upload timestamps alone
    pub fn analyze(
        &self,
        channel_id: &str,
        timestamps: &[DateTime<Utc>],
        captured_at: DateTime<Utc>,
    ) -> ChannelFingerprint {
        let mut sorted = timestamps.to_vec();
        sorted.sort();

        let gaps = intervals(&sorted);
        let cv = self.coefficient_of_variation(&gaps);
        let bot_likelihood = cv.map_or(self.thresholds.neutral, |cv| self.bot_likelihood(cv));
        let burst_days = self.burst_days(&sorted);
        let dormant_days = sorted
            .last()
            .map(|last| (captured_at - *last).num_days().max(0));

        let mut flags = Vec::new();
        if cv.is_some_and(|cv| cv <= self.thresholds.cv_bot) {
            flags.push("UNIFORM_INTERVALS".to_string());
        }
        if !burst_days.is_empty() {
            flags.push(format!("BURST_DAYS:{}", burst_days.len()));
        }

        let pattern = match cv {
            Some(_) => classify(bot_likelihood),
            None => UploadPattern::Unknown,
        };

        ChannelFingerprint {
            channel_id: channel_id.to_string(),
            upload_timestamps: sorted,
            interval_variance_score: cv,
            burst_days,
            dormant_days,
            bot_likelihood,
            flags,
            pattern,
            captured_at,
        }
    }

    /// Fingerprint from fetched uploads: timestamps plus title and duration habits
    ///
    /// `bot_likelihood` stays the interval-based value; the upload signals feed the flags
    /// and the coarse `pattern`.
    pub fn analyze_uploads(
        &self,
        channel_id: &str,
        uploads: &[MediaRecord],
        captured_at: DateTime<Utc>,
    ) -> ChannelFingerprint {
        let timestamps: Vec<DateTime<Utc>> =
            uploads.iter().filter_map(|r| r.uploaded_at).collect();
        let mut fingerprint = self.analyze(channel_id, &timestamps, captured_at);
        if uploads.is_empty() {
            return fingerprint;
        }

        let signals = upload_signals(uploads);
        let combined = match fingerprint.interval_variance_score {
            Some(_) => signals.score.max(fingerprint.bot_likelihood),
            None => signals.score,
        };
        fingerprint.pattern = classify(combined);
        fingerprint.flags.extend(signals.flags);
        fingerprint
    }

    /// CV of the intervals, `None` below `min_intervals`
    fn coefficient_of_variation(&self, intervals: &[f64]) -> Option<f64> {
        if intervals.len() < self.thresholds.min_intervals.max(1) {
            return None;
        }
        let mean = intervals.iter().mean();
        if !mean.is_finite() {
            return None;
        }
        if mean <= 0.0 {
            // Every upload at the same instant
            return Some(0.0);
        }
        let cv = intervals.iter().population_std_dev() / mean;
        cv.is_finite().then_some(cv)
    }

    fn bot_likelihood(&self, cv: f64) -> u8 {
        let AutopsyThresholds {
            cv_bot, cv_human, ..
        } = self.thresholds;
        if cv <= cv_bot {
            return 100;
        }
        if cv >= cv_human {
            return 0;
        }
        (100.0 * (cv_human - cv) / (cv_human - cv_bot))
            .round()
            .clamp(0.0, 100.0) as u8
    }

    fn burst_days(&self, sorted: &[DateTime<Utc>]) -> BTreeSet<NaiveDate> {
        let (Some(first), Some(last)) = (sorted.first(), sorted.last()) else {
            return BTreeSet::new();
        };
        if sorted.len() < 2 {
            return BTreeSet::new();
        }

        let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        for at in sorted {
            *per_day.entry(at.date_naive()).or_default() += 1;
        }

        let span_days = (last.date_naive() - first.date_naive()).num_days() + 1;
        let average = sorted.len() as f64 / span_days as f64;
        let threshold = self.thresholds.burst_multiple * average;

        per_day
            .into_iter()
            .filter(|&(_, count)| count >= 2 && count as f64 > threshold)
            .map(|(day, _)| day)
            .collect()
    }
}

fn intervals(sorted: &[DateTime<Utc>]) -> Vec<f64> {
    sorted
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f64 / 1_000.0)
        .collect()
}
