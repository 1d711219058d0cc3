//! Obscurity scoring
//!
//! [`ObscurityScorer::score`] is a pure function of a record, the scoring weights and the
//! reference time. The total is a sum of four sub-scores, each clamped to its own weight:
//!
//! | Sub-score | Default weight | Signal |
//! |---|---|---|
//! | views | 40 | log decay from `weight` at 0 views to 0 at `view_ceiling` |
//! | filename | 20 | title or filename hint looks like a camera/default filename |
//! | age | 20 | linear up to `age_saturation_years` |
//! | poverty | 20 | `weight / 3` per missing field (description, tags, title) |
//!
//! Metadata anomaly flags are computed alongside but never change the score.

use chrono::{DateTime, Timelike, Utc};
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::models::MediaRecord;

const DAYS_PER_YEAR: f64 = 365.25;

/// Raw camera, phone, action-cam, screen-capture and placeholder filenames
const DEFAULT_FILENAME_PATTERNS: &[&str] = &[
    r"^IMG[\s_-]\d{3,}",
    r"^DSC[NF]?[\s_-]?\d{3,}",
    r"^MOV[\s_-]\d{3,}",
    r"^VID[\s_-]?\d{4,}",
    r"^MVI[\s_-]\d{3,}",
    r"^GOPR?\d{3,}",
    r"^G[XHP]\d{4,}",
    r"^DJI[\s_-]\d{3,}",
    r"^SAM[\s_-]\d{3,}",
    r"^P\d{7}",
    r"^20\d{2}[\s_-]?\d{2}[\s_-]?\d{2}",
    r"^video[\s_-]?\d{1,4}$",
    r"^clip[\s_-]?\d",
    r"^trim[\s._]",
    r"^Untitled",
    r"^Movie on \d",
    r"^recording[\s_-]?\d",
    r"^Screen Recording",
    r"^Screencast",
    r"^capture[\s_-]?\d",
    r"^\d{3,4}[\s_-]\d{3,4}$",
    r"^CIMG\d{3,}",
    r"^PICT\d{3,}",
    r"^CRW[\s_-]\d{3,}",
    r"^IMGP\d{3,}",
    r"^_MG_\d{3,}",
    r"^100[\s_-]\d{3,}",
    r"^vlcsnap",
    r"^bandicam",
    r"^OBS[\s_-]",
    r"^Rec[\s_-]\d",
    r"^WIN[\s_-]\d",
    r"^FullSizeRender",
    r"^RPReplay",
    r"^InShot[\s_-]",
    r"^new video$",
    r"^test$",
    r"^copy of ",
    r"^video$",
    r"^\d{10,}$",
    r"^[0-9a-f]{8,}$",
    r"^[A-Z]{2,4}[\s_-]\d{4,}$",
];

fn default_filename_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new(
            DEFAULT_FILENAME_PATTERNS
                .iter()
                .map(|pattern| format!("(?i){pattern}")),
        )
        .expect("Invalid regex pattern")
    })
}

/// Whether `name` looks like an unedited device or placeholder filename
pub fn is_default_filename(name: &str) -> bool {
    let name = name.trim();
    // Strip a trailing extension so "IMG_0042.MOV" matches like "IMG_0042"
    let stem = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && (1..=4).contains(&ext.len()) => stem,
        _ => name,
    };
    !stem.is_empty() && default_filename_set().is_match(stem)
}

// ============================================================================
// Weights
// ============================================================================

/// Weights and shape parameters of the obscurity score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Maximum contribution of view scarcity
    pub views: u8,

    /// Bonus for a default filename title
    pub filename: u8,

    /// Maximum contribution of upload age
    pub age: u8,

    /// Maximum contribution of missing metadata
    pub poverty: u8,

    /// View count at and above which scarcity contributes nothing
    pub view_ceiling: u64,

    /// Age at which the age sub-score saturates
    pub age_saturation_years: u32,

    /// View ceiling of the ghost filter (no likes, no comments)
    pub ghost_view_ceiling: u64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            views: 40,
            filename: 20,
            age: 20,
            poverty: 20,
            view_ceiling: 1_000,
            age_saturation_years: 15,
            ghost_view_ceiling: 10,
        }
    }
}

impl ScoringWeights {
    /// Check the weights sum to 100 and the shape parameters are usable
    pub fn validate(&self) -> Result<(), String> {
        let sum = u32::from(self.views)
            + u32::from(self.filename)
            + u32::from(self.age)
            + u32::from(self.poverty);
        if sum != 100 {
            return Err(format!("scoring weights must sum to 100, got {sum}"));
        }
        if self.view_ceiling == 0 {
            return Err("scoring.view_ceiling must be greater than 0".to_string());
        }
        if self.age_saturation_years == 0 {
            return Err("scoring.age_saturation_years must be greater than 0".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Scorer
// ============================================================================

/// Sub-scores of one evaluation, before rounding
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub views: f64,
    pub filename: f64,
    pub age: f64,
    pub poverty: f64,
}

impl ScoreBreakdown {
    /// Rounded total clamped to 0..=100
    pub fn total(&self) -> u8 {
        let sum = self.views + self.filename + self.age + self.poverty;
        sum.round().clamp(0.0, 100.0) as u8
    }
}

/// Pure record → 0..=100 scorer
#[derive(Debug, Clone, Default)]
pub struct ObscurityScorer {
    weights: ScoringWeights,
}

impl ObscurityScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Obscurity score of `record` evaluated at `now`
    pub fn score(&self, record: &MediaRecord, now: DateTime<Utc>) -> u8 {
        self.breakdown(record, now).total()
    }

    /// Individual sub-scores, each already clamped to its weight
    pub fn breakdown(&self, record: &MediaRecord, now: DateTime<Utc>) -> ScoreBreakdown {
        let w = &self.weights;
        ScoreBreakdown {
            views: clamp_to(self.view_scarcity(record.view_count), w.views),
            filename: clamp_to(self.filename_bonus(record), w.filename),
            age: clamp_to(self.age_score(record, now), w.age),
            poverty: clamp_to(self.poverty_score(record), w.poverty),
        }
    }

    fn view_scarcity(&self, views: u64) -> f64 {
        let weight = f64::from(self.weights.views);
        let ceiling = self.weights.view_ceiling.max(1);
        if views == 0 {
            return weight;
        }
        if views >= ceiling {
            return 0.0;
        }
        let decay = (views as f64).ln_1p() / (ceiling as f64).ln_1p();
        weight * (1.0 - decay)
    }

    fn filename_bonus(&self, record: &MediaRecord) -> f64 {
        let hinted = record
            .raw_filename_hint
            .as_deref()
            .is_some_and(is_default_filename);
        if hinted || is_default_filename(&record.title) {
            f64::from(self.weights.filename)
        } else {
            0.0
        }
    }

    fn age_score(&self, record: &MediaRecord, now: DateTime<Utc>) -> f64 {
        let Some(days) = record.age_days(now) else {
            return 0.0;
        };
        let saturation = f64::from(self.weights.age_saturation_years.max(1)) * DAYS_PER_YEAR;
        f64::from(self.weights.age) * (days as f64 / saturation).min(1.0)
    }

    fn poverty_score(&self, record: &MediaRecord) -> f64 {
        let missing = [
            record.description.trim().is_empty(),
            record.tags.is_empty(),
            is_placeholder_title(&record.title),
        ]
        .iter()
        .filter(|&&m| m)
        .count();
        f64::from(self.weights.poverty) * missing as f64 / 3.0
    }
}

fn clamp_to(value: f64, weight: u8) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, f64::from(weight))
}

/// Blank or auto-generated title
fn is_placeholder_title(title: &str) -> bool {
    title.trim().is_empty() || is_default_filename(title)
}

// ============================================================================
// Anomaly flags
// ============================================================================

/// Suspicious metadata combinations; informational only
pub fn anomalies(record: &MediaRecord, now: DateTime<Utc>) -> Vec<String> {
    let mut flags = Vec::new();

    if record.hd == Some(true) && record.age_days(now).is_some_and(|days| days > 5_475) {
        flags.push("ERA_MISMATCH:hd_before_hd_era".to_string());
    }

    if let Some(at) = record.uploaded_at {
        if (3..=5).contains(&at.hour()) {
            flags.push("TIME_ANOMALY:uploaded_3-5am_utc".to_string());
        }
    }

    let title_len = record.title.chars().count();
    if title_len > 200 {
        flags.push(format!("TITLE_ANOMALY:very_long({title_len})"));
    }

    if record.description.split_whitespace().count() > 500 && record.view_count < 10 {
        flags.push("DESC_ANOMALY:huge_desc_no_views".to_string());
    }

    if record.tags.len() > 20 && record.view_count < 5 {
        flags.push("TAG_ANOMALY:many_tags_no_views".to_string());
    }

    match record.duration_seconds {
        1 => flags.push("DUR_ANOMALY:1_second".to_string()),
        d if d > 43_200 => flags.push(format!("DUR_ANOMALY:marathon({}h)", d / 3_600)),
        _ => {}
    }

    flags
}
