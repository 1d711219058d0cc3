// Core data structures for the obscura discovery engine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Symbols allowed in a candidate ID, in digit-value order
pub const ID_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Length of every candidate ID
pub const ID_LENGTH: usize = 11;

/// Rejected candidate ID
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid candidate id {value:?}: {reason}")]
pub struct IdError {
    pub value: String,
    pub reason: &'static str,
}

/// 11-symbol identifier in the video ID space
///
/// Any string of the right shape is a valid candidate, whether or not it denotes live content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CandidateId(String);

impl CandidateId {
    /// Validate and wrap a candidate ID
    pub fn parse(value: &str) -> Result<Self, IdError> {
        if value.len() != ID_LENGTH {
            return Err(IdError {
                value: value.to_string(),
                reason: "must be exactly 11 characters",
            });
        }
        if !value.bytes().all(|b| ID_ALPHABET.contains(&b)) {
            return Err(IdError {
                value: value.to_string(),
                reason: "contains a symbol outside A-Z a-z 0-9 - _",
            });
        }
        Ok(Self(value.to_string()))
    }

    /// Build from symbols already known to be in the alphabet
    pub(crate) fn from_symbols(symbols: [u8; ID_LENGTH]) -> Self {
        Self(symbols.iter().map(|&b| b as char).collect())
    }

    /// Borrow as `&str`
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw bytes of the ID
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Public watch URL for this candidate
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CandidateId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CandidateId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CandidateId> for String {
    fn from(id: CandidateId) -> Self {
        id.0
    }
}

/// Origin of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Official data API (server-side filters, deep paging)
    Api,
    /// Public web pages (client-side filtering only)
    Scrape,
    /// Archive index (separate identifier space)
    Archive,
}

impl SourceKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Scrape => "scrape",
            Self::Archive => "archive",
        }
    }

    /// Whether this source reports IDs from the 11-character video space
    pub fn in_video_space(&self) -> bool {
        !matches!(self, Self::Archive)
    }

    /// Get all sources
    pub fn all() -> Vec<Self> {
        vec![Self::Api, Self::Scrape, Self::Archive]
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "api" | "youtube" => Ok(Self::Api),
            "scrape" | "scraper" => Ok(Self::Scrape),
            "archive" | "ia" => Ok(Self::Archive),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// Identity of a discovered item
///
/// Archive identifiers never compare equal to video IDs, so archive hits are never
/// collapsed into API or scrape hits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "space", content = "id", rename_all = "lowercase")]
pub enum ItemId {
    Video(CandidateId),
    Archive(String),
}

impl ItemId {
    /// Candidate ID when the item lives in the video ID space
    pub fn candidate(&self) -> Option<&CandidateId> {
        match self {
            Self::Video(id) => Some(id),
            Self::Archive(_) => None,
        }
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        match self {
            Self::Video(id) => id.as_str(),
            Self::Archive(id) => id,
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video(id) => write!(f, "{id}"),
            Self::Archive(id) => write!(f, "archive:{id}"),
        }
    }
}

/// Metadata for one discovered item
///
/// Created by a source adapter and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: ItemId,
    pub title: String,
    pub description: String,
    pub view_count: u64,
    pub like_count: u64,
    pub comment_count: u64,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
    pub tags: BTreeSet<String>,
    pub channel_id: String,
    pub source: SourceKind,
    pub raw_filename_hint: Option<String>,
    /// `Some(true)` when the source reports HD definition
    pub hd: Option<bool>,
}

impl MediaRecord {
    /// Create an empty record for a video-space ID
    pub fn video(id: CandidateId, source: SourceKind) -> Self {
        Self::with_id(ItemId::Video(id), source)
    }

    /// Create an empty record for an archive identifier
    pub fn archive(identifier: impl Into<String>) -> Self {
        Self::with_id(ItemId::Archive(identifier.into()), SourceKind::Archive)
    }

    fn with_id(id: ItemId, source: SourceKind) -> Self {
        Self {
            id,
            title: String::new(),
            description: String::new(),
            view_count: 0,
            like_count: 0,
            comment_count: 0,
            uploaded_at: None,
            duration_seconds: 0,
            tags: BTreeSet::new(),
            channel_id: String::new(),
            source,
            raw_filename_hint: None,
            hd: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_views(mut self, views: u64) -> Self {
        self.view_count = views;
        self
    }

    pub fn with_engagement(mut self, likes: u64, comments: u64) -> Self {
        self.like_count = likes;
        self.comment_count = comments;
        self
    }

    pub fn with_uploaded_at(mut self, at: DateTime<Utc>) -> Self {
        self.uploaded_at = Some(at);
        self
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = seconds;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = channel_id.into();
        self
    }

    pub fn with_filename_hint(mut self, hint: impl Into<String>) -> Self {
        self.raw_filename_hint = Some(hint.into());
        self
    }

    pub fn with_hd(mut self, hd: bool) -> Self {
        self.hd = Some(hd);
        self
    }

    /// Age in whole days relative to `now`, if the upload time is known
    pub fn age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.uploaded_at.map(|at| (now - at).num_days().max(0))
    }

    /// No likes, no comments and at most `view_ceiling` views
    pub fn is_ghost(&self, view_ceiling: u64) -> bool {
        self.like_count == 0 && self.comment_count == 0 && self.view_count <= view_ceiling
    }

    /// Public URL of the item
    pub fn url(&self) -> String {
        match &self.id {
            ItemId::Video(id) => id.watch_url(),
            ItemId::Archive(id) => format!("https://archive.org/details/{id}"),
        }
    }
}

/// Record with its obscurity score and the filters it satisfied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: MediaRecord,
    pub obscurity_score: u8,
    pub matched_filters: BTreeSet<String>,
    /// Metadata anomaly flags; informational, never part of the score
    pub flags: Vec<String>,
}

/// Requested result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Newest upload first
    Date,
    /// Fewest views first
    Views,
    /// Highest obscurity score first
    #[default]
    Score,
    /// Merged fetch order
    Relevance,
}

impl SortKey {
    /// Ordering parameter understood by the official API
    pub fn api_order(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Views => "viewCount",
            Self::Score | Self::Relevance => "relevance",
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "date" | "recent" => Ok(Self::Date),
            "views" | "low_v" | "viewcount" => Ok(Self::Views),
            "score" | "weird" => Ok(Self::Score),
            "relevance" => Ok(Self::Relevance),
            other => Err(format!("unknown sort key: {other}")),
        }
    }
}

/// Geographic restriction passed through to sources that support it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFilter {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: u32,
}

/// Client-side (and, where supported, server-side) filters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    pub max_views: Option<u64>,
    /// Only zero-view records; overrides `max_views`
    pub exact_zero: bool,
    pub ghost_only: bool,
    pub filename_patterns: BTreeSet<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub min_age_days: Option<u32>,
    pub title_contains: Option<String>,
    pub location: Option<GeoFilter>,
}

impl QueryFilters {
    /// View ceiling actually applied, with `exact_zero` taking precedence
    pub fn effective_max_views(&self) -> Option<u64> {
        if self.exact_zero {
            Some(0)
        } else {
            self.max_views
        }
    }
}

/// One search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub filters: QueryFilters,
    pub sort: SortKey,
    /// Maximum records requested from each source
    pub limit: usize,
}

impl Query {
    /// Query with default filters, score ordering and 25 results per source
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            filters: QueryFilters::default(),
            sort: SortKey::default(),
            limit: 25,
        }
    }

    pub fn with_max_views(mut self, max_views: u64) -> Self {
        self.filters.max_views = Some(max_views);
        self
    }

    pub fn with_exact_zero(mut self) -> Self {
        self.filters.exact_zero = true;
        self
    }

    pub fn with_ghost_only(mut self) -> Self {
        self.filters.ghost_only = true;
        self
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.filename_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_date_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.filters.date_from = from;
        self.filters.date_to = to;
        self
    }

    pub fn with_min_age_days(mut self, days: u32) -> Self {
        self.filters.min_age_days = Some(days);
        self
    }

    pub fn with_title_contains(mut self, needle: impl Into<String>) -> Self {
        self.filters.title_contains = Some(needle.into());
        self
    }

    pub fn with_location(mut self, location: GeoFilter) -> Self {
        self.filters.location = Some(location);
        self
    }

    pub fn with_sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Reject filter combinations that can never match
    ///
    /// Returns a human-readable reason on failure.
    pub fn check(&self) -> Result<(), String> {
        if self.text.trim().is_empty() && self.filters.filename_patterns.is_empty() {
            return Err("query text is empty and no filename patterns are set".to_string());
        }
        if self.limit == 0 {
            return Err("limit must be greater than 0".to_string());
        }
        if let (Some(from), Some(to)) = (self.filters.date_from, self.filters.date_to) {
            // date_to is exclusive, so equal bounds admit nothing
            if from >= to {
                return Err(format!("date_from {from} is not before date_to {to}"));
            }
        }
        if let Some(needle) = &self.filters.title_contains {
            if needle.trim().is_empty() {
                return Err("title_contains must not be blank".to_string());
            }
        }
        if let Some(geo) = &self.filters.location {
            if !(-90.0..=90.0).contains(&geo.latitude) || !(-180.0..=180.0).contains(&geo.longitude)
            {
                return Err(format!(
                    "location {},{} is outside valid coordinates",
                    geo.latitude, geo.longitude
                ));
            }
            if geo.radius_km == 0 {
                return Err("location radius must be greater than 0".to_string());
            }
        }
        Ok(())
    }
}

/// Node visited by the relation-graph crawl
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlNode {
    pub id: CandidateId,
    pub depth: u32,
    pub parent: Option<CandidateId>,
}

/// Coarse classification of a channel's upload behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPattern {
    Human,
    SemiAutomated,
    Automated,
    #[default]
    Unknown,
}

impl fmt::Display for UploadPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Human => write!(f, "human"),
            Self::SemiAutomated => write!(f, "semi-automated"),
            Self::Automated => write!(f, "automated"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Behavioural fingerprint of one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFingerprint {
    pub channel_id: String,
    pub upload_timestamps: Vec<DateTime<Utc>>,
    /// Coefficient of variation of upload intervals; `None` with too few intervals
    pub interval_variance_score: Option<f64>,
    pub burst_days: BTreeSet<NaiveDate>,
    /// Days between the last upload and `captured_at`; `None` without uploads
    pub dormant_days: Option<i64>,
    pub bot_likelihood: u8,
    pub flags: Vec<String>,
    pub pattern: UploadPattern,
    pub captured_at: DateTime<Utc>,
}
