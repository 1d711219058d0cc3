//! Candidate query generation
//!
//! Five strategies, each pure given the generator's seed, its reference time and the
//! caller's input:
//!
//! - **time travel**: a filename token stamped with a random historical date, filtered to
//!   a ±5 day window around it
//! - **chaos**: deliberately incoherent strings, never filtered for plausibility
//! - **rabbit hole**: new queries derived from the tags and text of a prior result
//! - **time capsule**: generic date and filename queries for one 24-hour window
//! - **pattern restricted**: queries scoped to device filename prefixes
//!
//! [`QueryGenerator::build_queries`] combines keywords, filename patterns and booster words
//! the way a manual search form would.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::models::{MediaRecord, Query};

/// Named filename patterns and the search token each one expands to
pub const FILENAME_PATTERNS: &[(&str, &str)] = &[
    ("IMG_XXXX", "IMG_"),
    ("DSC_XXXX", "DSC_"),
    ("DSCN_XXXX", "DSCN_"),
    ("DSCF_XXXX", "DSCF_"),
    ("MVI_XXXX", "MVI_"),
    ("P10XXXXX", "P10"),
    ("SAM_XXXX", "SAM_"),
    ("CIMG_XXXX", "CIMG"),
    ("PICT_XXXX", "PICT"),
    ("CRW_XXXX", "CRW_"),
    ("IMGP_XXXX", "IMGP"),
    ("_MG_XXXX", "_MG_"),
    ("MOV_XXXX", "MOV_"),
    ("VID_XXXX", "VID_"),
    ("VIDEO_XXXX", "VIDEO_"),
    ("Trim_XXXX", "trim"),
    ("Screen Recording", "screen recording"),
    ("Screencast", "screencast"),
    ("FullSizeRender", "FullSizeRender"),
    ("RPReplay", "RPReplay"),
    ("InShot", "InShot_"),
    ("GOPR_XXXX", "GOPR"),
    ("GP_XXXXXX", "GP0"),
    ("GX_XXXXXX", "GX01"),
    ("HERO_XXXX", "HERO"),
    ("GH_XXXXXX", "GH01"),
    ("DJI_XXXX", "DJI_"),
    ("DCIM", "DCIM"),
    ("100MEDIA", "100MEDIA"),
    ("Untitled", "Untitled"),
    ("New Video", "new video"),
    ("vlcsnap", "vlcsnap"),
    ("bandicam", "bandicam"),
    ("OBS_", "OBS "),
    ("Rec_", "Rec_"),
    ("WIN_", "WIN_"),
];

/// Words that pull searches towards forgotten footage
pub const BOOSTER_WORDS: &[&str] = &[
    "found footage",
    "abandoned",
    "3am",
    "liminal",
    "backrooms",
    "vhs",
    "old tape",
    "camcorder",
    "security camera",
    "cctv",
    "dashcam",
    "trail cam",
    "baby monitor",
    "answering machine",
    "voicemail",
    "thrift store",
    "yard sale",
    "estate sale",
    "strange noise",
    "unexplained",
    "glitch",
    "corrupted",
    "forgotten",
    "lost media",
    "found in attic",
    "hidden camera",
    "night vision",
    "numbers station",
    "empty mall",
    "parking garage",
    "time capsule",
    "before internet",
];

const CHAOS_PREFIXES: &[&str] = &["IMG_", "DSC_", "VID_", "MOV_", "MVI_", "GOPR", "DJI_"];

const CHAOS_DEVICES: &[&str] = &["iphone", "samsung", "nokia", "motorola", "lg", "sony ericsson"];

/// Fragments that render badly or mix scripts: lone combining marks, the replacement
/// character, zero-width joiners and script soup
const CHAOS_UNICODE: &[&str] = &[
    "\u{0301}\u{0301}",
    "\u{FFFD}\u{FFFD}",
    "\u{200D}video",
    "\u{0336}",
    "видео\u{3000}動画",
    "ビデオ فيديو",
    "วิดีโอ\u{0E47}\u{0E47}",
    "\u{202E}oediv",
];

const STOP_WORDS: &[&str] = &[
    "the", "and", "is", "in", "to", "of", "a", "for", "on", "it", "this", "that", "with",
    "from",
];

const TIME_TRAVEL_MIN_DAYS: i64 = 365;
const TIME_TRAVEL_MAX_DAYS: i64 = 7_000;
const TIME_TRAVEL_WINDOW_DAYS: i64 = 5;

/// Documented default for rabbit-hole generation
pub const DEFAULT_RABBIT_HOLE_CAP: usize = 10;

/// Documented default for chaos generation
pub const DEFAULT_CHAOS_COUNT: usize = 5;

/// Resolve a pattern name such as `IMG_XXXX` to its search token; unknown names pass
/// through unchanged
pub fn pattern_token(name: &str) -> &str {
    FILENAME_PATTERNS
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case(name))
        .map_or(name, |(_, token)| *token)
}

/// Case-insensitive dedup that keeps first occurrences in order
fn dedup_queries(queries: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(q.to_lowercase()))
        .collect()
}

fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

/// Text a rabbit hole starts from, usually a prior result
#[derive(Debug, Clone, Default)]
pub struct RabbitHoleSeed {
    pub tags: Vec<String>,
    pub title: String,
    pub channel: String,
    pub description: String,
}

impl RabbitHoleSeed {
    pub fn from_record(record: &MediaRecord) -> Self {
        Self {
            tags: record.tags.iter().cloned().collect(),
            title: record.title.clone(),
            channel: record.channel_id.clone(),
            description: record.description.clone(),
        }
    }
}

/// Seeded query generator
#[derive(Debug, Clone)]
pub struct QueryGenerator {
    rng: ChaCha8Rng,
    now: DateTime<Utc>,
    max_queries: usize,
}

impl QueryGenerator {
    /// Deterministic generator for `seed`, with `now` as the reference time
    pub fn new(seed: u64, now: DateTime<Utc>) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            now,
            max_queries: 50,
        }
    }

    /// Generator seeded from OS entropy
    pub fn from_entropy(now: DateTime<Utc>) -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
            now,
            max_queries: 50,
        }
    }

    /// Ceiling on queries emitted by one call
    pub fn with_max_queries(mut self, max_queries: usize) -> Self {
        self.max_queries = max_queries;
        self
    }

    fn check_count(&self, count: usize) -> Result<()> {
        if count == 0 || count > self.max_queries {
            return Err(Error::invalid_query(format!(
                "requested {count} queries, allowed 1..={}",
                self.max_queries
            )));
        }
        Ok(())
    }

    fn pick<'a>(&mut self, items: &[&'a str]) -> &'a str {
        items.choose(&mut self.rng).copied().unwrap_or_default()
    }

    fn pick_token(&mut self) -> &'static str {
        FILENAME_PATTERNS
            .choose(&mut self.rng)
            .map_or("IMG_", |(_, token)| *token)
    }

    // ========================================================================
    // Time travel
    // ========================================================================

    /// Filename token stamped with a random historical date, filtered to ±5 days
    pub fn time_travel(&mut self) -> Query {
        let days_back = self
            .rng
            .gen_range(TIME_TRAVEL_MIN_DAYS..=TIME_TRAVEL_MAX_DAYS);
        let center = self.now - Duration::days(days_back);
        let token = self.pick_token();

        Query::new(format!("{token}{}", center.format("%Y%m%d"))).with_date_range(
            Some(center - Duration::days(TIME_TRAVEL_WINDOW_DAYS)),
            Some(center + Duration::days(TIME_TRAVEL_WINDOW_DAYS)),
        )
    }

    // ========================================================================
    // Chaos
    // ========================================================================

    /// `count` incoherent queries
    pub fn chaos(&mut self, count: usize) -> Result<Vec<Query>> {
        self.check_count(count)?;
        Ok((0..count)
            .map(|_| Query::new(self.chaos_text()))
            .collect())
    }

    fn chaos_text(&mut self) -> String {
        match self.rng.gen_range(0..6) {
            0 => {
                let prefix = self.pick(CHAOS_PREFIXES);
                format!("{prefix}{}", self.rng.gen_range(1_000..=9_999))
            }
            1 => format!(
                "{}-{}-{}",
                self.rng.gen_range(2005..=2023),
                self.rng.gen_range(13..=19),
                self.rng.gen_range(32..=39)
            ),
            2 => {
                let first = self.pick(BOOSTER_WORDS);
                let second = self.pick(BOOSTER_WORDS);
                format!("{first} {second}")
            }
            3 => {
                let mut bytes = [0u8; 16];
                self.rng.fill_bytes(&mut bytes);
                let digest = format!("{:x}", Sha256::digest(bytes));
                digest[..8].to_string()
            }
            4 => {
                let device = self.pick(CHAOS_DEVICES);
                format!("{device} video {}", self.rng.gen_range(2006..=2015))
            }
            _ => {
                let fragment = self.pick(CHAOS_UNICODE);
                let token = self.pick_token();
                format!("{token}{fragment}")
            }
        }
    }

    // ========================================================================
    // Rabbit hole
    // ========================================================================

    /// Up to `cap` queries derived from a prior result
    pub fn rabbit_hole(&mut self, seed: &RabbitHoleSeed, cap: usize) -> Result<Vec<Query>> {
        self.check_count(cap)?;
        static CAPITALISED: OnceLock<Regex> = OnceLock::new();
        static YEAR: OnceLock<Regex> = OnceLock::new();
        static WORD: OnceLock<Regex> = OnceLock::new();
        let capitalised = CAPITALISED
            .get_or_init(|| Regex::new(r"\b[A-Z][a-z]{3,}\b").expect("Invalid regex pattern"));
        let year = YEAR.get_or_init(|| Regex::new(r"\b(20[0-2]\d)\b").expect("Invalid regex pattern"));
        let word = WORD.get_or_init(|| Regex::new(r"\b\w{4,}\b").expect("Invalid regex pattern"));

        let tags: Vec<&str> = seed
            .tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        let mut queries = Vec::new();

        for pair in tags.windows(2).take(5) {
            queries.push(format!("{} {}", pair[0], pair[1]));
        }
        for (index, prefix) in [(0, "IMG_"), (2, "VID_"), (4, "DSC_")] {
            if let Some(tag) = tags.get(index) {
                queries.push(format!("{prefix} {tag}"));
            }
        }

        let text = format!("{} {}", seed.title, seed.description);
        let names: Vec<&str> = capitalised.find_iter(&text).map(|m| m.as_str()).collect();
        if names.len() >= 2 {
            queries.push(format!("{} {}", names[0], names[1]));
        }
        if let Some(name) = names.first() {
            queries.push(format!("IMG_ {name}"));
        }

        let channel = seed.channel.trim();
        if !channel.is_empty() && !channel.eq_ignore_ascii_case("unknown") {
            queries.push(format!("\"{channel}\""));
        }

        if let (Some(found), Some(tag)) = (year.find(&text), tags.first()) {
            queries.push(format!("{} {tag}", found.as_str()));
        }
        if let Some(tag) = tags.first() {
            let booster = self.pick(&BOOSTER_WORDS[..15]);
            queries.push(format!("{booster} {tag}"));
        }

        let description = seed.description.to_lowercase();
        let top = top_words(word.find_iter(&description).map(|m| m.as_str()), 2);
        if top.len() == 2 {
            queries.push(format!("{} {}", top[0], top[1]));
        }

        let mut unique = dedup_queries(queries);
        unique.truncate(cap);
        Ok(unique.into_iter().map(Query::new).collect())
    }

    // ========================================================================
    // Time capsule
    // ========================================================================

    /// Generic queries for everything uploaded on `date`
    pub fn time_capsule(&self, date: NaiveDate) -> Vec<Query> {
        let (start, end) = day_bounds(date);
        let compact = date.format("%Y%m%d").to_string();
        let texts = [
            compact.clone(),
            date.format("%Y-%m-%d").to_string(),
            date.format("%m/%d/%Y").to_string(),
            date.format("%B %d %Y").to_string(),
            date.format("%b %d %Y").to_string(),
            date.format("%d %B %Y").to_string(),
            format!("IMG_{compact}"),
            format!("VID_{compact}"),
            format!("MOV_{compact}"),
            format!("DSC_{compact}"),
        ];

        dedup_queries(texts)
            .into_iter()
            .map(|text| Query::new(text).with_date_range(Some(start), Some(end)))
            .collect()
    }

    /// Uniformly random day between 2005-04-23 and the reference date
    pub fn random_capsule_date(&mut self) -> NaiveDate {
        let first = NaiveDate::from_ymd_opt(2005, 4, 23).unwrap_or_default();
        let span = (self.now.date_naive() - first).num_days().max(0);
        first + Duration::days(self.rng.gen_range(0..=span))
    }

    // ========================================================================
    // Pattern restricted
    // ========================================================================

    /// One query per prefix, restricted client-side to titles starting with that prefix
    pub fn pattern_restricted(&self, prefixes: &[&str], keywords: &str) -> Result<Vec<Query>> {
        self.check_count(prefixes.len())?;
        let keywords = keywords.trim();
        Ok(prefixes
            .iter()
            .map(|name| pattern_token(name).trim())
            .filter(|token| !token.is_empty())
            .map(|token| {
                let text = if keywords.is_empty() {
                    token.to_string()
                } else {
                    format!("{token} {keywords}")
                };
                Query::new(text).with_patterns([token])
            })
            .collect())
    }

    // ========================================================================
    // Manual builder
    // ========================================================================

    /// Keywords × filename patterns × booster words, deduplicated, `IMG_` when empty
    pub fn build_queries(keywords: &str, patterns: &[&str], boosters: &[&str]) -> Vec<String> {
        let keywords = keywords.trim();
        let with_keywords = |head: &str| {
            if keywords.is_empty() {
                head.to_string()
            } else {
                format!("{head} {keywords}")
            }
        };

        let mut queries = Vec::new();
        if !keywords.is_empty() {
            queries.push(keywords.to_string());
        }
        queries.extend(patterns.iter().map(|name| with_keywords(pattern_token(name))));
        queries.extend(boosters.iter().map(|booster| with_keywords(*booster)));

        let unique = dedup_queries(queries);
        if unique.is_empty() {
            vec![String::from("IMG_")]
        } else {
            unique
        }
    }
}

/// Most frequent non-stop words, ties broken by first appearance
fn top_words<'a>(words: impl Iterator<Item = &'a str>, n: usize) -> Vec<&'a str> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, word) in words.filter(|w| !STOP_WORDS.contains(w)).enumerate() {
        counts.entry(word).or_insert((0, position)).0 += 1;
    }
    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(n).map(|(word, _)| word).collect()
}
