//! Common utilities and helper functions
//!
//! This module provides text helpers shared by the source adapters and scoring.

pub mod error;
pub mod retry;

use regex::Regex;
use std::sync::OnceLock;

/// Normalize whitespace in text
pub fn normalize_whitespace(text: &str) -> String {
    static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

    let re = WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("Invalid regex pattern"));

    re.replace_all(text.trim(), " ").to_string()
}

/// Truncate text to a maximum number of characters
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

/// Parse an ISO-8601 duration such as `PT1H2M3S` or `P1DT2H` into seconds
///
/// Returns `None` for anything that is not a day/time duration.
pub fn parse_iso8601_duration(value: &str) -> Option<u64> {
    static DURATION_RE: OnceLock<Regex> = OnceLock::new();

    let re = DURATION_RE.get_or_init(|| {
        Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$")
            .expect("Invalid regex pattern")
    });

    let caps = re.captures(value.trim())?;
    let part = |i: usize, unit: u64| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .map_or(0, |n| n.saturating_mul(unit))
    };

    if caps.iter().skip(1).all(|m| m.is_none()) {
        return None;
    }

    Some(part(1, 86_400) + part(2, 3_600) + part(3, 60) + part(4, 1))
}

/// Parse a `M:SS` / `H:MM:SS` clock-style length into seconds
pub fn parse_clock_duration(value: &str) -> Option<u64> {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }

    parts.iter().try_fold(0u64, |acc, part| {
        let n = part.trim().parse::<u64>().ok()?;
        Some(acc * 60 + n)
    })
}

/// Parse a rendered view count such as `"1,234 views"`, `"No views"` or `"1.2K views"`
pub fn parse_view_count(text: &str) -> Option<u64> {
    static COUNT_RE: OnceLock<Regex> = OnceLock::new();

    let lowered = text.trim().to_lowercase();
    if lowered.starts_with("no ") {
        return Some(0);
    }

    let re = COUNT_RE.get_or_init(|| {
        Regex::new(r"([\d][\d,\.]*)\s*([kmb])?").expect("Invalid regex pattern")
    });

    let caps = re.captures(&lowered)?;
    let digits = caps.get(1)?.as_str();
    let multiplier = match caps.get(2).map(|m| m.as_str()) {
        Some("k") => 1_000.0,
        Some("m") => 1_000_000.0,
        Some("b") => 1_000_000_000.0,
        _ => 1.0,
    };

    if multiplier == 1.0 {
        digits.replace([',', '.'], "").parse::<u64>().ok()
    } else {
        let value: f64 = digits.replace(',', "").parse().ok()?;
        Some((value * multiplier).round() as u64)
    }
}
