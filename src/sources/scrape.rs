//! Public web page adapter
//!
//! Reads the JSON blobs embedded in result, watch and channel pages
//! (`ytInitialData`, `ytInitialPlayerResponse`). No server-side filtering is possible,
//! so every filter is applied client-side by the orchestrator. Upload times on listing
//! pages are relative ("3 years ago") and resolved against the injected clock.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

use super::{SourceAdapter, SourceResult};
use crate::clock::SharedClock;
use crate::config::HttpSourceConfig;
use crate::models::{CandidateId, MediaRecord, Query, SortKey, SourceKind};
use crate::quota::OperationKind;
use crate::utils::error::SourceError;
use crate::utils::{normalize_whitespace, parse_clock_duration, parse_view_count};

const ORIGIN: SourceKind = SourceKind::Scrape;

/// Renderer objects that describe one video on listing pages
const LISTING_RENDERERS: &[&str] = &["videoRenderer", "gridVideoRenderer", "compactVideoRenderer"];

/// Public web page adapter
#[derive(Debug)]
pub struct ScrapeSource {
    client: Client,
    base_url: String,
    clock: SharedClock,
}

impl ScrapeSource {
    /// Create the adapter from its transport settings
    ///
    /// # Errors
    ///
    /// Returns `SourceError::SourceUnavailable` if the HTTP client cannot be created
    pub fn new(config: &HttpSourceConfig, clock: SharedClock) -> SourceResult<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(Self::build_headers())
            .timeout(config.request_timeout())
            .gzip(true)
            .cookie_store(true)
            .build()
            .map_err(|e| SourceError::from_http(ORIGIN, &e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            clock,
        })
    }

    /// Browser-like headers sent with every page request
    fn build_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers
    }

    async fn fetch_page(
        &self,
        path: &str,
        params: &[(&str, &str)],
        id: Option<&str>,
    ) -> SourceResult<String> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "Fetching page");

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| SourceError::from_http(ORIGIN, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::from_status(ORIGIN, status.as_u16(), id, &body));
        }

        response
            .text()
            .await
            .map_err(|e| SourceError::from_http(ORIGIN, &e))
    }

    fn listing_records(&self, html: &str) -> SourceResult<Vec<MediaRecord>> {
        let data = extract_embedded_json(html, "ytInitialData")
            .ok_or_else(|| SourceError::decode(ORIGIN, "page has no ytInitialData"))?;

        let now = self.clock.now();
        let mut renderers = Vec::new();
        collect_renderers(&data, LISTING_RENDERERS, &mut renderers);

        Ok(renderers
            .into_iter()
            .filter_map(|renderer| renderer_to_record(renderer, now))
            .collect())
    }
}

#[async_trait]
impl SourceAdapter for ScrapeSource {
    fn kind(&self) -> SourceKind {
        ORIGIN
    }

    fn supports(&self, _op: OperationKind) -> bool {
        true
    }

    async fn search(&self, query: &Query, limit: usize) -> SourceResult<Vec<MediaRecord>> {
        let mut params = vec![("search_query", query.text.as_str())];
        match query.sort {
            SortKey::Date => params.push(("sp", "CAI=")),
            SortKey::Views => params.push(("sp", "CAM=")),
            SortKey::Score | SortKey::Relevance => {}
        }

        let html = self.fetch_page("/results", &params, None).await?;
        let mut records = self.listing_records(&html)?;
        records.truncate(limit);
        Ok(records)
    }

    async fn fetch_details(&self, id: &str) -> SourceResult<MediaRecord> {
        let html = self.fetch_page("/watch", &[("v", id)], Some(id)).await?;
        let not_found = || SourceError::NotFound {
            origin: ORIGIN,
            id: id.to_string(),
        };

        let player = extract_embedded_json(&html, "ytInitialPlayerResponse").ok_or_else(not_found)?;
        if player["playabilityStatus"]["status"].as_str() == Some("ERROR") {
            return Err(not_found());
        }
        player_to_record(&player).ok_or_else(not_found)
    }

    async fn related(&self, id: &CandidateId, limit: usize) -> SourceResult<Vec<CandidateId>> {
        let html = self
            .fetch_page("/watch", &[("v", id.as_str())], Some(id.as_str()))
            .await?;
        let data = extract_embedded_json(&html, "ytInitialData")
            .ok_or_else(|| SourceError::decode(ORIGIN, "watch page has no ytInitialData"))?;

        let mut renderers = Vec::new();
        collect_renderers(&data, LISTING_RENDERERS, &mut renderers);

        let mut related: Vec<CandidateId> = Vec::new();
        for renderer in renderers {
            let Some(candidate) = renderer["videoId"]
                .as_str()
                .and_then(|raw| CandidateId::parse(raw).ok())
            else {
                continue;
            };
            if &candidate != id && !related.contains(&candidate) {
                related.push(candidate);
            }
            if related.len() >= limit {
                break;
            }
        }
        Ok(related)
    }

    async fn channel_uploads(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> SourceResult<Vec<MediaRecord>> {
        let path = format!("/channel/{channel_id}/videos");
        let html = self.fetch_page(&path, &[], Some(channel_id)).await?;
        let mut records = self.listing_records(&html)?;
        records.truncate(limit);
        Ok(records
            .into_iter()
            .map(|record| {
                if record.channel_id.is_empty() {
                    record.with_channel(channel_id)
                } else {
                    record
                }
            })
            .collect())
    }
}

// ============================================================================
// Page parsing
// ============================================================================

/// Find `<marker> = {...};` inside a `<script>` tag and parse the object
pub(crate) fn extract_embedded_json(html: &str, marker: &str) -> Option<Value> {
    static SCRIPT: OnceLock<Selector> = OnceLock::new();
    let selector = SCRIPT.get_or_init(|| Selector::parse("script").expect("Invalid selector"));

    let document = Html::parse_document(html);
    document.select(selector).find_map(|script| {
        let text: String = script.text().collect();
        let start = text.find(marker)?;
        let rest = &text[start + marker.len()..];
        let brace = rest.find('{')?;
        // Only `= {` or `"] = {` may sit between the marker and the object
        if rest[..brace].chars().any(|c| !matches!(c, ' ' | '=' | '"' | ']')) {
            return None;
        }
        serde_json::Deserializer::from_str(&rest[brace..])
            .into_iter::<Value>()
            .next()?
            .ok()
    })
}

/// Depth-first collection of objects stored under any of `keys`, in array order
fn collect_renderers<'a>(value: &'a Value, keys: &[&str], out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if keys.contains(&key.as_str()) && child.is_object() {
                    out.push(child);
                } else {
                    collect_renderers(child, keys, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_renderers(item, keys, out);
            }
        }
        _ => {}
    }
}

/// Text of a `{simpleText}` or `{runs: [{text}]}` node
fn text_of(value: &Value) -> Option<String> {
    if let Some(text) = value["simpleText"].as_str() {
        return Some(text.to_string());
    }
    let runs = value["runs"].as_array()?;
    Some(
        runs.iter()
            .filter_map(|run| run["text"].as_str())
            .collect::<String>(),
    )
}

/// Resolve "3 years ago" / "Streamed 2 weeks ago" against `now`
pub(crate) fn parse_relative_age(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    static AGO_RE: OnceLock<Regex> = OnceLock::new();
    let re = AGO_RE.get_or_init(|| {
        Regex::new(r"(\d+)\s+(second|minute|hour|day|week|month|year)s?\s+ago")
            .expect("Invalid regex pattern")
    });

    let lowered = text.to_lowercase();
    let caps = re.captures(&lowered)?;
    let n: i64 = caps.get(1)?.as_str().parse().ok()?;
    let span = match caps.get(2)?.as_str() {
        "second" => Duration::seconds(n),
        "minute" => Duration::minutes(n),
        "hour" => Duration::hours(n),
        "day" => Duration::days(n),
        "week" => Duration::weeks(n),
        "month" => Duration::days(n * 30),
        _ => Duration::days(n * 365),
    };
    Some(now - span)
}

fn renderer_to_record(renderer: &Value, now: DateTime<Utc>) -> Option<MediaRecord> {
    let id = CandidateId::parse(renderer["videoId"].as_str()?).ok()?;

    let title = text_of(&renderer["title"]).unwrap_or_default();
    let views = text_of(&renderer["viewCountText"])
        .and_then(|text| parse_view_count(&text))
        .unwrap_or(0);
    let duration = text_of(&renderer["lengthText"])
        .and_then(|text| parse_clock_duration(&text))
        .unwrap_or(0);
    let description = renderer["detailedMetadataSnippets"][0]["snippetText"]
        .is_object()
        .then(|| text_of(&renderer["detailedMetadataSnippets"][0]["snippetText"]))
        .flatten()
        .or_else(|| text_of(&renderer["descriptionSnippet"]))
        .unwrap_or_default();
    let channel = renderer["ownerText"]["runs"][0]["navigationEndpoint"]["browseEndpoint"]
        ["browseId"]
        .as_str()
        .or_else(|| {
            renderer["longBylineText"]["runs"][0]["navigationEndpoint"]["browseEndpoint"]
                ["browseId"]
                .as_str()
        })
        .unwrap_or_default();

    let mut record = MediaRecord::video(id, ORIGIN)
        .with_title(normalize_whitespace(&title))
        .with_description(normalize_whitespace(&description))
        .with_views(views)
        .with_duration(duration)
        .with_channel(channel);
    if let Some(at) = text_of(&renderer["publishedTimeText"])
        .and_then(|text| parse_relative_age(&text, now))
    {
        record = record.with_uploaded_at(at);
    }
    Some(record)
}

fn parse_upload_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
}

fn player_to_record(player: &Value) -> Option<MediaRecord> {
    let details = &player["videoDetails"];
    let id = CandidateId::parse(details["videoId"].as_str()?).ok()?;
    let number = |v: &Value| v.as_str().and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);

    let tags = details["keywords"]
        .as_array()
        .map(|keywords| {
            keywords
                .iter()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut record = MediaRecord::video(id, ORIGIN)
        .with_title(details["title"].as_str().unwrap_or_default())
        .with_description(details["shortDescription"].as_str().unwrap_or_default())
        .with_views(number(&details["viewCount"]))
        .with_duration(number(&details["lengthSeconds"]))
        .with_tags(tags)
        .with_channel(details["channelId"].as_str().unwrap_or_default());

    let microformat = &player["microformat"]["playerMicroformatRenderer"];
    if let Some(at) = microformat["uploadDate"]
        .as_str()
        .or_else(|| microformat["publishDate"].as_str())
        .and_then(parse_upload_date)
    {
        record = record.with_uploaded_at(at);
    }
    Some(record)
}
