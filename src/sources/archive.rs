//! Archive index adapter
//!
//! Searches archival items through the advanced-search endpoint and resolves single items
//! through the metadata endpoint. Archive identifiers live in their own space and are
//! never deduplicated against video IDs. The download count stands in for views.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{SourceAdapter, SourceResult};
use crate::config::HttpSourceConfig;
use crate::models::{MediaRecord, Query, SortKey, SourceKind};
use crate::utils::error::SourceError;
use crate::utils::{normalize_whitespace, parse_clock_duration, truncate_text};

const ORIGIN: SourceKind = SourceKind::Archive;

/// Fields requested from advanced search
const FIELDS: &[&str] = &[
    "identifier",
    "title",
    "description",
    "downloads",
    "date",
    "publicdate",
    "subject",
    "creator",
    "runtime",
];

const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".webm", ".avi", ".mkv", ".mov", ".mpg", ".ogv"];

/// Archive index adapter
#[derive(Debug)]
pub struct ArchiveSource {
    client: Client,
    base_url: String,
    media_type: String,
}

impl ArchiveSource {
    /// Create the adapter from its transport settings
    ///
    /// # Errors
    ///
    /// Returns `SourceError::SourceUnavailable` if the HTTP client cannot be created
    pub fn new(config: &HttpSourceConfig) -> SourceResult<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout())
            .gzip(true)
            .build()
            .map_err(|e| SourceError::from_http(ORIGIN, &e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            media_type: String::from("movies"),
        })
    }

    /// Restrict searches to another media type (`movies` by default)
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = media_type.into();
        self
    }

    async fn get_json(
        &self,
        path: &str,
        params: &[(&str, String)],
        id: Option<&str>,
    ) -> SourceResult<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "Archive request");

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
            .json::<Value>()
            .await
            .map_err(|e| SourceError::decode(ORIGIN, e.to_string()))
    }

    fn search_expression(&self, query: &Query) -> String {
        let filters = &query.filters;
        let mut parts = Vec::new();
        if !query.text.trim().is_empty() {
            parts.push(format!("({})", query.text.trim()));
        }
        parts.push(format!("mediatype:{}", self.media_type));

        let day = |at: DateTime<Utc>| at.format("%Y-%m-%d").to_string();
        match (filters.date_from, filters.date_to) {
            (Some(from), to) => parts.push(format!(
                "date:[{} TO {}]",
                day(from),
                to.map_or_else(|| String::from("*"), day)
            )),
            (None, Some(to)) => parts.push(format!("date:[* TO {}]", day(to))),
            (None, None) => {}
        }
        parts.join(" AND ")
    }
}

/// A field that may be a string, a number, or a list of either
fn first_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(first_text),
        _ => None,
    }
}

fn all_text(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(first_text).collect(),
        Value::String(s) => s
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_archive_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    let day = value.get(..10).unwrap_or(value);
    if let Ok(date) = NaiveDate::parse_from_str(day, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    // Year-only dates are common for digitised tapes
    value
        .get(..4)
        .and_then(|year| year.parse::<i32>().ok())
        .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Build a record from an advanced-search doc or a metadata object
fn doc_to_record(doc: &Value) -> Option<MediaRecord> {
    let identifier = first_text(&doc["identifier"]).filter(|id| !id.is_empty())?;

    let downloads = match &doc["downloads"] {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        other => first_text(other)
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0),
    };
    let description = first_text(&doc["description"]).unwrap_or_default();
    let runtime = first_text(&doc["runtime"])
        .and_then(|r| parse_clock_duration(&r))
        .unwrap_or(0);

    let mut record = MediaRecord::archive(identifier)
        .with_title(normalize_whitespace(
            &first_text(&doc["title"]).unwrap_or_default(),
        ))
        .with_description(truncate_text(&normalize_whitespace(&description), 2_000))
        .with_views(downloads)
        .with_duration(runtime)
        .with_tags(all_text(&doc["subject"]))
        .with_channel(first_text(&doc["creator"]).unwrap_or_default());

    if let Some(at) = first_text(&doc["date"])
        .or_else(|| first_text(&doc["publicdate"]))
        .and_then(|d| parse_archive_date(&d))
    {
        record = record.with_uploaded_at(at);
    }
    Some(record)
}

#[async_trait]
impl SourceAdapter for ArchiveSource {
    fn kind(&self) -> SourceKind {
        ORIGIN
    }

    async fn search(&self, query: &Query, limit: usize) -> SourceResult<Vec<MediaRecord>> {
        let mut params: Vec<(&str, String)> = vec![
            ("q", self.search_expression(query)),
            ("rows", limit.to_string()),
            ("page", String::from("1")),
            ("output", String::from("json")),
        ];
        params.extend(FIELDS.iter().map(|field| ("fl[]", (*field).to_string())));
        match query.sort {
            SortKey::Date => params.push(("sort[]", String::from("date desc"))),
            SortKey::Views => params.push(("sort[]", String::from("downloads asc"))),
            SortKey::Score | SortKey::Relevance => {}
        }

        let body = self.get_json("/advancedsearch.php", &params, None).await?;
        let docs = body["response"]["docs"]
            .as_array()
            .ok_or_else(|| SourceError::decode(ORIGIN, "advanced search response has no docs"))?;

        Ok(docs.iter().filter_map(doc_to_record).take(limit).collect())
    }

    async fn fetch_details(&self, id: &str) -> SourceResult<MediaRecord> {
        let path = format!("/metadata/{id}");
        let body = self.get_json(&path, &[], Some(id)).await?;
        let not_found = || SourceError::NotFound {
            origin: ORIGIN,
            id: id.to_string(),
        };

        // Unknown identifiers answer with an empty object
        if body.as_object().map_or(true, |map| map.is_empty()) {
            return Err(not_found());
        }

        let mut metadata = body["metadata"].clone();
        if !metadata.is_object() {
            return Err(not_found());
        }
        if metadata["identifier"].is_null() {
            metadata["identifier"] = Value::String(id.to_string());
        }
        if let Some(downloads) = body["item"]["downloads"].as_u64() {
            metadata["downloads"] = Value::from(downloads);
        }

        let mut record = doc_to_record(&metadata).ok_or_else(not_found)?;
        let hint = body["files"].as_array().and_then(|files| {
            files.iter().find_map(|file| {
                let name = file["name"].as_str()?;
                let lower = name.to_lowercase();
                let original = file["source"].as_str() == Some("original");
                (original && VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)))
                    .then(|| name.to_string())
            })
        });
        if let Some(hint) = hint {
            record = record.with_filename_hint(hint);
        }
        Ok(record)
    }
}
