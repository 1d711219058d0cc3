//! Official data API adapter
//!
//! Supports server-side date filtering, view-count ordering, location passthrough and
//! deep paging via `pageToken`. Listing calls return bare IDs; records are hydrated
//! with one batched `videos` call per 50 IDs.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::credentials::CredentialProvider;
use super::{SourceAdapter, SourceResult};
use crate::clock::SharedClock;
use crate::config::HttpSourceConfig;
use crate::models::{CandidateId, MediaRecord, Query, SourceKind};
use crate::quota::OperationKind;
use crate::utils::error::SourceError;
use crate::utils::parse_iso8601_duration;

/// Largest page the API serves
const PAGE_SIZE: usize = 50;

const ORIGIN: SourceKind = SourceKind::Api;

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    #[serde(default)]
    items: Vec<SearchItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoPage {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    #[serde(default)]
    snippet: Snippet,
    #[serde(default)]
    statistics: Statistics,
    #[serde(default)]
    content_details: ContentDetails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    tags: Vec<String>,
}

/// Counts arrive as decimal strings
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
    like_count: Option<String>,
    comment_count: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ContentDetails {
    duration: Option<String>,
    definition: Option<String>,
}

fn count(value: &Option<String>) -> u64 {
    value
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
}

impl VideoItem {
    fn into_record(self) -> Option<MediaRecord> {
        let id = CandidateId::parse(&self.id).ok()?;
        let mut record = MediaRecord::video(id, ORIGIN)
            .with_title(self.snippet.title)
            .with_description(self.snippet.description)
            .with_views(count(&self.statistics.view_count))
            .with_engagement(
                count(&self.statistics.like_count),
                count(&self.statistics.comment_count),
            )
            .with_duration(
                self.content_details
                    .duration
                    .as_deref()
                    .and_then(parse_iso8601_duration)
                    .unwrap_or(0),
            )
            .with_tags(self.snippet.tags)
            .with_channel(self.snippet.channel_id);
        if let Some(at) = self.snippet.published_at {
            record = record.with_uploaded_at(at);
        }
        if let Some(definition) = self.content_details.definition {
            record = record.with_hd(definition.eq_ignore_ascii_case("hd"));
        }
        Some(record)
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Official data API adapter
pub struct ApiSource {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    clock: SharedClock,
}

impl std::fmt::Debug for ApiSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSource")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ApiSource {
    /// Create the adapter from its transport settings
    ///
    /// # Errors
    ///
    /// Returns `SourceError::SourceUnavailable` if the HTTP client cannot be created
    pub fn new(
        config: &HttpSourceConfig,
        credentials: Arc<dyn CredentialProvider>,
        clock: SharedClock,
    ) -> SourceResult<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout())
            .gzip(true)
            .build()
            .map_err(|e| SourceError::from_http(ORIGIN, &e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            clock,
        })
    }

    fn key(&self) -> SourceResult<String> {
        self.credentials
            .credential(ORIGIN)
            .ok_or_else(|| SourceError::Unauthorized {
                origin: ORIGIN,
                reason: String::from("no API key available"),
            })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        id: Option<&str>,
    ) -> SourceResult<T> {
        let key = self.key()?;
        let url = format!("{}/{endpoint}", self.base_url);
        debug!(endpoint, params = params.len(), "API request");

        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("key", key.as_str())])
            .send()
            .await
            .map_err(|e| SourceError::from_http(ORIGIN, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::from_status(ORIGIN, status.as_u16(), id, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::decode(ORIGIN, e.to_string()))
    }

    /// Walk `search` pages until `limit` IDs are collected or the listing ends
    async fn list_ids(
        &self,
        mut params: Vec<(&'static str, String)>,
        limit: usize,
    ) -> SourceResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        params.push(("part", String::from("snippet")));
        params.push(("type", String::from("video")));

        loop {
            let mut page_params = params.clone();
            page_params.push(("maxResults", (limit - ids.len()).min(PAGE_SIZE).to_string()));
            if let Some(token) = page_token.take() {
                page_params.push(("pageToken", token));
            }

            let page: SearchPage = self.get("search", &page_params, None).await?;
            ids.extend(page.items.into_iter().filter_map(|item| item.id.video_id));

            match page.next_page_token {
                Some(token) if ids.len() < limit => page_token = Some(token),
                _ => break,
            }
        }

        ids.truncate(limit);
        Ok(ids)
    }

    /// Fetch full records for `ids`, preserving their order
    async fn hydrate(&self, ids: &[String]) -> SourceResult<Vec<MediaRecord>> {
        let mut by_id: HashMap<String, MediaRecord> = HashMap::with_capacity(ids.len());

        for batch in ids.chunks(PAGE_SIZE) {
            let params = [
                ("part", String::from("snippet,statistics,contentDetails")),
                ("id", batch.join(",")),
            ];
            let page: VideoPage = self.get("videos", &params, None).await?;
            for item in page.items {
                let id = item.id.clone();
                if let Some(record) = item.into_record() {
                    by_id.insert(id, record);
                }
            }
        }

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    fn search_params(&self, query: &Query) -> Vec<(&'static str, String)> {
        let filters = &query.filters;
        let mut params = vec![
            ("q", query.text.clone()),
            ("order", query.sort.api_order().to_string()),
            ("safeSearch", String::from("none")),
        ];

        if let Some(from) = filters.date_from {
            params.push(("publishedAfter", rfc3339(from)));
        }

        let min_age_cutoff = filters
            .min_age_days
            .map(|days| self.clock.now() - chrono::Duration::days(i64::from(days)));
        let before = match (filters.date_to, min_age_cutoff) {
            (Some(to), Some(cutoff)) => Some(to.min(cutoff)),
            (to, cutoff) => to.or(cutoff),
        };
        if let Some(before) = before {
            params.push(("publishedBefore", rfc3339(before)));
        }

        if let Some(geo) = filters.location {
            params.push(("location", format!("{},{}", geo.latitude, geo.longitude)));
            params.push(("locationRadius", format!("{}km", geo.radius_km)));
        }

        params
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl SourceAdapter for ApiSource {
    fn kind(&self) -> SourceKind {
        ORIGIN
    }

    fn supports(&self, _op: OperationKind) -> bool {
        true
    }

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    async fn search(&self, query: &Query, limit: usize) -> SourceResult<Vec<MediaRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let ids = self.list_ids(self.search_params(query), limit).await?;
        self.hydrate(&ids).await
    }

    async fn fetch_details(&self, id: &str) -> SourceResult<MediaRecord> {
        let params = [
            ("part", String::from("snippet,statistics,contentDetails")),
            ("id", id.to_string()),
        ];
        let page: VideoPage = self.get("videos", &params, Some(id)).await?;
        page.items
            .into_iter()
            .find_map(VideoItem::into_record)
            .ok_or_else(|| SourceError::NotFound {
                origin: ORIGIN,
                id: id.to_string(),
            })
    }

    async fn related(&self, id: &CandidateId, limit: usize) -> SourceResult<Vec<CandidateId>> {
        let params = vec![("relatedToVideoId", id.as_str().to_string())];
        let ids = self.list_ids(params, limit).await?;
        Ok(ids
            .iter()
            .filter_map(|raw| CandidateId::parse(raw).ok())
            .filter(|candidate| candidate != id)
            .collect())
    }

    async fn channel_uploads(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> SourceResult<Vec<MediaRecord>> {
        let params = vec![
            ("channelId", channel_id.to_string()),
            ("order", String::from("date")),
        ];
        let ids = self.list_ids(params, limit).await?;
        self.hydrate(&ids).await
    }
}
