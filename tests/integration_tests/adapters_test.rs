//! HTTP adapters against mock servers
//!
//! Every adapter takes its base URL from configuration, so the tests point them at a
//! local wiremock server.

use std::sync::Arc;
use std::time::Duration;

use obscura::config::{BreakerConfig, HttpSourceConfig, SourceQuotaConfig};
use obscura::engine::{CancelToken, DiscoveryEngine};
use obscura::models::{CandidateId, Query, SourceKind};
use obscura::quota::{BreakerState, CostTable, RateLimiter};
use obscura::sources::{
    ApiSource, ArchiveSource, GovernedSource, GovernorSettings, ScrapeSource, SourceAdapter,
    StaticCredentials,
};
use obscura::utils::error::SourceError;
use obscura::utils::retry::RetryConfig;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{manual_clock, test_config};

fn http_config(server: &MockServer) -> HttpSourceConfig {
    HttpSourceConfig {
        enabled: true,
        base_url: server.uri(),
        user_agent: String::from("obscura-test"),
        request_timeout_secs: 5,
        api_key_env: None,
    }
}

fn api_source(server: &MockServer) -> ApiSource {
    let credentials = StaticCredentials::new().with(SourceKind::Api, "test-key");
    ApiSource::new(
        &http_config(server),
        Arc::new(credentials),
        Arc::new(manual_clock()),
    )
    .unwrap()
}

fn id(s: &str) -> CandidateId {
    CandidateId::parse(s).unwrap()
}

// ============================================================================
// Official API
// ============================================================================

#[tokio::test]
async fn test_api_search_hydrates_in_listing_order() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("key", "test-key"))
        .and(query_param("q", "vhs tape"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [
                {"id": {"videoId": "bbbbbbbbbbb"}},
                {"id": {"videoId": "aaaaaaaaaaa"}},
                {"id": {"channelId": "UCnotavideo"}}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [
                {
                    "id": "aaaaaaaaaaa",
                    "snippet": {"title": "IMG_0001", "publishedAt": "2009-04-01T03:15:00Z"},
                    "statistics": {"viewCount": "0"}
                },
                {
                    "id": "bbbbbbbbbbb",
                    "snippet": {"title": "family reunion"},
                    "statistics": {"viewCount": "12", "likeCount": "1"}
                }
            ]
        })))
        .mount(&server)
        .await;

    let source = api_source(&server);
    let records = source.search(&Query::new("vhs tape"), 10).await.unwrap();

    let ids: Vec<String> = records.iter().map(|r| r.id.to_string()).collect();
    assert_eq!(ids, vec!["bbbbbbbbbbb", "aaaaaaaaaaa"]);
    assert_eq!(records[0].view_count, 12);
    assert_eq!(records[0].like_count, 1);
    assert_eq!(records[1].title, "IMG_0001");
    assert!(records[1].uploaded_at.is_some());
}

#[tokio::test]
async fn test_api_without_key_is_unauthorized_and_silent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let source = ApiSource::new(
        &http_config(&server),
        Arc::new(StaticCredentials::new()),
        Arc::new(manual_clock()),
    )
    .unwrap();

    let err = source.fetch_details("aaaaaaaaaaa").await.unwrap_err();
    assert!(matches!(err, SourceError::Unauthorized { .. }));
}

#[tokio::test]
async fn test_api_quota_exceeded_body_counts_as_throttling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/videos"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_string(r#"{"error":{"errors":[{"reason":"quotaExceeded"}]}}"#),
        )
        .mount(&server)
        .await;

    let err = api_source(&server)
        .fetch_details("aaaaaaaaaaa")
        .await
        .unwrap_err();
    assert!(err.is_throttled());
}

#[tokio::test]
async fn test_repeated_429_opens_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let limiter = Arc::new(RateLimiter::new(Arc::new(manual_clock())).with_source(
        SourceKind::Api,
        &SourceQuotaConfig {
            window_secs: 86_400,
            window_units: 100_000,
            requests_per_second: 1_000,
            burst: 1_000,
            costs: CostTable::api(),
        },
        &BreakerConfig::default(),
    ));
    let settings = GovernorSettings {
        call_timeout: Duration::from_secs(5),
        max_permit_wait: Duration::from_millis(50),
        retry: RetryConfig::with_delays(2, 1, 2),
    };
    let governed = GovernedSource::new(Arc::new(api_source(&server)), limiter.clone(), settings);

    let err = governed.search(&Query::new("x"), 5).await.unwrap_err();
    assert!(err.is_throttled());

    let snapshot = limiter.snapshot_of(SourceKind::Api).await.unwrap();
    assert!(matches!(snapshot.breaker, BreakerState::Open { .. }));

    // Three attempts reached the server; the open breaker stops the fourth
    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 3);
    assert!(governed.search(&Query::new("x"), 5).await.is_err());
    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 3);
}

// ============================================================================
// Archive index
// ============================================================================

#[tokio::test]
async fn test_archive_search_reads_docs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/advancedsearch.php"))
        .and(query_param("output", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": {
                "docs": [
                    {"identifier": "home-movie-1987", "title": "Home movie", "downloads": 3, "date": "1987"},
                    {"title": "no identifier"}
                ]
            }
        })))
        .mount(&server)
        .await;

    let source = ArchiveSource::new(&http_config(&server)).unwrap();
    let records = source.search(&Query::new("home movie"), 10).await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id.to_string(), "archive:home-movie-1987");
    assert_eq!(records[0].view_count, 3);
    assert_eq!(records[0].source, SourceKind::Archive);
}

#[tokio::test]
async fn test_archive_unknown_identifier_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metadata/missing-item"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let source = ArchiveSource::new(&http_config(&server)).unwrap();
    let err = source.fetch_details("missing-item").await.unwrap_err();
    assert!(matches!(err, SourceError::NotFound { .. }));
}

// ============================================================================
// Public pages
// ============================================================================

const WATCH_PAGE: &str = r#"<html><body>
<script>var ytInitialPlayerResponse = {"playabilityStatus":{"status":"OK"},"videoDetails":{"videoId":"aaaaaaaaaaa","title":"MVI_0420","viewCount":"4","lengthSeconds":"31","channelId":"UCcam"}};</script>
<script>var ytInitialData = {"contents":{"secondaryResults":{"results":[
 {"compactVideoRenderer":{"videoId":"bbbbbbbbbbb"}},
 {"compactVideoRenderer":{"videoId":"aaaaaaaaaaa"}},
 {"compactVideoRenderer":{"videoId":"ccccccccccc"}},
 {"compactVideoRenderer":{"videoId":"bbbbbbbbbbb"}},
 {"compactVideoRenderer":{"videoId":"ddddddddddd"}}
]}}};</script>
</body></html>"#;

#[tokio::test]
async fn test_scrape_related_skips_seed_and_repeats() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/watch"))
        .and(query_param("v", "aaaaaaaaaaa"))
        .respond_with(ResponseTemplate::new(200).set_body_string(WATCH_PAGE))
        .mount(&server)
        .await;

    let source = ScrapeSource::new(&http_config(&server), Arc::new(manual_clock())).unwrap();

    let related = source.related(&id("aaaaaaaaaaa"), 2).await.unwrap();
    assert_eq!(related, vec![id("bbbbbbbbbbb"), id("ccccccccccc")]);

    let record = source.fetch_details("aaaaaaaaaaa").await.unwrap();
    assert_eq!(record.title, "MVI_0420");
    assert_eq!(record.view_count, 4);
    assert_eq!(record.duration_seconds, 31);
}

#[tokio::test]
async fn test_scrape_missing_video_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/watch"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let source = ScrapeSource::new(&http_config(&server), Arc::new(manual_clock())).unwrap();
    let err = source.fetch_details("zzzzzzzzzzz").await.unwrap_err();
    assert!(matches!(err, SourceError::NotFound { ref id, .. } if id == "zzzzzzzzzzz"));
}

// ============================================================================
// Engine over HTTP adapters
// ============================================================================

#[tokio::test]
async fn test_engine_builds_http_adapters_from_config() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/advancedsearch.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": {"docs": [{"identifier": "tape-1", "downloads": 0}]}
        })))
        .mount(&server)
        .await;

    let mut config = test_config();
    config.sources.api = http_config(&server);
    config.sources.scrape = http_config(&server);
    config.sources.archive = http_config(&server);

    let engine = DiscoveryEngine::builder(config)
        .with_clock(Arc::new(manual_clock()))
        .with_credentials(Arc::new(StaticCredentials::new()))
        .build()
        .unwrap();
    assert_eq!(
        engine.sources(),
        vec![SourceKind::Api, SourceKind::Scrape, SourceKind::Archive]
    );

    let outcome = engine
        .search(
            &Query::new("tape").with_exact_zero(),
            &[SourceKind::Archive],
            CancelToken::never(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert!(outcome.status.is_complete());
}
