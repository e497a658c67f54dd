//! Integration tests for the fetch-parse-cache pipeline.
//!
//! Each test gets its own in-memory snapshot store and its own mock upstream.
//! These drive the coordinator the way the HTTP shell would, exercising the
//! fetcher, parser, and store together.

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feeddeck::cache::{RefreshCoordinator, ServiceError, SnapshotStore, SweepOutcome, UpdateMethod};
use feeddeck::config::{Config, FeedSource};
use feeddeck::feed::ParseStrategy;

const RSS_BODY: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Chan</title><link>http://chan</link>
    <item><title><![CDATA[Hello]]></title><link>http://x/1</link><pubDate>D</pubDate></item>
    <item><title>Second</title><link>http://x/2</link><pubDate>D2</pubDate></item>
</channel></rss>"#;

const ATOM_BODY: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom"><title>Feed</title>
    <entry><title>T</title><link href="http://x/2"/><updated>U</updated><summary>S</summary></entry>
</feed>"#;

fn source(id: &str, url: String) -> FeedSource {
    FeedSource {
        id: id.to_string(),
        title: format!("Source {id}"),
        url,
        link: Some(format!("https://{id}.example.com")),
        strategy: ParseStrategy::Standard,
    }
}

fn config(sources: Vec<FeedSource>, admin_key: Option<&str>) -> Config {
    Config {
        cache_ttl_secs: 600,
        admin_key: admin_key.map(|k| SecretString::from(k.to_string())),
        sources,
    }
}

async fn coordinator(config: &Config) -> RefreshCoordinator {
    let store = SnapshotStore::open(":memory:").await.unwrap();
    RefreshCoordinator::new(store, config)
}

// ============================================================================
// Fetch Cycle Shape
// ============================================================================

#[tokio::test]
async fn test_one_result_per_source_in_config_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS_BODY))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/atom"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ATOM_BODY))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let cfg = config(
        vec![
            source("rss", format!("{}/rss", server.uri())),
            source("broken", format!("{}/broken", server.uri())),
            source("atom", format!("{}/atom", server.uri())),
        ],
        None,
    );
    let coord = coordinator(&cfg).await;

    let outcome = coord.read(false).await.unwrap();
    assert_eq!(outcome.results.len(), 3);

    let ids: Vec<&str> = outcome.results.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(ids, vec!["rss", "broken", "atom"]);

    // RSS source: CDATA title preferred, raw date preserved.
    let rss = &outcome.results[0];
    assert!(rss.error.is_none());
    assert_eq!(rss.total_items, 2);
    assert_eq!(rss.items[0].title, "Hello");
    assert_eq!(rss.items[0].link, "http://x/1");
    assert_eq!(rss.items[0].pub_date, "D");

    // The failing source is empty-with-error; neighbours untouched.
    let broken = &outcome.results[1];
    assert!(broken.items.is_empty());
    assert_eq!(broken.total_items, 0);
    assert!(broken.error.as_deref().unwrap().contains("502"));

    // Atom source: href link, updated date, summary description.
    let atom = &outcome.results[2];
    assert!(atom.error.is_none());
    assert_eq!(atom.items[0].title, "T");
    assert_eq!(atom.items[0].link, "http://x/2");
    assert_eq!(atom.items[0].pub_date, "U");
    assert_eq!(atom.items[0].description, "S");
}

#[tokio::test]
async fn test_snapshot_written_even_when_every_source_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let cfg = config(vec![source("only", format!("{}/feed", server.uri()))], None);
    let coord = coordinator(&cfg).await;

    let outcome = coord.read(false).await.unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert!(outcome.results[0].error.is_some());

    // The full-cycle snapshot landed and serves subsequent reads.
    let second = coord.read(false).await.unwrap();
    assert!(second.cache.unwrap().hit);
}

// ============================================================================
// Cache Round-Trip
// ============================================================================

#[tokio::test]
async fn test_round_trip_returns_identical_snapshot_with_hit_indicator() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config(vec![source("rss", format!("{}/feed", server.uri()))], None);
    let coord = coordinator(&cfg).await;

    let first = coord.read(false).await.unwrap();
    assert!(first.cache.is_none()); // miss-fill

    let second = coord.read(false).await.unwrap();
    assert_eq!(second.results, first.results);

    let status = second.cache.unwrap();
    assert!(status.hit);
    assert_eq!(status.update_method, UpdateMethod::Request);
    assert!(status.age >= 0);
    assert!(status.time_to_live > 0);
}

#[tokio::test]
async fn test_forced_refresh_hits_upstream_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS_BODY))
        .expect(2)
        .mount(&server)
        .await;

    let cfg = config(vec![source("rss", format!("{}/feed", server.uri()))], None);
    let coord = coordinator(&cfg).await;

    coord.read(false).await.unwrap();
    let forced = coord.read(true).await.unwrap();
    assert!(forced.cache.is_none());
}

// ============================================================================
// Sweep
// ============================================================================

#[tokio::test]
async fn test_sweep_fills_cold_cache_with_scheduled_method() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config(vec![source("rss", format!("{}/feed", server.uri()))], None);
    let coord = coordinator(&cfg).await;

    let outcome = coord.sweep().await.unwrap();
    assert_eq!(outcome, SweepOutcome::Refreshed { sources: 1 });

    let read = coord.read(false).await.unwrap();
    assert_eq!(read.cache.unwrap().update_method, UpdateMethod::Scheduled);
}

#[tokio::test]
async fn test_sweep_right_after_fill_is_a_noop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config(vec![source("rss", format!("{}/feed", server.uri()))], None);
    let coord = coordinator(&cfg).await;

    coord.read(false).await.unwrap();
    let outcome = coord.sweep().await.unwrap();
    assert!(matches!(outcome, SweepOutcome::Skipped { .. }));
}

// ============================================================================
// Administrative Refresh
// ============================================================================

#[tokio::test]
async fn test_admin_wrong_key_fetches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS_BODY))
        .expect(0)
        .mount(&server)
        .await;

    let cfg = config(
        vec![source("rss", format!("{}/feed", server.uri()))],
        Some("secret"),
    );
    let coord = coordinator(&cfg).await;

    let result = coord.admin_refresh("not-the-secret", false).await;
    assert!(matches!(result, Err(ServiceError::Unauthorized)));
}

#[tokio::test]
async fn test_admin_refresh_reports_sources_and_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS_BODY))
        .mount(&server)
        .await;

    let cfg = config(
        vec![
            source("one", format!("{}/feed", server.uri())),
            source("two", format!("{}/feed", server.uri())),
        ],
        Some("secret"),
    );
    let coord = coordinator(&cfg).await;

    let report = coord.admin_refresh("secret", true).await.unwrap();
    assert_eq!(report.feeds, 2);
    assert!(report.cleared);
    assert!(report.expires_at > report.timestamp);

    let read = coord.read(false).await.unwrap();
    assert_eq!(read.cache.unwrap().update_method, UpdateMethod::Manual);
}

// ============================================================================
// Wire Format
// ============================================================================

#[tokio::test]
async fn test_wrapped_response_shape() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS_BODY))
        .mount(&server)
        .await;

    let cfg = config(vec![source("rss", format!("{}/feed", server.uri()))], None);
    let coord = coordinator(&cfg).await;

    coord.read(false).await.unwrap();
    let outcome = coord.read(false).await.unwrap();

    let json: serde_json::Value = serde_json::to_value(&outcome).unwrap();
    let data = json.get("data").unwrap().as_array().unwrap();
    assert_eq!(data[0]["source"], "rss");
    assert_eq!(data[0]["totalItems"], 2);
    assert!(data[0]["lastUpdate"].is_string());
    assert_eq!(data[0]["items"][0]["pubDate"], "D");

    let cache = json.get("cache").unwrap();
    assert_eq!(cache["hit"], true);
    assert_eq!(cache["updateMethod"], "request");
    assert!(cache["createdAt"].is_i64());
    assert!(cache["timeToLive"].is_i64());
}
