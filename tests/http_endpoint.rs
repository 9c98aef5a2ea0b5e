//! End-to-end tests of `GET /` against a real listener.
//!
//! Each test binds an ephemeral port, serves the router in a background
//! task, and talks to it with a plain reqwest client.

use std::sync::Arc;

use atom_combiner::aggregator::Aggregator;
use atom_combiner::feed::{parse_feed, FetchSettings, HttpFetcher};
use atom_combiner::server::{self, AppState};
use atom_combiner::storage::{DiskStore, FetchCache, DEFAULT_TTL_SECS};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestServer {
    base: String,
    _cache_dir: TempDir,
}

async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskStore::open(dir.path()).await.unwrap();
    let fetcher = HttpFetcher::new(&FetchSettings {
        allow_private_hosts: true,
        ..Default::default()
    })
    .unwrap();
    let cache = Arc::new(FetchCache::new(store, fetcher, DEFAULT_TTL_SECS));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState {
        aggregator: Arc::new(Aggregator::new(
            cache,
            atom_combiner::feed::normalize::DEFAULT_FAVICON_TEMPLATE,
        )),
        fallback_host: addr.to_string(),
    };
    tokio::spawn(async move {
        server::serve(listener, state).await.unwrap();
    });

    TestServer {
        base: format!("http://{addr}"),
        _cache_dir: dir,
    }
}

async fn mock_feed(server: &MockServer, route: &str, entries: &[&str]) {
    let entries: String = entries
        .iter()
        .map(|t| format!("<entry><title>{t}</title></entry>"))
        .collect();
    let body = format!(
        r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>{route}</title>{entries}</feed>"#
    );
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn endpoint(base: &str, params: &[(&str, &str)]) -> String {
    url::Url::parse_with_params(&format!("{base}/"), params)
        .unwrap()
        .to_string()
}

async fn get(url: String) -> reqwest::Response {
    reqwest::get(url).await.unwrap()
}

fn entry_titles(xml: &str) -> Vec<String> {
    parse_feed(xml.as_bytes())
        .unwrap()
        .entries
        .iter()
        .map(|e| e.title.as_ref().map(|t| t.text()).unwrap_or_default())
        .collect()
}

#[tokio::test]
async fn test_combines_sources_with_xml_content_type() {
    let upstream = MockServer::start().await;
    mock_feed(&upstream, "/a", &["a1", "a2"]).await;
    mock_feed(&upstream, "/b", &["b1"]).await;
    let app = start_server().await;

    let urls = format!("{0}/a,{0}/b", upstream.uri());
    let response = get(endpoint(&app.base, &[("urls", urls.as_str())])).await;

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/xml")
    );
    let body = response.text().await.unwrap();
    assert!(body.starts_with(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#));
    assert_eq!(entry_titles(&body), vec!["a1", "a2", "b1"]);

    let parsed = parse_feed(body.as_bytes()).unwrap();
    assert_eq!(parsed.title.as_deref(), Some("2 Atom Feeds"));
    let self_link = parsed.links.iter().find(|l| l.is_self()).unwrap();
    assert!(self_link.href.starts_with(&format!("{}/?urls=", app.base)));
}

#[tokio::test]
async fn test_missing_urls_returns_empty_body() {
    let app = start_server().await;

    for query in ["", "?urls=", "?urls=%20,%20", "?title=x"] {
        let response = get(format!("{}/{query}", app.base)).await;
        assert_eq!(response.status().as_u16(), 204, "query {query:?}");
        assert!(response.text().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_unsupported_mode_is_500_with_one_error_entry() {
    let upstream = MockServer::start().await;
    mock_feed(&upstream, "/a", &["a1"]).await;
    let app = start_server().await;

    let urls = format!("{}/a", upstream.uri());
    let response = get(endpoint(&app.base, &[("urls", urls.as_str()), ("mode", "multi")])).await;

    assert_eq!(response.status().as_u16(), 500);
    let body = response.text().await.unwrap();
    assert_eq!(entry_titles(&body), vec!["Mode not supported: multi"]);
    assert!(body.contains("<error>Mode not supported: multi</error>"));
}

#[tokio::test]
async fn test_failed_source_still_returns_200() {
    let upstream = MockServer::start().await;
    mock_feed(&upstream, "/a", &["a1"]).await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&upstream)
        .await;
    let app = start_server().await;

    let urls = format!("{0}/gone,{0}/a", upstream.uri());
    let response = get(endpoint(&app.base, &[("urls", urls.as_str())])).await;

    assert_eq!(response.status().as_u16(), 200);
    let body = response.text().await.unwrap();
    assert_eq!(entry_titles(&body), vec!["HTTP error: status 410", "a1"]);
}

#[tokio::test]
async fn test_format_flag_selects_compact_output() {
    let upstream = MockServer::start().await;
    mock_feed(&upstream, "/a", &["a1"]).await;
    let app = start_server().await;
    let urls = format!("{}/a", upstream.uri());

    let pretty = get(endpoint(&app.base, &[("urls", urls.as_str()), ("title", "Mine")]))
        .await
        .text()
        .await
        .unwrap();
    assert!(pretty.contains("\n <title>Mine</title>"));

    let compact = get(endpoint(
        &app.base,
        &[("urls", urls.as_str()), ("title", "Mine"), ("format", "1")],
    ))
    .await
    .text()
    .await
    .unwrap();
    assert!(compact.contains("<title>Mine</title><subtitle>"));
    assert!(!compact.trim_end().contains("\n <"));
}

#[tokio::test]
async fn test_repeated_urls_keys_are_combined() {
    let upstream = MockServer::start().await;
    mock_feed(&upstream, "/a", &["a1"]).await;
    mock_feed(&upstream, "/b", &["b1", "b2"]).await;
    let app = start_server().await;

    let a = format!("{}/a", upstream.uri());
    let b = format!("{}/b", upstream.uri());
    let response = get(endpoint(
        &app.base,
        &[("urls", a.as_str()), ("urls", b.as_str()), ("mode", "single")],
    ))
    .await;

    assert_eq!(response.status().as_u16(), 200);
    let body = response.text().await.unwrap();
    assert_eq!(entry_titles(&body), vec!["a1", "b1", "b2"]);
}
