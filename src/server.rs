//! HTTP surface: a single `GET /` endpoint that runs one aggregation pass
//! per request.

use std::sync::Arc;

use axum::extract::{OriginalUri, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use crate::aggregator::{diagnostic, Aggregator, CombineOptions};
use crate::feed::serialize;

const XML_CONTENT_TYPE: &str = "application/xml";

/// Shared per-process state handed to every request.
#[derive(Debug, Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    /// Host used for the self link when the request carries no `Host` header.
    pub fallback_host: String,
}

/// Raw query parameters. Every field is optional; absent and empty mean the same.
#[derive(Debug, Default)]
pub struct CombineQuery {
    pub urls: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub mode: Option<String>,
    pub format: Option<String>,
    pub fixtitles: Option<String>,
}

impl CombineQuery {
    /// Builds the query from decoded pairs in request order.
    ///
    /// Repeated `urls` values are joined as if comma-separated. For every
    /// other key the first occurrence wins. Unknown keys are ignored.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut query = Self::default();
        for (key, value) in pairs {
            let value = value.into();
            let slot = match key.as_ref() {
                "urls" => {
                    let urls = query.urls.get_or_insert_with(String::new);
                    if !urls.is_empty() {
                        urls.push(',');
                    }
                    urls.push_str(&value);
                    continue;
                }
                "title" => &mut query.title,
                "subtitle" => &mut query.subtitle,
                "mode" => &mut query.mode,
                "format" => &mut query.format,
                "fixtitles" => &mut query.fixtitles,
                _ => continue,
            };
            slot.get_or_insert(value);
        }
        query
    }

    /// Comma-separated source URLs, trimmed, blanks dropped.
    pub fn source_urls(&self) -> Vec<String> {
        self.urls
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn options(&self) -> CombineOptions {
        CombineOptions {
            title: non_empty(self.title.as_deref()),
            subtitle: non_empty(self.subtitle.as_deref()),
            mode: non_empty(self.mode.as_deref()).unwrap_or_else(|| "single".to_string()),
            // Any truthy `format` asks for compact output
            pretty: !is_truthy(self.format.as_deref()),
            fix_titles: is_truthy(self.fixtitles.as_deref()),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

/// Loose boolean reading of a query value: absent, empty, `0`, `false`,
/// `no` and `off` are false; anything else is true.
pub fn is_truthy(value: Option<&str>) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        None => false,
        Some(v) => !matches!(v.as_str(), "" | "0" | "false" | "no" | "off"),
    }
}

/// Absolute URL of the current request, used as the feed id and self link.
fn self_url(headers: &HeaderMap, uri: &axum::http::Uri, fallback_host: &str) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback_host);
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("{scheme}://{host}{path}")
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(combine_feeds))
        .with_state(state)
}

/// Serves `router(state)` on `listener` until the process exits.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

async fn combine_feeds(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let query = CombineQuery::from_pairs(pairs);
    let urls = query.source_urls();
    if urls.is_empty() {
        tracing::debug!("Request without urls, nothing to combine");
        return StatusCode::NO_CONTENT.into_response();
    }

    let options = query.options();
    let self_url = self_url(&headers, &uri, &state.fallback_host);
    tracing::info!(
        sources = urls.len(),
        mode = %options.mode,
        pretty = options.pretty,
        fix_titles = options.fix_titles,
        "Combining feeds"
    );

    let mut combined = state.aggregator.shell(&urls, &options, &self_url);
    let status = match state.aggregator.combine(&mut combined, &urls, &options).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::error!(error = %e, "Aggregation failed");
            combined.record_failure(&e.to_string(), &diagnostic(&self_url, &e), None);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    match serialize(&combined, options.pretty) {
        Ok(xml) => {
            tracing::info!(
                entries = combined.entries.len(),
                status = status.as_u16(),
                "Combined feed ready"
            );
            (status, [(header::CONTENT_TYPE, XML_CONTENT_TYPE)], xml).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize combined feed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn query(pairs: &[(&str, &str)]) -> CombineQuery {
        CombineQuery::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_truthy_values() {
        for v in ["1", "true", "yes", "on", "TRUE", "anything"] {
            assert!(is_truthy(Some(v)), "{v} should be truthy");
        }
        for v in ["", "0", "false", "no", "off", " False "] {
            assert!(!is_truthy(Some(v)), "{v:?} should be falsy");
        }
        assert!(!is_truthy(None));
    }

    #[test]
    fn test_source_urls_split_and_trimmed() {
        let q = query(&[("urls", " https://a.example/feed ,,https://b.example/atom, ")]);
        assert_eq!(
            q.source_urls(),
            vec![
                "https://a.example/feed".to_string(),
                "https://b.example/atom".to_string()
            ]
        );
        assert!(query(&[("urls", " , ")]).source_urls().is_empty());
        assert!(CombineQuery::default().source_urls().is_empty());
    }

    #[test]
    fn test_repeated_urls_are_joined() {
        let q = query(&[
            ("urls", "https://a.example/feed"),
            ("title", "First"),
            ("urls", "https://b.example/atom,https://c.example/"),
            ("title", "Second"),
            ("unknown", "x"),
        ]);
        assert_eq!(
            q.source_urls(),
            vec![
                "https://a.example/feed".to_string(),
                "https://b.example/atom".to_string(),
                "https://c.example/".to_string(),
            ]
        );
        assert_eq!(q.options().title.as_deref(), Some("First"));
    }

    #[test]
    fn test_options_defaults() {
        let options = CombineQuery::default().options();
        assert_eq!(options.mode, "single");
        assert!(options.pretty);
        assert!(!options.fix_titles);
        assert_eq!(options.title, None);
    }

    #[test]
    fn test_options_from_query() {
        let options = query(&[
            ("title", "Mine"),
            ("mode", "multi"),
            ("format", "1"),
            ("fixtitles", "true"),
        ])
        .options();
        assert_eq!(options.title.as_deref(), Some("Mine"));
        assert_eq!(options.mode, "multi");
        assert!(!options.pretty);
        assert!(options.fix_titles);
    }

    #[test]
    fn test_self_url_from_headers() {
        let uri: axum::http::Uri = "/?urls=a,b".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "feeds.example.com".parse().unwrap());
        assert_eq!(
            self_url(&headers, &uri, "localhost"),
            "http://feeds.example.com/?urls=a,b"
        );

        headers.insert("x-forwarded-proto", "https, http".parse().unwrap());
        assert_eq!(
            self_url(&headers, &uri, "localhost"),
            "https://feeds.example.com/?urls=a,b"
        );

        assert_eq!(
            self_url(&HeaderMap::new(), &uri, "localhost:8080"),
            "http://localhost:8080/?urls=a,b"
        );
    }
}
