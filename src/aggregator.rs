//! Combines several source feeds into one [`CombinedFeed`].
//!
//! Sources are processed strictly in input order, one at a time, so the
//! output entry order is the concatenation of each source's own order.
//! A failing source becomes a single error entry; it never aborts the run.

use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::feed::{
    normalize_with, parse_feed, CombinedFeed, FetchError, Link, NormalizeOptions, ParseError,
    ParsedFeed, Provenance,
};
use crate::storage::FetchCache;

/// Request-level failures. These abort the whole aggregation.
#[derive(Debug, Error)]
pub enum CombineError {
    #[error("Mode not supported: {0}")]
    UnsupportedMode(String),
}

/// Why one source contributed an error entry instead of its entries.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Merge strategy. Only one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Every entry of every source in one feed.
    #[default]
    Single,
}

impl FromStr for Mode {
    type Err = CombineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Mode::Single),
            other => Err(CombineError::UnsupportedMode(other.to_string())),
        }
    }
}

/// Per-request knobs, usually built from the query string.
#[derive(Debug, Clone)]
pub struct CombineOptions {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub mode: String,
    pub pretty: bool,
    /// Stamp `feed:*` provenance fields on every entry.
    pub fix_titles: bool,
}

impl Default for CombineOptions {
    fn default() -> Self {
        Self {
            title: None,
            subtitle: None,
            mode: "single".to_string(),
            pretty: true,
            fix_titles: false,
        }
    }
}

impl CombineOptions {
    pub fn title_for(&self, sources: usize) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| format!("{sources} Atom Feeds"))
    }

    pub fn subtitle_for(&self, sources: usize) -> String {
        self.subtitle
            .clone()
            .unwrap_or_else(|| format!("A combination of {sources} Atom feeds"))
    }
}

/// What one source produced.
#[derive(Debug)]
pub enum SourceOutcome {
    /// Parsed with at least one entry.
    Entries(ParsedFeed),
    /// Parsed fine but nothing to add (no `<feed>` root or no entries).
    Empty,
    Failed(SourceError),
}

/// The aggregation pipeline. Construct once per process and share.
#[derive(Debug, Clone)]
pub struct Aggregator {
    cache: Arc<FetchCache>,
    favicon_template: String,
}

impl Aggregator {
    pub fn new(cache: Arc<FetchCache>, favicon_template: impl Into<String>) -> Self {
        Self {
            cache,
            favicon_template: favicon_template.into(),
        }
    }

    /// Metadata block and self link for a request over `urls`.
    pub fn shell(&self, urls: &[String], options: &CombineOptions, self_url: &str) -> CombinedFeed {
        CombinedFeed::new(
            options.title_for(urls.len()),
            options.subtitle_for(urls.len()),
            self_url,
        )
    }

    /// Appends every source's links and entries to `combined`.
    ///
    /// # Errors
    ///
    /// Only [`CombineError::UnsupportedMode`], raised before any source is
    /// touched. Source failures are recorded in `combined` instead.
    pub async fn combine(
        &self,
        combined: &mut CombinedFeed,
        urls: &[String],
        options: &CombineOptions,
    ) -> Result<(), CombineError> {
        let Mode::Single = options.mode.parse::<Mode>()?;

        let normalize_options = NormalizeOptions {
            enrich: options.fix_titles,
            favicon_template: self.favicon_template.clone(),
        };

        for url in urls {
            tracing::debug!(url = %url, "Fetching source feed");
            match self.load_source(url).await {
                SourceOutcome::Entries(feed) => {
                    append_source(combined, url, feed, &normalize_options);
                }
                SourceOutcome::Empty => {
                    tracing::info!(url = %url, "No entries in source feed, skipping");
                }
                SourceOutcome::Failed(err) => {
                    tracing::warn!(url = %url, error = %err, "Source feed failed");
                    combined.record_failure(&err.to_string(), &diagnostic(url, &err), Some(url));
                }
            }
        }

        Ok(())
    }

    /// Fetches and parses one source.
    pub async fn load_source(&self, url: &str) -> SourceOutcome {
        let bytes = match self.cache.get_or_fetch(url).await {
            Ok(bytes) => bytes,
            Err(e) => return SourceOutcome::Failed(e.into()),
        };
        match parse_feed(&bytes) {
            Ok(feed) if feed.is_empty() => SourceOutcome::Empty,
            Ok(feed) => SourceOutcome::Entries(feed),
            Err(e) => SourceOutcome::Failed(e.into()),
        }
    }
}

fn append_source(
    combined: &mut CombinedFeed,
    url: &str,
    mut feed: ParsedFeed,
    options: &NormalizeOptions,
) {
    combined
        .links
        .push(Link::new(url, "related", "application/atom+xml"));

    let unmerged = combined.adopt_namespaces(&feed.namespaces);
    let provenance = if options.enrich {
        Provenance::derive(&feed, url, &options.favicon_template)
    } else {
        None
    };
    if options.enrich && provenance.is_none() {
        tracing::debug!(url = %url, "Source has no title or site link, entries not enriched");
    }

    let entries = std::mem::take(&mut feed.entries);
    tracing::info!(url = %url, entries = entries.len(), "Adding source entries");

    for mut entry in entries {
        // Declared before normalizing so provenance fields see the binding
        // the entry will have in the combined document
        for (prefix, uri) in &unmerged {
            let key = format!("xmlns:{prefix}");
            if !entry.attributes.iter().any(|(k, _)| *k == key) {
                entry.attributes.push((key, uri.clone()));
            }
        }
        combined
            .entries
            .push(normalize_with(entry, provenance.as_ref()));
    }
}

/// Error text plus its full cause chain, for the error entry's summary.
pub fn diagnostic(url: &str, err: &dyn std::error::Error) -> String {
    let mut detail = format!("Failed to combine {url}: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        detail.push_str(&format!("\ncaused by: {cause}"));
        source = cause.source();
    }
    detail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("single".parse::<Mode>().unwrap(), Mode::Single);
        assert!(matches!(
            "multi".parse::<Mode>(),
            Err(CombineError::UnsupportedMode(m)) if m == "multi"
        ));
        assert!("".parse::<Mode>().is_err());
        assert!("Single".parse::<Mode>().is_err());
    }

    #[test]
    fn test_default_title_and_subtitle() {
        let options = CombineOptions::default();
        assert_eq!(options.title_for(3), "3 Atom Feeds");
        assert_eq!(options.subtitle_for(3), "A combination of 3 Atom feeds");

        let custom = CombineOptions {
            title: Some("Mine".into()),
            subtitle: Some("All of it".into()),
            ..Default::default()
        };
        assert_eq!(custom.title_for(3), "Mine");
        assert_eq!(custom.subtitle_for(3), "All of it");
    }

    #[test]
    fn test_diagnostic_includes_url_and_message() {
        let err = SourceError::Fetch(FetchError::HttpStatus(404));
        let detail = diagnostic("https://example.com/feed", &err);
        assert!(detail.contains("https://example.com/feed"));
        assert!(detail.contains("HTTP error: status 404"));
    }
}
