//! Per-entry repair and provenance stamping.
//!
//! Everything here is a pure transformation of an [`Entry`]; fields the
//! rules below do not mention are passed through untouched.

use url::Url;

use super::types::{Entry, ParsedFeed, TextConstruct, ATOM_NS, PROVENANCE_NS, PROVENANCE_PREFIX};
use super::xml::Element;

/// Replacement for an author name that is present but blank.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Replacement for a summary that is present but blank.
pub const EMPTY_SUMMARY: &str = "empty";

/// Default favicon lookup; `{base}` is replaced by `scheme://host[:port]`
/// and `{host}` by the bare hostname.
pub const DEFAULT_FAVICON_TEMPLATE: &str = "https://www.google.com/s2/favicons?sz=64&domain_url={base}";

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Stamp entries with `feed:*` provenance fields.
    pub enrich: bool,
    pub favicon_template: String,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            enrich: false,
            favicon_template: DEFAULT_FAVICON_TEMPLATE.to_string(),
        }
    }
}

/// Identity of the feed an entry came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub title: String,
    /// Hostname of the site link.
    pub site: String,
    /// `scheme://host[:port]` of the site link.
    pub base: String,
    pub icon: String,
}

impl Provenance {
    /// Derives provenance from the source's title and site link.
    ///
    /// Returns `None` unless the feed has a non-blank title and a site link
    /// (see [`ParsedFeed::site_link`]) that resolves to an http(s) URL with a
    /// host. Relative hrefs are resolved against `source_url`.
    pub fn derive(feed: &ParsedFeed, source_url: &str, favicon_template: &str) -> Option<Self> {
        let title = feed.title.as_deref()?.trim();
        if title.is_empty() {
            return None;
        }
        let link = feed.site_link()?;

        let url = match Url::parse(&link.href) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Url::parse(source_url).ok()?.join(&link.href).ok()?
            }
            Err(_) => return None,
        };
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?.to_string();
        let base = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };
        let icon = favicon_template
            .replace("{base}", &base)
            .replace("{host}", &host);

        Some(Self {
            title: title.to_string(),
            site: host,
            base,
            icon,
        })
    }

    fn fields(&self) -> [(&'static str, &str); 4] {
        [
            ("title", self.title.as_str()),
            ("site", self.site.as_str()),
            ("base", self.base.as_str()),
            ("icon", self.icon.as_str()),
        ]
    }
}

/// Normalizes one entry of `source`, fetched from `source_url`.
pub fn normalize(
    entry: Entry,
    source: &ParsedFeed,
    source_url: &str,
    options: &NormalizeOptions,
) -> Entry {
    let provenance = if options.enrich {
        Provenance::derive(source, source_url, &options.favicon_template)
    } else {
        None
    };
    normalize_with(entry, provenance.as_ref())
}

/// Same as [`normalize`] with provenance derived once per source.
pub fn normalize_with(mut entry: Entry, provenance: Option<&Provenance>) -> Entry {
    if let Some(title) = entry.title.take() {
        entry.title = Some(flatten_title(title));
    }

    for author in &mut entry.authors {
        if let Some(name) = author.name.as_mut() {
            if name.trim().is_empty() {
                *name = UNKNOWN_AUTHOR.to_string();
            }
        }
    }

    // An absent summary stays absent; only a blank one is marked
    if let Some(summary) = &entry.summary {
        if summary.text().is_empty() {
            entry.summary = Some(TextConstruct::plain(EMPTY_SUMMARY));
        }
    }

    if let Some(provenance) = provenance {
        stamp(&mut entry, provenance);
    }

    entry
}

/// Collapses a title to trimmed plain text.
///
/// `type="text"` and `type="html"` are kept since the text still means the
/// same thing; `type="xhtml"` is dropped along with the markup it described.
fn flatten_title(title: TextConstruct) -> TextConstruct {
    let text = title.text();
    let attributes = title
        .attributes
        .into_iter()
        .filter(|(key, value)| !(key == "type" && value == "xhtml"))
        .collect();
    TextConstruct {
        attributes,
        ..TextConstruct::plain(text)
    }
}

fn stamp(entry: &mut Entry, provenance: &Provenance) {
    let prefix_key = format!("xmlns:{PROVENANCE_PREFIX}");
    // The entry may carry its source's own binding of the prefix
    let rebound = lookup(&entry.attributes, &prefix_key).is_some_and(|uri| uri != PROVENANCE_NS);

    for (field, value) in provenance.fields() {
        if provenance_field(entry, field).is_some() {
            continue;
        }
        let mut element = Element::with_text(format!("{PROVENANCE_PREFIX}:{field}"), value);
        if rebound {
            element.set_attribute(&prefix_key, PROVENANCE_NS);
        }
        entry.extensions.push(element);
    }
}

/// The provenance field `field` (`title`, `site`, ...) of `entry`, matched by
/// namespace rather than by prefix.
///
/// Names resolve the way they will in the combined document: the element's
/// own declarations first, then the entry's, then the combined root, which
/// binds `feed:` to [`PROVENANCE_NS`] and the default namespace to Atom.
pub fn provenance_field<'a>(entry: &'a Entry, field: &str) -> Option<&'a Element> {
    entry.extensions.iter().find(|element| {
        let (namespace, local) = resolve(element, &entry.attributes);
        local == field && namespace == Some(PROVENANCE_NS)
    })
}

fn resolve<'a>(element: &'a Element, scope: &'a [(String, String)]) -> (Option<&'a str>, &'a str) {
    let (key, local, inherited) = match element.name.split_once(':') {
        Some((prefix, local)) => (
            format!("xmlns:{prefix}"),
            local,
            (prefix == PROVENANCE_PREFIX).then_some(PROVENANCE_NS),
        ),
        None => ("xmlns".to_string(), element.name.as_str(), Some(ATOM_NS)),
    };
    let namespace = lookup(&element.attributes, &key)
        .or_else(|| lookup(scope, &key))
        .or(inherited);
    (namespace, local)
}

fn lookup<'a>(attributes: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
