use chrono::{DateTime, SecondsFormat, Utc};

use super::xml::{collect_text, normalize_text, Element, Node};
use crate::storage::cache_key;

/// Default namespace of every Atom document.
pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// Namespace bound to the `feed:` prefix used by the provenance fields.
pub const PROVENANCE_NS: &str = "urn:atom-combiner:feed";

/// Prefix of the provenance fields (`feed:title`, `feed:site`, ...).
pub const PROVENANCE_PREFIX: &str = "feed";

/// Prefix of the `<id>` of synthetic error entries.
pub const ERROR_ID_PREFIX: &str = "urn:atom-combiner:error:";

// ============================================================================
// Text constructs and people
// ============================================================================

/// An Atom text construct such as `<title>` or `<summary>`.
///
/// Content is kept as nodes so `type="xhtml"` markup survives untouched until
/// something explicitly flattens it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextConstruct {
    pub attributes: Vec<(String, String)>,
    pub content: Vec<Node>,
}

impl TextConstruct {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            attributes: Vec::new(),
            content: normalize_text(&text.into())
                .map(Node::Text)
                .into_iter()
                .collect(),
        }
    }

    /// Plain-text rendering: every descendant text value, space separated.
    pub fn text(&self) -> String {
        let mut pieces = Vec::new();
        collect_text(&self.content, &mut pieces);
        pieces.concat().trim().to_string()
    }

    /// True when the construct carries markup rather than a single text value.
    pub fn is_structured(&self) -> bool {
        self.content
            .iter()
            .any(|node| matches!(node, Node::Element(_)))
    }

    fn from_element(element: Element) -> Self {
        Self {
            attributes: element.attributes,
            content: element.children,
        }
    }

    fn to_element(&self, name: &str) -> Element {
        Element {
            name: name.to_string(),
            attributes: self.attributes.clone(),
            children: self.content.clone(),
        }
    }
}

/// An `<author>` block. Only `name` is interpreted; `uri`, `email` and any
/// extension elements are carried verbatim.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Person {
    pub attributes: Vec<(String, String)>,
    pub name: Option<String>,
    pub extensions: Vec<Element>,
}

impl Person {
    fn from_element(element: Element) -> Self {
        let mut person = Person {
            attributes: element.attributes,
            ..Default::default()
        };
        for node in element.children {
            if let Node::Element(child) = node {
                if child.name == "name" && person.name.is_none() {
                    person.name = Some(child.text());
                } else {
                    person.extensions.push(child);
                }
            }
        }
        person
    }

    fn to_element(&self) -> Element {
        let mut element = Element::new("author");
        element.attributes = self.attributes.clone();
        if let Some(name) = &self.name {
            element
                .children
                .push(Node::Element(Element::with_text("name", name.as_str())));
        }
        element
            .children
            .extend(self.extensions.iter().cloned().map(Node::Element));
        element
    }
}

// ============================================================================
// Links
// ============================================================================

/// A `<link>` descriptor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Link {
    pub href: String,
    /// Relation; Atom treats a missing `rel` as `alternate`.
    pub rel: Option<String>,
    pub link_type: Option<String>,
    /// Remaining attributes (`hreflang`, `title`, `length`, ...).
    pub extra: Vec<(String, String)>,
}

impl Link {
    pub fn new(href: impl Into<String>, rel: &str, link_type: &str) -> Self {
        Self {
            href: href.into(),
            rel: Some(rel.to_string()),
            link_type: Some(link_type.to_string()),
            extra: Vec::new(),
        }
    }

    pub fn is_self(&self) -> bool {
        self.rel.as_deref() == Some("self")
    }

    pub fn is_alternate(&self) -> bool {
        matches!(self.rel.as_deref(), None | Some("alternate"))
    }

    pub(crate) fn from_element(element: &Element) -> Self {
        let mut link = Link::default();
        for (key, value) in &element.attributes {
            match key.as_str() {
                "href" => link.href = value.clone(),
                "rel" => link.rel = Some(value.clone()),
                "type" => link.link_type = Some(value.clone()),
                _ => link.extra.push((key.clone(), value.clone())),
            }
        }
        link
    }

    pub(crate) fn to_element(&self) -> Element {
        let mut element = Element::new("link");
        element.set_attribute("href", self.href.as_str());
        if let Some(rel) = &self.rel {
            element.set_attribute("rel", rel.as_str());
        }
        if let Some(link_type) = &self.link_type {
            element.set_attribute("type", link_type.as_str());
        }
        element.attributes.extend(self.extra.iter().cloned());
        element
    }
}

// ============================================================================
// Entries
// ============================================================================

/// One syndication item.
///
/// `title`, `authors` and `summary` are the only fields the pipeline
/// inspects. Every other child element, including `id`, `updated`, `link`,
/// `content` and foreign-namespace extensions, lives in `extensions` in
/// document order and is written back unchanged.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Entry {
    pub attributes: Vec<(String, String)>,
    pub title: Option<TextConstruct>,
    pub authors: Vec<Person>,
    pub summary: Option<TextConstruct>,
    pub extensions: Vec<Element>,
}

impl Entry {
    pub fn from_element(element: Element) -> Self {
        let mut entry = Entry {
            attributes: element.attributes,
            ..Default::default()
        };
        for node in element.children {
            let Node::Element(child) = node else {
                continue;
            };
            match child.name.as_str() {
                "title" if entry.title.is_none() => {
                    entry.title = Some(TextConstruct::from_element(child));
                }
                "summary" if entry.summary.is_none() => {
                    entry.summary = Some(TextConstruct::from_element(child));
                }
                "author" => entry.authors.push(Person::from_element(child)),
                _ => entry.extensions.push(child),
            }
        }
        entry
    }

    pub fn to_element(&self) -> Element {
        let mut element = Element::new("entry");
        element.attributes = self.attributes.clone();
        if let Some(title) = &self.title {
            element.children.push(Node::Element(title.to_element("title")));
        }
        for author in &self.authors {
            element.children.push(Node::Element(author.to_element()));
        }
        if let Some(summary) = &self.summary {
            element
                .children
                .push(Node::Element(summary.to_element("summary")));
        }
        element
            .children
            .extend(self.extensions.iter().cloned().map(Node::Element));
        element
    }

    /// Looks up an extension element by its qualified name.
    pub fn extension(&self, name: &str) -> Option<&Element> {
        self.extensions.iter().find(|e| e.name == name)
    }

    /// Synthetic entry describing a failure.
    ///
    /// `source_url` is the feed that failed, or `None` for request-level
    /// failures that are not tied to one source. The `<id>` is derived from
    /// the cache key of `source_url` (or of `message` when there is none), so
    /// repeated failures of one source keep the same id.
    pub fn error(message: &str, detail: &str, source_url: Option<&str>, at: DateTime<Utc>) -> Self {
        let mut entry = Entry {
            title: Some(TextConstruct::plain(message)),
            summary: Some(TextConstruct::plain(detail)),
            ..Default::default()
        };
        entry.extensions.push(Element::with_text(
            "id",
            format!("{ERROR_ID_PREFIX}{}", cache_key(source_url.unwrap_or(message))),
        ));
        if let Some(url) = source_url {
            let mut link = Element::new("link");
            link.set_attribute("href", url);
            link.set_attribute("rel", "via");
            entry.extensions.push(link);
        }
        entry.extensions.push(Element::with_text(
            "updated",
            at.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
        entry
    }
}

// ============================================================================
// Feeds
// ============================================================================

/// One source document after parsing.
///
/// A default (empty) value is what a document without a `<feed>` root
/// produces; that is a valid state, not an error.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub links: Vec<Link>,
    pub entries: Vec<Entry>,
    /// `xmlns:prefix` declarations found on the source root, as `(prefix, uri)`.
    pub namespaces: Vec<(String, String)>,
}

impl ParsedFeed {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The link that identifies the source site.
    ///
    /// The first `rel="self"` link wins regardless of its position; when the
    /// feed has none, the first `alternate` link (explicit or implied by a
    /// missing `rel`) is used. Other relations (`hub`, `next`, ...) never
    /// qualify, even when listed first.
    pub fn site_link(&self) -> Option<&Link> {
        self.links
            .iter()
            .find(|l| l.is_self())
            .or_else(|| self.links.iter().find(|l| l.is_alternate()))
            .filter(|l| !l.href.is_empty())
    }
}

/// The synthetic feed returned to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedFeed {
    pub title: String,
    pub subtitle: String,
    pub id: String,
    pub updated: DateTime<Utc>,
    /// Prefix declarations written on the root element, besides the Atom default.
    pub namespaces: Vec<(String, String)>,
    pub links: Vec<Link>,
    pub entries: Vec<Entry>,
    /// Text of the most recent failure, if any.
    pub error: Option<String>,
}

impl CombinedFeed {
    /// Builds the metadata block and self link; entries start empty.
    pub fn new(title: impl Into<String>, subtitle: impl Into<String>, self_url: &str) -> Self {
        Self {
            title: title.into(),
            subtitle: subtitle.into(),
            id: self_url.to_string(),
            updated: Utc::now(),
            namespaces: vec![(PROVENANCE_PREFIX.to_string(), PROVENANCE_NS.to_string())],
            links: vec![Link::new(self_url, "self", "application/atom+xml")],
            entries: Vec::new(),
            error: None,
        }
    }

    /// Merges a source's prefix declarations into the root.
    ///
    /// Returns the declarations that could not be merged because the prefix
    /// is already bound to a different URI; the caller must declare those on
    /// the entries themselves.
    pub fn adopt_namespaces(&mut self, declared: &[(String, String)]) -> Vec<(String, String)> {
        let mut conflicting = Vec::new();
        for (prefix, uri) in declared {
            match self.namespaces.iter().find(|(p, _)| p == prefix) {
                Some((_, bound)) if bound == uri => {}
                Some(_) => conflicting.push((prefix.clone(), uri.clone())),
                None => self.namespaces.push((prefix.clone(), uri.clone())),
            }
        }
        conflicting
    }

    /// Appends an error entry and marks the whole feed as errored.
    pub fn record_failure(&mut self, message: &str, detail: &str, source_url: Option<&str>) {
        self.entries
            .push(Entry::error(message, detail, source_url, Utc::now()));
        self.error = Some(message.to_string());
    }
}
