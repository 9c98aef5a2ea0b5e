use chrono::SecondsFormat;
use thiserror::Error;

use super::types::{CombinedFeed, ATOM_NS};
use super::xml::{write_document, Element, Node};

/// Failure while rendering XML. Not expected for any feed the aggregator
/// builds; callers treat it as fatal.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("Failed to write XML: {0}")]
    Write(String),
}

impl SerializeError {
    pub(crate) fn write<E: std::fmt::Display>(err: E) -> Self {
        SerializeError::Write(err.to_string())
    }
}

/// Renders the combined feed as an Atom document.
///
/// Element order on the root: `title`, `subtitle`, `id`, `updated`,
/// `error` (when set), links, entries.
pub fn serialize(feed: &CombinedFeed, pretty: bool) -> Result<String, SerializeError> {
    write_document(&to_element(feed), pretty)
}

fn to_element(feed: &CombinedFeed) -> Element {
    let mut root = Element::new("feed");
    root.set_attribute("xmlns", ATOM_NS);
    for (prefix, uri) in &feed.namespaces {
        root.set_attribute(&format!("xmlns:{prefix}"), uri.as_str());
    }

    let mut push = |element: Element| root.children.push(Node::Element(element));
    push(Element::with_text("title", feed.title.as_str()));
    push(Element::with_text("subtitle", feed.subtitle.as_str()));
    push(Element::with_text("id", feed.id.as_str()));
    push(Element::with_text(
        "updated",
        feed.updated.to_rfc3339_opts(SecondsFormat::Millis, true),
    ));
    if let Some(error) = &feed.error {
        push(Element::with_text("error", error.as_str()));
    }
    for link in &feed.links {
        push(link.to_element());
    }
    for entry in &feed.entries {
        push(entry.to_element());
    }

    root
}
