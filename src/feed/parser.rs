use super::types::{Entry, Link, ParsedFeed};
use super::xml::{read_document, Node, ParseError};

/// Parses raw bytes into a [`ParsedFeed`].
///
/// A well-formed document whose root is not an (unprefixed) `<feed>` element
/// yields an empty feed rather than an error, as does a `<feed>` without
/// entries. Only documents that are not well-formed XML fail.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let root = read_document(bytes)?;

    if root.name != "feed" {
        tracing::debug!(root = %root.name, "Document root is not <feed>, treating as empty");
        return Ok(ParsedFeed::default());
    }

    let mut feed = ParsedFeed {
        namespaces: root
            .attributes
            .iter()
            .filter_map(|(key, uri)| {
                key.strip_prefix("xmlns:")
                    .map(|prefix| (prefix.to_string(), uri.clone()))
            })
            .collect(),
        ..Default::default()
    };

    for node in root.children {
        let Node::Element(child) = node else {
            continue;
        };
        match child.name.as_str() {
            "title" if feed.title.is_none() => {
                let text = child.text();
                if !text.is_empty() {
                    feed.title = Some(text);
                }
            }
            "link" => feed.links.push(Link::from_element(&child)),
            "entry" => feed.entries.push(Entry::from_element(child)),
            _ => {}
        }
    }

    Ok(feed)
}
