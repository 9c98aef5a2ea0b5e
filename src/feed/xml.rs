//! Generic XML element tree used as the interchange layer between raw feed
//! bytes and the typed feed model.
//!
//! Reading goes through `quick-xml`'s pull parser. Every text value is trimmed
//! on the way in and whitespace-only text is dropped, so `<name> </name>` and
//! `<name/>` read identically. Attribute values are kept as written, as are
//! element and attribute names, prefixes included.

use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

use super::serializer::SerializeError;

/// Errors raised while reading a document that is not well-formed.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Tokenizer-level failure (mismatched tags, bad entity, broken markup).
    #[error("XML syntax error at byte {position}: {message}")]
    Syntax { position: u64, message: String },
    /// The document ended while elements were still open.
    #[error("Unexpected end of document: <{0}> is not closed")]
    Unclosed(String),
    /// The document contains no element at all.
    #[error("Document has no root element")]
    NoRoot,
    /// A second top-level element follows the root.
    #[error("Document has more than one root element (found <{0}>)")]
    MultipleRoots(String),
    /// Character data outside of the root element.
    #[error("Text content outside of the root element")]
    StrayText,
    /// Names, text or attribute values that are not valid UTF-8.
    #[error("Invalid UTF-8 in document: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// A node in the element tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with its attributes in document order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builds `<name>text</name>`, or an empty element when `text` is blank.
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut element = Self::new(name);
        let text = normalize_text(&text.into());
        if let Some(text) = text {
            element.children.push(Node::Text(text));
        }
        element
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Concatenated text of all descendants in document order.
    pub fn text(&self) -> String {
        let mut pieces = Vec::new();
        collect_text(&self.children, &mut pieces);
        pieces.concat()
    }
}

pub(crate) fn collect_text<'a>(nodes: &'a [Node], out: &mut Vec<&'a str>) {
    for node in nodes {
        match node {
            Node::Text(t) => out.push(t),
            Node::Element(e) => collect_text(&e.children, out),
        }
    }
}

/// Trims surrounding whitespace; blank strings become `None`.
pub fn normalize_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Reads a complete document and returns its root element.
///
/// # Errors
///
/// Returns [`ParseError`] for anything that is not a single well-formed
/// element tree. Declarations, comments, processing instructions and the
/// DOCTYPE are skipped; entity declarations inside a DOCTYPE are never
/// expanded (see SEC-002 in `Cargo.toml`).
pub fn read_document(bytes: &[u8]) -> Result<Element, ParseError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().check_end_names = true;

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::Syntax {
                position: reader.buffer_position() as u64,
                message: e.to_string(),
            })?;

        match event {
            Event::Start(e) => {
                let element = start_element(&e, &reader)?;
                if stack.is_empty() && root.is_some() {
                    return Err(ParseError::MultipleRoots(element.name));
                }
                stack.push(element);
            }
            Event::Empty(e) => {
                let element = start_element(&e, &reader)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(element)),
                    None if root.is_some() => {
                        return Err(ParseError::MultipleRoots(element.name));
                    }
                    None => root = Some(element),
                }
            }
            Event::End(_) => {
                // check_end_names guarantees the name matches the open element
                if let Some(element) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Element(element)),
                        None => root = Some(element),
                    }
                }
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(|err| ParseError::Syntax {
                    position: reader.buffer_position() as u64,
                    message: err.to_string(),
                })?;
                push_text(&mut stack, &text)?;
            }
            Event::CData(e) => {
                let raw = e.into_inner();
                let text = std::str::from_utf8(&raw)?;
                push_text(&mut stack, text)?;
            }
            Event::Eof => break,
            // Decl, PI, Comment, DocType
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.pop() {
        return Err(ParseError::Unclosed(open.name));
    }
    root.ok_or(ParseError::NoRoot)
}

fn start_element(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Element, ParseError> {
    let name = std::str::from_utf8(e.name().as_ref())?.to_string();
    let mut element = Element::new(name);

    for attr in e.attributes() {
        let attr = attr.map_err(|err| ParseError::Syntax {
            position: reader.buffer_position() as u64,
            message: err.to_string(),
        })?;
        let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|err| ParseError::Syntax {
                position: reader.buffer_position() as u64,
                message: err.to_string(),
            })?;
        element.attributes.push((key, value.into_owned()));
    }

    Ok(element)
}

fn push_text(stack: &mut [Element], raw: &str) -> Result<(), ParseError> {
    let Some(text) = normalize_text(raw) else {
        return Ok(());
    };
    let Some(parent) = stack.last_mut() else {
        return Err(ParseError::StrayText);
    };
    // Text and CDATA sections that follow each other form one value
    if let Some(Node::Text(previous)) = parent.children.last_mut() {
        previous.push_str(&text);
    } else {
        parent.children.push(Node::Text(text));
    }
    Ok(())
}

/// Renders `root` as a standalone UTF-8 document.
///
/// `pretty` selects indented output (one space per level, `\n` between
/// lines); otherwise the document is written without any added whitespace.
pub fn write_document(root: &Element, pretty: bool) -> Result<String, SerializeError> {
    let mut writer = if pretty {
        Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 1)
    } else {
        Writer::new(Cursor::new(Vec::new()))
    };

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(SerializeError::write)?;
    write_element(&mut writer, root)?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(SerializeError::write)
}

fn write_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    element: &Element,
) -> Result<(), SerializeError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .map_err(SerializeError::write)?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(start))
        .map_err(SerializeError::write)?;
    for child in &element.children {
        match child {
            Node::Element(e) => write_element(writer, e)?,
            Node::Text(t) => writer
                .write_event(Event::Text(BytesText::new(t)))
                .map_err(SerializeError::write)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(SerializeError::write)?;

    Ok(())
}
