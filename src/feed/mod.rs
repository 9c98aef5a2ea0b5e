//! Atom feed handling: reading, normalizing and writing documents.
//!
//! - [`xml`] - generic element tree over `quick-xml`
//! - `parser` - bytes into [`ParsedFeed`]
//! - [`normalize`] - per-entry repair and `feed:*` provenance fields
//! - `serializer` - [`CombinedFeed`] back into Atom XML
//! - `fetcher` - HTTP retrieval of source documents
//!
//! # Example
//!
//! ```
//! use atom_combiner::feed::{parse_feed, serialize, CombinedFeed};
//!
//! let source = parse_feed(br#"<feed xmlns="http://www.w3.org/2005/Atom">
//!     <entry><title> Hello </title></entry>
//! </feed>"#).unwrap();
//!
//! let mut combined = CombinedFeed::new("1 Atom Feeds", "A combination of 1 Atom feeds", "http://localhost/");
//! combined.entries.extend(source.entries);
//! let xml = serialize(&combined, true).unwrap();
//! assert!(xml.contains("<title>Hello</title>"));
//! ```

mod fetcher;
pub mod normalize;
mod parser;
mod serializer;
mod types;
pub mod xml;

pub use fetcher::{FetchError, FetchSettings, HttpFetcher};
pub use normalize::{normalize, normalize_with, provenance_field, NormalizeOptions, Provenance};
pub use parser::parse_feed;
pub use serializer::{serialize, SerializeError};
pub use types::{
    CombinedFeed, Entry, Link, ParsedFeed, Person, TextConstruct, ATOM_NS, ERROR_ID_PREFIX,
    PROVENANCE_NS, PROVENANCE_PREFIX,
};
pub use xml::ParseError;
