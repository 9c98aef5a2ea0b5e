//! Combines several Atom feeds into one Atom feed served over HTTP.
//!
//! A request names its sources in a query string; each source is fetched
//! through a disk-backed cache, parsed, normalized and appended in order.

pub mod aggregator;
pub mod config;
pub mod feed;
pub mod server;
pub mod storage;
pub mod util;
