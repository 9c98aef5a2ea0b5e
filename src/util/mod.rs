//! Utility functions shared by the fetch and normalization layers.
//!
//! - **URL validation**: scheme checks and SSRF protection for source feeds

mod url_validator;

pub use url_validator::{validate_url, UrlValidationError};
