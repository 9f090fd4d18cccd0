//! HTTP header constants and utilities for the proxy service

use ::http::header::{self, HeaderMap, HeaderName};
use std::collections::BTreeMap;

/// Headers that describe a single transport hop and must not be forwarded
pub const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Legacy spelling of `Trailer` still sent by some clients
const TRAILERS: &str = "trailers";

/// Standard header re-exports for convenience
pub use header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE, HOST};

/// Well-known paths
pub mod paths {
    pub const HEALTH: &str = "/health";
    pub const API_PREFIX: &str = "/api";
}

/// Remove hop-by-hop headers in place
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove(TRAILERS);
}

/// Flatten a header map into `name -> first value` for storage.
///
/// Values that are not visible ASCII are stored lossily.
pub fn first_values(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flattened = BTreeMap::new();
    for (name, value) in headers.iter() {
        flattened
            .entry(name.as_str().to_string())
            .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    flattened
}

/// The media type portion of a `Content-Type` header, lowercased
pub fn media_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .filter(|value| !value.is_empty())
}
