//! Storage-side view of captured response bodies
//!
//! Nothing here touches the bytes relayed to the client. Transport decoding
//! only produces the readable copy that goes into the audit record.

use bytes::Bytes;
use std::io::{self, Read};
use tracing::warn;

/// Media types persisted as binary artifacts
const BINARY_MEDIA_PREFIXES: [&str; 3] = ["image/", "audio/", "video/"];

const BROTLI_BUFFER_SIZE: usize = 4096;

/// Whether a response with this media type carries a binary payload
pub fn is_binary_media(media_type: Option<&str>) -> bool {
    media_type.is_some_and(|media| {
        BINARY_MEDIA_PREFIXES
            .iter()
            .any(|prefix| media.starts_with(prefix))
    })
}

/// Undo `Content-Encoding` for storage.
///
/// Supports gzip and Brotli. Decoded output is capped at `limit` bytes.
/// Other encodings, decoding failures and oversized output fall back to the
/// raw bytes with a warning.
pub fn decode_for_storage(body: &Bytes, content_encoding: Option<&str>, limit: usize) -> Bytes {
    let encoding = content_encoding
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let decoded = match encoding.as_str() {
        "" | "identity" => return body.clone(),
        "gzip" | "x-gzip" => read_capped(flate2::read::GzDecoder::new(body.as_ref()), limit),
        "br" => read_capped(
            brotli::Decompressor::new(body.as_ref(), BROTLI_BUFFER_SIZE),
            limit,
        ),
        other => {
            warn!(encoding = other, "Unsupported content encoding, storing raw body");
            return body.clone();
        }
    };

    match decoded {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            warn!(encoding = %encoding, error = %e, "Failed to decode body, storing raw bytes");
            body.clone()
        }
    }
}

fn read_capped(reader: impl Read, limit: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .take(u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1))
        .read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(io::Error::other(format!(
            "decoded body exceeds {limit} bytes"
        )));
    }
    Ok(out)
}
