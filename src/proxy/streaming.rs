//! Tee-and-forward relay for incrementally flushed upstream bodies
//!
//! A pump task reads upstream frames one at a time, hands each chunk to the
//! client body first and only then appends it to the capture buffer. The
//! client side is a channel-backed stream, so every chunk is written out as
//! soon as it arrives. If the client goes away the pump keeps draining
//! upstream so the audit copy is still complete. The audit copy stops growing
//! at the capture limit; the client still receives every byte.

use crate::providers::constants::json_fields;
use crate::proxy::types::{ProxyError, ProxyResult};
use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures_util::stream;
use http_body_util::BodyExt;
use serde_json::Value;
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Chunks buffered between the pump and the client connection
const CLIENT_CHANNEL_CAPACITY: usize = 4;

const STREAM_PARAM: &str = "stream";

/// What the pump saw once upstream finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCapture {
    /// Every upstream byte, in order, still transport-encoded
    pub body: Bytes,
    /// Set when upstream failed mid-stream
    pub upstream_error: Option<String>,
    pub client_disconnected: bool,
    /// Set when upstream sent more than the capture limit
    pub truncated: bool,
}

/// Split an upstream body into a client-facing body and a capture handle
/// holding at most `capture_limit` bytes.
pub fn tee_stream<B>(upstream: B, capture_limit: usize) -> (Body, JoinHandle<StreamCapture>)
where
    B: http_body::Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: Display,
{
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(CLIENT_CHANNEL_CAPACITY);

    let pump = tokio::spawn(async move {
        let mut upstream = upstream;
        let mut captured = BytesMut::new();
        let mut client_open = true;
        let mut upstream_error = None;
        let mut truncated = false;

        while let Some(frame) = upstream.frame().await {
            match frame {
                Ok(frame) => {
                    let Ok(chunk) = frame.into_data() else {
                        continue;
                    };
                    if client_open && tx.send(Ok(chunk.clone())).await.is_err() {
                        client_open = false;
                        debug!("Client disconnected mid-stream, draining upstream for capture");
                    }
                    if truncated {
                        continue;
                    }
                    let room = capture_limit.saturating_sub(captured.len());
                    if chunk.len() > room {
                        captured.extend_from_slice(&chunk[..room]);
                        truncated = true;
                        warn!(
                            limit = capture_limit,
                            "Streamed reply exceeds capture limit, truncating audit copy"
                        );
                    } else {
                        captured.extend_from_slice(&chunk);
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    if client_open {
                        let _ = tx.send(Err(std::io::Error::other(message.clone()))).await;
                    }
                    upstream_error = Some(message);
                    break;
                }
            }
        }

        StreamCapture {
            body: captured.freeze(),
            upstream_error,
            client_disconnected: !client_open,
            truncated,
        }
    });

    let chunks = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });

    (Body::from_stream(chunks), pump)
}

/// Whether the request asks for a streamed reply, via `?stream=` or a JSON
/// body field `"stream"`. Either one signalling true is enough.
pub fn streaming_requested(query: Option<&str>, body: &[u8]) -> ProxyResult<bool> {
    let mut requested = false;

    for pair in query.unwrap_or_default().split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key != STREAM_PARAM {
            continue;
        }
        requested |= match value.to_ascii_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            other => {
                return Err(ProxyError::MalformedStreamFlag(format!(
                    "query parameter stream={other}"
                )))
            }
        };
    }

    let looks_like_object = body
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{');
    if looks_like_object {
        if let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(body) {
            requested |= match fields.get(json_fields::STREAM) {
                None | Some(Value::Null) => false,
                Some(Value::Bool(flag)) => *flag,
                Some(other) => {
                    return Err(ProxyError::MalformedStreamFlag(format!(
                        "body field stream={other}"
                    )))
                }
            };
        }
    }

    Ok(requested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use http_body_util::StreamBody;
    use hyper::body::Frame;
    use rstest::rstest;
    use std::convert::Infallible;
    use std::time::{Duration, Instant};

    #[rstest]
    #[case(Some("stream=true"), b"" as &[u8], true)]
    #[case(Some("a=1&stream=1"), b"", true)]
    #[case(Some("stream=false"), b"{\"stream\": true}", true)]
    #[case(None, b"{\"model\":\"gpt\",\"stream\":true}", true)]
    #[case(None, b"{\"stream\":false}", false)]
    #[case(None, b"{\"stream\":null}", false)]
    #[case(None, b"not json at all", false)]
    #[case(None, b"[1,2,3]", false)]
    #[case(Some("streaming=yes"), b"", false)]
    fn test_streaming_requested(
        #[case] query: Option<&str>,
        #[case] body: &[u8],
        #[case] expected: bool,
    ) {
        assert_eq!(streaming_requested(query, body).unwrap(), expected);
    }

    #[rstest]
    #[case(Some("stream=maybe"), b"" as &[u8])]
    #[case(Some("stream"), b"")]
    #[case(None, b"{\"stream\":\"true\"}")]
    #[case(None, b"{\"stream\":1}")]
    fn test_malformed_stream_flag(#[case] query: Option<&str>, #[case] body: &[u8]) {
        assert!(matches!(
            streaming_requested(query, body),
            Err(ProxyError::MalformedStreamFlag(_))
        ));
    }

    fn paced_body(
        chunks: Vec<&'static str>,
        gap: Duration,
    ) -> StreamBody<impl futures_util::Stream<Item = Result<Frame<Bytes>, Infallible>> + Unpin> {
        let frames = stream::iter(chunks).then(move |chunk| async move {
            tokio::time::sleep(gap).await;
            Ok::<_, Infallible>(Frame::data(Bytes::from_static(chunk.as_bytes())))
        });
        StreamBody::new(Box::pin(frames))
    }

    #[tokio::test]
    async fn test_chunks_reach_client_as_they_arrive() {
        let gap = Duration::from_millis(100);
        let (body, capture) = tee_stream(paced_body(vec!["one ", "two ", "three"], gap), 1024);

        let started = Instant::now();
        let mut client = body.into_data_stream();
        let mut arrivals = Vec::new();
        while let Some(chunk) = client.next().await {
            arrivals.push((chunk.unwrap(), started.elapsed()));
        }

        assert_eq!(arrivals.len(), 3);
        assert!(arrivals[0].1 < Duration::from_millis(180));
        assert!(arrivals[2].1 >= Duration::from_millis(280));

        let captured = capture.await.unwrap();
        assert_eq!(&captured.body[..], b"one two three");
        assert!(captured.upstream_error.is_none());
        assert!(!captured.client_disconnected);
        assert!(!captured.truncated);
    }

    #[tokio::test]
    async fn test_capture_completes_after_client_drops() {
        let (body, capture) = tee_stream(
            paced_body(
                vec!["a", "b", "c", "d", "e", "f", "g", "h"],
                Duration::from_millis(5),
            ),
            1024,
        );
        drop(body);

        let captured = capture.await.unwrap();
        assert_eq!(&captured.body[..], b"abcdefgh");
        assert!(captured.client_disconnected);
    }

    #[tokio::test]
    async fn test_capture_stops_at_limit_while_client_gets_everything() {
        let (body, capture) = tee_stream(
            paced_body(vec!["0123456789", "abcdefghij", "KLMNOPQRST"], Duration::ZERO),
            15,
        );

        let received = body.collect().await.unwrap().to_bytes();
        assert_eq!(&received[..], b"0123456789abcdefghijKLMNOPQRST");

        let captured = capture.await.unwrap();
        assert_eq!(&captured.body[..], b"0123456789abcde");
        assert!(captured.truncated);
        assert!(captured.upstream_error.is_none());
    }
}
