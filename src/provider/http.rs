//! Shared HTTP client, header helpers, and SSE frame parsing.

use std::sync::OnceLock;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::error::{GeppettoError, Result};

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "falling back to default HTTP client");
                reqwest::Client::new()
            })
    })
}

/// Headers for a JSON request with optional Bearer auth. `sse` adds
/// `Accept: text/event-stream`.
pub fn request_headers(api_key: Option<&str>, sse: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if sse {
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    }
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {key}")) {
            headers.insert(AUTHORIZATION, val);
        }
    }
    headers
}

/// Error for a non-2xx response. The body is kept as decoded JSON text when
/// possible.
pub fn status_to_error(status: u16, body: &str) -> GeppettoError {
    let body = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value.to_string(),
        Err(_) => body.trim().to_string(),
    };
    GeppettoError::transport_status(status, body)
}

/// One server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental SSE line parser.
///
/// Input is buffered as raw bytes and decoded one complete line at a time,
/// so a multi-byte character split across chunks survives. `event:` sets the
/// frame name, `data:` lines accumulate (joined with a newline), a blank
/// line dispatches the frame. Comment lines are ignored.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: String,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns frames completed by it.
    pub fn push(&mut self, chunk: impl AsRef<[u8]>) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk.as_ref());
        let mut frames = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.line(line.trim_end_matches(['\n', '\r'])) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing frame at end of stream.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.line(line.trim_end_matches('\r')) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            self.event = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data.push(rest.trim().to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = std::mem::take(&mut self.event);
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }
}

/// Turn a response body into a stream of SSE frames.
pub fn sse_frames(resp: reqwest::Response) -> impl Stream<Item = Result<SseFrame>> {
    sse_frames_from(resp.bytes_stream())
}

/// Parse SSE frames out of any stream of byte chunks.
pub fn sse_frames_from<S, B, E>(body: S) -> impl Stream<Item = Result<SseFrame>>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    GeppettoError: From<E>,
{
    try_stream! {
        let mut parser = SseParser::new();
        futures::pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for frame in parser.push(chunk) {
                yield frame;
            }
        }
        if let Some(frame) = parser.finish() {
            yield frame;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frames_across_chunk_boundaries() {
        let mut parser = SseParser::new();
        let mut frames = parser.push("event: response.output_text.delta\nda");
        assert!(frames.is_empty());
        frames.extend(parser.push("ta: {\"delta\":\"Hi\"}\n\n: keepalive\n\nevent: done\r\ndata: {}\r\n\r\n"));
        assert_eq!(
            frames,
            vec![
                SseFrame {
                    event: "response.output_text.delta".into(),
                    data: "{\"delta\":\"Hi\"}".into()
                },
                SseFrame {
                    event: "done".into(),
                    data: "{}".into()
                },
            ]
        );
    }

    #[test]
    fn multibyte_characters_survive_chunk_splits() {
        let bytes = "event: response.output_text.delta\ndata: {\"delta\":\"café\"}\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut parser = SseParser::new();
        assert!(parser.push(&bytes[..split]).is_empty());
        let frames = parser.push(&bytes[split..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"delta\":\"café\"}");
    }

    #[tokio::test]
    async fn byte_stream_split_inside_a_character_decodes_cleanly() {
        let bytes = "data: {\"delta\":\"café\"}\n\n".as_bytes().to_vec();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> =
            vec![Ok(bytes[..split].to_vec()), Ok(bytes[split..].to_vec())];

        let frames: Vec<SseFrame> = sse_frames_from(futures::stream::iter(chunks))
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"delta\":\"café\"}");
    }

    #[test]
    fn joins_multiline_data_and_flushes_at_eof() {
        let mut parser = SseParser::new();
        assert!(parser.push("event: x\ndata: a\ndata: b\n").is_empty());
        let frame = parser.finish().unwrap();
        assert_eq!(frame.data, "a\nb");
        assert!(parser.finish().is_none());
    }

    #[test]
    fn status_error_keeps_status_and_body() {
        let err = status_to_error(401, r#"{"error": {"message": "bad key"}}"#);
        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().contains("status=401"));
        assert!(err.to_string().contains("bad key"));
    }

    #[test]
    fn headers_include_sse_accept_and_bearer() {
        let headers = request_headers(Some("sk-1"), true);
        assert_eq!(headers[ACCEPT], "text/event-stream");
        assert_eq!(headers[AUTHORIZATION], "Bearer sk-1");
        assert!(request_headers(None, false).get(AUTHORIZATION).is_none());
    }
}
