//! Lazy text streams with two backends.
//!
//! Every streaming call returns a [`TextStream`]: a finite, lazily started
//! sequence of [`StreamChunk`]s. Nothing touches the network until the stream
//! is first polled, and each call builds a fresh stream.
//!
//! Backends:
//! - [`sse_stream`]: true incremental streaming over server-sent events.
//! - [`chunked_stream`]: waits for the complete response, then replays it in
//!   fixed-size character chunks. This only approximates streaming (the
//!   first chunk arrives after the whole generation finished) and exists for
//!   upstreams without incremental output.
//!
//! On failure both backends yield exactly one [`StreamChunk::Error`] and end.

use std::future::Future;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;

use crate::chat::core::catalog::Provider;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::http::ensure_success;
use crate::chat::llm::provider::failure_message;

/// Characters per chunk for the chunk-splitting backend.
pub const FAKE_STREAM_CHUNK_CHARS: usize = 10;

/// One fragment of a streamed reply.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Generated text.
    Text(String),
    /// Terminal failure; the message names the provider.
    Error(String),
}

impl StreamChunk {
    /// Text form shown to users; errors are prefixed with `Error: `.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Error(message) => format!("Error: {message}"),
        }
    }

    /// Whether this is the terminal error fragment.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Boxed lazy stream of reply fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Stream made of a single error fragment.
#[must_use]
pub fn error_stream(message: String) -> TextStream {
    Box::pin(futures::stream::once(async move {
        StreamChunk::Error(message)
    }))
}

/// Split `content` into chunks of at most `size` characters.
#[must_use]
pub fn split_chars(content: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = content.chars().collect();
    chars
        .chunks(size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Chunk-splitting backend: await the whole completion, then replay it.
pub fn chunked_stream<F>(provider: Provider, completion: F) -> TextStream
where
    F: Future<Output = ChatResult<String>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        match completion.await {
            Ok(content) => {
                for chunk in split_chars(&content, FAKE_STREAM_CHUNK_CHARS) {
                    yield StreamChunk::Text(chunk);
                }
            }
            Err(err) => {
                tracing::warn!("{} completion failed: {err}", provider.display_name());
                yield StreamChunk::Error(failure_message(provider, &err));
            }
        }
    })
}

/// Parsed form of one SSE line.
#[derive(Debug, PartialEq)]
pub enum SseLine {
    /// A `data:` payload.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
    /// Comments, blank lines and other fields.
    Ignore,
}

/// Parse a single line of an event stream.
#[must_use]
pub fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches('\r');
    let Some(payload) = line.strip_prefix("data:") else {
        return SseLine::Ignore;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        SseLine::Done
    } else if payload.is_empty() {
        SseLine::Ignore
    } else {
        SseLine::Data(payload.to_string())
    }
}

/// Incremental backend: forward text deltas from a server-sent event response.
///
/// `extract` pulls the text delta out of each JSON payload; payloads without
/// text are skipped.
pub fn sse_stream<F>(provider: Provider, request: F, extract: fn(&Value) -> Option<String>) -> TextStream
where
    F: Future<Output = Result<reqwest::Response, reqwest::Error>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let response = match request.await {
            Ok(response) => ensure_success(response, provider.display_name()).await,
            Err(err) => Err(ChatError::from(err)),
        };
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!("{} stream request failed: {err}", provider.display_name());
                yield StreamChunk::Error(failure_message(provider, &err));
                return;
            }
        };

        let mut fragments = sse_body(provider, response.bytes_stream(), extract);
        while let Some(fragment) = fragments.next().await {
            yield fragment;
        }
    })
}

/// Decode an event-stream body into reply fragments.
///
/// Bytes are buffered until a full line is available, so a multi-byte
/// character split across two network reads is decoded intact.
pub fn sse_body<S, B>(provider: Provider, body: S, extract: fn(&Value) -> Option<String>) -> TextStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();
        'read: while let Some(next) = body.next().await {
            match next {
                Ok(data) => buffer.extend_from_slice(data.as_ref()),
                Err(err) => {
                    yield StreamChunk::Error(failure_message(provider, &ChatError::from(err)));
                    return;
                }
            }

            while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&raw);
                match parse_sse_line(&line) {
                    SseLine::Done => break 'read,
                    SseLine::Ignore => {}
                    SseLine::Data(payload) => match serde_json::from_str::<Value>(&payload) {
                        Ok(value) => {
                            if let Some(text) = extract(&value).filter(|t| !t.is_empty()) {
                                yield StreamChunk::Text(text);
                            }
                        }
                        Err(err) => {
                            tracing::debug!("skipping unparsable stream payload: {err}");
                        }
                    },
                }
            }
        }
    })
}
