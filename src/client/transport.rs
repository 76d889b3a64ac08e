//! Transport abstraction for the event stream.
//!
//! The subscriber consumes decoded message payloads, not raw HTTP, so the
//! whole state machine can be driven by a fake transport in tests. The real
//! transport is a reqwest streaming GET with an incremental SSE decoder.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use thiserror::Error;

/// Errors on the client side of the stream.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to open event stream: {reason}")]
    Connect { reason: String },

    #[error("event stream failed: {reason}")]
    Stream { reason: String },
}

/// A stream of decoded message payloads (the `data:` content of each SSE
/// message).
pub type EventStream = Pin<Box<dyn Stream<Item = Result<String, ClientError>> + Send>>;

/// Opens a fresh stream per connection attempt.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn open(&self) -> Result<EventStream, ClientError>;
}

/// Incremental decoder for the text/event-stream framing.
///
/// Accumulates raw bytes, splits on lines, collects `data:` fields, and
/// yields one payload per blank-line message terminator. `event:`, `id:`,
/// `retry:` and comment lines are ignored; the wire protocol carries
/// everything in the JSON payload.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning any completed message payloads.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut complete = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    complete.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }
        complete
    }
}

/// The production transport: a long-lived HTTP GET against the stream
/// endpoint.
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn open(&self) -> Result<EventStream, ClientError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ClientError::Connect {
                reason: e.to_string(),
            })?;

        let bytes = response.bytes_stream();
        let stream = futures::stream::unfold(
            (bytes, SseDecoder::new(), Vec::<String>::new()),
            |(mut bytes, mut decoder, mut ready)| async move {
                loop {
                    if !ready.is_empty() {
                        let payload = ready.remove(0);
                        return Some((Ok(payload), (bytes, decoder, ready)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => ready.extend(decoder.feed(&chunk)),
                        Some(Err(e)) => {
                            let err = ClientError::Stream {
                                reason: e.to_string(),
                            };
                            return Some((Err(err), (bytes, decoder, ready)));
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}
