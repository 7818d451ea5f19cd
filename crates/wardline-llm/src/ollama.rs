use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::instrument;

use wardline_core::errors::RelayError;
use wardline_core::stream::ChatEvent;
use wardline_core::turns::Turn;

use crate::ndjson::ChunkParser;
use crate::provider::{ChatOptions, ChatProvider};

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "granite3.1-dense:8b";

/// Streaming adapter for an Ollama-compatible chat backend.
pub struct OllamaProvider {
    client: Client,
    host: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(host: impl Into<String>, model: impl Into<String>, connect_timeout: Duration) -> Result<Self, RelayError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| RelayError::BackendUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    pub fn with_defaults() -> Result<Self, RelayError> {
        Self::new(DEFAULT_HOST, DEFAULT_MODEL, Duration::from_secs(10))
    }

    fn build_body(&self, system_prompt: &str, turns: &[Turn], options: &ChatOptions) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": system_prompt })];
        for turn in turns {
            messages.push(json!({ "role": turn.role.to_string(), "content": turn.text }));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "options": { "temperature": options.temperature },
        });
        if !options.tools.is_empty() {
            body["tools"] = Value::Array(options.tools.clone());
        }
        body
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, system_prompt, turns, options), fields(model = %self.model))]
    async fn stream_chat(
        &self,
        system_prompt: &str,
        turns: &[Turn],
        options: &ChatOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = ChatEvent> + Send>>, RelayError> {
        let body = self.build_body(system_prompt, turns, options);
        let url = format!("{}/api/chat", self.host);

        // Refused connections and timeouts before any content fail fast so
        // callers can distinguish "no content yet" from "never will be".
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::BackendUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::BackendUnavailable(format!(
                "backend returned status {status}: {body}"
            )));
        }

        let byte_stream = resp.bytes_stream();
        Ok(Box::pin(NdjsonStream::new(byte_stream, options.idle_timeout)))
    }
}

/// Wraps the response byte stream, buffers it into lines, and feeds each
/// line through a [`ChunkParser`]. Carries an idle timeout that resets on
/// every received chunk; silence past the deadline terminates the stream.
struct NdjsonStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: ChunkParser,
    buffer: String,
    pending: Vec<ChatEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    finished: bool,
}

impl NdjsonStream {
    fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: ChunkParser::new(),
            buffer: String::new(),
            pending: Vec::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            finished: false,
        }
    }

    fn drain_complete_lines(&mut self) {
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].to_string();
            self.buffer = self.buffer[pos + 1..].to_string();
            let events = self.parser.parse_line(&line);
            self.pending.extend(events);
        }
    }
}

impl Stream for NdjsonStream {
    type Item = ChatEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        if !self.pending.is_empty() {
            return std::task::Poll::Ready(Some(self.pending.remove(0)));
        }
        if self.finished {
            return std::task::Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                std::task::Poll::Ready(Some(Ok(bytes))) => {
                    // Data received — reset idle timer
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    self.buffer.push_str(&text);
                    self.drain_complete_lines();

                    if !self.pending.is_empty() {
                        return std::task::Poll::Ready(Some(self.pending.remove(0)));
                    }
                }
                std::task::Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return std::task::Poll::Ready(Some(ChatEvent::Error(
                        RelayError::StreamError {
                            partial: self.parser.partial_text().to_string(),
                            reason: e.to_string(),
                        },
                    )));
                }
                std::task::Poll::Ready(None) => {
                    // Connection closed — process any trailing line
                    if !self.buffer.is_empty() {
                        let remaining = std::mem::take(&mut self.buffer);
                        let events = self.parser.parse_line(&remaining);
                        self.pending.extend(events);
                        if !self.pending.is_empty() {
                            return std::task::Poll::Ready(Some(self.pending.remove(0)));
                        }
                    }
                    if !self.parser.is_done() {
                        // Body ended without the terminal done line.
                        self.finished = true;
                        return std::task::Poll::Ready(Some(ChatEvent::Error(
                            RelayError::StreamError {
                                partial: self.parser.partial_text().to_string(),
                                reason: "stream ended before completion".to_string(),
                            },
                        )));
                    }
                    return std::task::Poll::Ready(None);
                }
                std::task::Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.finished = true;
                        let idle = self.idle_duration;
                        return std::task::Poll::Ready(Some(ChatEvent::Error(
                            RelayError::StreamTimeout(idle),
                        )));
                    }
                    return std::task::Poll::Pending;
                }
            }
        }
    }
}
