use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use wardline_core::errors::RelayError;
use wardline_core::stream::ChatEvent;
use wardline_core::turns::Turn;

/// Tuning knobs for one generation call.
#[derive(Clone, Debug)]
pub struct ChatOptions {
    pub temperature: f64,
    /// Opening the connection must succeed within this window.
    pub connect_timeout: Duration,
    /// Maximum silence between stream chunks before the stream is declared dead.
    pub idle_timeout: Duration,
    /// Upper bound on the whole generation, enforced by the relay.
    pub call_timeout: Duration,
    /// Declarative tool schemas sent alongside the conversation, if any.
    pub tools: Vec<Value>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(120),
            tools: Vec::new(),
        }
    }
}

/// Streaming chat backend.
///
/// `stream_chat` either fails fast (the backend will never produce content)
/// or returns a stream of [`ChatEvent`]s; mid-stream failures arrive as
/// `ChatEvent::Error` so already-delivered tokens are never retracted.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn stream_chat(
        &self,
        system_prompt: &str,
        turns: &[Turn],
        options: &ChatOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = ChatEvent> + Send>>, RelayError>;
}
