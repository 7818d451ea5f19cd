use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::Stream;
use parking_lot::Mutex;

use wardline_core::calls::FunctionCall;
use wardline_core::errors::RelayError;
use wardline_core::stream::ChatEvent;
use wardline_core::turns::Turn;

use crate::provider::{ChatOptions, ChatProvider};

/// Pre-programmed responses for deterministic testing without a backend.
#[derive(Clone)]
pub enum MockResponse {
    /// Yield a sequence of ChatEvents.
    Stream(Vec<ChatEvent>),
    /// Return an error from the stream_chat() call itself.
    Error(RelayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// Convenience: token-per-word text stream ending in Done.
    pub fn stream_text(text: &str) -> Self {
        let mut events = Vec::new();
        let mut rest = text;
        while !rest.is_empty() {
            let cut = rest
                .char_indices()
                .find(|(_, c)| *c == ' ')
                .map(|(i, _)| i + 1)
                .unwrap_or(rest.len());
            events.push(ChatEvent::token(&rest[..cut]));
            rest = &rest[cut..];
        }
        events.push(ChatEvent::Done);
        Self::Stream(events)
    }

    /// Convenience: a structured call after optional preamble text.
    pub fn stream_call(preamble: &str, call: FunctionCall) -> Self {
        let mut events = Vec::new();
        if !preamble.is_empty() {
            events.push(ChatEvent::token(preamble));
        }
        events.push(ChatEvent::Call(call));
        events.push(ChatEvent::Done);
        Self::Stream(events)
    }

    /// Convenience: a stream that fails mid-flight.
    pub fn stream_error(error: RelayError) -> Self {
        Self::Stream(vec![ChatEvent::Error(error)])
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// records the turn history of every call it receives.
pub struct MockProvider {
    responses: Mutex<Vec<MockResponse>>,
    call_count: AtomicUsize,
    seen_turns: Mutex<Vec<Vec<Turn>>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: AtomicUsize::new(0),
            seen_turns: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Turn snapshots passed to each stream_chat call, in order.
    pub fn seen_turns(&self) -> Vec<Vec<Turn>> {
        self.seen_turns.lock().clone()
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream_chat(
        &self,
        _system_prompt: &str,
        turns: &[Turn],
        _options: &ChatOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = ChatEvent> + Send>>, RelayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.seen_turns.lock().push(turns.to_vec());

        let response = self.responses.lock().get(idx).cloned();
        let Some(response) = response else {
            return Err(RelayError::BackendUnavailable(format!(
                "no mock response configured for call {idx}"
            )));
        };

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(
    response: MockResponse,
) -> Result<Pin<Box<dyn Stream<Item = ChatEvent> + Send>>, RelayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn text_response_tokenizes_by_word() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("hello wide world")]);
        let stream = mock
            .stream_chat("p", &[], &ChatOptions::default())
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;

        assert_eq!(
            events,
            vec![
                ChatEvent::token("hello "),
                ChatEvent::token("wide "),
                ChatEvent::token("world"),
                ChatEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn error_response() {
        let mock = MockProvider::new(vec![MockResponse::Error(RelayError::BackendUnavailable(
            "down".into(),
        ))]);
        let result = mock.stream_chat("p", &[], &ChatOptions::default()).await;
        assert!(matches!(result, Err(RelayError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn sequential_responses_and_history_capture() {
        let mock = MockProvider::new(vec![
            MockResponse::stream_text("first"),
            MockResponse::stream_text("second"),
        ]);

        let turns = vec![Turn::user("q1")];
        let _ = mock.stream_chat("p", &turns, &ChatOptions::default()).await;
        assert_eq!(mock.call_count(), 1);

        let turns = vec![Turn::user("q1"), Turn::assistant("first"), Turn::user("q2")];
        let _ = mock.stream_chat("p", &turns, &ChatOptions::default()).await;
        assert_eq!(mock.call_count(), 2);

        let seen = mock.seen_turns();
        assert_eq!(seen[0].len(), 1);
        assert_eq!(seen[1].len(), 3);
    }

    #[tokio::test]
    async fn exhausted_responses_fail() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("only one")]);
        let _ = mock.stream_chat("p", &[], &ChatOptions::default()).await;
        let result = mock.stream_chat("p", &[], &ChatOptions::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn call_response() {
        let call = FunctionCall::new("get_patient_requests").with_arg("patientId", "p1");
        let mock = MockProvider::new(vec![MockResponse::stream_call("Checking... ", call)]);
        let stream = mock
            .stream_chat("p", &[], &ChatOptions::default())
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[1], ChatEvent::Call(c) if c.name == "get_patient_requests"));
        assert_eq!(events[2], ChatEvent::Done);
    }

    #[tokio::test]
    async fn delayed_response() {
        tokio::time::pause();

        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_millis(50),
            MockResponse::stream_text("after delay"),
        )]);

        let opts = ChatOptions::default();
        let fut = mock.stream_chat("p", &[], &opts);
        tokio::pin!(fut);

        tokio::time::advance(Duration::from_millis(60)).await;
        let stream = fut.await.unwrap();
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.last(), Some(&ChatEvent::Done));
    }
}
