use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wardline_core::calls::FunctionCall;
use wardline_core::errors::RelayError;
use wardline_core::ids::{CallId, SessionId};
use wardline_core::stream::{ChatEvent, StreamFragment};
use wardline_core::turns::Turn;
use wardline_engine::actions::{ActionContext, ActionRegistry};
use wardline_engine::interpreter::{might_be_inline_call, parse_inline, ParsedReply};
use wardline_engine::prompts::SYSTEM_PROMPT;
use wardline_llm::provider::{ChatOptions, ChatProvider};

use crate::protocol::ServerFrame;
use crate::session::SessionRegistry;

/// Bridges one session's chat messages to the generation backend, forwarding
/// tokens as they arrive and resolving function calls inline.
///
/// Per chat: Idle -> Streaming -> (Resolving -> Streaming)* -> Idle, with
/// any failure short-circuiting to a sanitized error token followed by `end`.
pub struct StreamRelay {
    sessions: Arc<SessionRegistry>,
    provider: Arc<dyn ChatProvider>,
    actions: Arc<ActionRegistry>,
    options: ChatOptions,
}

impl StreamRelay {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        provider: Arc<dyn ChatProvider>,
        actions: Arc<ActionRegistry>,
        mut options: ChatOptions,
    ) -> Self {
        options.tools = actions.definitions();
        Self { sessions, provider, actions, options }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Run one chat exchange. Every path emits exactly one `start` and one
    /// `end`; tokens in between carry monotonically increasing seq numbers.
    pub async fn handle_chat(
        &self,
        session_id: &SessionId,
        text: &str,
        out: &mpsc::Sender<ServerFrame>,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        send(out, ServerFrame::Start).await;

        match self.run_generation(session_id, text, out, cancel).await {
            Ok(()) => {}
            Err(RelayError::Cancelled) => {
                // Client is gone; nothing left to tell it.
                send(out, ServerFrame::End).await;
                return Err(RelayError::Cancelled);
            }
            Err(err) => {
                warn!(
                    session_id = %session_id,
                    error_kind = err.error_kind(),
                    error = %err,
                    "chat exchange failed"
                );
                let seq = self.sessions.next_seq(session_id).await.unwrap_or(0);
                send(out, ServerFrame::error_token(&err.client_message(), seq)).await;
                send(out, ServerFrame::End).await;
                return Err(err);
            }
        }

        send(out, ServerFrame::End).await;
        Ok(())
    }

    async fn run_generation(
        &self,
        session_id: &SessionId,
        text: &str,
        out: &mpsc::Sender<ServerFrame>,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        self.sessions.append(session_id, Turn::user(text)).await?;
        let turns = self.sessions.snapshot_turns(session_id).await?;

        let deadline = Instant::now() + self.options.call_timeout;

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            opened = tokio::time::timeout(
                self.options.call_timeout,
                self.provider.stream_chat(SYSTEM_PROMPT, &turns, &self.options),
            ) => match opened {
                Ok(result) => result?,
                Err(_) => return Err(RelayError::StreamTimeout(self.options.call_timeout)),
            },
        };

        // Committed assistant text mirrors exactly what the client saw.
        let mut committed = String::new();
        // Head-of-reply lookahead: text is withheld only while it could
        // still be the start of an inline call object.
        let mut hold = String::new();
        let mut emitted_any = false;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining == Duration::ZERO {
                return Err(RelayError::StreamTimeout(self.options.call_timeout));
            }

            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(RelayError::Cancelled),
                next = tokio::time::timeout(remaining, stream.next()) => match next {
                    Ok(event) => event,
                    Err(_) => return Err(RelayError::StreamTimeout(self.options.call_timeout)),
                },
            };

            match event {
                Some(ChatEvent::Token { text }) => {
                    if !emitted_any {
                        hold.push_str(&text);
                        if !might_be_inline_call(&hold) {
                            let pending = std::mem::take(&mut hold);
                            self.emit(session_id, &pending, out, &mut committed).await?;
                            emitted_any = true;
                        }
                    } else {
                        self.emit(session_id, &text, out, &mut committed).await?;
                    }
                }
                Some(ChatEvent::Call(call)) => {
                    if !hold.is_empty() {
                        let pending = std::mem::take(&mut hold);
                        self.emit(session_id, &pending, out, &mut committed).await?;
                    }
                    let result = self.resolve(session_id, &call).await;
                    self.emit(session_id, &result, out, &mut committed).await?;
                    emitted_any = true;
                }
                Some(ChatEvent::Done) | None => {
                    if !hold.is_empty() {
                        let pending = std::mem::take(&mut hold);
                        match parse_inline(&pending) {
                            ParsedReply::Call(call) => {
                                let result = self.resolve(session_id, &call).await;
                                self.emit(session_id, &result, out, &mut committed).await?;
                            }
                            ParsedReply::PlainText(text) => {
                                self.emit(session_id, &text, out, &mut committed).await?;
                            }
                        }
                    }
                    break;
                }
                Some(ChatEvent::Error(err)) => return Err(err),
            }
        }

        if !committed.is_empty() {
            self.sessions.append(session_id, Turn::assistant(committed)).await?;
        }

        Ok(())
    }

    /// Validate and execute a call, rendering failures as in-stream text so
    /// a bad call never tears down the session.
    async fn resolve(&self, session_id: &SessionId, call: &FunctionCall) -> String {
        let ctx = match self.sessions.context(session_id).await {
            Ok(pending) => ActionContext { patient: pending.patient, room: pending.room },
            Err(_) => ActionContext::default(),
        };

        let call_id = CallId::new();
        info!(session_id = %session_id, call_id = %call_id, action = %call.name, "resolving function call");

        match self.actions.execute(call, &ctx) {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    session_id = %session_id,
                    call_id = %call_id,
                    action = %call.name,
                    error_kind = err.error_kind(),
                    "function call failed"
                );
                format!("[ERROR] {}", err.client_message())
            }
        }
    }

    async fn emit(
        &self,
        session_id: &SessionId,
        text: &str,
        out: &mpsc::Sender<ServerFrame>,
        committed: &mut String,
    ) -> Result<(), RelayError> {
        if text.is_empty() {
            return Ok(());
        }
        let fragment = StreamFragment {
            session_id: session_id.clone(),
            seq: self.sessions.next_seq(session_id).await?,
            text: text.to_string(),
        };
        committed.push_str(&fragment.text);
        send(out, ServerFrame::token(fragment.text, fragment.seq)).await;
        Ok(())
    }
}

async fn send(out: &mpsc::Sender<ServerFrame>, frame: ServerFrame) {
    // A failed send means the connection is gone; the cancel token will
    // stop the generation shortly after.
    let _ = out.send(frame).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use wardline_llm::mock::{MockProvider, MockResponse};
    use wardline_store::requests::RequestRepo;
    use wardline_store::Database;

    fn relay_with(responses: Vec<MockResponse>) -> (StreamRelay, Arc<MockProvider>) {
        let provider = Arc::new(MockProvider::new(responses));
        let sessions = Arc::new(SessionRegistry::new());
        let actions = Arc::new(ActionRegistry::new(RequestRepo::new(
            Database::in_memory().unwrap(),
        )));
        let relay = StreamRelay::new(
            sessions,
            Arc::clone(&provider) as Arc<dyn ChatProvider>,
            actions,
            ChatOptions::default(),
        );
        (relay, provider)
    }

    async fn collect(
        relay: &StreamRelay,
        session_id: &SessionId,
        text: &str,
    ) -> (Vec<ServerFrame>, Result<(), RelayError>) {
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let result = relay.handle_chat(session_id, text, &tx, &cancel).await;
        drop(tx);
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        (frames, result)
    }

    fn token_text(frames: &[ServerFrame]) -> String {
        frames
            .iter()
            .filter_map(|f| match f {
                ServerFrame::Token { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn tokens_concatenate_to_full_reply() {
        let (relay, _) = relay_with(vec![MockResponse::stream_text("your nurse is on the way")]);
        let id = relay.sessions().open();

        let (frames, result) = collect(&relay, &id, "can someone come by?").await;
        result.unwrap();

        assert_eq!(frames.first(), Some(&ServerFrame::Start));
        assert_eq!(frames.last(), Some(&ServerFrame::End));
        assert_eq!(token_text(&frames), "your nurse is on the way");

        // Complete reply committed to history.
        let turns = relay.sessions().snapshot_turns(&id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].text, "your nurse is on the way");
    }

    #[tokio::test]
    async fn seq_numbers_strictly_increase() {
        let (relay, _) = relay_with(vec![MockResponse::stream_text("one two three four")]);
        let id = relay.sessions().open();

        let (frames, _) = collect(&relay, &id, "hi").await;
        let seqs: Vec<u64> = frames
            .iter()
            .filter_map(|f| match f {
                ServerFrame::Token { seq, .. } => Some(*seq),
                _ => None,
            })
            .collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "seqs not monotonic: {seqs:?}");
    }

    #[tokio::test]
    async fn structured_call_resolves_and_injects_result() {
        let call = FunctionCall::new("create_request")
            .with_arg("priority", "high")
            .with_arg("description", "pain medication")
            .with_arg("department", "Cardiology");
        let (relay, _) = relay_with(vec![MockResponse::stream_call("One moment. ", call)]);
        let id = relay.sessions().open();
        relay
            .sessions()
            .set_context(&id, Some("p1".to_string()), Some("204".to_string()))
            .await
            .unwrap();

        let (frames, result) = collect(&relay, &id, "I'm in pain").await;
        result.unwrap();

        let text = token_text(&frames);
        assert!(text.starts_with("One moment. "));
        assert!(text.contains("high priority request for Cardiology"));
        assert_eq!(frames.last(), Some(&ServerFrame::End));
    }

    #[tokio::test]
    async fn inline_call_recognized_and_not_leaked() {
        let inline = r#"{"name":"get_patient_requests","arguments":{"patientId":"p9"}}"#;
        let (relay, _) = relay_with(vec![MockResponse::stream_text(inline)]);
        let id = relay.sessions().open();

        let (frames, result) = collect(&relay, &id, "what have I asked for?").await;
        result.unwrap();

        let text = token_text(&frames);
        assert_eq!(text, "No requests found.");
        assert!(!text.contains("patientId"), "raw call JSON leaked to client");
    }

    #[tokio::test]
    async fn unknown_action_keeps_envelope() {
        let call = FunctionCall::new("page_doctor");
        let (relay, _) = relay_with(vec![MockResponse::stream_call("", call)]);
        let id = relay.sessions().open();

        let (frames, result) = collect(&relay, &id, "page someone").await;
        result.unwrap();

        assert_eq!(frames.first(), Some(&ServerFrame::Start));
        assert_eq!(frames.last(), Some(&ServerFrame::End));
        assert!(token_text(&frames).contains("[ERROR] unsupported action: page_doctor"));

        // Session survives a bad call.
        assert!(relay.sessions().contains(&id));
    }

    #[tokio::test]
    async fn missing_arguments_never_reach_the_store() {
        let call = FunctionCall::new("create_request").with_arg("description", "water");
        let (relay, _) = relay_with(vec![
            MockResponse::stream_call("", call),
            MockResponse::stream_call(
                "",
                FunctionCall::new("get_patient_requests").with_arg("patientId", "Unknown"),
            ),
        ]);
        let id = relay.sessions().open();

        let (frames, _) = collect(&relay, &id, "some water please").await;
        let text = token_text(&frames);
        assert!(text.contains("missing required fields"));
        assert!(text.contains("priority"));

        // Nothing was inserted.
        let (frames, _) = collect(&relay, &id, "list my requests").await;
        assert!(token_text(&frames).contains("No requests found."));
    }

    #[tokio::test]
    async fn backend_unavailable_before_first_fragment() {
        let (relay, _) = relay_with(vec![MockResponse::Error(RelayError::BackendUnavailable(
            "connection refused".into(),
        ))]);
        let id = relay.sessions().open();

        let (frames, result) = collect(&relay, &id, "hello?").await;
        assert!(matches!(result, Err(RelayError::BackendUnavailable(_))));

        assert_eq!(frames.first(), Some(&ServerFrame::Start));
        assert_eq!(frames.last(), Some(&ServerFrame::End));
        let text = token_text(&frames);
        assert!(text.starts_with("[ERROR] "));
        assert!(!text.contains("connection refused"), "raw reason leaked");

        // Session retained so the client can retry immediately.
        assert!(relay.sessions().contains(&id));
    }

    #[tokio::test]
    async fn partial_text_shown_but_not_committed() {
        let (relay, _) = relay_with(vec![MockResponse::Stream(vec![
            ChatEvent::token("half an "),
            ChatEvent::Error(RelayError::StreamError {
                partial: "half an ".to_string(),
                reason: "connection reset".to_string(),
            }),
        ])]);
        let id = relay.sessions().open();

        let (frames, result) = collect(&relay, &id, "tell me about visiting hours").await;
        assert!(result.is_err());

        let text = token_text(&frames);
        assert!(text.starts_with("half an "));
        assert!(text.contains("[ERROR] "));

        // The interrupted assistant reply is not in committed history.
        let turns = relay.sessions().snapshot_turns(&id).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, "tell me about visiting hours");
    }

    #[tokio::test]
    async fn call_timeout_bounds_generation() {
        tokio::time::pause();

        // The backend stalls far past the deadline; the relay must give up.
        let provider = Arc::new(MockProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(60),
            MockResponse::stream_text("too late"),
        )]));
        let sessions = Arc::new(SessionRegistry::new());
        let actions = Arc::new(ActionRegistry::new(RequestRepo::new(
            Database::in_memory().unwrap(),
        )));
        let options = ChatOptions {
            call_timeout: Duration::from_secs(2),
            ..ChatOptions::default()
        };
        let relay = StreamRelay::new(
            sessions,
            provider as Arc<dyn ChatProvider>,
            actions,
            options,
        );
        let id = relay.sessions().open();

        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let handle = {
            let id = id.clone();
            async move { relay.handle_chat(&id, "hi", &tx, &cancel).await }
        };
        tokio::pin!(handle);

        tokio::select! {
            biased;
            _ = tokio::time::advance(Duration::from_secs(3)) => {}
            _ = &mut handle => panic!("should still be waiting"),
        }
        let result = handle.await;
        assert!(matches!(result, Err(RelayError::StreamTimeout(_))));

        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        assert_eq!(frames.last(), Some(&ServerFrame::End));
    }

    #[tokio::test]
    async fn cancellation_stops_generation() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(60),
            MockResponse::stream_text("never seen"),
        )]));
        let sessions = Arc::new(SessionRegistry::new());
        let actions = Arc::new(ActionRegistry::new(RequestRepo::new(
            Database::in_memory().unwrap(),
        )));
        let relay = Arc::new(StreamRelay::new(
            sessions,
            provider as Arc<dyn ChatProvider>,
            actions,
            ChatOptions::default(),
        ));
        let id = relay.sessions().open();

        let (tx, _rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let task = {
            let relay = Arc::clone(&relay);
            let id = id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { relay.handle_chat(&id, "hi", &tx, &cancel).await })
        };

        tokio::task::yield_now().await;
        cancel.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(RelayError::Cancelled)));
    }
}
