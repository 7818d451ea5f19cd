use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use wardline_core::calls::FunctionCall;
use wardline_core::stream::ChatEvent;

/// Parses the NDJSON chat stream: one JSON object per line carrying a
/// `message.content` delta, optional `message.tool_calls`, and a terminal
/// `done: true` line. Malformed lines are skipped (degrade, don't abort).
pub struct ChunkParser {
    accumulated: String,
    done: bool,
}

impl Default for ChunkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkParser {
    pub fn new() -> Self {
        Self { accumulated: String::new(), done: false }
    }

    /// Parse one line and return zero or more ChatEvents.
    pub fn parse_line(&mut self, line: &str) -> Vec<ChatEvent> {
        let line = line.trim();
        if line.is_empty() || self.done {
            return Vec::new();
        }

        let chunk: ChatChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(error = %err, "skipping malformed stream line");
                return Vec::new();
            }
        };

        let mut events = Vec::new();

        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                self.accumulated.push_str(&message.content);
                events.push(ChatEvent::Token { text: message.content });
            }
            for tool_call in message.tool_calls {
                if let Some(call) = tool_call.into_function_call() {
                    events.push(ChatEvent::Call(call));
                }
            }
        }

        if chunk.done {
            self.done = true;
            events.push(ChatEvent::Done);
        }

        events
    }

    /// All text delivered so far, for error reporting on broken streams.
    pub fn partial_text(&self) -> &str {
        &self.accumulated
    }

    /// True once the terminal `done: true` line has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }
}

#[derive(Deserialize)]
struct ChatChunk {
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ToolCallEntry>,
}

#[derive(Deserialize)]
struct ToolCallEntry {
    function: Option<ToolFunction>,
}

#[derive(Deserialize)]
struct ToolFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl ToolCallEntry {
    fn into_function_call(self) -> Option<FunctionCall> {
        let func = self.function?;
        let arguments = match func.arguments {
            Value::Object(map) => map,
            // Some backends ship arguments as a JSON-encoded string.
            Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                _ => serde_json::Map::new(),
            },
            _ => serde_json::Map::new(),
        };
        Some(FunctionCall { name: func.name, arguments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_deltas_accumulate() {
        let mut parser = ChunkParser::new();

        let events = parser.parse_line(
            r#"{"model":"m","message":{"role":"assistant","content":"Hel"},"done":false}"#,
        );
        assert_eq!(events, vec![ChatEvent::token("Hel")]);

        let events = parser.parse_line(
            r#"{"model":"m","message":{"role":"assistant","content":"lo"},"done":false}"#,
        );
        assert_eq!(events, vec![ChatEvent::token("lo")]);
        assert_eq!(parser.partial_text(), "Hello");
    }

    #[test]
    fn done_line_yields_done() {
        let mut parser = ChunkParser::new();
        let events = parser
            .parse_line(r#"{"model":"m","message":{"role":"assistant","content":""},"done":true}"#);
        assert_eq!(events, vec![ChatEvent::Done]);
        assert!(parser.is_done());
        // Lines after done are ignored.
        assert!(parser.parse_line(r#"{"done":true}"#).is_empty());
    }

    #[test]
    fn tool_calls_become_call_events() {
        let mut parser = ChunkParser::new();
        let events = parser.parse_line(
            r#"{"message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"create_request","arguments":{"priority":"high","description":"ice pack","department":"Orthopedics"}}}]},"done":false}"#,
        );
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChatEvent::Call(call) => {
                assert_eq!(call.name, "create_request");
                assert_eq!(call.arg_str("priority"), Some("high"));
            }
            other => panic!("expected Call, got {other:?}"),
        }
    }

    #[test]
    fn string_encoded_arguments_decode() {
        let mut parser = ChunkParser::new();
        let events = parser.parse_line(
            r#"{"message":{"role":"assistant","tool_calls":[{"function":{"name":"get_patient_requests","arguments":"{\"patientId\":\"p1\"}"}}]},"done":false}"#,
        );
        match &events[0] {
            ChatEvent::Call(call) => assert_eq!(call.arg_str("patientId"), Some("p1")),
            other => panic!("expected Call, got {other:?}"),
        }
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let mut parser = ChunkParser::new();
        assert!(parser.parse_line("not json at all").is_empty());
        assert!(parser.parse_line("{\"truncated\":").is_empty());
        assert!(parser.parse_line("").is_empty());

        // Parser keeps working after a bad line.
        let events = parser
            .parse_line(r#"{"message":{"role":"assistant","content":"ok"},"done":false}"#);
        assert_eq!(events, vec![ChatEvent::token("ok")]);
    }

    #[test]
    fn empty_content_emits_no_token() {
        let mut parser = ChunkParser::new();
        let events = parser
            .parse_line(r#"{"message":{"role":"assistant","content":""},"done":false}"#);
        assert!(events.is_empty());
    }
}
