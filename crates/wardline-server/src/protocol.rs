use serde::{Deserialize, Serialize};

/// Frames a client may send over the socket.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A chat message to relay to the assistant.
    Chat { text: String },
    /// Patient/room context used to fill omitted action arguments.
    Context {
        #[serde(default)]
        patient: Option<String>,
        #[serde(default)]
        room: Option<String>,
    },
}

/// Frames the server sends back. Every chat produces exactly one `start`,
/// zero or more `token`s, and exactly one `end` — on failure the last token
/// before `end` carries an `[ERROR] …` text.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Start,
    Token { text: String, seq: u64 },
    End,
}

impl ServerFrame {
    pub fn token(text: impl Into<String>, seq: u64) -> Self {
        Self::Token { text: text.into(), seq }
    }

    pub fn error_token(reason: &str, seq: u64) -> Self {
        Self::Token { text: format!("[ERROR] {reason}"), seq }
    }
}
