use serde::{Deserialize, Serialize};

use crate::calls::FunctionCall;
use crate::errors::RelayError;
use crate::ids::SessionId;

/// One ordered piece of assistant output bound for a client.
///
/// `seq` is assigned by the relay and is strictly monotonic per session, so
/// out-of-order transport delivery can be detected downstream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamFragment {
    pub session_id: SessionId,
    pub seq: u64,
    pub text: String,
}

/// Events yielded by a provider's chat stream.
///
/// Ordering contract: zero or more `Token`s, then zero or more `Call`s, then
/// `Done`. `Error` may appear at any point and terminates the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatEvent {
    Token { text: String },
    Call(FunctionCall),
    Done,
    Error(RelayError),
}

impl ChatEvent {
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token { text: text.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}
