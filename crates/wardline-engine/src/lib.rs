pub mod actions;
pub mod interpreter;
pub mod prompts;

pub use actions::{ActionContext, ActionRegistry, ActionSpec};
pub use interpreter::{parse_inline, parse_structured, ParsedReply};
pub use prompts::SYSTEM_PROMPT;
