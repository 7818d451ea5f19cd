/// System prompt sent as the first message of every generation call.
pub const SYSTEM_PROMPT: &str = "You are a helpful hospital assistant for admitted patients.";
