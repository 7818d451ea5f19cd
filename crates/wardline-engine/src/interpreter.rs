use serde_json::Value;

use wardline_core::calls::FunctionCall;

/// Upper bound on how much accumulated text is scanned for an inline call.
/// Replies longer than this are plain prose, not a call object.
pub const INLINE_SCAN_LIMIT: usize = 8 * 1024;

/// Outcome of interpreting an assistant reply. Parsing never fails: anything
/// that is not recognizably a function call is plain text.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedReply {
    PlainText(String),
    Call(FunctionCall),
}

/// Parse a structured tool_call payload from the backend.
pub fn parse_structured(value: &Value) -> Option<FunctionCall> {
    let obj = value.as_object()?;
    let name = obj.get("name")?.as_str()?.to_string();
    let arguments = obj
        .get("arguments")
        .or_else(|| obj.get("parameters"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    Some(FunctionCall { name, arguments })
}

/// Interpret accumulated free text: a reply consisting of exactly one JSON
/// object with a `name` and an `arguments`/`parameters` object is a call;
/// everything else, including malformed or incidental JSON, degrades to text.
pub fn parse_inline(text: &str) -> ParsedReply {
    let trimmed = text.trim();
    if trimmed.len() > INLINE_SCAN_LIMIT || !trimmed.starts_with('{') {
        return ParsedReply::PlainText(text.to_string());
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => match parse_structured(&value) {
            Some(call) if has_call_shape(&value) => ParsedReply::Call(call),
            _ => ParsedReply::PlainText(text.to_string()),
        },
        Err(_) => ParsedReply::PlainText(text.to_string()),
    }
}

/// True while accumulated text could still become the head of an inline
/// call object. Used to bound how long the relay withholds tokens.
pub fn might_be_inline_call(text: &str) -> bool {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return true;
    }
    trimmed.starts_with('{') && trimmed.len() <= INLINE_SCAN_LIMIT
}

fn has_call_shape(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    obj.get("name").map(Value::is_string).unwrap_or(false)
        && obj
            .get("arguments")
            .or_else(|| obj.get("parameters"))
            .map(Value::is_object)
            .unwrap_or(false)
}
