use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A function call extracted from a model reply, either from a structured
/// tool_calls payload or recognized inline in free text. Transient: it is
/// validated against the action table and executed, never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), arguments: Map::new() }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// String view of an argument, if present and a string.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}
