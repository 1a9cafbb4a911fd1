//! Tool-call dispatch: decode arguments, resolve the binding, execute.
//!
//! Argument decode failures are fatal and never retried against the
//! backend: the tool choice itself was valid, only its payload is
//! malformed.

use serde_json::{Map, Value};
use tracing::debug;

use crate::registry::ToolRegistry;
use crate::{LlmError, ToolInvocation};

/// Decode raw tool-call argument text into named arguments.
///
/// Empty argument text decodes to an empty map (a tool with no required
/// parameters).
pub fn decode_arguments(raw: &str) -> Result<Map<String, Value>, LlmError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(LlmError::ArgumentDecode(format!(
            "expected a JSON object of named arguments, got {other}"
        ))),
        Err(e) => Err(LlmError::ArgumentDecode(e.to_string())),
    }
}

/// Decode the invocation's arguments, resolve the tool, and run its
/// handler synchronously.
pub fn run_tool(registry: &ToolRegistry, invocation: &ToolInvocation) -> Result<Value, LlmError> {
    let args = decode_arguments(&invocation.arguments)?;
    let binding = registry
        .resolve(&invocation.name)
        .ok_or_else(|| LlmError::ToolNotRegistered(invocation.name.clone()))?;
    debug!(tool = %invocation.name, "executing tool");
    binding.invoke(&args)
}

/// Stringify a tool result for the history, the way it is shown to the
/// model: bare strings stay unquoted, everything else is rendered as JSON.
pub fn render_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
