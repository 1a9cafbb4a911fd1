//! Tool registry: name-keyed catalog of tool specs bound to handlers.
//!
//! The registry stores parameter schemas verbatim; it does not validate
//! argument values. Structural validation is the backend's job, decoding
//! is the dispatcher's.

use serde_json::{Map, Value};

use crate::{LlmError, ToolSpec};

/// Handler invoked with decoded keyword arguments.
pub type ToolHandler = Box<dyn Fn(&Map<String, Value>) -> Result<Value, String> + Send + Sync>;

/// A tool spec bound to its handler.
pub struct ToolBinding {
    pub spec: ToolSpec,
    handler: ToolHandler,
}

impl ToolBinding {
    /// Invoke the handler synchronously. Handler errors surface as
    /// [`LlmError::ToolExecution`], never swallowed.
    pub fn invoke(&self, args: &Map<String, Value>) -> Result<Value, LlmError> {
        (self.handler)(args).map_err(|message| LlmError::ToolExecution {
            name: self.spec.name.clone(),
            message,
        })
    }
}

/// Registration-ordered tool catalog. Populated once at setup and
/// read-only during conversation.
#[derive(Default)]
pub struct ToolRegistry {
    bindings: Vec<ToolBinding>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails with [`LlmError::DuplicateTool`] if the name
    /// is already taken; existing registrations are never overwritten.
    pub fn register(
        &mut self,
        spec: ToolSpec,
        handler: impl Fn(&Map<String, Value>) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Result<(), LlmError> {
        if self.resolve(&spec.name).is_some() {
            return Err(LlmError::DuplicateTool(spec.name));
        }
        tracing::debug!(tool = %spec.name, "registered tool");
        self.bindings.push(ToolBinding {
            spec,
            handler: Box::new(handler),
        });
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<&ToolBinding> {
        self.bindings.iter().find(|b| b.spec.name == name)
    }

    /// Specs to advertise, in registration order.
    ///
    /// `None` when no tools are registered, so the outgoing request can
    /// omit the field entirely; some backends reject an empty tool list.
    pub fn specs(&self) -> Option<Vec<ToolSpec>> {
        if self.bindings.is_empty() {
            return None;
        }
        Some(self.bindings.iter().map(|b| b.spec.clone()).collect())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Spec for the builtin interview-question tool: the model decides whether
/// the relayed utterance is an interview question and, if so, answers it.
pub fn answer_interview_question_spec() -> ToolSpec {
    ToolSpec {
        name: "answer_interview_question".into(),
        description: "Judges whether the user's relayed utterance is an \
interview question and outputs the answer. If it is a question, pass a \
brief answer and a detailed answer; otherwise pass empty strings."
            .into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "is_interview_question": {
                    "type": "boolean",
                    "description": "Whether the utterance is an interview question"
                },
                "simplified_answer": {
                    "type": "string",
                    "description": "Brief answer to the interview question"
                },
                "detailed_answer": {
                    "type": "string",
                    "description": "Detailed answer with an explanation"
                }
            },
            "required": ["is_interview_question"]
        }),
    }
}

/// Convert a tool spec to the OpenAI legacy function-calling format.
pub fn to_openai_function(spec: &ToolSpec) -> Value {
    serde_json::json!({
        "name": spec.name,
        "description": spec.description,
        "parameters": spec.parameters,
    })
}

/// Convert a tool spec to the DeepSeek (OpenAI tools-style) format.
pub fn to_deepseek_tool(spec: &ToolSpec) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.into(),
            description: format!("{name} tool"),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "q": { "type": "string" } },
                "required": ["q"]
            }),
        }
    }

    #[test]
    fn specs_returned_verbatim_in_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(spec("a"), |_| Ok(Value::Null)).unwrap();
        registry.register(spec("b"), |_| Ok(Value::Null)).unwrap();

        let specs = registry.specs().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0], spec("a"));
        assert_eq!(specs[1], spec("b"));
    }

    #[test]
    fn empty_registry_advertises_nothing() {
        let registry = ToolRegistry::new();
        assert!(registry.specs().is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = ToolRegistry::new();
        registry.register(spec("a"), |_| Ok(Value::Null)).unwrap();

        let err = registry.register(spec("a"), |_| Ok(Value::Null)).unwrap_err();
        assert!(matches!(err, LlmError::DuplicateTool(name) if name == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn invoke_passes_decoded_arguments() {
        let mut registry = ToolRegistry::new();
        registry
            .register(spec("echo"), |args| {
                Ok(args.get("q").cloned().unwrap_or(Value::Null))
            })
            .unwrap();

        let mut args = Map::new();
        args.insert("q".into(), Value::String("hello".into()));
        let result = registry.resolve("echo").unwrap().invoke(&args).unwrap();
        assert_eq!(result, Value::String("hello".into()));
    }

    #[test]
    fn handler_error_becomes_tool_execution() {
        let mut registry = ToolRegistry::new();
        registry
            .register(spec("boom"), |_| Err("db unreachable".into()))
            .unwrap();

        let err = registry
            .resolve("boom")
            .unwrap()
            .invoke(&Map::new())
            .unwrap_err();
        assert!(
            matches!(err, LlmError::ToolExecution { ref name, ref message }
                if name == "boom" && message == "db unreachable")
        );
    }

    #[test]
    fn wire_converters_wrap_schema() {
        let s = answer_interview_question_spec();

        let openai = to_openai_function(&s);
        assert_eq!(openai["name"], "answer_interview_question");
        assert_eq!(openai["parameters"], s.parameters);

        let deepseek = to_deepseek_tool(&s);
        assert_eq!(deepseek["type"], "function");
        assert_eq!(deepseek["function"]["parameters"], s.parameters);
    }
}
