//! Conversation engine for the interview copilot.
//!
//! Provides OpenAI and DeepSeek chat-completion clients with:
//! - Bounded conversation history with a pinned system message
//! - Tool (function) registration and dispatch
//! - Retry with exponential backoff on transient backend failures
//! - Streaming (SSE) and buffered completions
//! - Single-shot screenshot analysis (vision)

pub mod deepseek;
pub mod dispatch;
pub mod factory;
pub mod gateway;
pub mod history;
pub mod openai;
pub mod registry;
pub mod retry;
pub mod session;
pub mod streaming;

use async_trait::async_trait;

pub use deepseek::{DeepSeekClient, DeepSeekConfig};
pub use factory::create_backend;
pub use gateway::{CompletionGateway, GatewayResponse, StreamStart};
pub use history::ChatHistory;
pub use openai::{OpenAiClient, OpenAiConfig};
pub use registry::{answer_interview_question_spec, ToolBinding, ToolRegistry};
pub use retry::RetryPolicy;
pub use session::{ContinuationBudget, Outcome, Session, SessionConfig};
pub use streaming::FragmentStream;

/// A chat-capable model backend.
///
/// Adapters translate vendor JSON into the neutral [`Completion`] shape;
/// no wire format is mandated beyond this trait.
#[async_trait]
pub trait CompletionBackend: Send + Sync + std::fmt::Debug {
    /// Buffered completion.
    ///
    /// `tools` is `None` when no tools are registered; adapters must omit
    /// the tool advertisement entirely in that case, since some backends
    /// reject an empty tool list.
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
    ) -> Result<Completion, LlmError>;

    /// Streaming completion, returning a lazy single-pass fragment stream.
    ///
    /// Tools are never advertised on this path; the gateway downgrades to
    /// [`CompletionBackend::complete`] when tools are registered.
    async fn complete_streaming(&self, messages: &[Message]) -> Result<FragmentStream, LlmError>;

    /// Single-shot vision call, outside any conversation history.
    async fn analyze_image(&self, image: &[u8], prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    /// Assistant/user/system text; absent on pure tool-call messages.
    pub content: Option<String>,
    /// Tool invocation requested by the assistant (name + raw arguments).
    pub tool_call: Option<ToolInvocation>,
    /// Tool name on tool-result messages.
    pub tool_name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_call: None,
            tool_name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_call: None,
            tool_name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_call: None,
            tool_name: None,
        }
    }

    /// Assistant message recording a requested tool invocation.
    pub fn tool_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_call: Some(ToolInvocation {
                name: name.into(),
                arguments: arguments.into(),
            }),
            tool_name: None,
        }
    }

    /// Tool message carrying a stringified tool result.
    pub fn tool_result(name: impl Into<String>, result: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            role: Role::Tool,
            content: Some(result.into()),
            tool_call: None,
            tool_name: Some(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation as reported by the backend: the tool name plus the
/// raw argument text exactly as the model produced it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: String,
}

/// A tool advertised to the model.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-schema parameter object, stored verbatim and never validated
    /// by the registry.
    pub parameters: serde_json::Value,
}

/// A buffered completion result in neutral form.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: Option<String>,
    /// At most one tool invocation. Backends that report several only
    /// surface the first.
    pub tool_call: Option<ToolInvocation>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited,

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("tool argument decode error: {0}")]
    ArgumentDecode(String),

    #[error("tool not registered: {0}")]
    ToolNotRegistered(String),

    #[error("tool '{name}' failed: {message}")]
    ToolExecution { name: String, message: String },

    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    #[error("completion failed after {attempts} attempts: {message}")]
    CompletionFailed { attempts: u32, message: String },
}

impl LlmError {
    /// Whether the gateway may retry after this error.
    ///
    /// Network failures, timeouts, rate limits, and backend-side 5xx
    /// responses are transient; everything else propagates immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Network(_) | LlmError::Timeout | LlmError::RateLimited => true,
            LlmError::Api { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(LlmError::Network("reset".into()).is_transient());
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::RateLimited.is_transient());
        assert!(LlmError::Api { status: 503, message: "overloaded".into() }.is_transient());
        assert!(!LlmError::Api { status: 400, message: "bad request".into() }.is_transient());
        assert!(!LlmError::Auth("bad key".into()).is_transient());
        assert!(!LlmError::ArgumentDecode("trailing comma".into()).is_transient());
        assert!(!LlmError::ToolNotRegistered("x".into()).is_transient());
    }

    #[test]
    fn message_constructors_set_roles() {
        let call = Message::tool_call("lookup", r#"{"q":"rust"}"#);
        assert_eq!(call.role, Role::Assistant);
        assert!(call.content.is_none());
        assert_eq!(call.tool_call.as_ref().unwrap().name, "lookup");

        let result = Message::tool_result("lookup", "42");
        assert_eq!(result.role, Role::Tool);
        assert_eq!(result.tool_name.as_deref(), Some("lookup"));
        assert_eq!(result.content.as_deref(), Some("42"));
    }
}
