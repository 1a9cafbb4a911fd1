//! Configuration schema for the interview copilot.
//!
//! All structs use `serde(default)` so partial configs work correctly.
//! Missing fields are filled with defaults matching current behavior.

use serde::{Deserialize, Serialize};

/// System prompt used when the config does not override it.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a job-interview assistant. \
The user relays what the interviewer says; the relayed text may contain an \
interview question or unrelated talk. When you determine it is an interview \
question, help the user: give a brief answer first, then a detailed answer \
with an explanation. Otherwise report that it is not a question.";

/// Root configuration for the interview copilot.
///
/// Only override what you want to change; every section has defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CopilotConfig {
    pub llm: LlmConfig,
    pub session: SessionLimits,
    pub vision: VisionConfig,
    pub interview: InterviewConfig,
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "openai" or "deepseek".
    pub provider: String,
    pub model: String,
    /// API base URL override; the provider default is used when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Total attempts allowed for a completion (including the first).
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".into(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

/// How a tool-call continuation round-trip draws retry attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BudgetMode {
    /// The continuation call gets a full retry budget of its own.
    #[default]
    Fresh,
    /// The continuation call gets whatever the initiating call left over.
    Shared,
}

/// Session history and tool-loop limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    /// Cap on non-system messages kept in history; oldest are evicted first.
    pub max_messages: usize,
    /// After executing a tool, send the result back to the model for a
    /// follow-up answer instead of returning the raw result.
    pub continue_after_tool: bool,
    pub continuation_budget: BudgetMode,
    /// Cap on tool rounds within one user turn.
    pub max_tool_rounds: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_messages: 10,
            continue_after_tool: false,
            continuation_budget: BudgetMode::Fresh,
            max_tool_rounds: 10,
        }
    }
}

/// Screenshot analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Vision-capable model used for screenshot analysis.
    pub model: String,
    pub max_tokens: u32,
    /// Prompt used when the caller does not supply one.
    pub default_prompt: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            max_tokens: 1000,
            default_prompt: "Describe the contents of this screenshot in detail.".into(),
        }
    }
}

/// Interview framing for the system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterviewConfig {
    /// Free-form interview domain, e.g. "backend", "frontend", "algorithms".
    pub interview_type: String,
    pub system_prompt: String,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            interview_type: "general".into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
        }
    }
}
