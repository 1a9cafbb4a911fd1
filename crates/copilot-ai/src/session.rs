//! Conversation session: the single entry point for speech and
//! screenshot callers.
//!
//! A `Session` is created once per interview run with a fixed system
//! prompt and tool set, and discarded at run end. `converse` runs one
//! user turn end to end: append the user message, evict, ask the
//! completion gateway, dispatch any tool call, return the outcome.
//! Calls take `&mut self`, so one turn completes before the next;
//! multi-threaded callers serialize behind their own lock.

use serde_json::Value;
use tracing::warn;

use copilot_config::{BudgetMode, CopilotConfig, SessionLimits};

use crate::dispatch;
use crate::factory::create_backend;
use crate::gateway::{CompletionGateway, GatewayResponse, StreamStart};
use crate::history::ChatHistory;
use crate::registry::{ToolHandler, ToolRegistry};
use crate::retry::RetryPolicy;
use crate::{LlmError, ToolSpec};

/// Result of one user turn.
///
/// Failures surface as `Err(LlmError)`; the user's message stays in
/// history so the failed question remains visible.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Plain assistant text.
    Text(String),
    /// Raw result of the tool the model invoked.
    ToolResult { name: String, value: Value },
}

/// How a tool-call continuation round-trip draws retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContinuationBudget {
    /// A full retry budget of its own.
    #[default]
    Fresh,
    /// Whatever the initiating call left over, floored at one attempt.
    Shared,
}

impl From<BudgetMode> for ContinuationBudget {
    fn from(mode: BudgetMode) -> Self {
        match mode {
            BudgetMode::Fresh => ContinuationBudget::Fresh,
            BudgetMode::Shared => ContinuationBudget::Shared,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cap on non-system messages kept in history.
    pub max_messages: usize,
    /// After executing a tool, send the result back to the model for a
    /// follow-up answer instead of returning the raw result.
    pub continue_after_tool: bool,
    pub continuation_budget: ContinuationBudget,
    /// Cap on tool rounds within one user turn.
    pub max_tool_rounds: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_messages: crate::history::DEFAULT_MAX_MESSAGES,
            continue_after_tool: false,
            continuation_budget: ContinuationBudget::Fresh,
            max_tool_rounds: 10,
        }
    }
}

impl From<&SessionLimits> for SessionConfig {
    fn from(limits: &SessionLimits) -> Self {
        Self {
            max_messages: limits.max_messages,
            continue_after_tool: limits.continue_after_tool,
            continuation_budget: limits.continuation_budget.into(),
            max_tool_rounds: limits.max_tool_rounds,
        }
    }
}

/// A conversation session with bounded history and tool dispatch.
pub struct Session {
    history: ChatHistory,
    registry: ToolRegistry,
    gateway: CompletionGateway,
    config: SessionConfig,
}

impl Session {
    pub fn new(gateway: CompletionGateway, config: SessionConfig) -> Self {
        Self {
            history: ChatHistory::new(config.max_messages),
            registry: ToolRegistry::new(),
            gateway,
            config,
        }
    }

    /// Build a session from config: backend via the provider factory,
    /// retry policy from `llm.max_retries`, system prompt from the
    /// interview section.
    pub fn from_config(config: &CopilotConfig) -> Result<Self, LlmError> {
        let backend = create_backend(config)?;
        let gateway = CompletionGateway::new(backend, RetryPolicy::new(config.llm.max_retries));
        let mut session = Session::new(gateway, SessionConfig::from(&config.session));
        session.set_system_message(&config.interview.system_prompt);
        Ok(session)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.set_system_message(prompt);
        self
    }

    pub fn set_system_message(&mut self, prompt: impl Into<String>) {
        self.history.set_system_message(prompt);
    }

    /// Register a tool during setup. The registry is read-only once
    /// conversation starts.
    pub fn register_tool(
        &mut self,
        spec: ToolSpec,
        handler: impl Fn(&serde_json::Map<String, Value>) -> Result<Value, String>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), LlmError> {
        self.registry.register(spec, handler)
    }

    /// Register a pre-boxed handler (useful when handlers are built
    /// elsewhere).
    pub fn register_tool_boxed(
        &mut self,
        spec: ToolSpec,
        handler: ToolHandler,
    ) -> Result<(), LlmError> {
        self.registry.register(spec, move |args| handler(args))
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Reset conversation history, optionally retaining the system prompt.
    pub fn clear(&mut self, keep_system: bool) {
        self.history.clear(keep_system);
    }

    /// One buffered user turn: send the utterance, dispatch at most one
    /// tool call per model turn, return the outcome.
    pub async fn converse(&mut self, user_text: impl Into<String>) -> Result<Outcome, LlmError> {
        self.history.push_user(user_text);
        let tools = self.registry.specs();

        let first = self
            .gateway
            .complete(&self.history.messages(), tools.as_deref())
            .await?;
        self.resolve_turn(first, tools.as_deref()).await
    }

    /// One streamed user turn. `on_fragment` receives each text fragment
    /// as it arrives; exactly one assistant message is appended to history
    /// once the stream is exhausted. With tools registered the gateway
    /// downgrades to a buffered completion and `on_fragment` is not called.
    pub async fn converse_streaming(
        &mut self,
        user_text: impl Into<String>,
        mut on_fragment: impl FnMut(&str),
    ) -> Result<Outcome, LlmError> {
        self.history.push_user(user_text);
        let tools = self.registry.specs();

        match self
            .gateway
            .stream(&self.history.messages(), tools.as_deref())
            .await?
        {
            StreamStart::Buffered(response) => self.resolve_turn(response, tools.as_deref()).await,
            StreamStart::Fragments(mut stream) => {
                while let Some(fragment) = stream.next_fragment().await {
                    on_fragment(&fragment?);
                }
                let text = stream.into_text();
                self.history.push_assistant(text.clone());
                Ok(Outcome::Text(text))
            }
        }
    }

    /// Single-shot screenshot analysis. Bypasses the tool dispatcher and
    /// conversation history entirely; image analysis never triggers tools.
    pub async fn analyze_screenshot(
        &self,
        image: &[u8],
        prompt: &str,
    ) -> Result<String, LlmError> {
        self.gateway.analyze_image(image, prompt).await
    }

    /// Drive one model turn to its outcome, running the tool loop when
    /// the policy asks for continuation round-trips.
    async fn resolve_turn(
        &mut self,
        first: GatewayResponse,
        tools: Option<&[ToolSpec]>,
    ) -> Result<Outcome, LlmError> {
        let mut response = first;
        let mut attempts_used = 0u32;
        let mut rounds = 0u32;

        loop {
            attempts_used = attempts_used.saturating_add(response.attempts);
            let completion = response.completion;

            let Some(invocation) = completion.tool_call else {
                let text = completion.text.unwrap_or_default();
                self.history.push_assistant(text.clone());
                return Ok(Outcome::Text(text));
            };

            let value = dispatch::run_tool(&self.registry, &invocation)?;
            self.history
                .push_tool_call(&invocation.name, &invocation.arguments);
            self.history
                .push_tool_result(&invocation.name, dispatch::render_result(&value));

            if !self.config.continue_after_tool {
                return Ok(Outcome::ToolResult {
                    name: invocation.name,
                    value,
                });
            }

            rounds += 1;
            if rounds > self.config.max_tool_rounds {
                warn!(rounds, "max tool rounds reached, returning last tool result");
                return Ok(Outcome::ToolResult {
                    name: invocation.name,
                    value,
                });
            }

            let budget = match self.config.continuation_budget {
                ContinuationBudget::Fresh => self.gateway.policy().max_retries,
                ContinuationBudget::Shared => self
                    .gateway
                    .policy()
                    .max_retries
                    .saturating_sub(attempts_used)
                    .max(1),
            };
            response = self
                .gateway
                .complete_with_budget(&self.history.messages(), tools, budget)
                .await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::registry::answer_interview_question_spec;
    use crate::streaming::FragmentStream;
    use crate::{Completion, CompletionBackend, Message, Role, ToolInvocation};

    #[derive(Debug)]
    struct ScriptedBackend {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<Completion, LlmError>>>,
        fragments: Vec<String>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<Completion, LlmError>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into()),
                fragments: Vec::new(),
            }
        }

        fn streaming(fragments: &[&str]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(VecDeque::new()),
                fragments: fragments.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolSpec]>,
        ) -> Result<Completion, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Completion::default()))
        }

        async fn complete_streaming(
            &self,
            _messages: &[Message],
        ) -> Result<FragmentStream, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (tx, stream) = FragmentStream::channel();
            for part in &self.fragments {
                tx.send(Ok(part.clone())).unwrap();
            }
            Ok(stream)
        }

        async fn analyze_image(&self, _image: &[u8], _prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("a terminal window".into())
        }
    }

    fn text(t: &str) -> Result<Completion, LlmError> {
        Ok(Completion {
            text: Some(t.into()),
            tool_call: None,
        })
    }

    fn tool_call(name: &str, arguments: &str) -> Result<Completion, LlmError> {
        Ok(Completion {
            text: None,
            tool_call: Some(ToolInvocation {
                name: name.into(),
                arguments: arguments.into(),
            }),
        })
    }

    fn session_with(backend: Arc<ScriptedBackend>, config: SessionConfig) -> Session {
        let policy = RetryPolicy::new(3)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(4));
        let gateway = CompletionGateway::new(backend, policy);
        Session::new(gateway, config).with_system_prompt("you are a test")
    }

    /// Handler mirroring the builtin interview tool: returns the decoded
    /// kwargs back as a JSON object.
    fn register_interview_tool(session: &mut Session, calls: Arc<Mutex<Vec<Value>>>) {
        session
            .register_tool(answer_interview_question_spec(), move |args| {
                let value = Value::Object(args.clone());
                calls.lock().unwrap().push(value.clone());
                Ok(value)
            })
            .unwrap();
    }

    #[tokio::test]
    async fn plain_answer_appends_assistant_and_returns_text() {
        let backend = Arc::new(ScriptedBackend::new(vec![text("it depends")]));
        let mut session = session_with(backend.clone(), SessionConfig::default());

        let outcome = session.converse("what is the runtime?").await.unwrap();
        assert_eq!(outcome, Outcome::Text("it depends".into()));

        let msgs = session.history().messages();
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[1].content.as_deref(), Some("what is the runtime?"));
        assert_eq!(msgs[2].role, Role::Assistant);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn tool_call_dispatches_with_decoded_kwargs() {
        let raw = r#"{"is_interview_question": true, "simplified_answer": "42", "detailed_answer": "forty-two, because"}"#;
        let backend = Arc::new(ScriptedBackend::new(vec![tool_call(
            "answer_interview_question",
            raw,
        )]));
        let mut session = session_with(backend.clone(), SessionConfig::default());

        let handler_calls = Arc::new(Mutex::new(Vec::new()));
        register_interview_tool(&mut session, handler_calls.clone());

        let outcome = session
            .converse("what is the answer to everything?")
            .await
            .unwrap();

        // The outcome matches invoking the bound handler with those exact
        // keyword arguments.
        let expected: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(
            outcome,
            Outcome::ToolResult {
                name: "answer_interview_question".into(),
                value: expected.clone(),
            }
        );
        assert_eq!(handler_calls.lock().unwrap().as_slice(), &[expected]);

        // Tool-call message then tool-result message, in that order.
        let msgs = session.history().messages();
        let call_idx = msgs
            .iter()
            .position(|m| m.tool_call.is_some())
            .expect("tool-call message recorded");
        assert_eq!(msgs[call_idx].tool_call.as_ref().unwrap().arguments, raw);
        assert_eq!(msgs[call_idx + 1].role, Role::Tool);
        assert_eq!(
            msgs[call_idx + 1].tool_name.as_deref(),
            Some("answer_interview_question")
        );
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_arguments_fail_without_second_backend_call() {
        let backend = Arc::new(ScriptedBackend::new(vec![tool_call(
            "answer_interview_question",
            r#"{"is_interview_question": "#,
        )]));
        let mut session = session_with(backend.clone(), SessionConfig::default());
        register_interview_tool(&mut session, Arc::new(Mutex::new(Vec::new())));

        let err = session.converse("question?").await.unwrap_err();
        assert!(matches!(err, LlmError::ArgumentDecode(_)));
        assert_eq!(backend.calls(), 1);
        // The failed user turn stays in history.
        assert_eq!(session.history().non_system_len(), 1);
    }

    #[tokio::test]
    async fn unregistered_tool_is_fatal() {
        let backend = Arc::new(ScriptedBackend::new(vec![tool_call("mystery", "{}")]));
        let mut session = session_with(backend.clone(), SessionConfig::default());

        let err = session.converse("hm").await.unwrap_err();
        assert!(matches!(err, LlmError::ToolNotRegistered(name) if name == "mystery"));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn handler_error_propagates_as_tool_execution() {
        let backend = Arc::new(ScriptedBackend::new(vec![tool_call("flaky", "{}")]));
        let mut session = session_with(backend, SessionConfig::default());
        session
            .register_tool(
                ToolSpec {
                    name: "flaky".into(),
                    description: "fails".into(),
                    parameters: serde_json::json!({"type": "object", "properties": {}}),
                },
                |_| Err("backend storage offline".into()),
            )
            .unwrap();

        let err = session.converse("go").await.unwrap_err();
        assert!(matches!(err, LlmError::ToolExecution { name, .. } if name == "flaky"));
    }

    #[tokio::test]
    async fn continuation_round_trip_returns_followup_text() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            tool_call("answer_interview_question", r#"{"is_interview_question": false}"#),
            text("that was small talk, not a question"),
        ]));
        let config = SessionConfig {
            continue_after_tool: true,
            ..SessionConfig::default()
        };
        let mut session = session_with(backend.clone(), config);
        register_interview_tool(&mut session, Arc::new(Mutex::new(Vec::new())));

        let outcome = session.converse("nice weather today").await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Text("that was small talk, not a question".into())
        );
        assert_eq!(backend.calls(), 2);

        // History holds: user, tool-call, tool-result, assistant.
        let roles: Vec<Role> = session
            .history()
            .messages()
            .iter()
            .skip(1)
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    }

    #[tokio::test]
    async fn shared_budget_limits_continuation_attempts() {
        // First call succeeds on attempt 1; continuation has 3 - 1 = 2
        // attempts and both fail transiently.
        let backend = Arc::new(ScriptedBackend::new(vec![
            tool_call("answer_interview_question", r#"{"is_interview_question": true}"#),
            Err(LlmError::Timeout),
            Err(LlmError::Timeout),
        ]));
        let config = SessionConfig {
            continue_after_tool: true,
            continuation_budget: ContinuationBudget::Shared,
            ..SessionConfig::default()
        };
        let mut session = session_with(backend.clone(), config);
        register_interview_tool(&mut session, Arc::new(Mutex::new(Vec::new())));

        let err = session.converse("question?").await.unwrap_err();
        assert!(matches!(err, LlmError::CompletionFailed { attempts, .. } if attempts == 2));
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn fresh_budget_gives_continuation_full_retries() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            tool_call("answer_interview_question", r#"{"is_interview_question": true}"#),
            Err(LlmError::Timeout),
            Err(LlmError::Timeout),
            text("recovered"),
        ]));
        let config = SessionConfig {
            continue_after_tool: true,
            continuation_budget: ContinuationBudget::Fresh,
            ..SessionConfig::default()
        };
        let mut session = session_with(backend.clone(), config);
        register_interview_tool(&mut session, Arc::new(Mutex::new(Vec::new())));

        let outcome = session.converse("question?").await.unwrap();
        assert_eq!(outcome, Outcome::Text("recovered".into()));
        assert_eq!(backend.calls(), 4);
    }

    #[tokio::test]
    async fn streaming_accumulates_and_matches_buffered() {
        let streamed = Arc::new(ScriptedBackend::streaming(&["a", "b", "c"]));
        let mut session = session_with(streamed, SessionConfig::default());

        let seen = Arc::new(Mutex::new(String::new()));
        let seen_in_cb = seen.clone();
        let outcome = session
            .converse_streaming("stream it", move |fragment| {
                seen_in_cb.lock().unwrap().push_str(fragment);
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Text("abc".into()));
        assert_eq!(*seen.lock().unwrap(), "abc");

        // Buffered mode for the same conceptual response gives the same
        // outcome and the same history shape.
        let buffered = Arc::new(ScriptedBackend::new(vec![text("abc")]));
        let mut buffered_session = session_with(buffered, SessionConfig::default());
        let buffered_outcome = buffered_session.converse("stream it").await.unwrap();
        assert_eq!(buffered_outcome, outcome);
        assert_eq!(
            session.history().messages(),
            buffered_session.history().messages()
        );
    }

    #[tokio::test]
    async fn streaming_with_tools_downgrades_to_buffered_dispatch() {
        let backend = Arc::new(ScriptedBackend::new(vec![tool_call(
            "answer_interview_question",
            r#"{"is_interview_question": true, "simplified_answer": "O(n)"}"#,
        )]));
        let mut session = session_with(backend.clone(), SessionConfig::default());
        register_interview_tool(&mut session, Arc::new(Mutex::new(Vec::new())));

        let fragments_seen = Arc::new(AtomicUsize::new(0));
        let counter = fragments_seen.clone();
        let outcome = session
            .converse_streaming("what's the complexity?", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::ToolResult { ref name, .. }
            if name == "answer_interview_question"));
        // No fragments on the downgrade path.
        assert_eq!(fragments_seen.load(Ordering::SeqCst), 0);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn screenshot_analysis_bypasses_history() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let session = session_with(backend.clone(), SessionConfig::default());

        let text = session
            .analyze_screenshot(&[137, 80, 78, 71], "what is on screen?")
            .await
            .unwrap();
        assert_eq!(text, "a terminal window");
        assert_eq!(session.history().non_system_len(), 0);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn failed_turn_keeps_user_message_visible() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(LlmError::Auth(
            "invalid api key".into(),
        ))]));
        let mut session = session_with(backend, SessionConfig::default());

        let err = session.converse("still there?").await.unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));

        let msgs = session.history().messages();
        assert_eq!(msgs.last().unwrap().content.as_deref(), Some("still there?"));
        assert_eq!(msgs.last().unwrap().role, Role::User);
    }
}
