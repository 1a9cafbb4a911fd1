//! DeepSeek chat-completion client.
//!
//! Speaks the OpenAI-compatible `tools` dialect (`tools` +
//! `tool_choice`) against `/chat/completions`. DeepSeek models take no
//! image input, so vision requests fail with `NotSupported` and the
//! caller routes screenshots elsewhere.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::openai::{check_status, map_send_error};
use crate::registry::to_deepseek_tool;
use crate::streaming::{parse_sse_stream, FragmentStream, SseEvent};
use crate::{
    Completion, CompletionBackend, LlmError, Message, Role, ToolInvocation, ToolSpec,
};

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";

/// DeepSeek client configuration.
#[derive(Clone)]
pub struct DeepSeekConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl DeepSeekConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "deepseek-chat".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout: Duration::from_secs(60),
        }
    }

    /// Create config from the `DEEPSEEK_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, LlmError> {
        let key = std::env::var("DEEPSEEK_API_KEY")
            .map_err(|_| LlmError::Auth("DEEPSEEK_API_KEY not set".into()))?;
        Ok(Self::new(key))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for DeepSeekConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepSeekConfig")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// DeepSeek API client.
#[derive(Debug)]
pub struct DeepSeekClient {
    config: DeepSeekConfig,
    http: reqwest::Client,
}

impl DeepSeekClient {
    pub fn new(config: DeepSeekConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { config, http }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
        stream: bool,
    ) -> serde_json::Value {
        let msgs: Vec<serde_json::Value> = messages.iter().map(wire_message).collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": msgs,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        if let Some(tools) = tools {
            let defs: Vec<_> = tools.iter().map(to_deepseek_tool).collect();
            body["tools"] = serde_json::json!(defs);
            body["tool_choice"] = serde_json::json!("auto");
        }

        if stream {
            body["stream"] = serde_json::json!(true);
        }

        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, LlmError> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(map_send_error)?;
        check_status(response).await
    }

    fn parse_response(&self, json: serde_json::Value) -> Result<Completion, LlmError> {
        let message = &json["choices"][0]["message"];
        if message.is_null() {
            return Err(LlmError::Parse("response has no choices".into()));
        }

        let text = message["content"].as_str().map(String::from);

        let tool_call = message["tool_calls"].as_array().and_then(|calls| {
            if calls.len() > 1 {
                warn!(count = calls.len(), "multiple tool calls returned; using the first");
            }
            calls.first().map(|call| ToolInvocation {
                name: call["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: call["function"]["arguments"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
            })
        });

        Ok(Completion { text, tool_call })
    }
}

#[async_trait]
impl CompletionBackend for DeepSeekClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
    ) -> Result<Completion, LlmError> {
        let body = self.build_request_body(messages, tools, false);

        debug!(model = %self.config.model, "DeepSeek completion request");

        let response = self.post(&body).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        self.parse_response(json)
    }

    async fn complete_streaming(&self, messages: &[Message]) -> Result<FragmentStream, LlmError> {
        let body = self.build_request_body(messages, None, true);

        debug!(model = %self.config.model, "DeepSeek streaming request");

        let response = self.post(&body).await?;
        let (tx, stream) = FragmentStream::channel();

        tokio::spawn(async move {
            let sender = tx.clone();
            let result = parse_sse_stream(response, move |event: SseEvent| {
                if event.data == "[DONE]" {
                    return;
                }
                let Ok(data) = serde_json::from_str::<serde_json::Value>(&event.data) else {
                    warn!("skipping unparseable stream event");
                    return;
                };
                if let Some(text) = data["choices"][0]["delta"]["content"].as_str() {
                    if !text.is_empty() {
                        let _ = sender.send(Ok(text.to_string()));
                    }
                }
            })
            .await;

            if let Err(e) = result {
                let _ = tx.send(Err(e));
            }
        });

        Ok(stream)
    }

    async fn analyze_image(&self, _image: &[u8], _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::NotSupported(
            "DeepSeek models do not accept image input".into(),
        ))
    }
}

/// Render one history message in DeepSeek wire form.
fn wire_message(msg: &Message) -> serde_json::Value {
    match msg.role {
        Role::Assistant if msg.tool_call.is_some() => {
            let call = msg.tool_call.as_ref().unwrap();
            serde_json::json!({
                "role": "assistant",
                "content": serde_json::Value::Null,
                "tool_calls": [{
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments,
                    }
                }]
            })
        }
        Role::Tool => serde_json::json!({
            "role": "function",
            "name": msg.tool_name.as_deref().unwrap_or(""),
            "content": msg.content.as_deref().unwrap_or(""),
        }),
        Role::System => serde_json::json!({
            "role": "system",
            "content": msg.content.as_deref().unwrap_or(""),
        }),
        Role::User => serde_json::json!({
            "role": "user",
            "content": msg.content.as_deref().unwrap_or(""),
        }),
        Role::Assistant => serde_json::json!({
            "role": "assistant",
            "content": msg.content.as_deref().unwrap_or(""),
        }),
    }
}
