//! OpenAI Chat Completions client.
//!
//! Implements [`CompletionBackend`] against `/v1/chat/completions`,
//! speaking the legacy function-calling dialect (`functions` +
//! `function_call`). Tool results go back as `role: "function"`
//! messages carrying the tool name. Vision requests reuse the same
//! endpoint with a data-URI image part and a separate vision model.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tracing::{debug, warn};

use crate::registry::to_openai_function;
use crate::streaming::{parse_sse_stream, FragmentStream, SseEvent};
use crate::{
    Completion, CompletionBackend, LlmError, Message, Role, ToolInvocation, ToolSpec,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI client configuration.
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub vision_model: String,
    pub vision_max_tokens: u32,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout: Duration::from_secs(60),
            vision_model: "gpt-4o".to_string(),
            vision_max_tokens: 1000,
        }
    }

    /// Create config from the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, LlmError> {
        let key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::Auth("OPENAI_API_KEY not set".into()))?;
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

    pub fn with_vision_model(mut self, model: impl Into<String>) -> Self {
        self.vision_model = model.into();
        self
    }

    pub fn with_vision_max_tokens(mut self, max_tokens: u32) -> Self {
        self.vision_max_tokens = max_tokens;
        self
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("vision_model", &self.vision_model)
            .field("vision_max_tokens", &self.vision_max_tokens)
            .finish()
    }
}

/// OpenAI API client.
#[derive(Debug)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { config, http }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Build the JSON request body for the Chat Completions API.
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
            let functions: Vec<_> = tools.iter().map(to_openai_function).collect();
            body["functions"] = serde_json::json!(functions);
            body["function_call"] = serde_json::json!("auto");
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

    /// Parse a non-streaming response.
    fn parse_response(&self, json: serde_json::Value) -> Result<Completion, LlmError> {
        let message = &json["choices"][0]["message"];
        if message.is_null() {
            return Err(LlmError::Parse("response has no choices".into()));
        }

        let text = message["content"].as_str().map(String::from);
        let tool_call = message.get("function_call").filter(|fc| !fc.is_null()).map(|fc| {
            ToolInvocation {
                name: fc["name"].as_str().unwrap_or("").to_string(),
                arguments: fc["arguments"].as_str().unwrap_or("").to_string(),
            }
        });

        Ok(Completion { text, tool_call })
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
    ) -> Result<Completion, LlmError> {
        let body = self.build_request_body(messages, tools, false);

        debug!(model = %self.config.model, "OpenAI completion request");

        let response = self.post(&body).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        self.parse_response(json)
    }

    async fn complete_streaming(&self, messages: &[Message]) -> Result<FragmentStream, LlmError> {
        let body = self.build_request_body(messages, None, true);

        debug!(model = %self.config.model, "OpenAI streaming request");

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

    async fn analyze_image(&self, image: &[u8], prompt: &str) -> Result<String, LlmError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let body = serde_json::json!({
            "model": self.config.vision_model,
            "max_tokens": self.config.vision_max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/png;base64,{encoded}") }
                    }
                ]
            }],
        });

        debug!(model = %self.config.vision_model, "OpenAI vision request");

        let response = self.post(&body).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| LlmError::Parse("vision response has no content".into()))
    }
}

/// Map a reqwest send error to the transport-level error kind.
pub(crate) fn map_send_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Network(e.to_string())
    }
}

/// Map HTTP status codes onto the error taxonomy; passes success through.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimited);
    }
    let text = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(LlmError::Auth(format!("HTTP {status}: {text}")));
    }
    Err(LlmError::Api {
        status: status.as_u16(),
        message: text,
    })
}

/// Render one history message in OpenAI wire form.
fn wire_message(msg: &Message) -> serde_json::Value {
    match msg.role {
        Role::Assistant if msg.tool_call.is_some() => {
            let call = msg.tool_call.as_ref().unwrap();
            serde_json::json!({
                "role": "assistant",
                "content": serde_json::Value::Null,
                "function_call": {
                    "name": call.name,
                    "arguments": call.arguments,
                }
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
