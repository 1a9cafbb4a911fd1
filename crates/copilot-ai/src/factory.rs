//! Provider factory: build a [`CompletionBackend`] from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use copilot_config::CopilotConfig;

use crate::deepseek::{DeepSeekClient, DeepSeekConfig};
use crate::openai::{OpenAiClient, OpenAiConfig};
use crate::{CompletionBackend, LlmError};

/// Build the backend named by `llm.provider`.
///
/// The API key is read from the environment variable named in
/// `llm.api_key_env`; a missing key is an auth error, not a config
/// error, since the config itself is valid.
pub fn create_backend(config: &CopilotConfig) -> Result<Arc<dyn CompletionBackend>, LlmError> {
    let llm = &config.llm;
    let api_key = std::env::var(&llm.api_key_env)
        .map_err(|_| LlmError::Auth(format!("{} not set", llm.api_key_env)))?;

    match llm.provider.to_lowercase().as_str() {
        "openai" => {
            let mut backend_config = OpenAiConfig::new(api_key)
                .with_model(&llm.model)
                .with_temperature(llm.temperature)
                .with_max_tokens(llm.max_tokens)
                .with_timeout(Duration::from_secs(llm.timeout_secs))
                .with_vision_model(&config.vision.model)
                .with_vision_max_tokens(config.vision.max_tokens);
            if let Some(ref base_url) = llm.base_url {
                backend_config = backend_config.with_base_url(base_url);
            }
            info!(model = %llm.model, "using OpenAI backend");
            Ok(Arc::new(OpenAiClient::new(backend_config)))
        }
        "deepseek" => {
            let mut backend_config = DeepSeekConfig::new(api_key)
                .with_model(&llm.model)
                .with_temperature(llm.temperature)
                .with_max_tokens(llm.max_tokens)
                .with_timeout(Duration::from_secs(llm.timeout_secs));
            if let Some(ref base_url) = llm.base_url {
                backend_config = backend_config.with_base_url(base_url);
            }
            info!(model = %llm.model, "using DeepSeek backend");
            Ok(Arc::new(DeepSeekClient::new(backend_config)))
        }
        other => Err(LlmError::NotSupported(format!(
            "unknown LLM provider: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_rejected() {
        let mut config = CopilotConfig::default();
        config.llm.provider = "acme".into();
        // Point at a variable that is guaranteed to exist so the provider
        // match is what fails.
        config.llm.api_key_env = "PATH".into();

        let err = create_backend(&config).unwrap_err();
        assert!(matches!(err, LlmError::NotSupported(msg) if msg.contains("acme")));
    }

    #[test]
    fn missing_api_key_is_auth_error() {
        let mut config = CopilotConfig::default();
        config.llm.api_key_env = "COPILOT_TEST_KEY_THAT_DOES_NOT_EXIST".into();

        let err = create_backend(&config).unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
    }

    #[test]
    fn known_providers_construct() {
        for provider in ["openai", "OpenAI", "deepseek"] {
            let mut config = CopilotConfig::default();
            config.llm.provider = provider.into();
            config.llm.api_key_env = "PATH".into();
            assert!(create_backend(&config).is_ok(), "provider {provider}");
        }
    }
}
