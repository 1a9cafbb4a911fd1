//! Config validation: range and enum checks that catch typos early.

use crate::errors::ConfigError;
use crate::schema::CopilotConfig;

const KNOWN_PROVIDERS: &[&str] = &["openai", "deepseek"];

/// Validate a parsed config.
///
/// Returns the first problem found. Callers typically log the error and
/// keep the parsed config (see `load_from_path`).
pub fn validate(config: &CopilotConfig) -> Result<(), ConfigError> {
    let provider = config.llm.provider.to_lowercase();
    if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "unknown llm.provider '{}' (expected one of {:?})",
            config.llm.provider, KNOWN_PROVIDERS
        )));
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        return Err(ConfigError::ValidationError(format!(
            "llm.temperature {} out of range 0.0..=2.0",
            config.llm.temperature
        )));
    }

    if config.llm.max_tokens == 0 {
        return Err(ConfigError::ValidationError(
            "llm.max_tokens must be positive".into(),
        ));
    }

    if config.llm.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "llm.timeout_secs must be positive".into(),
        ));
    }

    if config.llm.max_retries == 0 {
        return Err(ConfigError::ValidationError(
            "llm.max_retries must be at least 1 (it counts the first attempt)".into(),
        ));
    }

    if config.session.max_messages < 2 {
        return Err(ConfigError::ValidationError(
            "session.max_messages must be at least 2 to hold one full turn".into(),
        ));
    }

    if config.interview.system_prompt.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "interview.system_prompt must not be empty".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&CopilotConfig::default()).is_ok());
    }

    #[test]
    fn unknown_provider_rejected() {
        let mut config = CopilotConfig::default();
        config.llm.provider = "claude".into();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("unknown llm.provider"));
    }

    #[test]
    fn provider_check_is_case_insensitive() {
        let mut config = CopilotConfig::default();
        config.llm.provider = "OpenAI".into();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn temperature_out_of_range_rejected() {
        let mut config = CopilotConfig::default();
        config.llm.temperature = 3.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn zero_retries_rejected() {
        let mut config = CopilotConfig::default();
        config.llm.max_retries = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn tiny_history_rejected() {
        let mut config = CopilotConfig::default();
        config.session.max_messages = 1;
        assert!(validate(&config).is_err());
    }
}
