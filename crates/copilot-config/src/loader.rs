//! TOML config loading: read from a path or the platform default.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::errors::ConfigError;
use crate::schema::CopilotConfig;
use crate::validation;

/// Load config from a specific TOML file path.
///
/// Deserializes the file using serde defaults for any missing fields.
/// After loading, the config is validated; if validation fails, a warning
/// is logged and the parsed config is returned as-is.
pub fn load_from_path(path: &Path) -> Result<CopilotConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ParseError(format!("failed to read {}: {e}", path.display())))?;

    let config: CopilotConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))?;

    if let Err(e) = validation::validate(&config) {
        warn!("config validation warning: {e}; using parsed config as-is");
    }

    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Platform-specific default config path.
///
/// On Linux: `~/.config/interview-copilot/config.toml`
/// On macOS: `~/Library/Application Support/interview-copilot/config.toml`
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("interview-copilot").join("config.toml"))
        .ok_or_else(|| ConfigError::PathError("no platform config directory".into()))
}

/// Write a default config file at the given path, creating parent directories.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::PathError(format!("failed to create {}: {e}", parent.display())))?;
    }

    let rendered = toml::to_string_pretty(&CopilotConfig::default())
        .map_err(|e| ConfigError::ParseError(format!("failed to render default config: {e}")))?;

    std::fs::write(path, rendered)
        .map_err(|e| ConfigError::PathError(format!("failed to write {}: {e}", path.display())))?;

    Ok(())
}

/// Load config from the platform-specific default path.
///
/// If the file does not exist, creates a default config file and returns
/// the defaults.
pub fn load_default() -> Result<CopilotConfig, ConfigError> {
    let path = default_config_path()?;

    match load_from_path(&path) {
        Ok(config) => Ok(config),
        Err(ConfigError::FileNotFound(_)) => {
            info!("no config found at {}, creating default", path.display());
            create_default_config(&path)?;
            Ok(CopilotConfig::default())
        }
        Err(e) => Err(e),
    }
}
