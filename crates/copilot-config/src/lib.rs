//! Configuration for the interview copilot.
//!
//! A TOML config file describes the LLM provider, session limits, vision
//! settings, and interview prompt. All schema structs use `serde(default)`
//! so partial configs work correctly.

mod errors;
mod loader;
mod schema;
mod validation;

pub use errors::ConfigError;
pub use loader::{create_default_config, default_config_path, load_default, load_from_path};
pub use schema::*;
pub use validation::validate;
