//! Typed configuration from environment variables and an optional TOML file.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

use std::path::{Path, PathBuf};

use crate::engine::OrchestratorConfig;
use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub anthropic_api_key: SecretString,
    pub anthropic_model: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// TOML file with [`OrchestratorConfig`] overrides.
    pub settings_path: Option<PathBuf>,
    /// Where the local renderer writes files.
    pub output_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            anthropic_api_key: SecretString::from(required_var("ANTHROPIC_API_KEY")?),
            anthropic_model: std::env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| crate::llm::DEFAULT_MODEL.to_string()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            settings_path: std::env::var("DOCQ_SETTINGS").ok().map(PathBuf::from),
            output_dir: std::env::var("DOCQ_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("docq-output")),
        })
    }

    /// Orchestrator settings: the TOML file if one is configured, else defaults.
    pub fn orchestrator(&self) -> Result<OrchestratorConfig> {
        match &self.settings_path {
            Some(path) => load_orchestrator_config(path),
            None => Ok(OrchestratorConfig::default()),
        }
    }
}

/// Parse orchestrator settings from TOML. Missing keys keep their defaults.
pub fn parse_orchestrator_config(text: &str) -> Result<OrchestratorConfig> {
    let config: OrchestratorConfig =
        toml::from_str(text).map_err(|e| Error::Config(format!("bad settings: {e}")))?;
    if config.max_concurrent == 0 {
        return Err(Error::Config("max_concurrent must be at least 1".to_string()));
    }
    Ok(config)
}

pub fn load_orchestrator_config(path: &Path) -> Result<OrchestratorConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read settings {}: {e}", path.display()))
    })?;
    parse_orchestrator_config(&text)
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
