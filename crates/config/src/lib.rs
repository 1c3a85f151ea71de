//! Configuration loading and validation for agentflux.
//!
//! Loads configuration from `~/.agentflux/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.agentflux/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Model backend settings
    #[serde(default)]
    pub adapter: AdapterConfig,

    /// Settings used by `agentflux chat`
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allow cross-origin browser clients
    #[serde(default)]
    pub cors: bool,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    7420
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors: false,
        }
    }
}

impl GatewayConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Cap on model invocations per request
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Capacity of the bounded channels between pipeline stages
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_channel_capacity() -> usize {
    64
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Backend kind: "openai" (any OpenAI-compatible endpoint) or "anthropic"
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Endpoint override; each backend has its own default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the gateway the chat client talks to
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_endpoint() -> String {
    format!("http://{}:{}", default_host(), default_port())
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.agentflux/config.toml).
    ///
    /// Environment variables override the file:
    /// - `AGENTFLUX_API_KEY` (highest priority), then `OPENAI_API_KEY` or
    ///   `ANTHROPIC_API_KEY` depending on the provider
    /// - `AGENTFLUX_PROVIDER`, `AGENTFLUX_MODEL`, `AGENTFLUX_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(provider) = lookup("AGENTFLUX_PROVIDER") {
            self.adapter.provider = provider;
        }

        if let Some(model) = lookup("AGENTFLUX_MODEL") {
            self.adapter.model = model;
        }

        if let Some(base_url) = lookup("AGENTFLUX_BASE_URL") {
            self.adapter.base_url = Some(base_url);
        }

        if let Some(key) = lookup("AGENTFLUX_API_KEY") {
            self.adapter.api_key = Some(key);
        } else if self.adapter.api_key.is_none() {
            let vendor = match self.adapter.provider.as_str() {
                "anthropic" => "ANTHROPIC_API_KEY",
                _ => "OPENAI_API_KEY",
            };
            self.adapter.api_key = lookup(vendor);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentflux")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.agent.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "agent.channel_capacity must be at least 1".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.adapter.temperature) {
            return Err(ConfigError::ValidationError(
                "adapter.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.adapter.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "adapter.max_tokens must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.adapter.api_key.is_some()
    }

    /// Render the default configuration as TOML.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.adapter.provider, "openai");
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.client.endpoint, "http://127.0.0.1:7420");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.adapter.model, config.adapter.model);
        assert_eq!(parsed.gateway.port, config.gateway.port);
    }

    #[test]
    fn zero_iteration_cap_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.adapter.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.gateway.port, 7420);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            concat!(
                "[adapter]\nprovider = \"anthropic\"\nmodel = \"claude-sonnet-4-5\"\n\n",
                "[agent]\nmax_iterations = 3"
            )
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.adapter.provider, "anthropic");
        assert_eq!(config.agent.max_iterations, 3);
        assert_eq!(config.agent.channel_capacity, 64);
        assert_eq!(config.gateway.host, "127.0.0.1");
    }

    #[test]
    fn invalid_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent]\nmax_iterations = 0").unwrap();
        assert!(matches!(
            AppConfig::load_from(file.path()),
            Err(ConfigError::ValidationError(_))
        ));

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        writeln!(broken, "[agent\nmax_iterations = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(broken.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[
            ("AGENTFLUX_PROVIDER", "anthropic"),
            ("AGENTFLUX_MODEL", "claude-haiku"),
            ("AGENTFLUX_BASE_URL", "http://localhost:9000"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("OPENAI_API_KEY", "sk-openai"),
        ]));
        assert_eq!(config.adapter.provider, "anthropic");
        assert_eq!(config.adapter.model, "claude-haiku");
        assert_eq!(config.adapter.base_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.adapter.api_key.as_deref(), Some("sk-ant"));
    }

    #[test]
    fn agentflux_key_takes_priority() {
        let mut config = AppConfig::default();
        config.adapter.api_key = Some("from-file".into());
        config.apply_env(env(&[("AGENTFLUX_API_KEY", "primary"), ("OPENAI_API_KEY", "x")]));
        assert_eq!(config.adapter.api_key.as_deref(), Some("primary"));

        let mut config = AppConfig::default();
        config.adapter.api_key = Some("from-file".into());
        config.apply_env(env(&[("OPENAI_API_KEY", "x")]));
        assert_eq!(config.adapter.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.adapter.api_key = Some("sk-secret-value".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("7420"));
        assert!(!toml_str.contains("api_key"));
    }
}
