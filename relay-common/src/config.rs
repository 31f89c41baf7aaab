//! Configuration management for the DM relay.
//!
//! The relay reads an optional configuration file at `~/.dm-relay/config.json`
//! once at startup; the values are fixed for the lifetime of the process.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values (per inference provider)
//!
//! # Environment Variable Mapping
//!
//! - `BOT_TOKEN` / `DISCORD_BOT_TOKEN` → discord.bot_token
//! - `INFERENCE_PROVIDER` → inference.provider
//! - `INFERENCE_ENDPOINT` / `OLLAMA_URL` → inference.endpoint
//! - `INFERENCE_API_KEY` / `OPENROUTER_API_KEY` → inference.api_key
//! - `DEFAULT_MODEL` → inference.default_model
//! - `INFERENCE_TIMEOUT_SECS` → inference.timeout_secs
//! - `RELAY_VALIDATE_MODELS` → inference.validate_models
//! - `RELAY_LOG_LEVEL` → observability.log_level
//! - `RELAY_LOG_FORMAT` → observability.log_format

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result, ResultExt};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".dm-relay"),
        |dirs| dirs.home_dir().join(".dm-relay"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Expand `~` and environment variables in a user-supplied config path.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::full(raw).map_or_else(|_| raw.to_string(), |p| p.into_owned()))
}

// ============================================================================
// Inference Provider
// ============================================================================

/// Shape of the remote inference API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Ollama chat API: `{model, messages, stream}` → `message.content`
    #[default]
    Ollama,
    /// OpenRouter (OpenAI-compatible) chat completions → `choices[0].message.content`
    #[serde(alias = "open_router")]
    OpenRouter,
}

impl ProviderKind {
    /// Get the provider as a config string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenRouter => "openrouter",
        }
    }

    /// Human-readable provider name used in user-facing error replies.
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Ollama => "Ollama",
            Self::OpenRouter => "OpenRouter",
        }
    }

    /// Endpoint used when none is configured.
    pub const fn default_endpoint(&self) -> &'static str {
        match self {
            Self::Ollama => "http://localhost:5000/api/chat",
            Self::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
        }
    }

    /// Model selected for new sessions when none is configured.
    pub const fn default_model(&self) -> &'static str {
        match self {
            Self::Ollama => "dolphin3:latest",
            Self::OpenRouter => "deepseek-v3",
        }
    }

    /// Whether model switches are checked against the catalog by default.
    pub const fn validates_models_by_default(&self) -> bool {
        matches!(self, Self::OpenRouter)
    }

    /// Whether the provider refuses requests without an API key.
    pub const fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenRouter)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openrouter" | "open_router" => Ok(Self::OpenRouter),
            other => Err(Error::Config(format!(
                "unknown inference provider '{other}' (expected 'ollama' or 'openrouter')"
            ))),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Discord connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Whether the Discord channel is used (disabled in console mode)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bot token
    #[serde(default)]
    pub bot_token: Option<String>,

    /// REST API base
    #[serde(default = "default_discord_api_base")]
    pub api_base: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_token: None,
            api_base: default_discord_api_base(),
        }
    }
}

/// Inference API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Provider response/request shape
    #[serde(default)]
    pub provider: ProviderKind,

    /// Full chat endpoint URL (provider default when unset)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bearer credential
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model for new sessions (provider default when unset)
    #[serde(default)]
    pub default_model: Option<String>,

    /// Outbound call timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Reject `!model` arguments that are not catalog aliases
    #[serde(default)]
    pub validate_models: Option<bool>,

    /// Sent as `HTTP-Referer` to OpenRouter
    #[serde(default)]
    pub app_url: Option<String>,

    /// Sent as `X-Title` to OpenRouter
    #[serde(default)]
    pub app_name: Option<String>,

    /// Replaces the built-in model catalog (alias → provider model name)
    #[serde(default)]
    pub models: Option<BTreeMap<String, String>>,
}

impl InferenceConfig {
    /// Effective endpoint URL.
    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_endpoint())
    }

    /// Effective default model.
    pub fn default_model(&self) -> &str {
        self.default_model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    /// Effective outbound timeout in seconds.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }

    /// Whether model switches are checked against the catalog.
    pub fn validate_models(&self) -> bool {
        self.validate_models
            .unwrap_or_else(|| self.provider.validates_models_by_default())
    }

    /// Effective application name.
    pub fn app_name(&self) -> &str {
        self.app_name.as_deref().unwrap_or(DEFAULT_APP_NAME)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets forced to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Root
// ============================================================================

/// Root relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration and apply environment overrides.
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply process environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|&k| lookup(k))
                .find(|v| !v.trim().is_empty())
        };

        if let Some(token) = first(&["BOT_TOKEN", "DISCORD_BOT_TOKEN"]) {
            self.discord.bot_token = Some(token);
        }

        if let Some(provider) = first(&["INFERENCE_PROVIDER"]) {
            self.inference.provider = provider.parse()?;
        }
        if let Some(endpoint) = first(&["INFERENCE_ENDPOINT", "OLLAMA_URL"]) {
            self.inference.endpoint = Some(endpoint);
        }
        if let Some(key) = first(&["INFERENCE_API_KEY", "OPENROUTER_API_KEY"]) {
            self.inference.api_key = Some(key);
        }
        if let Some(model) = first(&["DEFAULT_MODEL"]) {
            self.inference.default_model = Some(model);
        }
        if let Some(secs) = first(&["INFERENCE_TIMEOUT_SECS"]) {
            let secs = secs.trim().parse().map_err(|_| {
                Error::Config(format!("INFERENCE_TIMEOUT_SECS is not a number: {secs}"))
            })?;
            self.inference.timeout_secs = Some(secs);
        }
        if let Some(flag) = first(&["RELAY_VALIDATE_MODELS"]) {
            self.inference.validate_models = Some(parse_flag(&flag)?);
        }

        if let Some(level) = first(&["RELAY_LOG_LEVEL"]) {
            self.observability.log_level = level;
        }
        if let Some(format) = first(&["RELAY_LOG_FORMAT"]) {
            self.observability.log_format = format;
        }

        Ok(())
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("not a boolean flag: {other}"))),
    }
}

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_APP_NAME: &str = "dm-relay";

fn default_discord_api_base() -> String {
    "https://discord.com/api/v10".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_follow_provider() {
        let config = Config::default();
        assert_eq!(config.inference.provider, ProviderKind::Ollama);
        assert_eq!(config.inference.endpoint(), "http://localhost:5000/api/chat");
        assert_eq!(config.inference.default_model(), "dolphin3:latest");
        assert!(!config.inference.validate_models());
        assert_eq!(config.inference.timeout_secs(), 120);

        let mut config = Config::default();
        config.inference.provider = ProviderKind::OpenRouter;
        assert_eq!(
            config.inference.endpoint(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(config.inference.default_model(), "deepseek-v3");
        assert!(config.inference.validate_models());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("BOT_TOKEN", "discord-token"),
                ("INFERENCE_PROVIDER", "openrouter"),
                ("OPENROUTER_API_KEY", "sk-or"),
                ("DEFAULT_MODEL", "gpt-4o"),
                ("INFERENCE_TIMEOUT_SECS", "30"),
                ("RELAY_VALIDATE_MODELS", "no"),
                ("RELAY_LOG_FORMAT", "json"),
            ]))
            .unwrap();

        assert_eq!(config.discord.bot_token.as_deref(), Some("discord-token"));
        assert_eq!(config.inference.provider, ProviderKind::OpenRouter);
        assert_eq!(config.inference.api_key.as_deref(), Some("sk-or"));
        assert_eq!(config.inference.default_model(), "gpt-4o");
        assert_eq!(config.inference.timeout_secs(), 30);
        assert!(!config.inference.validate_models());
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_env_override_prefers_first_key() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("BOT_TOKEN", "primary"),
                ("DISCORD_BOT_TOKEN", "secondary"),
                ("OLLAMA_URL", "http://gpu-box:11434/api/chat"),
            ]))
            .unwrap();
        assert_eq!(config.discord.bot_token.as_deref(), Some("primary"));
        assert_eq!(config.inference.endpoint(), "http://gpu-box:11434/api/chat");
    }

    #[test]
    fn test_env_override_rejects_bad_values() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup(&[("INFERENCE_PROVIDER", "bedrock")]))
            .unwrap_err();
        assert!(err.to_string().contains("bedrock"));

        let mut config = Config::default();
        assert!(config
            .apply_overrides(lookup(&[("INFERENCE_TIMEOUT_SECS", "soon")]))
            .is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "discord": {{ "bot_token": "from-file" }},
                "inference": {{
                    "provider": "openrouter",
                    "api_key": "sk-file",
                    "models": {{ "fast": "openai/gpt-4o-mini" }}
                }},
                "observability": {{ "level": "debug" }}
            }}"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.discord.bot_token.as_deref(), Some("from-file"));
        assert!(config.discord.enabled);
        assert_eq!(config.discord.api_base, "https://discord.com/api/v10");
        assert_eq!(config.inference.provider, ProviderKind::OpenRouter);
        assert_eq!(
            config.inference.models.as_ref().unwrap().get("fast").map(String::as_str),
            Some("openai/gpt-4o-mini")
        );
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_load_from_invalid_json_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("Ollama".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert_eq!(
            "open_router".parse::<ProviderKind>().unwrap(),
            ProviderKind::OpenRouter
        );
        assert!("".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_expand_path_passthrough() {
        assert_eq!(expand_path("/etc/relay.json"), PathBuf::from("/etc/relay.json"));
    }
}
