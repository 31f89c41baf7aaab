//! Configuration validation for the DM relay.
//!
//! Startup fails fast on any of these errors instead of connecting to
//! Discord in a broken state.

use thiserror::Error;

use crate::config::{Config, DiscordConfig, InferenceConfig, ObservabilityConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.discord.validate() {
            errors.push(e);
        }

        if let Err(e) = self.inference.validate() {
            errors.push(e);
        }

        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

impl Validate for DiscordConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.enabled {
            return Ok(());
        }

        if self
            .bot_token
            .as_deref()
            .map_or(true, |t| t.trim().is_empty())
        {
            return Err(ValidationError::MissingField {
                field: "discord.bot_token (BOT_TOKEN)".into(),
            });
        }

        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(ValidationError::InvalidValue {
                field: "discord.api_base".into(),
                reason: "must be an http(s) URL".into(),
            });
        }

        Ok(())
    }
}

impl Validate for InferenceConfig {
    fn validate(&self) -> ValidationResult<()> {
        let endpoint = self.endpoint();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ValidationError::InvalidValue {
                field: "inference.endpoint".into(),
                reason: format!("must be an http(s) URL, got '{endpoint}'"),
            });
        }

        if self.provider.requires_api_key()
            && self.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            return Err(ValidationError::MissingField {
                field: "inference.api_key (OPENROUTER_API_KEY)".into(),
            });
        }

        if self.default_model().trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "inference.default_model".into(),
                reason: "must not be empty".into(),
            });
        }

        if self.timeout_secs() == 0 {
            return Err(ValidationError::InvalidValue {
                field: "inference.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if let Some(models) = &self.models {
            if models.is_empty() {
                return Err(ValidationError::InvalidValue {
                    field: "inference.models".into(),
                    reason: "must contain at least one alias when set".into(),
                });
            }
        }

        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use std::collections::BTreeMap;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.discord.bot_token = Some("token".into());
        config
    }

    #[test]
    fn test_default_with_token_is_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_bot_token() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { ref field } if field.starts_with("discord.bot_token")));
    }

    #[test]
    fn test_console_mode_needs_no_token() {
        let mut config = Config::default();
        config.discord.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_openrouter_requires_api_key() {
        let mut config = valid_config();
        config.inference.provider = ProviderKind::OpenRouter;
        assert!(config.validate().is_err());

        config.inference.api_key = Some("sk-or-test".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_endpoint() {
        let mut config = valid_config();
        config.inference.endpoint = Some("localhost:5000".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("inference.endpoint"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = valid_config();
        config.inference.timeout_secs = Some(0);
        assert!(config.inference.validate().is_err());
    }

    #[test]
    fn test_empty_model_table_rejected() {
        let mut config = valid_config();
        config.inference.models = Some(BTreeMap::new());
        assert!(config.inference.validate().is_err());
    }

    #[test]
    fn test_invalid_log_settings() {
        let mut config = valid_config();
        config.observability.log_level = "verbose".into();
        config.observability.log_format = "xml".into();
        config.discord.bot_token = None;

        match config.validate().unwrap_err() {
            ValidationError::Multiple(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other}"),
        }
    }
}
