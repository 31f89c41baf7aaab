//! Model catalog and model selection policy.
//!
//! The catalog maps short aliases users type (`!model gpt-4o`) to the
//! provider's fully-qualified model names. With validation enabled only
//! catalog aliases are selectable; otherwise any model name is passed to the
//! provider verbatim.

use relay_common::{InferenceConfig, ValidationError, ValidationResult};
use std::collections::BTreeMap;

/// Built-in aliases for OpenRouter model names.
pub const BUILTIN_MODELS: &[(&str, &str)] = &[
    ("claude-sonnet", "anthropic/claude-3.5-sonnet"),
    ("deepseek-r1", "deepseek/deepseek-r1"),
    ("deepseek-v3", "deepseek/deepseek-chat"),
    ("gemini-flash", "google/gemini-2.0-flash-001"),
    ("gpt-4o", "openai/gpt-4o"),
    ("gpt-4o-mini", "openai/gpt-4o-mini"),
    ("llama-3.3-70b", "meta-llama/llama-3.3-70b-instruct"),
    ("mistral-large", "mistralai/mistral-large"),
];

/// Read-only alias → provider model table, ordered by alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    models: BTreeMap<String, String>,
}

impl ModelCatalog {
    /// The built-in table.
    pub fn builtin() -> Self {
        Self::from_map(
            BUILTIN_MODELS
                .iter()
                .map(|(alias, name)| ((*alias).to_string(), (*name).to_string()))
                .collect(),
        )
    }

    pub fn from_map(models: BTreeMap<String, String>) -> Self {
        Self { models }
    }

    /// Configured table, or the built-in one.
    pub fn from_config(config: &InferenceConfig) -> Self {
        config
            .models
            .clone()
            .map_or_else(Self::builtin, Self::from_map)
    }

    /// Provider model name for an alias.
    pub fn resolve(&self, alias: &str) -> Option<&str> {
        self.models.get(alias).map(String::as_str)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.models.contains_key(alias)
    }

    /// `(alias, provider name)` pairs in alias order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.models.iter().map(|(a, n)| (a.as_str(), n.as_str()))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// How `!model` arguments are checked and how session models reach the API.
#[derive(Debug, Clone)]
pub enum ModelPolicy {
    /// Only catalog aliases; the resolved name is sent to the provider.
    Catalog(ModelCatalog),
    /// Any model name, sent verbatim.
    Open,
}

impl ModelPolicy {
    /// Build the policy from configuration.
    ///
    /// With validation enabled the default model must itself be an alias,
    /// otherwise every new session would start on an unselectable model.
    pub fn from_config(config: &InferenceConfig) -> ValidationResult<Self> {
        if !config.validate_models() {
            return Ok(Self::Open);
        }

        let catalog = ModelCatalog::from_config(config);
        let default_model = config.default_model();
        if !catalog.contains(default_model) {
            return Err(ValidationError::InvalidValue {
                field: "inference.default_model".into(),
                reason: format!(
                    "'{default_model}' is not in the model catalog ({})",
                    catalog.iter().map(|(a, _)| a).collect::<Vec<_>>().join(", ")
                ),
            });
        }

        Ok(Self::Catalog(catalog))
    }

    /// Whether `!model <model>` is allowed.
    pub fn accepts(&self, model: &str) -> bool {
        match self {
            Self::Catalog(catalog) => catalog.contains(model),
            Self::Open => true,
        }
    }

    /// Model name to put in the inference request.
    pub fn resolve<'a>(&'a self, model: &'a str) -> &'a str {
        match self {
            Self::Catalog(catalog) => catalog.resolve(model).unwrap_or(model),
            Self::Open => model,
        }
    }

    pub fn catalog(&self) -> Option<&ModelCatalog> {
        match self {
            Self::Catalog(catalog) => Some(catalog),
            Self::Open => None,
        }
    }
}
