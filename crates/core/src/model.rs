//! Known models and their limits.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FatalError;

/// Which wire protocol a model speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    /// Messages-style API
    Anthropic,
    /// Chat-Completions-style API
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub name: String,
    pub family: ProviderFamily,
    /// Combined prompt + completion tokens the model accepts.
    pub context_window: u32,
    /// Default completion limit when the caller sets none.
    pub max_output_tokens: u32,
}

impl ModelSpec {
    pub fn new(
        name: impl Into<String>,
        family: ProviderFamily,
        context_window: u32,
        max_output_tokens: u32,
    ) -> Self {
        Self {
            name: name.into(),
            family,
            context_window,
            max_output_tokens,
        }
    }
}

/// Lookup table from model name to [`ModelSpec`].
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: HashMap<String, ModelSpec>,
}

impl ModelRegistry {
    /// The models the worker ships with.
    pub fn builtin() -> Self {
        use ProviderFamily::*;
        let specs = [
            ModelSpec::new("gpt-4o", OpenAi, 128_000, 4_096),
            ModelSpec::new("gpt-4-turbo", OpenAi, 128_000, 4_096),
            ModelSpec::new("gpt-4-1106-preview", OpenAi, 128_000, 4_096),
            ModelSpec::new("gpt-3.5-turbo", OpenAi, 16_385, 4_096),
            ModelSpec::new("claude-3-opus-20240229", Anthropic, 200_000, 4_096),
            ModelSpec::new("claude-3-sonnet-20240229", Anthropic, 200_000, 4_096),
            ModelSpec::new("claude-3-haiku-20240307", Anthropic, 200_000, 4_096),
            ModelSpec::new("claude-3-5-sonnet-20240620", Anthropic, 200_000, 8_192),
        ];
        Self {
            models: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    /// An empty registry, for tests and fully custom deployments.
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// Add or replace a model.
    pub fn register(&mut self, spec: ModelSpec) {
        if self.models.contains_key(&spec.name) {
            debug!(model = %spec.name, "Overriding built-in model limits");
        }
        self.models.insert(spec.name.clone(), spec);
    }

    pub fn with_model(mut self, spec: ModelSpec) -> Self {
        self.register(spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    /// Look up a model, treating an unknown name as a caller bug.
    pub fn resolve(&self, name: &str) -> Result<&ModelSpec, FatalError> {
        self.get(name).ok_or_else(|| FatalError::UnknownModel(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
