//! Configuration loading, validation, and management for the HASH AI worker.
//!
//! Loads `hash-ai-worker.toml` (or an explicit path) and then applies the
//! environment variables the worker is deployed with:
//!
//! | Variable | Setting |
//! |----------|---------|
//! | `HASH_GRAPH_API_HOST` / `HASH_GRAPH_API_PORT` | graph API endpoint (required to run) |
//! | `HASH_TEMPORAL_SERVER_HOST` / `HASH_TEMPORAL_SERVER_PORT` | task-queue broker |
//! | `HASH_VAULT_HOST` / `HASH_VAULT_PORT` / `HASH_VAULT_ROOT_TOKEN` | secret store |
//!
//! Provider API keys are never read from the environment; each provider
//! section names the secret-store path that holds its key.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use hash_ai_core::{ModelRegistry, ModelSpec, ProviderFamily};
use serde::{Deserialize, Serialize};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "hash-ai-worker.toml";

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Graph API endpoint
    #[serde(default)]
    pub graph: GraphApiConfig,

    /// Task-queue broker
    #[serde(default)]
    pub task_queue: TaskQueueConfig,

    /// Health server
    #[serde(default)]
    pub health: HealthConfig,

    /// Secret store client
    #[serde(default)]
    pub vault: VaultConfig,

    /// Provider-specific configurations, keyed by provider name
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Dialog limits
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Models beyond (or overriding) the built-in registry
    #[serde(default)]
    pub models: Vec<ModelConfig>,

    /// Usage accounting
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphApiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl GraphApiConfig {
    /// `http://{host}:{port}` once both parts are known.
    pub fn endpoint(&self) -> Option<String> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => Some(format!("http://{host}:{port}")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueueConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_task_queue")]
    pub task_queue: String,
}

fn default_broker_host() -> String {
    "localhost".into()
}
fn default_broker_port() -> u16 {
    7233
}
fn default_namespace() -> String {
    "HASH".into()
}
fn default_task_queue() -> String {
    "ai".into()
}

impl TaskQueueConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            namespace: default_namespace(),
            task_queue: default_task_queue(),
        }
    }
}

/// The health server always listens on port 4100; only the bind host varies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_host")]
    pub host: String,
}

fn default_health_host() -> String {
    "::".into()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: default_health_host(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// e.g. `http://vault:8200`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// KV v2 mount
    #[serde(default = "default_vault_mount")]
    pub mount: String,
}

fn default_vault_mount() -> String {
    "secret".into()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: None,
            token: None,
            mount: default_vault_mount(),
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

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("address", &self.address)
            .field("token", &redact(&self.token))
            .field("mount", &self.mount)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Which wire protocol this provider speaks
    pub family: ProviderFamily,

    /// Override the provider's public endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Secret-store path holding the API key
    pub secret_path: String,

    /// Key within the secret
    #[serde(default = "default_secret_key")]
    pub secret_key: String,

    /// Per-request deadline
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_secret_key() -> String {
    "api_key".into()
}
fn default_timeout_secs() -> u64 {
    120
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert(
        "openai".into(),
        ProviderConfig {
            family: ProviderFamily::OpenAi,
            base_url: None,
            secret_path: "ai/openai".into(),
            secret_key: default_secret_key(),
            timeout_secs: default_timeout_secs(),
        },
    );
    providers.insert(
        "anthropic".into(),
        ProviderConfig {
            family: ProviderFamily::Anthropic,
            base_url: None,
            secret_path: "ai/anthropic".into(),
            secret_key: default_secret_key(),
            timeout_secs: default_timeout_secs(),
        },
    );
    providers
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Retry turns allowed before giving up
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,

    /// Tokens reserved for the completion when budgeting the prompt
    #[serde(default = "default_completion_overhead")]
    pub completion_overhead: u32,

    /// Concurrent outbound provider requests across all activities
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Concurrent activities executed by the worker
    #[serde(default = "default_max_concurrent_activities")]
    pub max_concurrent_activities: usize,

    /// Report usage summed over every turn instead of the final turn only
    #[serde(default)]
    pub aggregate_usage: bool,
}

fn default_max_retry_count() -> u32 {
    3
}
fn default_completion_overhead() -> u32 {
    4096
}
fn default_max_concurrent_requests() -> usize {
    8
}
fn default_max_concurrent_activities() -> usize {
    16
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_retry_count: default_max_retry_count(),
            completion_overhead: default_completion_overhead(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_concurrent_activities: default_max_concurrent_activities(),
            aggregate_usage: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub family: ProviderFamily,
    pub context_window: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_max_output_tokens() -> u32 {
    4096
}

impl ModelConfig {
    pub fn to_spec(&self) -> ModelSpec {
        ModelSpec::new(&self.name, self.family, self.context_window, self.max_output_tokens)
    }
}

/// Usage accounting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Whether usage records are emitted
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Custom model pricing overrides (model name → pricing)
    #[serde(default)]
    pub custom_pricing: HashMap<String, PricingOverrideConfig>,
}

fn default_true() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            custom_pricing: HashMap::new(),
        }
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
}

impl WorkerConfig {
    /// Load from `path` (or [`DEFAULT_CONFIG_FILE`]) and apply process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without environment overrides.
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

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HASH_GRAPH_API_HOST") {
            self.graph.host = Some(host);
        }
        if let Some(port) = lookup("HASH_GRAPH_API_PORT") {
            self.graph.port = Some(parse_port("HASH_GRAPH_API_PORT", &port)?);
        }

        if let Some(host) = lookup("HASH_TEMPORAL_SERVER_HOST") {
            self.task_queue.host = strip_scheme(&host);
        }
        if let Some(port) = lookup("HASH_TEMPORAL_SERVER_PORT") {
            self.task_queue.port = parse_port("HASH_TEMPORAL_SERVER_PORT", &port)?;
        }

        match (lookup("HASH_VAULT_HOST"), lookup("HASH_VAULT_PORT")) {
            (Some(host), Some(port)) => {
                let port = parse_port("HASH_VAULT_PORT", &port)?;
                let host = host.trim_end_matches('/');
                let host = if host.contains("://") {
                    host.to_string()
                } else {
                    format!("http://{host}")
                };
                self.vault.address = Some(format!("{host}:{port}"));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::ValidationError(
                    "HASH_VAULT_HOST and HASH_VAULT_PORT must be set together".into(),
                ));
            }
            (None, None) => {}
        }
        if let Some(token) = lookup("HASH_VAULT_ROOT_TOKEN") {
            self.vault.token = Some(token);
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inference.max_concurrent_requests == 0 {
            return Err(ConfigError::ValidationError(
                "inference.max_concurrent_requests must be > 0".into(),
            ));
        }
        if self.inference.max_concurrent_activities == 0 {
            return Err(ConfigError::ValidationError(
                "inference.max_concurrent_activities must be > 0".into(),
            ));
        }
        for (name, provider) in &self.providers {
            if provider.secret_path.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "providers.{name}.secret_path must not be empty"
                )));
            }
            if provider.timeout_secs == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "providers.{name}.timeout_secs must be > 0"
                )));
            }
        }
        for model in &self.models {
            if model.context_window <= self.inference.completion_overhead {
                return Err(ConfigError::ValidationError(format!(
                    "model {} has a context window no larger than the completion overhead",
                    model.name
                )));
            }
        }
        Ok(())
    }

    /// Settings that only the long-running worker needs.
    pub fn validate_for_worker(&self) -> Result<(), ConfigError> {
        if self.graph.host.is_none() {
            return Err(ConfigError::MissingSetting("HASH_GRAPH_API_HOST"));
        }
        if self.graph.port.is_none() {
            return Err(ConfigError::MissingSetting("HASH_GRAPH_API_PORT"));
        }
        if self.vault.address.is_none() {
            return Err(ConfigError::MissingSetting("HASH_VAULT_HOST"));
        }
        if self.vault.token.is_none() {
            return Err(ConfigError::MissingSetting("HASH_VAULT_ROOT_TOKEN"));
        }
        Ok(())
    }

    /// The built-in models plus any configured ones.
    pub fn model_registry(&self) -> ModelRegistry {
        let mut registry = ModelRegistry::builtin();
        for model in &self.models {
            registry.register(model.to_spec());
        }
        registry
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            graph: GraphApiConfig::default(),
            task_queue: TaskQueueConfig::default(),
            health: HealthConfig::default(),
            vault: VaultConfig::default(),
            providers: default_providers(),
            inference: InferenceConfig::default(),
            models: Vec::new(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

fn parse_port(var: &'static str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        reason: format!("{value:?} is not a port number"),
    })
}

/// `http://temporal:7233/` → `temporal`
fn strip_scheme(host: &str) -> String {
    let without_scheme = host.split_once("://").map(|(_, rest)| rest).unwrap_or(host);
    let without_path = without_scheme.split('/').next().unwrap_or(without_scheme);
    without_path
        .rsplit_once(':')
        .filter(|(_, port)| port.bytes().all(|b| b.is_ascii_digit()))
        .map(|(host, _)| host)
        .unwrap_or(without_path)
        .to_string()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Required setting {0} is not set")]
    MissingSetting(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    InvalidEnv { var: &'static str, reason: String },
}
