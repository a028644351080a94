//! Provider router: selects the provider for a model.
//!
//! Every model in the registry belongs to a provider family; the router
//! holds at most one provider per family.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hash_ai_config::WorkerConfig;
use hash_ai_core::error::{Error, FatalError, ProviderError};
use hash_ai_core::model::{ModelRegistry, ModelSpec, ProviderFamily};
use hash_ai_core::provider::Provider;
use hash_ai_security::SecretStore;
use tracing::{info, warn};

use crate::anthropic::AnthropicProvider;
use crate::openai::OpenAiProvider;

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<ProviderFamily, Arc<dyn Provider>>,
    models: ModelRegistry,
}

impl ProviderRouter {
    pub fn new(models: ModelRegistry) -> Self {
        Self {
            providers: HashMap::new(),
            models,
        }
    }

    /// Register the provider for a family, replacing any previous one.
    pub fn register(&mut self, family: ProviderFamily, provider: Arc<dyn Provider>) {
        self.providers.insert(family, provider);
    }

    pub fn with_provider(mut self, family: ProviderFamily, provider: Arc<dyn Provider>) -> Self {
        self.register(family, provider);
        self
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Resolve a model name to its limits and the provider that serves it.
    pub fn resolve(&self, model: &str) -> Result<(Arc<dyn Provider>, ModelSpec), Error> {
        let spec = self.models.resolve(model)?.clone();
        let provider = self.providers.get(&spec.family).cloned().ok_or_else(|| {
            ProviderError::NotConfigured(format!("no {} provider for model {model}", spec.family))
        })?;
        Ok((provider, spec))
    }

    /// Whether a model resolves to a known family.
    pub fn knows_model(&self, model: &str) -> Result<(), FatalError> {
        self.models.resolve(model).map(|_| ())
    }

    /// List registered families.
    pub fn families(&self) -> Vec<ProviderFamily> {
        self.providers.keys().copied().collect()
    }
}

/// Build providers from configuration, reading API keys from the secret store.
///
/// A provider whose key cannot be read is skipped with a warning; requests
/// for its models then fail as `api-error`.
pub async fn build_from_config(config: &WorkerConfig, secrets: &dyn SecretStore) -> ProviderRouter {
    let models = config.model_registry();
    let mut router = ProviderRouter::new(models.clone());

    for (name, provider_config) in &config.providers {
        let api_key = match secrets
            .read_key(&provider_config.secret_path, &provider_config.secret_key)
            .await
        {
            Ok(key) => key,
            Err(e) => {
                warn!(provider = %name, error = %e, "Skipping provider without an API key");
                continue;
            }
        };

        let timeout = Duration::from_secs(provider_config.timeout_secs);
        let built: Result<Arc<dyn Provider>, ProviderError> = match provider_config.family {
            ProviderFamily::Anthropic => AnthropicProvider::new(api_key)
                .and_then(|p| p.with_timeout(timeout))
                .map(|p| match &provider_config.base_url {
                    Some(url) => p.with_base_url(url),
                    None => p,
                })
                .map(|p| Arc::new(p.with_models(models.clone())) as Arc<dyn Provider>),
            ProviderFamily::OpenAi => OpenAiProvider::new(api_key)
                .and_then(|p| p.with_timeout(timeout))
                .map(|p| match &provider_config.base_url {
                    Some(url) => p.with_base_url(url),
                    None => p,
                })
                .map(|p| Arc::new(p) as Arc<dyn Provider>),
        };

        match built {
            Ok(provider) => {
                info!(provider = %name, family = %provider_config.family, "Provider ready");
                router.register(provider_config.family, provider);
            }
            Err(e) => warn!(provider = %name, error = %e, "Failed to build provider"),
        }
    }

    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use hash_ai_security::StaticSecretStore;

    #[test]
    fn resolves_provider_by_family() {
        let router = ProviderRouter::new(ModelRegistry::builtin())
            .with_provider(ProviderFamily::OpenAi, Arc::new(OpenAiProvider::new("sk").unwrap()));

        let Ok((provider, spec)) = router.resolve("gpt-4o") else {
            panic!("gpt-4o should resolve");
        };
        assert_eq!(provider.name(), "openai");
        assert_eq!(spec.context_window, 128_000);
    }

    #[test]
    fn missing_family_is_not_configured() {
        let router = ProviderRouter::new(ModelRegistry::builtin());
        let err = router.resolve("claude-3-haiku-20240307").err().unwrap();
        assert!(matches!(err, Error::Provider(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn unknown_model_is_fatal() {
        let router = ProviderRouter::new(ModelRegistry::builtin());
        assert!(matches!(router.resolve("gpt-2"), Err(Error::Fatal(FatalError::UnknownModel(_)))));
        assert!(router.knows_model("gpt-2").is_err());
    }

    #[tokio::test]
    async fn build_reads_keys_from_secret_store() {
        let config = WorkerConfig::default();
        let secrets = StaticSecretStore::new().with_secret("ai/openai", "api_key", "sk-openai");

        let router = build_from_config(&config, &secrets).await;
        assert_eq!(router.families(), vec![ProviderFamily::OpenAi]);
        assert!(router.resolve("gpt-4o").is_ok());
        assert!(router.resolve("claude-3-opus-20240229").is_err());
    }

    #[tokio::test]
    async fn build_registers_both_families() {
        let config = WorkerConfig::default();
        let secrets = StaticSecretStore::new()
            .with_secret("ai/openai", "api_key", "sk-openai")
            .with_secret("ai/anthropic", "api_key", "sk-ant");

        let router = build_from_config(&config, &secrets).await;
        let Ok((provider, _)) = router.resolve("claude-3-opus-20240229") else {
            panic!("claude should resolve");
        };
        assert_eq!(provider.name(), "anthropic");
    }
}
