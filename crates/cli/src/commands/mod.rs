pub mod config_cmd;
pub mod infer;
pub mod run;

use std::sync::Arc;

use anyhow::Context;
use hash_ai_config::WorkerConfig;
use hash_ai_inference::DialogDriver;
use hash_ai_providers::build_from_config;
use hash_ai_security::VaultClient;
use hash_ai_telemetry::{TracingUsageRecorder, UsageReporter};

/// Providers keyed from the secret store, wrapped in a configured driver.
pub(crate) async fn build_driver(config: &WorkerConfig) -> anyhow::Result<Arc<DialogDriver>> {
    let vault = VaultClient::from_config(&config.vault).context(
        "Provider API keys are read from Vault; \
         set HASH_VAULT_HOST, HASH_VAULT_PORT and HASH_VAULT_ROOT_TOKEN",
    )?;
    let router = build_from_config(config, &vault).await;
    if router.families().is_empty() {
        tracing::warn!("No provider could be configured; every dialog will end in api-error");
    }
    Ok(Arc::new(DialogDriver::from_config(Arc::new(router), &config.inference)))
}

pub(crate) fn usage_reporter(config: &WorkerConfig) -> Arc<UsageReporter> {
    Arc::new(UsageReporter::from_config(
        &config.telemetry,
        Arc::new(TracingUsageRecorder),
    ))
}
