//! `hash-ai-worker config`: Configuration management commands.

use std::path::Path;

use anyhow::Context;
use hash_ai_config::WorkerConfig;

pub fn validate(path: Option<&Path>) -> anyhow::Result<()> {
    println!("Validating configuration...");

    let config = match WorkerConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    let mut warnings = Vec::new();
    if let Err(e) = config.validate_for_worker() {
        warnings.push(format!("Not runnable as a worker: {e}"));
    }
    if config.providers.is_empty() {
        warnings.push("No providers configured; every dialog will end in api-error".into());
    }
    if !config.telemetry.enabled {
        warnings.push("Usage reporting is disabled".into());
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Graph API:  {}", config.graph.endpoint().unwrap_or_else(|| "(unset)".into()));
    println!("   Broker:     {}", config.task_queue.address());
    println!("   Vault:      {}", config.vault.address.as_deref().unwrap_or("(unset)"));
    println!("   Providers:  {}", config.providers.keys().cloned().collect::<Vec<_>>().join(", "));
    println!("   Models:     {}", config.model_registry().names().len());
    println!("   Retries:    {}", config.inference.max_retry_count);

    Ok(())
}

pub fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let config = WorkerConfig::load(path).context("Failed to load config")?;
    println!("{}", render(config)?);
    Ok(())
}

pub fn default() {
    println!("{}", WorkerConfig::default_toml());
}

/// TOML with the Vault token masked.
fn render(mut config: WorkerConfig) -> anyhow::Result<String> {
    if config.vault.token.is_some() {
        config.vault.token = Some("[REDACTED]".into());
    }
    Ok(toml::to_string_pretty(&config)?)
}
