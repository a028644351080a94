//! The secret-store abstraction.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use hash_ai_core::error::SecretError;
use serde_json::{Map, Value};

/// Read access to a key/value secret store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read every key stored at `path`.
    async fn read(&self, path: &str) -> Result<Map<String, Value>, SecretError>;

    /// Read one string value stored at `path` under `key`.
    async fn read_key(&self, path: &str, key: &str) -> Result<String, SecretError> {
        let secret = self.read(path).await?;
        secret
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SecretError::MissingKey {
                path: path.to_string(),
                key: key.to_string(),
            })
    }
}

/// An in-memory store, populated up front.
#[derive(Debug, Default)]
pub struct StaticSecretStore {
    secrets: RwLock<HashMap<String, Map<String, Value>>>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key` at `path`.
    pub fn insert(
        &self,
        path: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        let mut secrets = match self.secrets.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        secrets
            .entry(path.into())
            .or_default()
            .insert(key.into(), Value::String(value.into()));
    }

    pub fn with_secret(
        self,
        path: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.insert(path, key, value);
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn read(&self, path: &str) -> Result<Map<String, Value>, SecretError> {
        let secrets = match self.secrets.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        secrets.get(path).cloned().ok_or_else(|| SecretError::NotFound {
            path: path.to_string(),
        })
    }
}
