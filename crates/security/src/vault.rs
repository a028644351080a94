//! Vault KV v2 client.
//!
//! Reads `GET {address}/v1/{mount}/data/{path}` with the `X-Vault-Token`
//! header and returns the inner `data.data` object.

use async_trait::async_trait;
use hash_ai_config::VaultConfig;
use hash_ai_core::error::SecretError;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::store::SecretStore;

pub struct VaultClient {
    address: String,
    token: String,
    mount: String,
    client: reqwest::Client,
}

impl VaultClient {
    pub fn new(
        address: impl Into<String>,
        token: impl Into<String>,
        mount: impl Into<String>,
    ) -> Result<Self, SecretError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| SecretError::Backend(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            address: address.into().trim_end_matches('/').to_string(),
            token: token.into(),
            mount: mount.into().trim_matches('/').to_string(),
            client,
        })
    }

    /// Build a client from the `[vault]` section.
    pub fn from_config(config: &VaultConfig) -> Result<Self, SecretError> {
        let address = config
            .address
            .as_deref()
            .ok_or_else(|| SecretError::Backend("vault address is not configured".into()))?;
        let token = config
            .token
            .as_deref()
            .ok_or_else(|| SecretError::Backend("vault token is not configured".into()))?;
        Self::new(address, token, &config.mount)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}/data/{}", self.address, self.mount, path.trim_start_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct KvResponse {
    data: KvData,
}

#[derive(Debug, Deserialize)]
struct KvData {
    data: Map<String, Value>,
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn read(&self, path: &str) -> Result<Map<String, Value>, SecretError> {
        debug!(path, "Reading secret");

        let response = self
            .client
            .get(self.url(path))
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| SecretError::Backend(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(SecretError::NotFound {
                path: path.to_string(),
            });
        }
        if status != 200 {
            warn!(status, path, "Secret store returned an error");
            return Err(SecretError::Backend(format!(
                "secret store returned status {status} for {path}"
            )));
        }

        let body: KvResponse = response
            .json()
            .await
            .map_err(|e| SecretError::Backend(format!("unexpected secret payload: {e}")))?;
        Ok(body.data.data)
    }
}
