//! Shared request plumbing for the HTTP providers.

use std::time::Duration;

use hash_ai_core::error::ProviderError;
use hash_ai_security::redact_secrets;
use tracing::warn;

pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("failed to create HTTP client: {e}")))
}

/// Send a prepared request and return the JSON body of a 200 reply.
///
/// `secret` is scrubbed from every error message.
pub(crate) async fn send_json(
    provider: &str,
    request: reqwest::RequestBuilder,
    secret: &str,
) -> Result<serde_json::Value, ProviderError> {
    let transport = |e: reqwest::Error| {
        ProviderError::from_transport(redact_secrets(&e.to_string(), &[secret]), e.is_timeout())
    };

    let response = request.send().await.map_err(transport)?;
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }
    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(format!(
            "{provider} rejected the API key"
        )));
    }
    if status != 200 {
        let error_body = response.text().await.unwrap_or_default();
        let error_body = redact_secrets(&error_body, &[secret]);
        warn!(provider, status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    response.json().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else {
            ProviderError::InvalidResponse(format!("{provider} response is not JSON: {e}"))
        }
    })
}
