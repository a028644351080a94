//! Error types for the inference domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] aggregates them.

use thiserror::Error;

/// The top-level error type for all worker operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Implementation bugs ---
    #[error("Fatal error: {0}")]
    Fatal(#[from] FatalError),

    // --- Schema translation ---
    #[error("Translation error: {0}")]
    Translate(#[from] TranslateError),

    // --- Secret store ---
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    // --- Tool set construction ---
    #[error("Tool set error: {0}")]
    ToolSet(#[from] ToolSetError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Transport or protocol failures talking to an LLM provider.
///
/// Every variant surfaces to callers as an `api-error` response.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Classify a `reqwest`-style transport failure message.
    pub fn from_transport(message: impl Into<String>, timed_out: bool) -> Self {
        if timed_out {
            Self::Timeout(message.into())
        } else {
            Self::Network(message.into())
        }
    }
}

/// Conditions that can only arise from a bug in the worker or its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("{provider} returned an unrecognized stop reason: {reason}")]
    UnknownStopReason { provider: String, reason: String },

    #[error("Impossible message shape: {0}")]
    InvalidMessageShape(String),

    #[error("Expected {expected} message(s), got {actual}")]
    UnexpectedMessageCount { expected: usize, actual: usize },

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Tool '{name}' has a schema that cannot be compiled: {reason}")]
    InvalidToolSchema { name: String, reason: String },
}

/// Failures projecting ontology types into tool schemas.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("Unresolved $ref at {path}: {reference}")]
    UnresolvedReference { path: String, reference: String },

    #[error("Cyclic schema: {id} references itself at {path}")]
    CyclicSchema { id: String, path: String },

    #[error("Schema nesting exceeds {max_depth} levels at {path}")]
    TooDeep { max_depth: usize, path: String },

    #[error("Unsupported schema at {path}: {reason}")]
    Unsupported { path: String, reason: String },

    #[error("Invalid versioned URL: {0}")]
    InvalidVersionedUrl(String),
}

/// Failures reading from the secret store.
#[derive(Debug, Clone, Error)]
pub enum SecretError {
    #[error("Secret not found at {path}")]
    NotFound { path: String },

    #[error("Secret at {path} has no key {key}")]
    MissingKey { path: String, key: String },

    #[error("Secret store unavailable: {0}")]
    Backend(String),
}

/// Failures building a closed tool set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolSetError {
    #[error("Duplicate tool name: {0}")]
    Duplicate(String),

    #[error("Tool {name} has an invalid input schema: {reason}")]
    InvalidSchema { name: String, reason: String },
}
