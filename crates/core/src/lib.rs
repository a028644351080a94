//! # HASH AI Core
//!
//! Domain types, traits, and error definitions for the HASH AI inference worker.
//! This crate has **no transport dependencies**: it defines the canonical
//! message model, tool definitions, ontology identifiers and the provider
//! capability trait that every other crate implements against.
//!
//! ## Layout
//!
//! - [`message`]: the canonical, provider-agnostic conversation model
//! - [`tool`]: tool definitions, the closed per-session tool set and parsed calls
//! - [`ontology`]: versioned URLs and dereferenced entity types
//! - [`provider`]: the capability set each LLM backend supplies
//! - [`response`]: the tagged result of one dialog
//! - [`model`]: known models and their context windows

pub mod error;
pub mod message;
pub mod model;
pub mod ontology;
pub mod provider;
pub mod response;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{
    Error, FatalError, ProviderError, Result, SecretError, ToolSetError, TranslateError,
};
pub use message::{ContentPart, Message, Role};
pub use model::{ModelRegistry, ModelSpec, ProviderFamily};
pub use ontology::{BaseUrl, EntityType, VersionedUrl};
pub use provider::{
    Choice, Completion, CompletionRequest, Provider, RawArguments, RawToolCall, StopReason, Usage,
};
pub use response::LlmResponse;
pub use tool::{ParsedToolCall, SanitizeError, Sanitizer, ToolDefinition, ToolSet};
