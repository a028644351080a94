//! LLM provider implementations for the HASH AI worker.
//!
//! Both providers implement the `hash_ai_core::Provider` capability set.
//! The router selects the provider for a model from its family.

pub mod anthropic;
mod http;
pub mod openai;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use router::{build_from_config, ProviderRouter};
