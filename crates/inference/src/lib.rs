//! LLM-driven entity inference.
//!
//! - [`schema`] projects entity types into tool schemas and reads proposals back
//! - [`validator`] checks tool calls against their hardened schemas
//! - [`budget`] keeps prompts inside a model's context window
//! - [`driver`] runs the retrying dialog against a provider
//! - [`infer_entities`] ties them together

pub mod budget;
pub mod driver;
pub mod infer_entities;
pub mod schema;
pub mod validator;

pub use budget::{BudgetedRequest, ContextBudgeter, DEFAULT_COMPLETION_OVERHEAD, estimate_tokens};
pub use driver::{DEFAULT_MAX_RETRY_COUNT, DialogDriver, DialogOutcome, DialogRequest, DriverError};
pub use infer_entities::{
    EntityInference, InferEntitiesError, InferEntitiesRequest, InferEntitiesResult,
};
pub use schema::{ProposeEntitiesTools, ProposedEntity, SimplifiedIdMap, SkippedProposal};
pub use validator::{
    CallOutcome, ToolCallError, ValidationIssue, validate_tool_call, validate_tool_calls,
};
