//! Tool-call validation.
//!
//! Each call is checked independently: the tool must exist, its arguments
//! must parse, and the sanitized input must match the tool's schema with
//! `additionalProperties: false` forced on every object node. Compiled
//! validators are cached process-wide by a digest of the hardened schema.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use hash_ai_core::error::FatalError;
use hash_ai_core::provider::{RawArguments, RawToolCall};
use hash_ai_core::tool::{ParsedToolCall, ToolDefinition, ToolSet};
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// One schema violation, in the shape the model is shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub instance_path: String,
    pub schema_path: String,
    pub message: String,
}

/// Why a tool call was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallError {
    ToolNotFound,
    JsonParseFailed(String),
    SchemaValidationFailed(Vec<ValidationIssue>),
}

impl ToolCallError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ToolNotFound => "tool_not_found",
            Self::JsonParseFailed(_) => "json_parse_failed",
            Self::SchemaValidationFailed(_) => "schema_validation_failed",
        }
    }

    /// The text returned to the model as a tool result.
    pub fn to_model_text(&self) -> String {
        match self {
            Self::ToolNotFound => "Tool not found".to_string(),
            Self::JsonParseFailed(message) => format!(
                "Your JSON arguments could not be parsed - \
                 the parsing function errored: {message}. Please try again."
            ),
            Self::SchemaValidationFailed(issues) => {
                let rendered = serde_json::to_string(issues).unwrap_or_else(|_| "[]".to_string());
                format!(
                    "The provided input did not match the schema.\n\
                     It contains the following errors: {rendered}"
                )
            }
        }
    }
}

/// The verdict on a single call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Valid(ParsedToolCall),
    Invalid {
        id: String,
        name: String,
        error: ToolCallError,
    },
}

impl CallOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Valid(call) => &call.id,
            Self::Invalid { id, .. } => id,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

type ValidatorCache = RwLock<HashMap<String, Arc<JSONSchema>>>;

fn cache() -> &'static ValidatorCache {
    static CACHE: OnceLock<ValidatorCache> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Force `additionalProperties: false` on every object schema.
pub fn harden_schema(schema: &Value) -> Value {
    let mut hardened = schema.clone();
    harden_in_place(&mut hardened);
    hardened
}

fn harden_in_place(schema: &mut Value) {
    let Value::Object(obj) = schema else { return };

    if obj.get("type").and_then(Value::as_str) == Some("object") {
        obj.insert("additionalProperties".into(), Value::Bool(false));
    }

    for keyword in ["properties", "patternProperties"] {
        if let Some(Value::Object(children)) = obj.get_mut(keyword) {
            children.values_mut().for_each(harden_in_place);
        }
    }
    match obj.get_mut("items") {
        Some(Value::Array(items)) => items.iter_mut().for_each(harden_in_place),
        Some(items) => harden_in_place(items),
        None => {}
    }
    if let Some(Value::Array(options)) = obj.get_mut("oneOf") {
        options.iter_mut().for_each(harden_in_place);
    }
}

fn cache_key(hardened: &Value) -> String {
    let serialized = serde_json::to_vec(hardened).unwrap_or_default();
    format!("{:x}", Sha256::digest(&serialized))
}

fn compiled(hardened: &Value) -> Result<Arc<JSONSchema>, String> {
    let key = cache_key(hardened);

    if let Ok(guard) = cache().read() {
        if let Some(validator) = guard.get(&key) {
            return Ok(Arc::clone(validator));
        }
    }

    let validator = JSONSchema::compile(hardened).map_err(|e| e.to_string())?;
    let validator = Arc::new(validator);
    if let Ok(mut guard) = cache().write() {
        guard.insert(key, Arc::clone(&validator));
    }
    Ok(validator)
}

/// Compile every tool's hardened schema up front.
pub fn prepare(tools: &ToolSet) -> Result<(), FatalError> {
    for tool in tools.definitions() {
        compiled(&harden_schema(&tool.input_schema)).map_err(|reason| {
            FatalError::InvalidToolSchema {
                name: tool.name.clone(),
                reason,
            }
        })?;
    }
    Ok(())
}

fn check_schema(tool: &ToolDefinition, input: &Value) -> Result<(), Vec<ValidationIssue>> {
    let validator = compiled(&harden_schema(&tool.input_schema)).map_err(|reason| {
        vec![ValidationIssue {
            instance_path: String::new(),
            schema_path: String::new(),
            message: format!("tool schema could not be compiled: {reason}"),
        }]
    })?;

    let issues = match validator.validate(input) {
        Ok(()) => return Ok(()),
        Err(errors) => errors
            .map(|e| ValidationIssue {
                instance_path: e.instance_path.to_string(),
                schema_path: e.schema_path.to_string(),
                message: e.to_string(),
            })
            .collect::<Vec<_>>(),
    };
    Err(issues)
}

/// Validate one raw call against the tool set.
pub fn validate_tool_call(call: &RawToolCall, tools: &ToolSet) -> CallOutcome {
    let invalid = |error: ToolCallError| CallOutcome::Invalid {
        id: call.id.clone(),
        name: call.name.clone(),
        error,
    };

    let Some(tool) = tools.get(&call.name) else {
        debug!(tool = %call.name, "Model called an unknown tool");
        return invalid(ToolCallError::ToolNotFound);
    };

    let input = match &call.arguments {
        RawArguments::Json(value) => value.clone(),
        RawArguments::Text(text) => match serde_json::from_str::<Value>(text) {
            Ok(value) => value,
            Err(e) => return invalid(ToolCallError::JsonParseFailed(e.to_string())),
        },
    };

    let input = match tool.sanitize(input.clone()) {
        Ok(sanitized) => sanitized,
        Err(e) => {
            warn!(tool = %call.name, error = %e, "Sanitizer failed, validating unsanitized input");
            input
        }
    };

    match check_schema(tool, &input) {
        Ok(()) => CallOutcome::Valid(ParsedToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            input,
        }),
        Err(issues) => invalid(ToolCallError::SchemaValidationFailed(issues)),
    }
}

/// Validate every call, preserving order.
pub fn validate_tool_calls(calls: &[RawToolCall], tools: &ToolSet) -> Vec<CallOutcome> {
    calls.iter().map(|call| validate_tool_call(call, tools)).collect()
}
