//! Tool definitions and the closed per-session tool set.
//!
//! The model may only call tools the session was constructed with. A call
//! naming anything else is data (it becomes a `Tool not found` result), never
//! a dispatch failure.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ToolSetError;

/// A sanitizer failed; the candidate input is passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SanitizeError(pub String);

/// Coerces model-produced input before schema validation.
pub type Sanitizer =
    Arc<dyn Fn(serde_json::Value) -> Result<serde_json::Value, SanitizeError> + Send + Sync>;

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's input
    pub input_schema: serde_json::Value,

    /// Optional coercion applied before validation. Never serialized.
    #[serde(skip)]
    pub sanitizer: Option<Sanitizer>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            sanitizer: None,
        }
    }

    /// Attach a sanitizer that runs before schema validation.
    pub fn with_sanitizer<F>(mut self, sanitizer: F) -> Self
    where
        F: Fn(serde_json::Value) -> Result<serde_json::Value, SanitizeError>
            + Send
            + Sync
            + 'static,
    {
        self.sanitizer = Some(Arc::new(sanitizer));
        self
    }

    /// Run the sanitizer, if any.
    pub fn sanitize(&self, input: serde_json::Value) -> Result<serde_json::Value, SanitizeError> {
        match &self.sanitizer {
            Some(sanitizer) => sanitizer(input),
            None => Ok(input),
        }
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .field("sanitizer", &self.sanitizer.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// The closed set of tools known at session construction.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    tools: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
}

impl ToolSet {
    /// Build a tool set, rejecting duplicate names and non-object schemas.
    pub fn new(tools: Vec<ToolDefinition>) -> Result<Self, ToolSetError> {
        let mut index = HashMap::with_capacity(tools.len());
        for (position, tool) in tools.iter().enumerate() {
            if !tool.input_schema.is_object() {
                return Err(ToolSetError::InvalidSchema {
                    name: tool.name.clone(),
                    reason: "input schema must be a JSON object".into(),
                });
            }
            if index.insert(tool.name.clone(), position).is_some() {
                return Err(ToolSetError::Duplicate(tool.name.clone()));
            }
        }
        Ok(Self { tools, index })
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tool definitions in declaration order.
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// A tool call whose input parsed, sanitized and validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, "test tool", json!({"type": "object"}))
    }

    #[test]
    fn tool_set_lookup() {
        let set = ToolSet::new(vec![tool("create_entities"), tool("abandon_entities")]).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("create_entities"));
        assert!(set.get("delete_everything").is_none());
        let names: Vec<&str> = set.names().collect();
        assert_eq!(names, vec!["create_entities", "abandon_entities"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = ToolSet::new(vec![tool("a"), tool("a")]).unwrap_err();
        assert_eq!(err, ToolSetError::Duplicate("a".into()));
    }

    #[test]
    fn non_object_schema_is_rejected() {
        let bad = ToolDefinition::new("a", "x", json!("string"));
        assert!(matches!(
            ToolSet::new(vec![bad]),
            Err(ToolSetError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn sanitizer_runs_when_present() {
        let t = tool("a").with_sanitizer(|mut v| {
            v["coerced"] = json!(true);
            Ok(v)
        });
        assert_eq!(t.sanitize(json!({})).unwrap(), json!({"coerced": true}));
        assert_eq!(tool("b").sanitize(json!(1)).unwrap(), json!(1));
    }

    #[test]
    fn definition_serializes_without_sanitizer() {
        let t = tool("a").with_sanitizer(Ok);
        let value = serde_json::to_value(&t).unwrap();
        assert_eq!(value["inputSchema"]["type"], "object");
        assert!(value.get("sanitizer").is_none());
        assert!(format!("{t:?}").contains("<fn>"));
    }

    #[test]
    fn definition_deserializes_camel_case() {
        let t: ToolDefinition = serde_json::from_value(json!({
            "name": "lookup",
            "description": "Look something up",
            "inputSchema": {"type": "object", "properties": {}}
        }))
        .unwrap();
        assert_eq!(t.name, "lookup");
        assert!(t.sanitizer.is_none());
    }
}
