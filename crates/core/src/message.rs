//! Canonical message model.
//!
//! These are the value objects that flow through a dialog: the caller supplies
//! them, provider adapters encode them to wire format and decode replies back
//! into them, and the dialog driver appends new ones as retries accumulate.
//! A message is never edited once appended to a transcript.

use serde::{Deserialize, Serialize};

use crate::error::FatalError;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The caller, or tool results fed back to the model
    User,
    /// The model
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        f.write_str(s)
    }
}

/// One ordered part of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// A tool invocation requested by the model. Assistant messages only.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// The outcome of a tool invocation. User messages only.
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// A tool result flagged as an error.
    pub fn tool_error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: Some(true),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
        }
    }
}

/// A single message in a dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// Ordered content parts
    pub content: Vec<ContentPart>,
}

impl Message {
    /// Create a user message with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::text(text)],
        }
    }

    /// Create a user message from arbitrary parts (e.g. tool results).
    pub fn user_parts(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    /// Create an assistant message with a single text part.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::text(text)],
        }
    }

    /// Create an assistant message from arbitrary parts.
    pub fn assistant_parts(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::text(text)],
        }
    }

    /// Concatenated text of all text parts, newline separated.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            if let ContentPart::Text { text } = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    /// Iterate over the `(id, name, input)` of every tool_use part.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.content.iter().filter_map(|part| match part {
            ContentPart::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }

    /// Total characters held in text parts.
    pub fn text_len(&self) -> usize {
        self.content
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => text.len(),
                _ => 0,
            })
            .sum()
    }

    /// Check that every part is allowed for this message's role.
    pub fn validate(&self) -> Result<(), FatalError> {
        for part in &self.content {
            let allowed = match (self.role, part) {
                (_, ContentPart::Text { .. }) => true,
                (Role::Assistant, ContentPart::ToolUse { .. }) => true,
                (Role::User, ContentPart::ToolResult { .. }) => true,
                _ => false,
            };
            if !allowed {
                return Err(FatalError::InvalidMessageShape(format!(
                    "{} part in a {} message",
                    part.kind(),
                    self.role
                )));
            }
        }
        if self.role == Role::System && self.content.len() != 1 {
            return Err(FatalError::InvalidMessageShape(format!(
                "system message must hold exactly one text part, found {}",
                self.content.len()
            )));
        }
        Ok(())
    }
}

/// Validate a whole transcript, reporting the first offending index.
pub fn validate_all(messages: &[Message]) -> Result<(), FatalError> {
    for (index, message) in messages.iter().enumerate() {
        message.validate().map_err(|e| match e {
            FatalError::InvalidMessageShape(reason) => {
                FatalError::InvalidMessageShape(format!("message {index}: {reason}"))
            }
            other => other,
        })?;
    }
    Ok(())
}
