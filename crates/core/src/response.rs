//! The caller-visible result of one dialog.

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::provider::{StopReason, Usage};
use crate::tool::ParsedToolCall;

/// Tagged on `status`: `ok`, `api-error` or `exceeded-maximum-retries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum LlmResponse {
    Ok {
        stop_reason: StopReason,
        message: Message,
        usage: Usage,
        tool_calls: Vec<ParsedToolCall>,
    },
    ApiError {
        message: String,
    },
    ExceededMaximumRetries {
        retry_count: u32,
    },
}

impl LlmResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Ok { .. } => "ok",
            Self::ApiError { .. } => "api-error",
            Self::ExceededMaximumRetries { .. } => "exceeded-maximum-retries",
        }
    }

    pub fn usage(&self) -> Option<Usage> {
        match self {
            Self::Ok { usage, .. } => Some(*usage),
            _ => None,
        }
    }

    pub fn tool_calls(&self) -> &[ParsedToolCall] {
        match self {
            Self::Ok { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}
