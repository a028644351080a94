//! Entity inference: text in, proposed entities out.

use std::sync::Arc;

use hash_ai_core::message::Message;
use hash_ai_core::ontology::EntityType;
use hash_ai_core::provider::Usage;
use hash_ai_core::response::LlmResponse;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::driver::{DialogDriver, DialogOutcome, DialogRequest, DriverError};
use crate::schema::{
    ABANDON_ENTITIES, CREATE_ENTITIES, ProposeEntitiesTools, ProposedEntity, SkippedProposal,
};

pub const SYSTEM_PROMPT: &str = "\
You are an entity inference assistant. \
The user provides text from which you infer entities to create.
Create entities by calling create_entities. \
Its schema lists the entity types you may create and the properties each one accepts.
Give every entity a numerical entityId that is unique within this conversation.
Some entity types are links: they need a sourceEntityId and a targetEntityId, \
which must be the entityIds of other entities you create.
If the user reports errors in your proposals, \
call create_entities again with only the corrected entities.
If you cannot correct an entity, call abandon_entities with its entityId.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferEntitiesRequest {
    pub text: String,
    pub entity_types: Vec<EntityType>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Appended to the system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferEntitiesResult {
    /// The dialog status: `ok`, `api-error` or `exceeded-maximum-retries`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub proposed_entities: Vec<ProposedEntity>,
    pub abandoned_entity_ids: Vec<u64>,
    pub skipped: Vec<SkippedProposal>,
    pub usage: Usage,
    pub retry_count: u32,
}

#[derive(Debug, Error)]
pub enum InferEntitiesError {
    #[error(transparent)]
    Schema(#[from] hash_ai_core::Error),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Runs entity inference dialogs through a shared driver.
pub struct EntityInference {
    driver: Arc<DialogDriver>,
}

impl EntityInference {
    pub fn new(driver: Arc<DialogDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &DialogDriver {
        &self.driver
    }

    pub async fn infer(
        &self,
        request: InferEntitiesRequest,
        cancel: &CancellationToken,
    ) -> Result<(InferEntitiesResult, DialogOutcome), InferEntitiesError> {
        let tools = ProposeEntitiesTools::generate(&request.entity_types)?;

        let system_prompt = match request.instructions.as_deref().map(str::trim) {
            Some(extra) if !extra.is_empty() => format!("{SYSTEM_PROMPT}\n\n{extra}"),
            _ => SYSTEM_PROMPT.to_string(),
        };

        let messages = vec![Message::user(request.text)];
        let mut dialog = DialogRequest::new(&request.model, messages, tools.tools().clone())
            .with_system_prompt(system_prompt)
            .with_trim_message_at_index(0);
        if let Some(max_tokens) = request.max_tokens {
            dialog = dialog.with_max_tokens(max_tokens);
        }

        info!(
            model = %request.model,
            entity_types = request.entity_types.len(),
            "Inferring entities"
        );
        let outcome = self.driver.run(dialog, cancel).await?;

        let mut result = InferEntitiesResult {
            status: outcome.response.status().to_string(),
            message: None,
            proposed_entities: Vec::new(),
            abandoned_entity_ids: Vec::new(),
            skipped: Vec::new(),
            usage: outcome.total_usage,
            retry_count: outcome.retry_count,
        };

        match &outcome.response {
            LlmResponse::Ok { tool_calls, .. } => {
                for call in tool_calls {
                    match call.name.as_str() {
                        CREATE_ENTITIES => {
                            let (proposed, skipped) = tools.proposals(&call.input);
                            result.proposed_entities.extend(proposed);
                            result.skipped.extend(skipped);
                        }
                        ABANDON_ENTITIES => {
                            result
                                .abandoned_entity_ids
                                .extend(ProposeEntitiesTools::abandoned(&call.input));
                        }
                        other => warn!(tool = other, "Ignoring call to unexpected tool"),
                    }
                }
                info!(
                    proposed = result.proposed_entities.len(),
                    abandoned = result.abandoned_entity_ids.len(),
                    skipped = result.skipped.len(),
                    "Entity inference complete"
                );
            }
            LlmResponse::ApiError { message } => {
                result.message = Some(message.clone());
            }
            LlmResponse::ExceededMaximumRetries { retry_count } => {
                result.message = Some(format!("gave up after {retry_count} retries"));
            }
        }

        Ok((result, outcome))
    }
}
