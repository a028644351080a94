//! The `create_entities` / `abandon_entities` tool pair.

use std::collections::{HashMap, HashSet};

use hash_ai_core::error::{Error, TranslateError};
use hash_ai_core::ontology::{BaseUrl, EntityType, VersionedUrl};
use hash_ai_core::tool::{SanitizeError, ToolDefinition, ToolSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use super::simplified_id::SimplifiedIdMap;
use super::strip::{KeyTree, Stripper, restore_properties};

pub const CREATE_ENTITIES: &str = "create_entities";
pub const ABANDON_ENTITIES: &str = "abandon_entities";

const ENTITY_ID_FIELDS: [&str; 3] = ["entityId", "sourceEntityId", "targetEntityId"];

/// An entity the model proposed, with ontology URLs restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedEntity {
    pub entity_type_id: VersionedUrl,
    pub entity_id: u64,
    /// Keyed by property base URL.
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_entity_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_entity_id: Option<u64>,
}

/// A proposal that could not be mapped back to the ontology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedProposal {
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<u64>,
    pub reason: String,
}

/// Generated tools plus the simplified-ID maps needed to read their calls.
#[derive(Debug, Clone)]
pub struct ProposeEntitiesTools {
    tools: ToolSet,
    entity_types: SimplifiedIdMap<VersionedUrl>,
    properties: HashMap<VersionedUrl, SimplifiedIdMap<BaseUrl>>,
    property_keys: HashMap<VersionedUrl, KeyTree>,
    link_types: HashSet<VersionedUrl>,
}

impl ProposeEntitiesTools {
    /// Project dereferenced entity types into the tool pair.
    pub fn generate(entity_types: &[EntityType]) -> Result<Self, Error> {
        if entity_types.is_empty() {
            return Err(TranslateError::Unsupported {
                path: String::new(),
                reason: "at least one entity type is required".into(),
            }
            .into());
        }

        let mut type_tokens = SimplifiedIdMap::new("entity");
        let mut property_maps = HashMap::new();
        let mut property_keys = HashMap::new();
        let mut link_types = HashSet::new();
        let mut create_properties = Map::new();

        for entity_type in entity_types {
            if property_maps.contains_key(&entity_type.id) {
                debug!(entity_type = %entity_type.id, "Ignoring repeated entity type");
                continue;
            }

            let token = type_tokens.assign(&entity_type.title, entity_type.id.clone());
            let mut property_tokens = SimplifiedIdMap::new("property");
            let (item, keys) = entity_item_schema(entity_type, &mut property_tokens)?;

            create_properties.insert(
                token,
                json!({
                    "type": "array",
                    "title": format!("{} entities to create", entity_type.title),
                    "items": item,
                }),
            );

            if entity_type.is_link {
                link_types.insert(entity_type.id.clone());
            }
            property_maps.insert(entity_type.id.clone(), property_tokens);
            property_keys.insert(entity_type.id.clone(), keys);
        }

        let create = ToolDefinition::new(
            CREATE_ENTITIES,
            "Create entities inferred from the provided text",
            json!({"type": "object", "properties": create_properties}),
        )
        .with_sanitizer(coerce_proposal_ids);

        let abandon = ToolDefinition::new(
            ABANDON_ENTITIES,
            "Give up trying to create, following failures which you cannot correct",
            json!({
                "type": "object",
                "properties": {
                    "entityIds": {
                        "type": "array",
                        "title": "The entityIds of the entities to abandon",
                        "items": {"type": "integer"}
                    }
                },
                "required": ["entityIds"]
            }),
        )
        .with_sanitizer(coerce_abandoned_ids);

        Ok(Self {
            tools: ToolSet::new(vec![create, abandon])?,
            entity_types: type_tokens,
            properties: property_maps,
            property_keys,
            link_types,
        })
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn entity_type_token(&self, id: &VersionedUrl) -> Option<&str> {
        self.entity_types.token_for(id)
    }

    pub fn property_token(&self, entity_type: &VersionedUrl, property: &BaseUrl) -> Option<&str> {
        self.properties.get(entity_type)?.token_for(property)
    }

    /// Read a validated `create_entities` input back into ontology terms.
    pub fn proposals(&self, input: &Value) -> (Vec<ProposedEntity>, Vec<SkippedProposal>) {
        let mut proposed = Vec::new();
        let mut skipped = Vec::new();
        let mut seen_ids = HashSet::new();

        let Some(by_type) = input.as_object() else {
            return (proposed, skipped);
        };

        for (token, items) in by_type {
            let skip = |entity_id: Option<u64>, reason: &str| SkippedProposal {
                entity_type: token.clone(),
                entity_id,
                reason: reason.to_string(),
            };

            let Some(entity_type_id) = self.entity_types.resolve(token) else {
                skipped.push(skip(None, "unknown entity type"));
                continue;
            };
            let Some(items) = items.as_array() else {
                skipped.push(skip(None, "expected an array of entities"));
                continue;
            };
            let property_keys = self.property_keys.get(entity_type_id);
            let is_link = self.link_types.contains(entity_type_id);

            for item in items {
                let Some(entity_id) = item.get("entityId").and_then(Value::as_u64) else {
                    skipped.push(skip(None, "missing entityId"));
                    continue;
                };
                if !seen_ids.insert(entity_id) {
                    skipped.push(skip(Some(entity_id), "duplicate entityId"));
                    continue;
                }

                let source_entity_id = item.get("sourceEntityId").and_then(Value::as_u64);
                let target_entity_id = item.get("targetEntityId").and_then(Value::as_u64);
                if is_link && (source_entity_id.is_none() || target_entity_id.is_none()) {
                    skipped.push(skip(Some(entity_id), "link is missing its source or target"));
                    continue;
                }

                let properties = match (item.get("properties"), property_keys) {
                    (Some(value), Some(keys)) => match restore_properties(value, keys) {
                        Ok(properties) => properties,
                        Err(reason) => {
                            skipped.push(skip(Some(entity_id), &reason));
                            continue;
                        }
                    },
                    _ => Map::new(),
                };

                proposed.push(ProposedEntity {
                    entity_type_id: entity_type_id.clone(),
                    entity_id,
                    properties,
                    source_entity_id,
                    target_entity_id,
                });
            }
        }

        (proposed, skipped)
    }

    /// Read a validated `abandon_entities` input.
    pub fn abandoned(input: &Value) -> Vec<u64> {
        input
            .get("entityIds")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_u64).collect())
            .unwrap_or_default()
    }
}

fn entity_item_schema(
    entity_type: &EntityType,
    property_tokens: &mut SimplifiedIdMap<BaseUrl>,
) -> Result<(Value, KeyTree), TranslateError> {
    let mut stripper = Stripper::new(property_tokens);

    let mut properties = Map::new();
    for (base_url, schema) in &entity_type.properties {
        let (token, stripped) = stripper.strip_property(base_url, schema)?;
        properties.insert(token, stripped);
    }
    let required: Vec<String> = entity_type
        .required
        .iter()
        .map(|base_url| stripper.required_token(base_url))
        .collect();
    let keys = stripper.into_keys();

    let mut property_object = json!({
        "type": "object",
        "description": "The properties to set on the entity",
        "default": {},
        "properties": properties,
    });
    if !required.is_empty() {
        property_object["required"] = json!(required);
    }

    let mut item_properties = Map::new();
    item_properties.insert(
        "entityId".into(),
        json!({
            "type": "integer",
            "minimum": 1,
            "description": "Your numerical identifier for the entity, \
                            unique among the inferred entities in this conversation"
        }),
    );
    let mut item_required = vec!["entityId", "properties"];

    if entity_type.is_link {
        item_properties.insert(
            "sourceEntityId".into(),
            json!({
                "type": "integer",
                "description": "The entityId of the source entity of the link"
            }),
        );
        item_properties.insert(
            "targetEntityId".into(),
            json!({
                "type": "integer",
                "description": "The entityId of the target entity of the link"
            }),
        );
        item_required.extend(["sourceEntityId", "targetEntityId"]);
    }
    item_properties.insert("properties".into(), property_object);

    let mut item = json!({
        "type": "object",
        "title": entity_type.title,
        "properties": item_properties,
        "required": item_required,
    });
    if let Some(description) = &entity_type.description {
        item["description"] = json!(description);
    }
    Ok((item, keys))
}

fn coerce_integer(value: &mut Value) {
    let coerced = match value {
        Value::String(s) => s.trim().parse::<u64>().ok(),
        Value::Number(n) if n.as_u64().is_none() => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
            .map(|f| f as u64),
        _ => None,
    };
    if let Some(n) = coerced {
        *value = Value::from(n);
    }
}

fn coerce_proposal_ids(mut input: Value) -> Result<Value, SanitizeError> {
    let Value::Object(by_type) = &mut input else {
        return Err(SanitizeError("expected an object keyed by entity type".into()));
    };
    for items in by_type.values_mut() {
        let Value::Array(items) = items else { continue };
        for item in items.iter_mut().filter_map(Value::as_object_mut) {
            for field in ENTITY_ID_FIELDS {
                if let Some(id) = item.get_mut(field) {
                    coerce_integer(id);
                }
            }
        }
    }
    Ok(input)
}

fn coerce_abandoned_ids(mut input: Value) -> Result<Value, SanitizeError> {
    let Some(ids) = input.get_mut("entityIds") else {
        return Err(SanitizeError("missing entityIds".into()));
    };
    if !ids.is_array() {
        *ids = Value::Array(vec![ids.take()]);
    }
    if let Value::Array(ids) = ids {
        ids.iter_mut().for_each(coerce_integer);
    }
    Ok(input)
}
