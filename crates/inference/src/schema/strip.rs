//! Reduce dereferenced property schemas to the keywords a model needs.
//!
//! Only `title`, `description`, `type`, `enum`, `items`, `properties`,
//! `required` and multi-option `oneOf` survive. A single-option `oneOf` is
//! flattened into its parent. Object keys that are base URLs are replaced by
//! simplified property tokens, and every rewritten key is recorded in a
//! [`KeyTree`] so model output can be mapped back level by level.

use std::collections::BTreeMap;

use hash_ai_core::error::TranslateError;
use hash_ai_core::ontology::BaseUrl;
use serde_json::{Map, Value};

use super::simplified_id::SimplifiedIdMap;

pub const MAX_SCHEMA_DEPTH: usize = 32;

const COPIED_KEYWORDS: [&str; 4] = ["title", "description", "type", "enum"];

/// The object keys of a stripped schema, by nesting level.
///
/// Array items share the level of their array; `oneOf` options are merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyTree {
    keys: BTreeMap<String, KeyNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct KeyNode {
    /// Set when the key is a token standing in for this URL.
    base_url: Option<BaseUrl>,
    nested: KeyTree,
}

impl KeyTree {
    /// The base URL a key at this level stands for, if it was rewritten.
    pub fn base_url(&self, key: &str) -> Option<&BaseUrl> {
        self.keys.get(key)?.base_url.as_ref()
    }

    fn insert(&mut self, key: String, base_url: Option<BaseUrl>, nested: KeyTree) {
        let node = self.keys.entry(key).or_default();
        if node.base_url.is_none() {
            node.base_url = base_url;
        }
        node.nested.merge(nested);
    }

    fn merge(&mut self, other: KeyTree) {
        for (key, node) in other.keys {
            self.insert(key, node.base_url, node.nested);
        }
    }
}

/// Strips one entity type's property schemas, sharing a property-token map.
pub struct Stripper<'a> {
    tokens: &'a mut SimplifiedIdMap<BaseUrl>,
    ancestors: Vec<String>,
    keys: KeyTree,
}

impl<'a> Stripper<'a> {
    pub fn new(tokens: &'a mut SimplifiedIdMap<BaseUrl>) -> Self {
        Self {
            tokens,
            ancestors: Vec::new(),
            keys: KeyTree::default(),
        }
    }

    /// Strip a top-level property, returning its token and reduced schema.
    pub fn strip_property(
        &mut self,
        base_url: &BaseUrl,
        schema: &Value,
    ) -> Result<(String, Value), TranslateError> {
        let title = schema.get("title").and_then(Value::as_str);
        let token = self.token_for_key(base_url.as_str(), title);
        let path = format!("/{token}");
        let (stripped, nested) = self.strip(schema, &path, 0)?;
        self.keys.insert(token.clone(), Some(base_url.clone()), nested);
        Ok((token, stripped))
    }

    /// Token for a top-level required property.
    pub fn required_token(&mut self, base_url: &BaseUrl) -> String {
        let token = self.token_for_key(base_url.as_str(), None);
        self.keys.insert(token.clone(), Some(base_url.clone()), KeyTree::default());
        token
    }

    /// The keys of every property stripped so far.
    pub fn into_keys(self) -> KeyTree {
        self.keys
    }

    fn strip(
        &mut self,
        schema: &Value,
        path: &str,
        depth: usize,
    ) -> Result<(Value, KeyTree), TranslateError> {
        if depth > MAX_SCHEMA_DEPTH {
            return Err(TranslateError::TooDeep {
                max_depth: MAX_SCHEMA_DEPTH,
                path: path.to_string(),
            });
        }

        let obj = match schema {
            Value::Object(obj) => obj,
            Value::Bool(_) => return Ok((schema.clone(), KeyTree::default())),
            _ => {
                return Err(TranslateError::Unsupported {
                    path: path.to_string(),
                    reason: "expected a schema object".into(),
                });
            }
        };

        if let Some(reference) = obj.get("$ref") {
            return Err(TranslateError::UnresolvedReference {
                path: path.to_string(),
                reference: reference
                    .as_str()
                    .map_or_else(|| reference.to_string(), str::to_string),
            });
        }

        let id = obj.get("$id").and_then(Value::as_str);
        if let Some(id) = id {
            if self.ancestors.iter().any(|ancestor| ancestor == id) {
                return Err(TranslateError::CyclicSchema {
                    id: id.to_string(),
                    path: path.to_string(),
                });
            }
            self.ancestors.push(id.to_string());
        }

        let result = self.strip_keywords(obj, path, depth);

        if id.is_some() {
            self.ancestors.pop();
        }
        result
    }

    fn strip_keywords(
        &mut self,
        obj: &Map<String, Value>,
        path: &str,
        depth: usize,
    ) -> Result<(Value, KeyTree), TranslateError> {
        let mut out = Map::new();
        let mut keys = KeyTree::default();

        for keyword in COPIED_KEYWORDS {
            if let Some(value) = obj.get(keyword) {
                out.insert(keyword.to_string(), value.clone());
            }
        }

        if let Some(items) = obj.get("items") {
            let (stripped, nested) = self.strip(items, &format!("{path}/items"), depth + 1)?;
            out.insert("items".into(), stripped);
            keys.merge(nested);
        }

        if let Some(properties) = obj.get("properties") {
            let properties = properties.as_object().ok_or_else(|| TranslateError::Unsupported {
                path: format!("{path}/properties"),
                reason: "properties must be an object".into(),
            })?;

            let mut stripped = Map::new();
            for (key, sub_schema) in properties {
                let title = sub_schema.get("title").and_then(Value::as_str);
                let token = self.token_for_key(key, title);
                let sub_path = format!("{path}/properties/{token}");
                if stripped.contains_key(&token) {
                    return Err(TranslateError::Unsupported {
                        path: sub_path,
                        reason: format!("key {key} collides with the token of a sibling property"),
                    });
                }
                let (sub_stripped, nested) = self.strip(sub_schema, &sub_path, depth + 1)?;
                let base_url = is_base_url(key).then(|| BaseUrl::new(key));
                keys.insert(token.clone(), base_url, nested);
                stripped.insert(token, sub_stripped);
            }
            out.insert("properties".into(), Value::Object(stripped));
        }

        if let Some(required) = obj.get("required").and_then(Value::as_array) {
            let mapped = required
                .iter()
                .filter_map(Value::as_str)
                .map(|key| Value::String(self.token_for_key(key, None)))
                .collect();
            out.insert("required".into(), Value::Array(mapped));
        }

        if let Some(one_of) = obj.get("oneOf") {
            let options = one_of.as_array().ok_or_else(|| TranslateError::Unsupported {
                path: format!("{path}/oneOf"),
                reason: "oneOf must be an array".into(),
            })?;

            match options.as_slice() {
                [] => {
                    return Err(TranslateError::Unsupported {
                        path: format!("{path}/oneOf"),
                        reason: "oneOf has no options".into(),
                    });
                }
                [only] => {
                    let (inner, nested) = self.strip(only, &format!("{path}/oneOf/0"), depth + 1)?;
                    if let Value::Object(inner) = inner {
                        for (key, value) in inner {
                            out.entry(key).or_insert(value);
                        }
                    }
                    keys.merge(nested);
                }
                many => {
                    let mut stripped = Vec::with_capacity(many.len());
                    for (i, option) in many.iter().enumerate() {
                        let (option, nested) =
                            self.strip(option, &format!("{path}/oneOf/{i}"), depth + 1)?;
                        stripped.push(option);
                        keys.merge(nested);
                    }
                    out.insert("oneOf".into(), Value::Array(stripped));
                }
            }
        }

        Ok((Value::Object(out), keys))
    }

    fn token_for_key(&mut self, key: &str, title: Option<&str>) -> String {
        if !is_base_url(key) {
            return key.to_string();
        }
        let base_url = BaseUrl::new(key);
        if let Some(existing) = self.tokens.token_for(&base_url) {
            return existing.to_string();
        }
        let title = title.map_or_else(|| last_segment(key), str::to_string);
        self.tokens.assign(&title, base_url)
    }
}

fn is_base_url(key: &str) -> bool {
    key.starts_with("https://") || key.starts_with("http://")
}

fn last_segment(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Rewrite a model-produced `properties` object back to base-URL keys.
///
/// Every top-level key must be a property token; nested objects go through
/// [`restore_keys`].
pub fn restore_properties(value: &Value, keys: &KeyTree) -> Result<Map<String, Value>, String> {
    let Value::Object(obj) = value else {
        return Err("properties must be an object".into());
    };
    obj.iter()
        .map(|(key, inner)| {
            let Some(KeyNode {
                base_url: Some(base_url),
                nested,
            }) = keys.keys.get(key)
            else {
                return Err(format!("unknown property {key}"));
            };
            Ok((base_url.as_str().to_string(), restore_keys(inner, nested)))
        })
        .collect()
}

/// Rewrite tokens back to base URLs, one nesting level at a time.
///
/// Only keys recorded at the matching level of `keys` are rewritten; values
/// under unrecorded keys are copied as they are.
pub fn restore_keys(value: &Value, keys: &KeyTree) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(key, inner)| match keys.keys.get(key) {
                    Some(node) => {
                        let restored = node
                            .base_url
                            .as_ref()
                            .map_or_else(|| key.clone(), |url| url.as_str().to_string());
                        (restored, restore_keys(inner, &node.nested))
                    }
                    None => (key.clone(), inner.clone()),
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| restore_keys(item, keys)).collect())
        }
        other => other.clone(),
    }
}
