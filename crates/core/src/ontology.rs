//! Ontology identifiers and dereferenced entity types.
//!
//! Types in the graph are addressed by a *versioned URL* of the form
//! `{base_url}v/{version}`, where the base URL always ends in `/`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TranslateError;

/// The version-independent URL of an ontology type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaseUrl(String);

impl BaseUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BaseUrl {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A base URL pinned to a version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionedUrl {
    base_url: BaseUrl,
    version: u32,
}

impl VersionedUrl {
    pub fn new(base_url: BaseUrl, version: u32) -> Self {
        Self { base_url, version }
    }

    /// Parse `https://…/entity-type/person/v/3`.
    pub fn parse(url: &str) -> Result<Self, TranslateError> {
        let invalid = || TranslateError::InvalidVersionedUrl(url.to_string());
        let split = url.rfind("/v/").ok_or_else(invalid)?;
        let (base, rest) = url.split_at(split + 1);
        let digits = rest.strip_prefix("v/").ok_or_else(invalid)?;
        if base.len() <= 1 || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let version = digits.parse().map_err(|_| invalid())?;
        Ok(Self {
            base_url: BaseUrl::new(base),
            version,
        })
    }

    pub fn base_url(&self) -> &BaseUrl {
        &self.base_url
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl std::fmt::Display for VersionedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v/{}", self.base_url, self.version)
    }
}

impl TryFrom<String> for VersionedUrl {
    type Error = TranslateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionedUrl> for String {
    fn from(value: VersionedUrl) -> Self {
        value.to_string()
    }
}

/// An entity type with every property schema already dereferenced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityType {
    pub id: VersionedUrl,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Property base URL → dereferenced property schema.
    #[serde(default)]
    pub properties: BTreeMap<BaseUrl, serde_json::Value>,

    /// Properties that must be present on every entity of this type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<BaseUrl>,

    /// Link types relate a source entity to a target entity.
    #[serde(default)]
    pub is_link: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_versioned_url() {
        let url =
            VersionedUrl::parse("https://hash.ai/@hash/types/entity-type/person/v/3").unwrap();
        assert_eq!(url.base_url().as_str(), "https://hash.ai/@hash/types/entity-type/person/");
        assert_eq!(url.version(), 3);
        assert_eq!(url.to_string(), "https://hash.ai/@hash/types/entity-type/person/v/3");
    }

    #[test]
    fn rejects_malformed_urls() {
        for bad in [
            "https://hash.ai/person",
            "https://hash.ai/person/v/",
            "https://hash.ai/person/v/x1",
            "/v/1",
        ] {
            assert!(VersionedUrl::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn entity_type_deserializes_from_camel_case() {
        let ty: EntityType = serde_json::from_value(json!({
            "id": "https://example.com/types/entity-type/person/v/1",
            "title": "Person",
            "properties": {
                "https://example.com/types/property-type/name/": {"type": "string", "title": "Name"}
            },
            "isLink": false
        }))
        .unwrap();
        assert_eq!(ty.title, "Person");
        assert_eq!(ty.properties.len(), 1);
        assert!(ty.required.is_empty());
    }

    #[test]
    fn entity_type_rejects_bad_id() {
        let result: Result<EntityType, _> = serde_json::from_value(json!({
            "id": "not a url",
            "title": "Broken"
        }));
        assert!(result.is_err());
    }
}
