//! Projection of ontology entity types into LLM tool schemas, and back.

pub mod propose;
pub mod simplified_id;
pub mod strip;

pub use propose::{
    ABANDON_ENTITIES, CREATE_ENTITIES, ProposeEntitiesTools, ProposedEntity, SkippedProposal,
};
pub use simplified_id::{SimplifiedIdMap, slugify};
pub use strip::{KeyTree, MAX_SCHEMA_DEPTH, Stripper, restore_keys, restore_properties};
