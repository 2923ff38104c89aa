use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A raw entity mention as returned by the extraction service, before
/// normalization and deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMention {
    pub text: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    pub score: f32,
}

/// A raw subject/predicate/object triple as returned by the LLM, before
/// validation against the job's known entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

/// A deduplicated entity. One record per `(normalized_name, type)` pair
/// within a job; `originating_chunk_ids` accumulates every chunk the
/// entity was mentioned in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub confidence_score: f32,
    pub originating_chunk_ids: BTreeSet<String>,
}

/// A validated relationship between two known entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub relationship_id: String,
    pub subject_entity_id: String,
    pub predicate: String,
    pub object_entity_id: String,
    pub originating_chunk_id: String,
}
