pub mod client;
pub mod identity;
pub mod prompt;
pub mod resolve;
pub mod schema;

pub use client::{
    EntityExtractor, NerHttpClient, OllamaRelationshipClient, RelationshipExtractor, parse_triples,
};
pub use identity::{entity_id, normalize_entity_name, normalize_predicate, relationship_id};
pub use resolve::{dedup_entities, resolve_relationships};
pub use schema::{Entity, EntityMention, RawTriple, Relationship};
