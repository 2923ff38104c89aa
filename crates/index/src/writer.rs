use crate::vector::VectorPoint;
use extract::{Entity, Relationship};
use ingest::Chunk;
use serde_json::json;

/// Canonical text embedded for an entity. The type and description ride
/// along so the vector captures more than the bare name.
pub fn entity_text(entity: &Entity) -> String {
    if entity.description.is_empty() {
        format!("{} ({})", entity.name, entity.entity_type)
    } else {
        format!(
            "{} ({}): {}",
            entity.name, entity.entity_type, entity.description
        )
    }
}

/// Canonical text embedded for a relationship, phrased as a sentence
/// fragment with the predicate's underscores opened up.
pub fn relationship_text(subject_name: &str, predicate: &str, object_name: &str) -> String {
    format!(
        "{} {} {}",
        subject_name,
        predicate.replace('_', " "),
        object_name
    )
}

/// Chunk point payload carries the text plus the names of the entities
/// and relationships extracted from it, so retrieval can show
/// graph-enriched context without a second lookup.
pub fn chunk_point(
    chunk: &Chunk,
    vector: Vec<f32>,
    entity_names: &[String],
    relationship_summaries: &[String],
) -> VectorPoint {
    VectorPoint {
        id: chunk.chunk_id.clone(),
        vector,
        payload: json!({
            "kind": "chunk",
            "doc_id": chunk.doc_id,
            "text": chunk.text,
            "start_offset": chunk.start_offset,
            "end_offset": chunk.end_offset,
            "header_path": chunk.header_path,
            "entities": entity_names,
            "relationships": relationship_summaries,
        }),
    }
}

pub fn entity_point(entity: &Entity, vector: Vec<f32>) -> VectorPoint {
    VectorPoint {
        id: entity.entity_id.clone(),
        vector,
        payload: json!({
            "kind": "entity",
            "name": entity.name,
            "entity_type": entity.entity_type,
            "description": entity.description,
            "confidence_score": entity.confidence_score,
            "chunk_ids": entity.originating_chunk_ids,
        }),
    }
}

pub fn relationship_point(
    relationship: &Relationship,
    subject_name: &str,
    object_name: &str,
    vector: Vec<f32>,
) -> VectorPoint {
    VectorPoint {
        id: relationship.relationship_id.clone(),
        vector,
        payload: json!({
            "kind": "relationship",
            "subject": subject_name,
            "predicate": relationship.predicate,
            "object": object_name,
            "subject_entity_id": relationship.subject_entity_id,
            "object_entity_id": relationship.object_entity_id,
            "chunk_id": relationship.originating_chunk_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_text_includes_type_and_description() {
        let entity = Entity {
            entity_id: "e1".into(),
            name: "Ada Lovelace".into(),
            entity_type: "PERSON".into(),
            description: "Mathematician".into(),
            confidence_score: 0.9,
            originating_chunk_ids: Default::default(),
        };
        assert_eq!(entity_text(&entity), "Ada Lovelace (PERSON): Mathematician");
    }

    #[test]
    fn entity_text_skips_empty_description() {
        let entity = Entity {
            entity_id: "e1".into(),
            name: "Ada".into(),
            entity_type: "PERSON".into(),
            description: String::new(),
            confidence_score: 0.9,
            originating_chunk_ids: Default::default(),
        };
        assert_eq!(entity_text(&entity), "Ada (PERSON)");
    }

    #[test]
    fn relationship_text_reads_as_a_sentence() {
        assert_eq!(
            relationship_text("Ada", "works_for", "Babbage Inc"),
            "Ada works for Babbage Inc"
        );
    }
}
