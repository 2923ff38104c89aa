//! Pure aggregation logic: mention deduplication and triple validation.
//!
//! Both functions are deterministic over their inputs so stage re-runs
//! produce byte-identical payloads.

use std::collections::BTreeMap;

use tracing::warn;

use crate::identity::{entity_id, normalize_entity_name, normalize_predicate, relationship_id};
use crate::schema::{Entity, EntityMention, RawTriple, Relationship};

/// Collapse raw mentions into one `Entity` per `(normalized_name, type)`.
///
/// Mentions below `confidence_threshold` are dropped. When `type_vocabulary`
/// is non-empty, mentions with an unlisted type are dropped too. Merging
/// keeps the highest confidence score and the first non-empty description;
/// chunk-id sets accumulate across mentions.
pub fn dedup_entities(
    mentions: &[(String, EntityMention)],
    confidence_threshold: f32,
    type_vocabulary: &[String],
) -> Vec<Entity> {
    let mut by_id: BTreeMap<String, Entity> = BTreeMap::new();

    for (chunk_id, mention) in mentions {
        if mention.score < confidence_threshold {
            continue;
        }

        let entity_type = mention.entity_type.trim().to_uppercase();
        if !type_vocabulary.is_empty()
            && !type_vocabulary.iter().any(|t| t.eq_ignore_ascii_case(&entity_type))
        {
            warn!(
                entity = %mention.text,
                entity_type = %entity_type,
                "Dropping mention with out-of-vocabulary type"
            );
            continue;
        }

        let name = normalize_entity_name(&mention.text);
        if name.is_empty() {
            continue;
        }
        let id = entity_id(&name, &entity_type);

        let entry = by_id.entry(id.clone()).or_insert_with(|| Entity {
            entity_id: id,
            name: name.clone(),
            entity_type,
            description: mention.description.clone(),
            confidence_score: mention.score,
            originating_chunk_ids: Default::default(),
        });

        entry.originating_chunk_ids.insert(chunk_id.clone());
        if mention.score > entry.confidence_score {
            entry.confidence_score = mention.score;
        }
        if entry.description.is_empty() && !mention.description.is_empty() {
            entry.description = mention.description.clone();
        }
    }

    by_id.into_values().collect()
}

/// Validate raw triples against the job's entities.
///
/// A triple survives only if both subject and object resolve to a known
/// entity name and its normalized predicate is in the vocabulary (when one
/// is configured). Invalid triples are dropped with a warning, never an
/// error. Returns the surviving relationships and the dropped count.
pub fn resolve_relationships(
    triples: &[(String, RawTriple)],
    entities: &[Entity],
    predicate_vocabulary: &[String],
) -> (Vec<Relationship>, usize) {
    let by_name: BTreeMap<String, &Entity> = entities
        .iter()
        .map(|e| (e.name.clone(), e))
        .collect();

    let mut by_id: BTreeMap<String, Relationship> = BTreeMap::new();
    let mut dropped = 0;

    for (chunk_id, triple) in triples {
        let predicate = normalize_predicate(&triple.predicate);
        if predicate.is_empty() {
            dropped += 1;
            continue;
        }

        if !predicate_vocabulary.is_empty() && !predicate_vocabulary.contains(&predicate) {
            warn!(predicate = %predicate, "Dropping triple with out-of-vocabulary predicate");
            dropped += 1;
            continue;
        }

        let subject = by_name.get(&normalize_entity_name(&triple.subject));
        let object = by_name.get(&normalize_entity_name(&triple.object));

        let (Some(subject), Some(object)) = (subject, object) else {
            warn!(
                subject = %triple.subject,
                object = %triple.object,
                "Dropping triple referencing unknown entity"
            );
            dropped += 1;
            continue;
        };

        let id = relationship_id(&subject.entity_id, &predicate, &object.entity_id);
        by_id.entry(id.clone()).or_insert_with(|| Relationship {
            relationship_id: id,
            subject_entity_id: subject.entity_id.clone(),
            predicate: predicate.clone(),
            object_entity_id: object.entity_id.clone(),
            originating_chunk_id: chunk_id.clone(),
        });
    }

    (by_id.into_values().collect(), dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mention(text: &str, entity_type: &str, score: f32) -> EntityMention {
        EntityMention {
            text: text.into(),
            entity_type: entity_type.into(),
            description: String::new(),
            score,
        }
    }

    fn triple(s: &str, p: &str, o: &str) -> RawTriple {
        RawTriple {
            subject: s.into(),
            predicate: p.into(),
            object: o.into(),
        }
    }

    #[test]
    fn dedup_merges_chunk_id_sets() {
        let mentions = vec![
            ("c1".to_string(), mention("AWS Lambda", "AWS_SERVICE", 0.9)),
            ("c2".to_string(), mention("aws lambda", "aws_service", 0.7)),
        ];

        let entities = dedup_entities(&mentions, 0.5, &[]);

        assert_eq!(entities.len(), 1);
        let e = &entities[0];
        assert_eq!(e.name, "aws lambda");
        assert_eq!(e.entity_type, "AWS_SERVICE");
        assert_eq!(e.confidence_score, 0.9);
        assert_eq!(
            e.originating_chunk_ids.iter().cloned().collect::<Vec<_>>(),
            vec!["c1", "c2"]
        );
    }

    #[test]
    fn dedup_applies_confidence_threshold() {
        let mentions = vec![
            ("c1".to_string(), mention("Keep", "ORG", 0.8)),
            ("c1".to_string(), mention("Drop", "ORG", 0.2)),
        ];

        let entities = dedup_entities(&mentions, 0.5, &[]);

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "keep");
    }

    #[test]
    fn dedup_applies_type_vocabulary() {
        let mentions = vec![
            ("c1".to_string(), mention("Ada", "PERSON", 0.9)),
            ("c1".to_string(), mention("Thing", "GADGET", 0.9)),
        ];

        let entities = dedup_entities(&mentions, 0.0, &["PERSON".into(), "ORG".into()]);

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_type, "PERSON");
    }

    #[test]
    fn resolve_rejects_unknown_entities() {
        let entities = dedup_entities(
            &[
                ("c1".to_string(), mention("A", "ORG", 0.9)),
                ("c1".to_string(), mention("B", "ORG", 0.9)),
            ],
            0.0,
            &[],
        );

        let triples = vec![
            ("c1".to_string(), triple("A", "uses", "B")),
            ("c1".to_string(), triple("A", "uses", "Ghost")),
        ];

        let (rels, dropped) = resolve_relationships(&triples, &entities, &[]);

        assert_eq!(rels.len(), 1);
        assert_eq!(dropped, 1);
        let ids: Vec<&str> = entities.iter().map(|e| e.entity_id.as_str()).collect();
        assert!(ids.contains(&rels[0].subject_entity_id.as_str()));
        assert!(ids.contains(&rels[0].object_entity_id.as_str()));
    }

    #[test]
    fn resolve_normalizes_and_constrains_predicates() {
        let entities = dedup_entities(
            &[
                ("c1".to_string(), mention("A", "ORG", 0.9)),
                ("c1".to_string(), mention("B", "ORG", 0.9)),
            ],
            0.0,
            &[],
        );

        let triples = vec![
            ("c1".to_string(), triple("A", "Depends On", "B")),
            ("c1".to_string(), triple("B", "frobnicates", "A")),
        ];

        let vocab = vec!["depends_on".to_string(), "uses".to_string()];
        let (rels, dropped) = resolve_relationships(&triples, &entities, &vocab);

        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].predicate, "depends_on");
        assert_eq!(dropped, 1);
    }

    #[test]
    fn resolve_collapses_duplicate_triples() {
        let entities = dedup_entities(
            &[
                ("c1".to_string(), mention("A", "ORG", 0.9)),
                ("c2".to_string(), mention("B", "ORG", 0.9)),
            ],
            0.0,
            &[],
        );

        let triples = vec![
            ("c1".to_string(), triple("A", "uses", "B")),
            ("c2".to_string(), triple("a", "USES", "b")),
        ];

        let (rels, _) = resolve_relationships(&triples, &entities, &[]);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].originating_chunk_id, "c1");
    }
}
