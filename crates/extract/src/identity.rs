//! Deterministic identities for entities and relationships.
//!
//! Every id here is a pure function of semantic content: re-running any
//! stage against unchanged input produces identical ids, which is what
//! turns all downstream writes into upserts.

use sha2::{Digest, Sha256};

/// Canonical form of an entity name: lowercased, punctuation stripped,
/// internal whitespace collapsed. Case and spacing variants of the same
/// name map to one identity.
pub fn normalize_entity_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_space = true;

    for c in name.trim().chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else if matches!(c, '.' | ',' | '!' | '?' | ';' | ':' | '\'' | '"') {
            // dropped
        } else {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_was_space = false;
        }
    }

    out.trim_end().to_string()
}

/// Predicates are constrained to lower snake_case: any run of
/// non-alphanumeric characters becomes a single underscore.
pub fn normalize_predicate(predicate: &str) -> String {
    let mut out = String::with_capacity(predicate.len());
    let mut last_was_sep = true;

    for c in predicate.trim().chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }

    out.trim_end_matches('_').to_string()
}

pub fn entity_id(normalized_name: &str, entity_type: &str) -> String {
    content_hash(&[normalized_name, &entity_type.trim().to_uppercase()])
}

pub fn relationship_id(subject_entity_id: &str, predicate: &str, object_entity_id: &str) -> String {
    content_hash(&[subject_entity_id, predicate, object_entity_id])
}

/// SHA-256 over the identity-defining fields, separated so adjacent
/// fields cannot run together, truncated to 32 hex chars.
fn content_hash(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update([0x1f]);
    }
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_normalization_ignores_case_and_whitespace() {
        assert_eq!(normalize_entity_name("GraphRAG"), "graphrag");
        assert_eq!(normalize_entity_name("  GraphRAG  "), "graphrag");
        assert_eq!(normalize_entity_name("Graph  RAG!"), "graph rag");
        assert_eq!(normalize_entity_name("graph\trag"), "graph rag");
    }

    #[test]
    fn predicate_normalization_is_snake_case() {
        assert_eq!(normalize_predicate("Depends On"), "depends_on");
        assert_eq!(normalize_predicate("DEPENDS-ON"), "depends_on");
        assert_eq!(normalize_predicate("  uses  "), "uses");
        assert_eq!(normalize_predicate("routes -> to"), "routes_to");
    }

    #[test]
    fn entity_id_collapses_variants() {
        let a = entity_id(&normalize_entity_name("AWS Lambda"), "AWS_SERVICE");
        let b = entity_id(&normalize_entity_name("  aws   lambda "), "aws_service");
        assert_eq!(a, b);
    }

    #[test]
    fn entity_id_distinguishes_types() {
        let norm = normalize_entity_name("Mercury");
        assert_ne!(entity_id(&norm, "PLANET"), entity_id(&norm, "ELEMENT"));
    }

    #[test]
    fn relationship_id_is_directional() {
        let ab = relationship_id("a", "uses", "b");
        let ba = relationship_id("b", "uses", "a");
        assert_ne!(ab, ba);
        assert_eq!(ab, relationship_id("a", "uses", "b"));
    }
}
