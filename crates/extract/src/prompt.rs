/// Prompt for relationship extraction, constrained to the entities
/// already found in the chunk so the model cannot invent endpoints.
pub fn build_relationship_prompt(chunk_text: &str, entity_names: &[String]) -> String {
    let entity_list = entity_names.join(", ");

    format!(
        r#"Identify relationships between the listed entities based on the text.

INSTRUCTIONS:
1. Only use entities from the ENTITIES list as subject and object
2. Predicates should be short verbs: "uses", "depends_on", "contains", etc.
3. Output ONLY valid JSON, nothing else

SCHEMA:
[
  {{"subject": "EntityName", "predicate": "relationship_type", "object": "OtherEntity"}}
]

TEXT:
{chunk_text}

ENTITIES: {entity_list}

JSON OUTPUT:"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_entities_and_text() {
        let prompt = build_relationship_prompt("Lambda invokes Bedrock", &["Lambda".into(), "Bedrock".into()]);
        assert!(prompt.contains("Lambda invokes Bedrock"));
        assert!(prompt.contains("ENTITIES: Lambda, Bedrock"));
    }
}
