use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::prompt::build_relationship_prompt;
use crate::schema::{EntityMention, RawTriple};

/// Named-entity extraction capability.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract_entities(&self, text: &str, labels: &[String]) -> Result<Vec<EntityMention>>;
}

/// LLM relationship extraction capability. Implementations must treat
/// malformed model output as an empty result, never an error.
#[async_trait]
pub trait RelationshipExtractor: Send + Sync {
    async fn extract_relationships(
        &self,
        text: &str,
        allowed_entities: &[String],
    ) -> Result<Vec<RawTriple>>;
}

/// GLiNER-style NER service spoken to over HTTP.
#[derive(Clone)]
pub struct NerHttpClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct NerRequest<'a> {
    text: &'a str,
    labels: &'a [String],
}

#[derive(Deserialize)]
struct NerResponse {
    entities: Vec<NerPrediction>,
}

#[derive(Deserialize)]
struct NerPrediction {
    text: String,
    label: String,
    score: f32,
}

impl NerHttpClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EntityExtractor for NerHttpClient {
    async fn extract_entities(&self, text: &str, labels: &[String]) -> Result<Vec<EntityMention>> {
        let url = format!("{}/extract", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&NerRequest { text, labels })
            .send()
            .await
            .context("Failed to send NER request")?;

        if !response.status().is_success() {
            anyhow::bail!("NER request failed: {}", response.status());
        }

        let parsed: NerResponse = response
            .json()
            .await
            .context("Failed to parse NER response")?;

        Ok(parsed
            .entities
            .into_iter()
            .map(|p| EntityMention {
                text: p.text,
                entity_type: p.label,
                description: String::new(),
                score: p.score,
            })
            .collect())
    }
}

/// Ollama-backed relationship extractor.
#[derive(Clone)]
pub struct OllamaRelationshipClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaRelationshipClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json".to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }
}

#[async_trait]
impl RelationshipExtractor for OllamaRelationshipClient {
    async fn extract_relationships(
        &self,
        text: &str,
        allowed_entities: &[String],
    ) -> Result<Vec<RawTriple>> {
        let prompt = build_relationship_prompt(text, allowed_entities);
        let raw = self.generate(&prompt).await?;
        Ok(parse_triples(&raw))
    }
}

#[derive(Deserialize)]
struct LenientTriple {
    #[serde(alias = "source")]
    subject: String,
    #[serde(alias = "relation")]
    predicate: String,
    #[serde(alias = "target")]
    object: String,
}

#[derive(Deserialize)]
struct TripleEnvelope {
    relationships: Vec<LenientTriple>,
}

/// Best-effort parse of LLM output into triples.
///
/// Strips markdown fences, accepts either a bare JSON list or a
/// `{"relationships": [...]}` envelope, and tolerates the source/relation/
/// target field spelling. Anything unparseable yields an empty list.
pub fn parse_triples(raw: &str) -> Vec<RawTriple> {
    let mut text = raw.trim();

    if let Some(stripped) = text.split("```").nth(1) {
        text = stripped.trim_start_matches("json").trim();
    }

    let list = if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        serde_json::from_str::<Vec<LenientTriple>>(&text[start..=end]).ok()
    } else {
        None
    };

    let list = list.or_else(|| {
        serde_json::from_str::<TripleEnvelope>(text)
            .ok()
            .map(|e| e.relationships)
    });

    let Some(list) = list else {
        warn!("Unparseable relationship extraction output, treating as empty");
        return Vec::new();
    };

    list.into_iter()
        .filter(|t| !t.subject.trim().is_empty() && !t.object.trim().is_empty())
        .map(|t| RawTriple {
            subject: t.subject,
            predicate: t.predicate,
            object: t.object,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_list() {
        let raw = r#"[{"subject": "A", "predicate": "uses", "object": "B"}]"#;
        let triples = parse_triples(raw);
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].predicate, "uses");
    }

    #[test]
    fn parses_fenced_and_aliased_output() {
        let raw = "```json\n[{\"source\": \"A\", \"relation\": \"uses\", \"target\": \"B\"}]\n```";
        let triples = parse_triples(raw);
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].subject, "A");
        assert_eq!(triples[0].object, "B");
    }

    #[test]
    fn parses_envelope_form() {
        let raw = r#"{"relationships": [{"subject": "A", "predicate": "uses", "object": "B"}]}"#;
        assert_eq!(parse_triples(raw).len(), 1);
    }

    #[test]
    fn malformed_output_is_empty_not_fatal() {
        assert!(parse_triples("the model rambled instead of emitting JSON").is_empty());
        assert!(parse_triples("[{\"subject\": \"A\"").is_empty());
    }

    #[test]
    fn blank_endpoints_are_filtered() {
        let raw = r#"[{"subject": "", "predicate": "uses", "object": "B"}]"#;
        assert!(parse_triples(raw).is_empty());
    }
}
