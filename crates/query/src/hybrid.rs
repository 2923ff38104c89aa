use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::time::timeout;
use tracing::warn;

use index::{Collections, Embedder, GraphHit, GraphStore, VectorHit, VectorStore};

use crate::rrf::{self, RankedList};

/// Per-query knobs. Entity and relationship collections are searched at
/// half the chunk depth.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub top_k_vector: usize,
    pub top_k_graph: usize,
    pub rerank_top_k: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k_vector: 10,
            top_k_graph: 10,
            rerank_top_k: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub rrf_k: f64,
    pub vector_timeout: Duration,
    pub graph_timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            rrf_k: rrf::DEFAULT_RRF_K,
            vector_timeout: Duration::from_secs(10),
            graph_timeout: Duration::from_secs(5),
        }
    }
}

/// One fused result with its source attribution.
#[derive(Debug, Clone, Serialize)]
pub struct ContextItem {
    pub id: String,
    pub kind: String,
    pub score: f64,
    pub text: String,
    pub sources: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub items: Vec<ContextItem>,
    /// True when the graph branch failed or timed out and the result is
    /// vector-only.
    pub degraded: bool,
    pub vector_hits: usize,
    pub graph_hits: usize,
}

impl SearchResult {
    /// Render the fused items as one attributed context block.
    pub fn context_block(&self) -> String {
        self.items
            .iter()
            .map(|item| format!("[{} | {}] {}", item.kind, item.sources.join(","), item.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Words that look like entity references: capitalized and longer than
/// three characters. Returned lowercased for case-insensitive matching.
pub fn query_entity_terms(query: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for word in query.split(|c: char| !c.is_alphanumeric()) {
        if word.len() > 3 && word.chars().next().is_some_and(char::is_uppercase) {
            let lowered = word.to_lowercase();
            if !terms.contains(&lowered) {
                terms.push(lowered);
            }
        }
    }
    terms
}

struct VectorBranch {
    chunks: Vec<VectorHit>,
    entities: Vec<VectorHit>,
    relationships: Vec<VectorHit>,
}

impl VectorBranch {
    fn hit_count(&self) -> usize {
        self.chunks.len() + self.entities.len() + self.relationships.len()
    }
}

/// Fan-out retrieval: vector similarity over the three collections plus
/// a degree-ranked graph neighborhood lookup, fused with RRF.
///
/// The vector branch is mandatory; the graph branch degrades to empty on
/// failure or timeout.
pub struct HybridSearchEngine {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    collections: Collections,
    config: QueryConfig,
}

impl HybridSearchEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        collections: Collections,
        config: QueryConfig,
    ) -> Self {
        Self {
            embedder,
            vectors,
            graph,
            collections,
            config,
        }
    }

    pub async fn search(&self, query: &str, options: &QueryOptions) -> Result<SearchResult> {
        let embedding = self
            .embedder
            .embed(query)
            .await
            .context("query embedding failed")?;

        let (vector_result, graph_result) = tokio::join!(
            timeout(
                self.config.vector_timeout,
                self.vector_branch(&embedding, options),
            ),
            timeout(self.config.graph_timeout, self.graph_branch(query, options)),
        );

        let vector = vector_result
            .map_err(|_| anyhow::anyhow!("vector search timed out"))?
            .context("vector search failed")?;

        let (graph_hits, degraded) = match graph_result {
            Ok(Ok(hits)) => (hits, false),
            Ok(Err(e)) => {
                warn!(error = %format!("{e:#}"), "Graph search failed, degrading to vector-only");
                (Vec::new(), true)
            }
            Err(_) => {
                warn!("Graph search timed out, degrading to vector-only");
                (Vec::new(), true)
            }
        };

        Ok(self.fuse(vector, graph_hits, degraded, options))
    }

    async fn vector_branch(
        &self,
        embedding: &[f32],
        options: &QueryOptions,
    ) -> Result<VectorBranch> {
        let secondary_limit = (options.top_k_vector / 2).max(1);

        let chunks = self
            .vectors
            .search(&self.collections.chunks, embedding, options.top_k_vector)
            .await?;
        let entities = self
            .vectors
            .search(&self.collections.entities, embedding, secondary_limit)
            .await?;
        let relationships = self
            .vectors
            .search(&self.collections.relationships, embedding, secondary_limit)
            .await?;

        Ok(VectorBranch {
            chunks,
            entities,
            relationships,
        })
    }

    async fn graph_branch(&self, query: &str, options: &QueryOptions) -> Result<Vec<GraphHit>> {
        let terms = query_entity_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        self.graph.related_entities(&terms, options.top_k_graph).await
    }

    fn fuse(
        &self,
        vector: VectorBranch,
        graph_hits: Vec<GraphHit>,
        degraded: bool,
        options: &QueryOptions,
    ) -> SearchResult {
        let vector_hits = vector.hit_count();
        let graph_count = graph_hits.len();

        let mut texts: HashMap<String, (String, String)> = HashMap::new();
        for hit in &vector.chunks {
            texts.insert(hit.id.clone(), ("chunk".to_string(), describe_chunk(hit)));
        }
        for hit in &vector.entities {
            texts.insert(hit.id.clone(), ("entity".to_string(), describe_entity(hit)));
        }
        for hit in &vector.relationships {
            texts.insert(
                hit.id.clone(),
                ("relationship".to_string(), describe_relationship(hit)),
            );
        }
        for hit in &graph_hits {
            texts
                .entry(hit.entity_id.clone())
                .or_insert_with(|| ("entity".to_string(), describe_graph_hit(hit)));
        }

        let lists = [
            RankedList::new("vector_chunks", vector.chunks.iter().map(|h| h.id.clone()).collect()),
            RankedList::new(
                "vector_entities",
                vector.entities.iter().map(|h| h.id.clone()).collect(),
            ),
            RankedList::new(
                "vector_relationships",
                vector.relationships.iter().map(|h| h.id.clone()).collect(),
            ),
            RankedList::new(
                "graph",
                graph_hits.iter().map(|h| h.entity_id.clone()).collect(),
            ),
        ];

        let mut fused = rrf::fuse(&lists, self.config.rrf_k);
        fused.truncate(options.rerank_top_k);

        let items = fused
            .into_iter()
            .map(|f| {
                let (kind, text) = texts
                    .remove(&f.id)
                    .unwrap_or_else(|| ("unknown".to_string(), String::new()));
                ContextItem {
                    id: f.id,
                    kind,
                    score: f.score,
                    text,
                    sources: f.sources,
                }
            })
            .collect();

        SearchResult {
            items,
            degraded,
            vector_hits,
            graph_hits: graph_count,
        }
    }
}

fn payload_str<'a>(hit: &'a VectorHit, key: &str) -> &'a str {
    hit.payload.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn describe_chunk(hit: &VectorHit) -> String {
    payload_str(hit, "text").to_string()
}

fn describe_entity(hit: &VectorHit) -> String {
    let name = payload_str(hit, "name");
    let entity_type = payload_str(hit, "entity_type");
    let description = payload_str(hit, "description");
    if description.is_empty() {
        format!("{name} ({entity_type})")
    } else {
        format!("{name} ({entity_type}): {description}")
    }
}

fn describe_relationship(hit: &VectorHit) -> String {
    format!(
        "{} {} {}",
        payload_str(hit, "subject"),
        payload_str(hit, "predicate").replace('_', " "),
        payload_str(hit, "object"),
    )
}

fn describe_graph_hit(hit: &GraphHit) -> String {
    if hit.description.is_empty() {
        format!("{} ({})", hit.name, hit.entity_type)
    } else {
        format!("{} ({}): {}", hit.name, hit.entity_type, hit.description)
    }
}
