use ingest::ChunkerConfig;

/// Retry behavior for calls to the NER service, the LLM, the embedder
/// and the stores.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

/// Everything the pipeline needs to know, passed explicitly at
/// construction. Nothing in the stage code reads the environment.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunker: ChunkerConfig,
    /// Mentions scoring below this are dropped during deduplication.
    pub confidence_threshold: f32,
    /// Entity types the NER service is asked for; empty means
    /// unconstrained.
    pub entity_vocabulary: Vec<String>,
    /// Allowed predicates; empty means unconstrained.
    pub predicate_vocabulary: Vec<String>,
    /// Documents larger than this are rejected during chunking.
    pub max_document_bytes: usize,
    /// Per-stage cap on concurrent calls to external services.
    pub stage_concurrency: usize,
    pub retry: RetryConfig,
    /// When true a stage where every item failed is marked failed; a
    /// stage with zero items always completes.
    pub fail_on_zero_successes: bool,
    /// Drop cached stage payloads once the final stage completes.
    pub cleanup_payloads: bool,
    /// Write entities and relationships to the knowledge graph during
    /// the vectorization stages.
    pub store_graph: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            confidence_threshold: 0.5,
            entity_vocabulary: default_entity_vocabulary(),
            predicate_vocabulary: default_predicate_vocabulary(),
            max_document_bytes: 50 * 1024 * 1024,
            stage_concurrency: 4,
            retry: RetryConfig::default(),
            fail_on_zero_successes: true,
            cleanup_payloads: true,
            store_graph: true,
        }
    }
}

pub fn default_entity_vocabulary() -> Vec<String> {
    [
        "Agent",
        "Graph",
        "Node",
        "State",
        "Transition",
        "LLM",
        "Tool",
        "Gateway",
        "Memory",
        "User",
        "Service",
        "Database",
        "Document",
        "Chunk",
        "Embedding",
        "Vector",
        "Pipeline",
        "Model",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

pub fn default_predicate_vocabulary() -> Vec<String> {
    [
        "implemented_by",
        "contains",
        "operates_on",
        "updates",
        "connects",
        "invokes",
        "routes_to",
        "accesses",
        "persists_data_in",
        "interacts_with",
        "offers",
        "uses",
        "provides",
        "integrates_with",
        "depends_on",
        "supports",
        "requires",
        "enables",
        "manages",
        "processes",
        "stores",
        "retrieves",
        "orchestrates",
        "embedded_by",
        "indexes_in",
        "queries",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
