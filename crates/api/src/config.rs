use std::time::Duration;

use ingest::ChunkerConfig;
use pipeline::{PipelineConfig, RetryConfig};
use query::QueryConfig;

/// Deployment configuration, read once at startup. Everything downstream
/// receives explicit config structs; nothing else touches the
/// environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,

    pub qdrant_url: String,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub ollama_url: String,
    pub ner_url: String,
    pub document_store_url: String,

    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub llm_model: String,

    pub collection_prefix: String,
    pub job_ttl: Duration,

    pub worker_pool_size: usize,
    pub worker_queue_depth: usize,

    pub pipeline: PipelineConfig,
    pub query: QueryConfig,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let pipeline = PipelineConfig {
            chunker: ChunkerConfig {
                chunk_size: env_parse("CHUNK_SIZE", 1000),
                chunk_overlap: env_parse("CHUNK_OVERLAP", 200),
            },
            confidence_threshold: env_parse("CONFIDENCE_THRESHOLD", 0.5),
            entity_vocabulary: env_list(
                "ENTITIES_LIST",
                pipeline::config::default_entity_vocabulary(),
            ),
            predicate_vocabulary: env_list(
                "RELATIONSHIPS_LIST",
                pipeline::config::default_predicate_vocabulary(),
            ),
            max_document_bytes: env_parse("MAX_FILE_SIZE_MB", 50usize) * 1024 * 1024,
            stage_concurrency: env_parse("STAGE_CONCURRENCY", 4),
            retry: RetryConfig {
                max_retries: env_parse("MAX_RETRIES", 3),
                initial_backoff_ms: env_parse("INITIAL_BACKOFF_MS", 200),
                max_backoff_ms: env_parse("MAX_BACKOFF_MS", 5_000),
            },
            fail_on_zero_successes: env_parse("FAIL_ON_ZERO_SUCCESSES", true),
            cleanup_payloads: env_parse("CLEANUP_PAYLOADS", true),
            store_graph: env_parse("STORE_GRAPH", true),
        };

        let query = QueryConfig {
            rrf_k: env_parse("RRF_K", query::DEFAULT_RRF_K),
            vector_timeout: Duration::from_secs(env_parse("VECTOR_TIMEOUT_SECS", 10)),
            graph_timeout: Duration::from_secs(env_parse("GRAPH_TIMEOUT_SECS", 5)),
        };

        Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:3000"),
            qdrant_url: env_or("QDRANT_URL", "http://localhost:6333"),
            neo4j_uri: env_or("NEO4J_URI", "bolt://localhost:7687"),
            neo4j_user: env_or("NEO4J_USER", "neo4j"),
            neo4j_password: env_or("NEO4J_PASSWORD", "password"),
            ollama_url: env_or("OLLAMA_URL", "http://localhost:11434"),
            ner_url: env_or("NER_URL", "http://localhost:8001"),
            document_store_url: env_or("DOCUMENT_STORE_URL", "http://localhost:9000"),
            embedding_model: env_or("EMBEDDING_MODEL", "mxbai-embed-large"),
            embedding_dimensions: env_parse("EMBEDDING_DIMENSIONS", 1024),
            llm_model: env_or("LLM_MODEL", "llama3.1"),
            collection_prefix: env_or("COLLECTION_PREFIX", "graphrag"),
            job_ttl: Duration::from_secs(env_parse("JOB_TTL_SECS", 172_800)),
            worker_pool_size: env_parse("WORKER_POOL_SIZE", 2),
            worker_queue_depth: env_parse("WORKER_QUEUE_DEPTH", 32),
            pipeline,
            query,
        }
    }
}
