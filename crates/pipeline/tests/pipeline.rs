use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use extract::{EntityExtractor, EntityMention, RawTriple, RelationshipExtractor};
use index::{Collections, Embedder, GraphStore, MemoryGraphStore, MemoryVectorStore, VectorStore};
use ingest::{ChunkerConfig, DocumentSource};
use jobstore::{JobStatus, JobStore, PayloadKind, Stage, StateError};
use pipeline::{Pipeline, PipelineConfig, PipelineError, RetryConfig};

const DOC: &str = "# Platform\n\nAlpha builds the Beta service for the analytics team to use every day.\n\nBeta stores every result in Gamma so analysts can retrieve them later.";

struct StaticSource;

#[async_trait]
impl DocumentSource for StaticSource {
    async fn fetch(&self, _document_ref: &str) -> Result<Vec<u8>> {
        Ok(DOC.as_bytes().to_vec())
    }
}

/// Finds configured names verbatim in the chunk text. `poison` makes
/// extraction fail for any chunk containing that substring.
struct KeywordEntityExtractor {
    keywords: Vec<(&'static str, &'static str)>,
    poison: Option<&'static str>,
}

impl KeywordEntityExtractor {
    fn good() -> Self {
        Self {
            keywords: vec![("Alpha", "TOOL"), ("Beta", "SERVICE"), ("Gamma", "DATABASE")],
            poison: None,
        }
    }
}

#[async_trait]
impl EntityExtractor for KeywordEntityExtractor {
    async fn extract_entities(&self, text: &str, _labels: &[String]) -> Result<Vec<EntityMention>> {
        if let Some(poison) = self.poison {
            if text.contains(poison) {
                anyhow::bail!("extractor unavailable");
            }
        }
        Ok(self
            .keywords
            .iter()
            .filter(|(name, _)| text.contains(name))
            .map(|(name, entity_type)| EntityMention {
                text: (*name).to_string(),
                entity_type: (*entity_type).to_string(),
                description: String::new(),
                score: 0.9,
            })
            .collect())
    }
}

struct KeywordRelationshipExtractor {
    triples: Vec<(&'static str, &'static str, &'static str)>,
}

impl KeywordRelationshipExtractor {
    fn good() -> Self {
        Self {
            triples: vec![("Alpha", "uses", "Beta"), ("Beta", "stores", "Gamma")],
        }
    }
}

#[async_trait]
impl RelationshipExtractor for KeywordRelationshipExtractor {
    async fn extract_relationships(
        &self,
        text: &str,
        _allowed_entities: &[String],
    ) -> Result<Vec<RawTriple>> {
        Ok(self
            .triples
            .iter()
            .filter(|(s, _, o)| text.contains(s) && text.contains(o))
            .map(|(s, p, o)| RawTriple {
                subject: (*s).to_string(),
                predicate: (*p).to_string(),
                object: (*o).to_string(),
            })
            .collect())
    }
}

struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let sum: u32 = text.bytes().map(u32::from).sum();
        Ok(vec![text.len() as f32, (sum % 97) as f32, 1.0, 0.5])
    }

    fn dimension(&self) -> usize {
        4
    }
}

struct Fixture {
    store: Arc<JobStore>,
    vectors: Arc<MemoryVectorStore>,
    graph: Arc<MemoryGraphStore>,
    collections: Collections,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: Arc::new(JobStore::new(Duration::from_secs(3600))),
            vectors: Arc::new(MemoryVectorStore::new()),
            graph: Arc::new(MemoryGraphStore::new()),
            collections: Collections::with_prefix("test"),
        }
    }

    fn pipeline(
        &self,
        entity_extractor: KeywordEntityExtractor,
        cleanup_payloads: bool,
    ) -> Pipeline {
        let config = PipelineConfig {
            chunker: ChunkerConfig {
                chunk_size: 40,
                chunk_overlap: 0,
            },
            entity_vocabulary: Vec::new(),
            predicate_vocabulary: Vec::new(),
            retry: RetryConfig {
                max_retries: 1,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
            },
            cleanup_payloads,
            ..PipelineConfig::default()
        };

        Pipeline::new(
            config,
            self.store.clone(),
            Arc::new(StaticSource),
            Arc::new(entity_extractor),
            Arc::new(KeywordRelationshipExtractor::good()),
            Arc::new(HashEmbedder),
            self.vectors.clone() as Arc<dyn VectorStore>,
            self.graph.clone() as Arc<dyn GraphStore>,
            self.collections.clone(),
        )
    }
}

#[tokio::test]
async fn full_run_populates_both_indexes() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(KeywordEntityExtractor::good(), true);

    let job = pipeline.create("bucket/platform.md");
    let job = pipeline.run_to_completion(&job.job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.stats.get("entities"), Some(&3));
    assert_eq!(job.stats.get("relationships"), Some(&2));

    assert_eq!(fixture.vectors.count(&fixture.collections.entities).await, 3);
    assert_eq!(
        fixture.vectors.count(&fixture.collections.relationships).await,
        2
    );
    assert!(fixture.vectors.count(&fixture.collections.chunks).await >= 2);

    let counts = fixture.graph.counts().await.unwrap();
    assert_eq!(counts.entity_count, 3);
    assert_eq!(counts.relationship_count, 2);

    // Payloads are cleaned up after the final stage; metadata survives.
    let chunks: Option<Vec<ingest::Chunk>> = fixture
        .store
        .load_payload(&job.job_id, PayloadKind::Chunks)
        .unwrap();
    assert!(chunks.is_none());
    assert!(fixture.store.get_job(&job.job_id).is_some());
}

#[tokio::test]
async fn reinvoking_a_completed_stage_is_a_noop() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(KeywordEntityExtractor::good(), false);

    let job = pipeline.create("doc");
    pipeline.run_to_completion(&job.job_id).await.unwrap();

    let report = pipeline.run_stage(&job.job_id, Stage::Chunking).await.unwrap();
    assert!(report.already_complete);

    let job = fixture.store.get_job(&job.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Complete);

    // The indexes were not written twice.
    assert_eq!(fixture.vectors.count(&fixture.collections.entities).await, 3);
}

#[tokio::test]
async fn out_of_order_stage_is_refused_without_side_effects() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(KeywordEntityExtractor::good(), false);

    let job = pipeline.create("doc");
    let err = pipeline
        .run_stage(&job.job_id, Stage::EntityExtraction)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::State(StateError::PreconditionFailed { .. })
    ));
    let job = fixture.store.get_job(&job.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Created);
    assert_eq!(job.running, None);
}

#[tokio::test]
async fn item_failures_are_reported_not_fatal() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(
        KeywordEntityExtractor {
            keywords: vec![("Alpha", "TOOL"), ("Beta", "SERVICE"), ("Gamma", "DATABASE")],
            poison: Some("Gamma"),
        },
        false,
    );

    let job = pipeline.create("doc");
    pipeline.run_stage(&job.job_id, Stage::Chunking).await.unwrap();
    let report = pipeline
        .run_stage(&job.job_id, Stage::EntityExtraction)
        .await
        .unwrap();

    assert_eq!(report.items_failed, 1);
    assert!(!report.failures.is_empty());

    let job = fixture.store.get_job(&job.job_id).unwrap();
    assert_eq!(job.status, JobStatus::EntitiesExtracted);
}

#[tokio::test]
async fn failed_stage_can_be_rerun_after_recovery() {
    let fixture = Fixture::new();
    let broken = fixture.pipeline(
        KeywordEntityExtractor {
            keywords: Vec::new(),
            poison: Some(""),
        },
        false,
    );

    let job = broken.create("doc");
    broken.run_stage(&job.job_id, Stage::Chunking).await.unwrap();
    let err = broken
        .run_stage(&job.job_id, Stage::EntityExtraction)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::StageFailed { .. }));

    let failed = fixture.store.get_job(&job.job_id).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.completed, JobStatus::Chunked);
    assert!(failed.error.is_some());

    // A healthy pipeline over the same job store picks the job back up.
    let healthy = fixture.pipeline(KeywordEntityExtractor::good(), false);
    let report = healthy
        .run_stage(&job.job_id, Stage::EntityExtraction)
        .await
        .unwrap();
    assert!(!report.already_complete);

    let job = fixture.store.get_job(&job.job_id).unwrap();
    assert_eq!(job.status, JobStatus::EntitiesExtracted);
    assert_eq!(job.error, None);
}
