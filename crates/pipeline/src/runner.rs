use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Context;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use extract::{
    Entity, EntityExtractor, EntityMention, RawTriple, Relationship, RelationshipExtractor,
    dedup_entities, resolve_relationships,
};
use index::{Collections, Embedder, GraphStore, VectorPoint, VectorStore, writer};
use ingest::{Chunk, Chunker, DocumentSource, generate_doc_id};
use jobstore::{Job, JobStore, PayloadKind, Stage, StateError};

use crate::config::PipelineConfig;
use crate::error::{ItemFailure, PipelineError, StageReport};
use crate::retry::RetryPolicy;

const STAGES: [Stage; 6] = [
    Stage::Chunking,
    Stage::EntityExtraction,
    Stage::RelationshipExtraction,
    Stage::ChunkVectorization,
    Stage::EntityVectorization,
    Stage::RelationshipVectorization,
];

/// The staged ingestion engine. Each stage is independently triggerable;
/// the job store's guards enforce ordering and single-flight execution.
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<JobStore>,
    source: Arc<dyn DocumentSource>,
    entity_extractor: Arc<dyn EntityExtractor>,
    relationship_extractor: Arc<dyn RelationshipExtractor>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    collections: Collections,
    retry: RetryPolicy,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        store: Arc<JobStore>,
        source: Arc<dyn DocumentSource>,
        entity_extractor: Arc<dyn EntityExtractor>,
        relationship_extractor: Arc<dyn RelationshipExtractor>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        collections: Collections,
    ) -> Self {
        let retry = RetryPolicy::new(&config.retry);
        Self {
            config,
            store,
            source,
            entity_extractor,
            relationship_extractor,
            embedder,
            vectors,
            graph,
            collections,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Mint a job for a document reference. No stage runs yet.
    pub fn create(&self, document_ref: &str) -> Job {
        let job_id = uuid::Uuid::new_v4().to_string();
        self.store.create_job(&job_id, document_ref)
    }

    /// Run every remaining stage in order. Stops at the first failure.
    pub async fn run_to_completion(&self, job_id: &str) -> Result<Job, PipelineError> {
        for stage in STAGES {
            self.run_stage(job_id, stage).await?;
        }
        self.store
            .get_job(job_id)
            .ok_or_else(|| StateError::NotFound(job_id.to_string()).into())
    }

    /// Run one stage under the job store's guards.
    ///
    /// An already-completed stage is a successful no-op. A guard refusal
    /// leaves the job untouched; a stage failure marks the job failed
    /// with the failed stage re-invocable.
    pub async fn run_stage(
        &self,
        job_id: &str,
        stage: Stage,
    ) -> Result<StageReport, PipelineError> {
        let job = match self.store.begin_stage(job_id, stage) {
            Ok(job) => job,
            Err(StateError::AlreadyCompleted { .. }) => {
                info!(job_id = %job_id, stage = stage.name(), "Stage already complete, no-op");
                return Ok(StageReport::noop(job_id, stage.name()));
            }
            Err(e) => return Err(e.into()),
        };

        info!(job_id = %job_id, stage = stage.name(), "Stage started");

        let result = match stage {
            Stage::Chunking => self.chunking(&job).await,
            Stage::EntityExtraction => self.entity_extraction(&job).await,
            Stage::RelationshipExtraction => self.relationship_extraction(&job).await,
            Stage::ChunkVectorization => self.chunk_vectorization(&job).await,
            Stage::EntityVectorization => self.entity_vectorization(&job).await,
            Stage::RelationshipVectorization => self.relationship_vectorization(&job).await,
        };

        match result {
            Ok(report) => {
                self.store.complete_stage(job_id, stage, &report.stats)?;
                if stage == Stage::RelationshipVectorization && self.config.cleanup_payloads {
                    self.store.delete_payloads(job_id);
                }
                info!(
                    job_id = %job_id,
                    stage = stage.name(),
                    items = report.items_processed,
                    failed = report.items_failed,
                    "Stage complete"
                );
                Ok(report)
            }
            Err(e) => {
                let message = format!("{e:#}");
                if let Err(state_err) = self.store.fail_stage(job_id, stage, &message) {
                    warn!(job_id = %job_id, error = %state_err, "Could not record stage failure");
                }
                Err(PipelineError::StageFailed {
                    stage: stage.name(),
                    message,
                })
            }
        }
    }

    fn require_payload<T: DeserializeOwned>(
        &self,
        job_id: &str,
        kind: PayloadKind,
        what: &str,
    ) -> anyhow::Result<T> {
        self.store
            .load_payload(job_id, kind)?
            .with_context(|| format!("{what} payload missing or expired"))
    }

    fn check_any_success(&self, attempted: usize, succeeded: usize) -> anyhow::Result<()> {
        if self.config.fail_on_zero_successes && attempted > 0 && succeeded == 0 {
            anyhow::bail!("all {attempted} items failed");
        }
        Ok(())
    }

    async fn chunking(&self, job: &Job) -> anyhow::Result<StageReport> {
        let bytes = self
            .retry
            .retry("fetch_document", || self.source.fetch(&job.document_ref))
            .await
            .context("document fetch failed")?;

        if bytes.len() > self.config.max_document_bytes {
            anyhow::bail!(
                "document is {} bytes, limit is {}",
                bytes.len(),
                self.config.max_document_bytes
            );
        }

        let text = String::from_utf8(bytes).context("document is not valid UTF-8")?;
        let doc_id = generate_doc_id(&job.document_ref);
        let chunks = Chunker::new(self.config.chunker.clone()).chunk(&doc_id, &text);

        self.store
            .save_payload(&job.job_id, PayloadKind::Chunks, &chunks)?;

        let count = chunks.len() as u64;
        Ok(StageReport {
            job_id: job.job_id.clone(),
            stage: Stage::Chunking.name(),
            already_complete: false,
            items_processed: count,
            items_failed: 0,
            failures: Vec::new(),
            stats: vec![("chunks", count)],
        })
    }

    async fn entity_extraction(&self, job: &Job) -> anyhow::Result<StageReport> {
        let chunks: Vec<Chunk> =
            self.require_payload(&job.job_id, PayloadKind::Chunks, "chunks")?;

        let semaphore = Arc::new(Semaphore::new(self.config.stage_concurrency));
        let mut join_set: JoinSet<(String, Result<Vec<EntityMention>, String>)> = JoinSet::new();

        for chunk in &chunks {
            let semaphore = semaphore.clone();
            let extractor = self.entity_extractor.clone();
            let labels = self.config.entity_vocabulary.clone();
            let retry = self.retry.clone();
            let chunk_id = chunk.chunk_id.clone();
            let text = chunk.text.clone();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                let result = retry
                    .retry("extract_entities", || {
                        extractor.extract_entities(&text, &labels)
                    })
                    .await
                    .map_err(|e| format!("{e:#}"));
                (chunk_id, result)
            });
        }

        let mut by_chunk: HashMap<String, Vec<EntityMention>> = HashMap::new();
        let mut failures = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (chunk_id, result) = joined.context("extraction task panicked")?;
            match result {
                Ok(mentions) => {
                    by_chunk.insert(chunk_id, mentions);
                }
                Err(error) => failures.push(ItemFailure {
                    item_id: chunk_id,
                    error,
                }),
            }
        }

        self.check_any_success(chunks.len(), by_chunk.len())?;

        // Rebuild in chunk order so the dedup output is independent of
        // task completion order.
        let mut mentions: Vec<(String, EntityMention)> = Vec::new();
        for chunk in &chunks {
            if let Some(chunk_mentions) = by_chunk.remove(&chunk.chunk_id) {
                for mention in chunk_mentions {
                    mentions.push((chunk.chunk_id.clone(), mention));
                }
            }
        }

        let mention_count = mentions.len() as u64;
        let entities = dedup_entities(
            &mentions,
            self.config.confidence_threshold,
            &self.config.entity_vocabulary,
        );
        self.store
            .save_payload(&job.job_id, PayloadKind::Entities, &entities)?;

        let entity_count = entities.len() as u64;
        Ok(StageReport {
            job_id: job.job_id.clone(),
            stage: Stage::EntityExtraction.name(),
            already_complete: false,
            items_processed: chunks.len() as u64,
            items_failed: failures.len() as u64,
            failures,
            stats: vec![("entities", entity_count), ("mentions", mention_count)],
        })
    }

    async fn relationship_extraction(&self, job: &Job) -> anyhow::Result<StageReport> {
        let chunks: Vec<Chunk> =
            self.require_payload(&job.job_id, PayloadKind::Chunks, "chunks")?;
        let entities: Vec<Entity> =
            self.require_payload(&job.job_id, PayloadKind::Entities, "entities")?;

        // Relationships are only asked for where at least two entities
        // co-occur; the prompt is constrained to that chunk's names.
        let mut names_by_chunk: HashMap<&str, Vec<String>> = HashMap::new();
        for entity in &entities {
            for chunk_id in &entity.originating_chunk_ids {
                names_by_chunk
                    .entry(chunk_id.as_str())
                    .or_default()
                    .push(entity.name.clone());
            }
        }

        let eligible: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| names_by_chunk.get(c.chunk_id.as_str()).is_some_and(|n| n.len() >= 2))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.stage_concurrency));
        let mut join_set: JoinSet<(String, Result<Vec<RawTriple>, String>)> = JoinSet::new();

        for chunk in &eligible {
            let semaphore = semaphore.clone();
            let extractor = self.relationship_extractor.clone();
            let retry = self.retry.clone();
            let chunk_id = chunk.chunk_id.clone();
            let text = chunk.text.clone();
            let names = names_by_chunk[chunk.chunk_id.as_str()].clone();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                let result = retry
                    .retry("extract_relationships", || {
                        extractor.extract_relationships(&text, &names)
                    })
                    .await
                    .map_err(|e| format!("{e:#}"));
                (chunk_id, result)
            });
        }

        let mut by_chunk: HashMap<String, Vec<RawTriple>> = HashMap::new();
        let mut failures = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (chunk_id, result) = joined.context("extraction task panicked")?;
            match result {
                Ok(triples) => {
                    by_chunk.insert(chunk_id, triples);
                }
                Err(error) => failures.push(ItemFailure {
                    item_id: chunk_id,
                    error,
                }),
            }
        }

        self.check_any_success(eligible.len(), by_chunk.len())?;

        let mut triples: Vec<(String, RawTriple)> = Vec::new();
        for chunk in &chunks {
            if let Some(chunk_triples) = by_chunk.remove(&chunk.chunk_id) {
                for triple in chunk_triples {
                    triples.push((chunk.chunk_id.clone(), triple));
                }
            }
        }

        let (relationships, dropped) =
            resolve_relationships(&triples, &entities, &self.config.predicate_vocabulary);
        self.store
            .save_payload(&job.job_id, PayloadKind::Relationships, &relationships)?;

        let relationship_count = relationships.len() as u64;
        Ok(StageReport {
            job_id: job.job_id.clone(),
            stage: Stage::RelationshipExtraction.name(),
            already_complete: false,
            items_processed: eligible.len() as u64,
            items_failed: failures.len() as u64,
            failures,
            stats: vec![
                ("relationships", relationship_count),
                ("dropped_triples", dropped as u64),
            ],
        })
    }

    async fn embed_items(
        &self,
        operation: &'static str,
        items: Vec<(String, String)>,
    ) -> anyhow::Result<(HashMap<String, Vec<f32>>, Vec<ItemFailure>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.stage_concurrency));
        let mut join_set: JoinSet<(String, Result<Vec<f32>, String>)> = JoinSet::new();

        for (item_id, text) in items {
            let semaphore = semaphore.clone();
            let embedder = self.embedder.clone();
            let retry = self.retry.clone();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                let result = retry
                    .retry(operation, || embedder.embed(&text))
                    .await
                    .map_err(|e| format!("{e:#}"));
                (item_id, result)
            });
        }

        let mut vectors = HashMap::new();
        let mut failures = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (item_id, result) = joined.context("embedding task panicked")?;
            match result {
                Ok(vector) => {
                    vectors.insert(item_id, vector);
                }
                Err(error) => failures.push(ItemFailure {
                    item_id,
                    error,
                }),
            }
        }

        Ok((vectors, failures))
    }

    async fn chunk_vectorization(&self, job: &Job) -> anyhow::Result<StageReport> {
        let chunks: Vec<Chunk> =
            self.require_payload(&job.job_id, PayloadKind::Chunks, "chunks")?;
        let entities: Vec<Entity> =
            self.require_payload(&job.job_id, PayloadKind::Entities, "entities")?;
        let relationships: Vec<Relationship> =
            self.require_payload(&job.job_id, PayloadKind::Relationships, "relationships")?;

        self.vectors
            .ensure_collection(&self.collections.chunks, self.embedder.dimension())
            .await?;

        let items = chunks
            .iter()
            .map(|c| (c.chunk_id.clone(), c.text.clone()))
            .collect();
        let (mut vectors, failures) = self.embed_items("embed_chunk", items).await?;
        self.check_any_success(chunks.len(), vectors.len())?;

        let names_by_id: HashMap<&str, &str> = entities
            .iter()
            .map(|e| (e.entity_id.as_str(), e.name.as_str()))
            .collect();

        let mut points = Vec::new();
        for chunk in &chunks {
            let Some(vector) = vectors.remove(&chunk.chunk_id) else {
                continue;
            };

            let entity_names: Vec<String> = entities
                .iter()
                .filter(|e| e.originating_chunk_ids.contains(&chunk.chunk_id))
                .map(|e| e.name.clone())
                .collect();
            let relationship_summaries: Vec<String> = relationships
                .iter()
                .filter(|r| r.originating_chunk_id == chunk.chunk_id)
                .map(|r| {
                    writer::relationship_text(
                        names_by_id.get(r.subject_entity_id.as_str()).copied().unwrap_or(""),
                        &r.predicate,
                        names_by_id.get(r.object_entity_id.as_str()).copied().unwrap_or(""),
                    )
                })
                .collect();

            points.push(writer::chunk_point(
                chunk,
                vector,
                &entity_names,
                &relationship_summaries,
            ));
        }

        let stored = points.len() as u64;
        self.vectors
            .upsert(&self.collections.chunks, points)
            .await
            .context("chunk vector upsert failed")?;

        Ok(StageReport {
            job_id: job.job_id.clone(),
            stage: Stage::ChunkVectorization.name(),
            already_complete: false,
            items_processed: chunks.len() as u64,
            items_failed: failures.len() as u64,
            failures,
            stats: vec![("chunk_vectors", stored)],
        })
    }

    async fn entity_vectorization(&self, job: &Job) -> anyhow::Result<StageReport> {
        let entities: Vec<Entity> =
            self.require_payload(&job.job_id, PayloadKind::Entities, "entities")?;

        self.vectors
            .ensure_collection(&self.collections.entities, self.embedder.dimension())
            .await?;

        let items = entities
            .iter()
            .map(|e| (e.entity_id.clone(), writer::entity_text(e)))
            .collect();
        let (mut vectors, mut failures) = self.embed_items("embed_entity", items).await?;
        self.check_any_success(entities.len(), vectors.len())?;

        let mut points = Vec::new();
        let mut nodes_written = 0u64;
        for entity in &entities {
            let Some(vector) = vectors.remove(&entity.entity_id) else {
                continue;
            };
            points.push(writer::entity_point(entity, vector));

            if self.config.store_graph {
                let merged = self
                    .retry
                    .retry("merge_entity", || self.graph.merge_entity(entity))
                    .await;
                match merged {
                    Ok(()) => nodes_written += 1,
                    Err(e) => failures.push(ItemFailure {
                        item_id: entity.entity_id.clone(),
                        error: format!("graph merge: {e:#}"),
                    }),
                }
            }
        }

        let stored = points.len() as u64;
        self.vectors
            .upsert(&self.collections.entities, points)
            .await
            .context("entity vector upsert failed")?;

        Ok(StageReport {
            job_id: job.job_id.clone(),
            stage: Stage::EntityVectorization.name(),
            already_complete: false,
            items_processed: entities.len() as u64,
            items_failed: failures.len() as u64,
            failures,
            stats: vec![("entity_vectors", stored), ("graph_nodes", nodes_written)],
        })
    }

    async fn relationship_vectorization(&self, job: &Job) -> anyhow::Result<StageReport> {
        let entities: Vec<Entity> =
            self.require_payload(&job.job_id, PayloadKind::Entities, "entities")?;
        let relationships: Vec<Relationship> =
            self.require_payload(&job.job_id, PayloadKind::Relationships, "relationships")?;

        self.vectors
            .ensure_collection(&self.collections.relationships, self.embedder.dimension())
            .await?;

        let names_by_id: BTreeMap<&str, &str> = entities
            .iter()
            .map(|e| (e.entity_id.as_str(), e.name.as_str()))
            .collect();

        let items = relationships
            .iter()
            .map(|r| {
                let text = writer::relationship_text(
                    names_by_id.get(r.subject_entity_id.as_str()).copied().unwrap_or(""),
                    &r.predicate,
                    names_by_id.get(r.object_entity_id.as_str()).copied().unwrap_or(""),
                );
                (r.relationship_id.clone(), text)
            })
            .collect();
        let (mut vectors, mut failures) = self.embed_items("embed_relationship", items).await?;
        self.check_any_success(relationships.len(), vectors.len())?;

        let mut points = Vec::new();
        let mut edges_written = 0u64;
        for relationship in &relationships {
            let Some(vector) = vectors.remove(&relationship.relationship_id) else {
                continue;
            };
            points.push(writer::relationship_point(
                relationship,
                names_by_id
                    .get(relationship.subject_entity_id.as_str())
                    .copied().unwrap_or(""),
                names_by_id
                    .get(relationship.object_entity_id.as_str())
                    .copied().unwrap_or(""),
                vector,
            ));

            if self.config.store_graph {
                let merged = self
                    .retry
                    .retry("merge_relationship", || {
                        self.graph.merge_relationship(relationship)
                    })
                    .await;
                match merged {
                    Ok(()) => edges_written += 1,
                    Err(e) => failures.push(ItemFailure {
                        item_id: relationship.relationship_id.clone(),
                        error: format!("graph merge: {e:#}"),
                    }),
                }
            }
        }

        let stored = points.len() as u64;
        self.vectors
            .upsert(&self.collections.relationships, points)
            .await
            .context("relationship vector upsert failed")?;

        Ok(StageReport {
            job_id: job.job_id.clone(),
            stage: Stage::RelationshipVectorization.name(),
            already_complete: false,
            items_processed: relationships.len() as u64,
            items_failed: failures.len() as u64,
            failures,
            stats: vec![
                ("relationship_vectors", stored),
                ("graph_edges", edges_written),
            ],
        })
    }
}
