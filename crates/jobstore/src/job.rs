use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a job sits in the pipeline.
///
/// The ordering is the pipeline order; `Failed` is absorbing and is never
/// stored in a job's `completed` high-water mark, so ordinal comparisons
/// are only ever made between the forward states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Chunked,
    EntitiesExtracted,
    RelationshipsExtracted,
    ChunksVectorized,
    EntitiesVectorized,
    Complete,
    Failed,
}

/// One independently-triggerable pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Chunking,
    EntityExtraction,
    RelationshipExtraction,
    ChunkVectorization,
    EntityVectorization,
    RelationshipVectorization,
}

impl Stage {
    /// Status the job must have completed before this stage may run.
    pub fn required_predecessor(&self) -> JobStatus {
        match self {
            Stage::Chunking => JobStatus::Created,
            Stage::EntityExtraction => JobStatus::Chunked,
            Stage::RelationshipExtraction => JobStatus::EntitiesExtracted,
            Stage::ChunkVectorization => JobStatus::RelationshipsExtracted,
            Stage::EntityVectorization => JobStatus::ChunksVectorized,
            Stage::RelationshipVectorization => JobStatus::EntitiesVectorized,
        }
    }

    /// Status the job reaches when this stage completes.
    pub fn completed_status(&self) -> JobStatus {
        match self {
            Stage::Chunking => JobStatus::Chunked,
            Stage::EntityExtraction => JobStatus::EntitiesExtracted,
            Stage::RelationshipExtraction => JobStatus::RelationshipsExtracted,
            Stage::ChunkVectorization => JobStatus::ChunksVectorized,
            Stage::EntityVectorization => JobStatus::EntitiesVectorized,
            Stage::RelationshipVectorization => JobStatus::Complete,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Chunking => "chunking",
            Stage::EntityExtraction => "entity_extraction",
            Stage::RelationshipExtraction => "relationship_extraction",
            Stage::ChunkVectorization => "chunk_vectorization",
            Stage::EntityVectorization => "entity_vectorization",
            Stage::RelationshipVectorization => "relationship_vectorization",
        }
    }
}

/// One pipeline run over one document.
///
/// `status` is what callers see and may be `Failed`; `completed` is the
/// forward-only high-water mark of finished stages and is what stage
/// guards check. Keeping them separate is what makes re-invoking a failed
/// stage legal while everything else stays out of order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub document_ref: String,
    pub status: JobStatus,
    pub completed: JobStatus,
    pub running: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
    pub stats: BTreeMap<String, u64>,
}

impl Job {
    pub fn new(job_id: String, document_ref: String) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            document_ref,
            status: JobStatus::Created,
            completed: JobStatus::Created,
            running: None,
            created_at: now,
            updated_at: now,
            error: None,
            stats: BTreeMap::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("stage {stage} requires status {required:?}, job is at {actual:?}")]
    PreconditionFailed {
        stage: &'static str,
        required: JobStatus,
        actual: JobStatus,
    },

    #[error("stage {stage} already completed (job at {status:?})")]
    AlreadyCompleted {
        stage: &'static str,
        status: JobStatus,
    },

    #[error("job already has stage {running} running")]
    AlreadyRunning { running: &'static str },

    #[error("corrupt job store value: {0}")]
    Corrupt(#[from] serde_json::Error),
}
