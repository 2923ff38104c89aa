use jobstore::StateError;
use serde::Serialize;

/// One item (chunk, entity, relationship) that exhausted its retries.
/// Item failures are reported, not fatal.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub item_id: String,
    pub error: String,
}

/// What a stage invocation accomplished.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub job_id: String,
    pub stage: &'static str,
    /// True when the stage had already completed and this invocation
    /// was a no-op.
    pub already_complete: bool,
    pub items_processed: u64,
    pub items_failed: u64,
    pub failures: Vec<ItemFailure>,
    #[serde(skip)]
    pub stats: Vec<(&'static str, u64)>,
}

impl StageReport {
    pub fn noop(job_id: &str, stage: &'static str) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage,
            already_complete: true,
            items_processed: 0,
            items_failed: 0,
            failures: Vec::new(),
            stats: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Guard refusal or missing job; the job record is untouched.
    #[error(transparent)]
    State(#[from] StateError),

    /// The stage ran and failed; the job is marked failed.
    #[error("stage {stage} failed: {message}")]
    StageFailed {
        stage: &'static str,
        message: String,
    },
}
