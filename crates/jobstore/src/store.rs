use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::job::{Job, Stage, StateError};

/// Stage outputs cached between pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Chunks,
    Entities,
    Relationships,
}

impl PayloadKind {
    fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Chunks => "chunks",
            PayloadKind::Entities => "entities",
            PayloadKind::Relationships => "relationships",
        }
    }

    const ALL: [PayloadKind; 3] = [
        PayloadKind::Chunks,
        PayloadKind::Entities,
        PayloadKind::Relationships,
    ];
}

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-memory job state with Redis-like semantics: JSON values under
/// `job:{id}:{kind}` keys, each with its own expiry, refreshed on write.
///
/// Read-modify-write of a job's metadata happens while holding the map's
/// per-key entry guard, which is the atomic check-and-set the status
/// machine relies on: two concurrent invocations of the same stage
/// serialize on the guard and the loser sees `AlreadyRunning`.
pub struct JobStore {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl JobStore {
    /// `ttl` is the retention window for job records and stage payloads
    /// (default deployment value: 48 hours).
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(48)),
        }
    }

    fn metadata_key(job_id: &str) -> String {
        format!("job:{job_id}:metadata")
    }

    fn payload_key(job_id: &str, kind: PayloadKind) -> String {
        format!("job:{job_id}:{}", kind.as_str())
    }

    fn put(&self, key: String, value: String) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Utc::now() + self.ttl,
            },
        );
    }

    fn get_live(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if Utc::now() < entry.expires_at => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn create_job(&self, job_id: &str, document_ref: &str) -> Job {
        let job = Job::new(job_id.to_string(), document_ref.to_string());
        let serialized = serde_json::to_string(&job).expect("job serializes");
        self.put(Self::metadata_key(job_id), serialized);
        info!(job_id = %job_id, document_ref = %document_ref, "Created job");
        job
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        let raw = self.get_live(&Self::metadata_key(job_id))?;
        serde_json::from_str(&raw).ok()
    }

    /// Apply `f` to the job under the entry guard. The stored value is
    /// replaced (and its TTL refreshed) only if `f` succeeds.
    fn with_job<R>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut Job) -> Result<R, StateError>,
    ) -> Result<R, StateError> {
        let key = Self::metadata_key(job_id);
        let mut entry = self
            .entries
            .get_mut(&key)
            .ok_or_else(|| StateError::NotFound(job_id.to_string()))?;

        if Utc::now() >= entry.expires_at {
            drop(entry);
            self.entries.remove(&key);
            return Err(StateError::NotFound(job_id.to_string()));
        }

        let mut job: Job = serde_json::from_str(&entry.value)?;
        let result = f(&mut job)?;

        job.updated_at = Utc::now();
        entry.value = serde_json::to_string(&job)?;
        entry.expires_at = job.updated_at + self.ttl;

        Ok(result)
    }

    /// Guard a stage invocation. Exactly one caller wins; everyone else
    /// gets a typed refusal:
    /// - target status already reached       -> `AlreadyCompleted` (no-op)
    /// - another stage in flight             -> `AlreadyRunning`
    /// - predecessor stage not completed yet -> `PreconditionFailed`
    pub fn begin_stage(&self, job_id: &str, stage: Stage) -> Result<Job, StateError> {
        self.with_job(job_id, |job| {
            if job.completed >= stage.completed_status() {
                return Err(StateError::AlreadyCompleted {
                    stage: stage.name(),
                    status: job.completed,
                });
            }
            if let Some(running) = job.running {
                return Err(StateError::AlreadyRunning {
                    running: running.name(),
                });
            }
            if job.completed != stage.required_predecessor() {
                return Err(StateError::PreconditionFailed {
                    stage: stage.name(),
                    required: stage.required_predecessor(),
                    actual: job.completed,
                });
            }

            job.running = Some(stage);
            Ok(job.clone())
        })
    }

    pub fn complete_stage(
        &self,
        job_id: &str,
        stage: Stage,
        stats: &[(&str, u64)],
    ) -> Result<Job, StateError> {
        self.with_job(job_id, |job| {
            job.status = stage.completed_status();
            job.completed = job.completed.max(stage.completed_status());
            job.running = None;
            job.error = None;
            for (key, value) in stats {
                job.stats.insert((*key).to_string(), *value);
            }
            debug!(job_id = %job.job_id, stage = stage.name(), status = ?job.status, "Stage complete");
            Ok(job.clone())
        })
    }

    /// Mark the job failed. `completed` is left at the predecessor so
    /// re-invoking the failed stage is the one legal recovery path.
    pub fn fail_stage(&self, job_id: &str, stage: Stage, error: &str) -> Result<Job, StateError> {
        self.with_job(job_id, |job| {
            job.status = crate::job::JobStatus::Failed;
            job.running = None;
            job.error = Some(format!("{}: {}", stage.name(), error));
            Ok(job.clone())
        })
    }

    pub fn save_payload<T: Serialize>(
        &self,
        job_id: &str,
        kind: PayloadKind,
        payload: &T,
    ) -> Result<(), StateError> {
        let serialized = serde_json::to_string(payload)?;
        self.put(Self::payload_key(job_id, kind), serialized);
        Ok(())
    }

    pub fn load_payload<T: DeserializeOwned>(
        &self,
        job_id: &str,
        kind: PayloadKind,
    ) -> Result<Option<T>, StateError> {
        match self.get_live(&Self::payload_key(job_id, kind)) {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Early cleanup once vectorization no longer needs the cached
    /// payloads. Metadata stays until its TTL or an explicit delete.
    pub fn delete_payloads(&self, job_id: &str) {
        for kind in PayloadKind::ALL {
            self.entries.remove(&Self::payload_key(job_id, kind));
        }
    }

    pub fn delete_job(&self, job_id: &str) -> bool {
        let existed = self.entries.remove(&Self::metadata_key(job_id)).is_some();
        self.delete_payloads(job_id);
        if existed {
            info!(job_id = %job_id, "Deleted job");
        }
        existed
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        let now = Utc::now();
        let mut jobs: Vec<Job> = self
            .entries
            .iter()
            .filter(|e| e.key().ends_with(":metadata") && now < e.expires_at)
            .filter_map(|e| serde_json::from_str(&e.value).ok())
            .collect();
        jobs.sort_by(|a: &Job, b: &Job| a.created_at.cmp(&b.created_at));
        jobs
    }

    /// Drop every expired key. Reads already skip expired entries; this
    /// reclaims the memory.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use std::time::Duration as StdDuration;

    fn store() -> JobStore {
        JobStore::new(StdDuration::from_secs(3600))
    }

    #[test]
    fn create_and_get_roundtrip() {
        let store = store();
        store.create_job("j1", "bucket/doc.md");

        let job = store.get_job("j1").unwrap();
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.document_ref, "bucket/doc.md");
    }

    #[test]
    fn stage_lifecycle_advances_status() {
        let store = store();
        store.create_job("j1", "doc");

        store.begin_stage("j1", Stage::Chunking).unwrap();
        let job = store.get_job("j1").unwrap();
        assert_eq!(job.running, Some(Stage::Chunking));

        store
            .complete_stage("j1", Stage::Chunking, &[("chunks", 3)])
            .unwrap();
        let job = store.get_job("j1").unwrap();
        assert_eq!(job.status, JobStatus::Chunked);
        assert_eq!(job.completed, JobStatus::Chunked);
        assert_eq!(job.running, None);
        assert_eq!(job.stats.get("chunks"), Some(&3));
    }

    #[test]
    fn out_of_order_stage_is_precondition_failed() {
        let store = store();
        store.create_job("j1", "doc");

        let err = store
            .begin_stage("j1", Stage::RelationshipExtraction)
            .unwrap_err();
        assert!(matches!(err, StateError::PreconditionFailed { .. }));

        // Status unchanged by the refused invocation.
        let job = store.get_job("j1").unwrap();
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.running, None);
    }

    #[test]
    fn completed_stage_reinvocation_is_already_completed() {
        let store = store();
        store.create_job("j1", "doc");
        store.begin_stage("j1", Stage::Chunking).unwrap();
        store.complete_stage("j1", Stage::Chunking, &[]).unwrap();

        let before = store.get_job("j1").unwrap().updated_at;
        let err = store.begin_stage("j1", Stage::Chunking).unwrap_err();
        assert!(matches!(err, StateError::AlreadyCompleted { .. }));

        // A refused begin must not touch the record.
        assert_eq!(store.get_job("j1").unwrap().updated_at, before);
    }

    #[test]
    fn concurrent_invocation_sees_already_running() {
        let store = store();
        store.create_job("j1", "doc");
        store.begin_stage("j1", Stage::Chunking).unwrap();

        let err = store.begin_stage("j1", Stage::Chunking).unwrap_err();
        assert!(matches!(err, StateError::AlreadyRunning { .. }));
    }

    #[test]
    fn failed_stage_can_be_reinvoked() {
        let store = store();
        store.create_job("j1", "doc");
        store.begin_stage("j1", Stage::Chunking).unwrap();
        store.complete_stage("j1", Stage::Chunking, &[]).unwrap();

        store.begin_stage("j1", Stage::EntityExtraction).unwrap();
        store
            .fail_stage("j1", Stage::EntityExtraction, "extractor unavailable")
            .unwrap();

        let job = store.get_job("j1").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.completed, JobStatus::Chunked);
        assert!(job.error.as_deref().unwrap().contains("extractor unavailable"));

        // Reprocessing the failed stage is legal; skipping ahead is not.
        let err = store
            .begin_stage("j1", Stage::RelationshipExtraction)
            .unwrap_err();
        assert!(matches!(err, StateError::PreconditionFailed { .. }));

        store.begin_stage("j1", Stage::EntityExtraction).unwrap();
        store
            .complete_stage("j1", Stage::EntityExtraction, &[])
            .unwrap();
        let job = store.get_job("j1").unwrap();
        assert_eq!(job.status, JobStatus::EntitiesExtracted);
        assert_eq!(job.error, None);
    }

    #[test]
    fn payload_roundtrip_and_cleanup() {
        let store = store();
        store.create_job("j1", "doc");

        store
            .save_payload("j1", PayloadKind::Chunks, &vec!["a".to_string(), "b".to_string()])
            .unwrap();
        let chunks: Option<Vec<String>> = store.load_payload("j1", PayloadKind::Chunks).unwrap();
        assert_eq!(chunks.unwrap().len(), 2);

        store.delete_payloads("j1");
        let chunks: Option<Vec<String>> = store.load_payload("j1", PayloadKind::Chunks).unwrap();
        assert!(chunks.is_none());
        // Metadata survives payload cleanup.
        assert!(store.get_job("j1").is_some());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let store = JobStore::new(StdDuration::from_millis(20));
        store.create_job("j1", "doc");
        assert!(store.get_job("j1").is_some());

        std::thread::sleep(StdDuration::from_millis(40));
        assert!(store.get_job("j1").is_none());
        assert_eq!(store.purge_expired(), 0); // get_job already evicted it
    }

    #[test]
    fn list_and_delete() {
        let store = store();
        store.create_job("j1", "doc1");
        store.create_job("j2", "doc2");

        assert_eq!(store.list_jobs().len(), 2);
        assert!(store.delete_job("j1"));
        assert!(!store.delete_job("j1"));
        assert_eq!(store.list_jobs().len(), 1);
    }
}
