use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::warn;

use index::GraphStore;
use jobstore::{Job, JobStore, Stage};
use pipeline::Pipeline;
use query::{ContextItem, HybridSearchEngine, QueryOptions};

use crate::metrics::{Metrics, MetricsSnapshot};
use crate::worker::WorkerPool;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub engine: Arc<HybridSearchEngine>,
    pub store: Arc<JobStore>,
    pub graph: Arc<dyn GraphStore>,
    pub workers: Arc<WorkerPool>,
    pub metrics: Arc<Metrics>,
    pub qdrant_url: String,
    pub default_query_options: QueryOptions,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/pipeline/process", post(process_document))
        .route("/pipeline/chunk", post(chunk_document))
        .route("/pipeline/extract-entities", post(extract_entities))
        .route("/pipeline/extract-relationships", post(extract_relationships))
        .route("/pipeline/vectorize-chunks", post(vectorize_chunks))
        .route("/pipeline/vectorize-entities", post(vectorize_entities))
        .route(
            "/pipeline/vectorize-relationships",
            post(vectorize_relationships),
        )
        .route("/pipeline/status/:job_id", get(job_status))
        .route("/pipeline/jobs", get(list_jobs))
        .route("/pipeline/job/:job_id", delete(delete_job))
        .route("/query/hybrid", post(hybrid_query))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

#[derive(Deserialize)]
struct DocumentRequest {
    document_ref: String,
}

#[derive(Deserialize)]
struct JobRequest {
    job_id: String,
}

#[derive(Serialize)]
struct AcceptedResponse {
    job_id: String,
    stage: &'static str,
    accepted: bool,
}

/// Start a job and run every stage in the background.
async fn process_document(
    State(state): State<AppState>,
    Json(req): Json<DocumentRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let job = state.pipeline.create(&req.document_ref);
    let job_id = job.job_id.clone();

    let pipeline = state.pipeline.clone();
    let task_job_id = job_id.clone();
    let submitted = state.workers.try_submit(async move {
        if let Err(e) = pipeline.run_to_completion(&task_job_id).await {
            warn!(job_id = %task_job_id, error = %e, "Pipeline run stopped");
        }
    });

    if submitted.is_err() {
        state.store.delete_job(&job_id);
        state.metrics.record_request(false);
        return Err(error(StatusCode::SERVICE_UNAVAILABLE, "worker queue is full"));
    }

    state.metrics.record_request(true);
    state.metrics.record_job_submitted();
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            job_id,
            stage: "all",
            accepted: true,
        }),
    ))
}

/// Stage 1 mints the job; the remaining stage triggers take a job id.
async fn chunk_document(
    State(state): State<AppState>,
    Json(req): Json<DocumentRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let job = state.pipeline.create(&req.document_ref);
    let job_id = job.job_id.clone();

    let pipeline = state.pipeline.clone();
    let task_job_id = job_id.clone();
    let submitted = state.workers.try_submit(async move {
        if let Err(e) = pipeline.run_stage(&task_job_id, Stage::Chunking).await {
            warn!(job_id = %task_job_id, error = %e, "Stage trigger failed");
        }
    });

    if submitted.is_err() {
        state.store.delete_job(&job_id);
        state.metrics.record_request(false);
        return Err(error(StatusCode::SERVICE_UNAVAILABLE, "worker queue is full"));
    }

    state.metrics.record_request(true);
    state.metrics.record_job_submitted();
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            job_id,
            stage: Stage::Chunking.name(),
            accepted: true,
        }),
    ))
}

async fn trigger_stage(
    state: AppState,
    job_id: String,
    stage: Stage,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    if state.store.get_job(&job_id).is_none() {
        state.metrics.record_request(false);
        return Err(error(
            StatusCode::NOT_FOUND,
            format!("job {job_id} not found"),
        ));
    }

    let pipeline = state.pipeline.clone();
    let task_job_id = job_id.clone();
    let submitted = state.workers.try_submit(async move {
        if let Err(e) = pipeline.run_stage(&task_job_id, stage).await {
            warn!(job_id = %task_job_id, stage = stage.name(), error = %e, "Stage trigger failed");
        }
    });

    if submitted.is_err() {
        state.metrics.record_request(false);
        return Err(error(StatusCode::SERVICE_UNAVAILABLE, "worker queue is full"));
    }

    state.metrics.record_request(true);
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            job_id,
            stage: stage.name(),
            accepted: true,
        }),
    ))
}

async fn extract_entities(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    trigger_stage(state, req.job_id, Stage::EntityExtraction).await
}

async fn extract_relationships(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    trigger_stage(state, req.job_id, Stage::RelationshipExtraction).await
}

async fn vectorize_chunks(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    trigger_stage(state, req.job_id, Stage::ChunkVectorization).await
}

async fn vectorize_entities(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    trigger_stage(state, req.job_id, Stage::EntityVectorization).await
}

async fn vectorize_relationships(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    trigger_stage(state, req.job_id, Stage::RelationshipVectorization).await
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    match state.store.get_job(&job_id) {
        Some(job) => Ok(Json(job)),
        None => Err(error(
            StatusCode::NOT_FOUND,
            format!("job {job_id} not found"),
        )),
    }
}

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.store.list_jobs())
}

async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.store.delete_job(&job_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(error(
            StatusCode::NOT_FOUND,
            format!("job {job_id} not found"),
        ))
    }
}

#[derive(Deserialize)]
struct HybridQueryRequest {
    query: String,
    top_k_vector: Option<usize>,
    top_k_graph: Option<usize>,
    rerank_top_k: Option<usize>,
}

#[derive(Serialize)]
struct HybridQueryResponse {
    query: String,
    items: Vec<ContextItem>,
    context: String,
    degraded: bool,
    vector_hits: usize,
    graph_hits: usize,
}

async fn hybrid_query(
    State(state): State<AppState>,
    Json(req): Json<HybridQueryRequest>,
) -> Result<Json<HybridQueryResponse>, ApiError> {
    let defaults = &state.default_query_options;
    let options = QueryOptions {
        top_k_vector: req.top_k_vector.unwrap_or(defaults.top_k_vector),
        top_k_graph: req.top_k_graph.unwrap_or(defaults.top_k_graph),
        rerank_top_k: req.rerank_top_k.unwrap_or(defaults.rerank_top_k),
    };

    let started = Instant::now();
    let result = state.engine.search(&req.query, &options).await.map_err(|e| {
        state.metrics.record_request(false);
        error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
    })?;

    state.metrics.record_request(true);
    state.metrics.record_query(started.elapsed(), result.degraded);

    Ok(Json(HybridQueryResponse {
        query: req.query,
        context: result.context_block(),
        items: result.items,
        degraded: result.degraded,
        vector_hits: result.vector_hits,
        graph_hits: result.graph_hits,
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    qdrant: String,
    neo4j: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let qdrant = match reqwest::get(&state.qdrant_url).await {
        Ok(resp) if resp.status().is_success() => "ok".to_string(),
        Ok(resp) => format!("error: status {}", resp.status()),
        Err(e) => format!("error: {e}"),
    };

    let neo4j = match state.graph.counts().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {e:#}"),
    };

    Json(HealthResponse { qdrant, neo4j })
}

#[derive(Serialize)]
struct StatsResponse {
    entity_count: usize,
    relationship_count: usize,
    active_jobs: usize,
    metrics: MetricsSnapshot,
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let counts = state
        .graph
        .counts()
        .await
        .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;

    Ok(Json(StatsResponse {
        entity_count: counts.entity_count,
        relationship_count: counts.relationship_count,
        active_jobs: state.store.list_jobs().len(),
        metrics: state.metrics.snapshot(),
    }))
}
