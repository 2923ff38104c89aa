mod config;
mod metrics;
mod routes;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use extract::{NerHttpClient, OllamaRelationshipClient};
use index::{Collections, Embedder, GraphStore, Neo4jStore, OllamaEmbedder, QdrantStore, VectorStore};
use ingest::HttpDocumentSource;
use jobstore::JobStore;
use pipeline::Pipeline;
use query::HybridSearchEngine;

use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::routes::AppState;
use crate::worker::WorkerPool;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env();
    info!(bind_addr = %config.bind_addr, "Starting server");

    let neo4j = neo4rs::Graph::new(
        &config.neo4j_uri,
        &config.neo4j_user,
        &config.neo4j_password,
    )
    .await
    .expect("Failed to connect to Neo4j");

    let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(
        config.ollama_url.clone(),
        config.embedding_model.clone(),
        config.embedding_dimensions,
    ));
    let vectors: Arc<dyn VectorStore> = Arc::new(QdrantStore::new(config.qdrant_url.clone()));
    let graph: Arc<dyn GraphStore> = Arc::new(Neo4jStore::new(neo4j));
    let collections = Collections::with_prefix(&config.collection_prefix);

    graph
        .ensure_schema()
        .await
        .expect("Failed to initialize graph schema");
    for collection in collections.all() {
        vectors
            .ensure_collection(collection, config.embedding_dimensions)
            .await
            .expect("Failed to initialize vector collection");
    }

    let store = Arc::new(JobStore::new(config.job_ttl));
    let pipeline = Arc::new(Pipeline::new(
        config.pipeline.clone(),
        store.clone(),
        Arc::new(HttpDocumentSource::new(config.document_store_url.clone())),
        Arc::new(NerHttpClient::new(config.ner_url.clone())),
        Arc::new(OllamaRelationshipClient::new(
            config.ollama_url.clone(),
            config.llm_model.clone(),
        )),
        embedder.clone(),
        vectors.clone(),
        graph.clone(),
        collections.clone(),
    ));

    let engine = Arc::new(HybridSearchEngine::new(
        embedder,
        vectors,
        graph.clone(),
        collections,
        config.query.clone(),
    ));

    // Hourly sweep of expired job records; reads already skip them.
    let purge_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let purged = purge_store.purge_expired();
            if purged > 0 {
                info!(purged, "Purged expired job records");
            }
        }
    });

    let state = AppState {
        pipeline,
        engine,
        store,
        graph,
        workers: Arc::new(WorkerPool::new(
            config.worker_pool_size,
            config.worker_queue_depth,
        )),
        metrics: Metrics::new(),
        qdrant_url: config.qdrant_url.clone(),
        default_query_options: Default::default(),
    };

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listener");

    info!("Server listening on {}", config.bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        warn!(error = %e, "Server stopped");
    }
}
