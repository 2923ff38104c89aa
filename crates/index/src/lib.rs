pub mod embeddings;
pub mod graph;
pub mod vector;
pub mod writer;

pub use embeddings::{Embedder, OllamaEmbedder};
pub use graph::{GraphCounts, GraphHit, GraphStore, MemoryGraphStore, Neo4jStore};
pub use vector::{MemoryVectorStore, QdrantStore, VectorHit, VectorPoint, VectorStore, point_id};

/// The three vector collections a deployment writes, all sharing one
/// configurable prefix.
#[derive(Debug, Clone)]
pub struct Collections {
    pub chunks: String,
    pub entities: String,
    pub relationships: String,
}

impl Collections {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            chunks: format!("{prefix}_chunks"),
            entities: format!("{prefix}_entities"),
            relationships: format!("{prefix}_relationships"),
        }
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.chunks, &self.entities, &self.relationships]
    }
}
