use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

/// One upsert-ready vector with its payload. `id` is the deterministic
/// string identity; idempotence on re-runs comes from it.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Value,
}

/// Vector index contract: idempotent upserts keyed by id, ranked
/// similarity search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()>;
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()>;
    async fn search(&self, collection: &str, vector: &[f32], limit: usize)
    -> Result<Vec<VectorHit>>;
}

/// Qdrant point ids must be integers or UUIDs; derive a stable u64 from
/// the string identity. SHA-256 rather than the stdlib hasher so the
/// mapping survives across processes and builds.
pub fn point_id(id: &str) -> u64 {
    let digest = Sha256::digest(id.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("8 bytes"))
}

/// Qdrant spoken to over its REST API.
pub struct QdrantStore {
    base_url: String,
    client: reqwest::Client,
}

const UPSERT_BATCH_SIZE: usize = 50;

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: u64,
    vector: Vec<f32>,
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct CollectionInfo {
    result: CollectionResult,
}

#[derive(Deserialize)]
struct CollectionResult {
    collections: Vec<Collection>,
}

#[derive(Deserialize)]
struct Collection {
    name: String,
}

impl QdrantStore {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        let url = format!("{}/collections", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to list collections: {}", response.status());
        }

        let info: CollectionInfo = response.json().await?;
        if info.result.collections.iter().any(|c| c.name == collection) {
            return Ok(());
        }

        let url = format!("{}/collections/{}", self.base_url, collection);
        let create_req = CreateCollection {
            vectors: VectorParams {
                size: dimension,
                distance: "Cosine".to_string(),
            },
        };

        let response = self.client.put(&url).json(&create_req).send().await?;
        if !response.status().is_success() {
            let error_text = response.text().await?;
            anyhow::bail!("Failed to create collection '{}': {}", collection, error_text);
        }

        debug!(collection = %collection, dimension, "Created vector collection");
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let url = format!("{}/collections/{}/points", self.base_url, collection);

        for batch in points.chunks(UPSERT_BATCH_SIZE) {
            let points: Vec<Point> = batch
                .iter()
                .map(|p| {
                    let mut payload = p.payload.clone();
                    if let Some(map) = payload.as_object_mut() {
                        map.insert("id".to_string(), serde_json::json!(p.id));
                    }
                    Point {
                        id: point_id(&p.id),
                        vector: p.vector.clone(),
                        payload,
                    }
                })
                .collect();

            let response = self
                .client
                .put(&url)
                .json(&UpsertPoints { points })
                .send()
                .await
                .context("Failed to send upsert request")?;

            if !response.status().is_success() {
                let error_text = response.text().await?;
                anyhow::bail!("Failed to upsert points into '{}': {}", collection, error_text);
            }
        }

        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        let url = format!("{}/collections/{}/points/search", self.base_url, collection);

        let body = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send search request")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Vector search failed on '{}': {}", collection, error_text);
        }

        let result: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse search response")?;

        let points = result["result"]
            .as_array()
            .context("Invalid search response format")?;

        let mut hits = Vec::with_capacity(points.len());
        for point in points {
            let score = point["score"].as_f64().unwrap_or(0.0) as f32;
            let payload = point
                .get("payload")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            let id = payload
                .get("id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| point["id"].to_string());

            hits.push(VectorHit { id, score, payload });
        }

        Ok(hits)
    }
}

/// In-memory vector store used in tests and local development: exact
/// cosine search over a HashMap, same upsert-on-id semantics as Qdrant.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: tokio::sync::Mutex<HashMap<String, HashMap<String, VectorPoint>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .await
            .get(collection)
            .map_or(0, HashMap::len)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, collection: &str, _dimension: usize) -> Result<()> {
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let mut collections = self.collections.lock().await;
        let entry = collections.entry(collection.to_string()).or_default();
        for point in points {
            entry.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        let collections = self.collections.lock().await;
        let Some(entry) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<VectorHit> = entry
            .values()
            .map(|p| VectorHit {
                id: p.id.clone(),
                score: cosine(&p.vector, vector),
                payload: p.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_id_is_stable_and_distinct() {
        assert_eq!(point_id("abc"), point_id("abc"));
        assert_ne!(point_id("abc"), point_id("abd"));
    }

    #[tokio::test]
    async fn memory_store_upsert_is_idempotent_on_id() {
        let store = MemoryVectorStore::new();
        store.ensure_collection("c", 3).await.unwrap();

        let point = VectorPoint {
            id: "p1".into(),
            vector: vec![1.0, 0.0, 0.0],
            payload: serde_json::json!({"text": "a"}),
        };
        store.upsert("c", vec![point.clone()]).await.unwrap();
        store.upsert("c", vec![point]).await.unwrap();

        assert_eq!(store.count("c").await, 1);
    }

    #[tokio::test]
    async fn memory_store_ranks_by_similarity() {
        let store = MemoryVectorStore::new();
        store.ensure_collection("c", 2).await.unwrap();
        store
            .upsert(
                "c",
                vec![
                    VectorPoint {
                        id: "near".into(),
                        vector: vec![1.0, 0.0],
                        payload: serde_json::json!({}),
                    },
                    VectorPoint {
                        id: "far".into(),
                        vector: vec![0.0, 1.0],
                        payload: serde_json::json!({}),
                    },
                ],
            )
            .await
            .unwrap();

        let hits = store.search("c", &[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits[0].id, "near");
    }
}
