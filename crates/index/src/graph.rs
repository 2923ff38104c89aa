use anyhow::{Context, Result};
use async_trait::async_trait;
use extract::{Entity, Relationship};
use neo4rs::{Graph, Query};
use std::collections::HashMap;
use tracing::info;

/// An entity surfaced by graph-side retrieval, ranked by how connected
/// it is.
#[derive(Debug, Clone)]
pub struct GraphHit {
    pub entity_id: String,
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub degree: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphCounts {
    pub entity_count: usize,
    pub relationship_count: usize,
}

/// Knowledge-graph contract: idempotent node and edge writes keyed by
/// the deterministic ids, plus name-based neighborhood lookup.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn ensure_schema(&self) -> Result<()>;
    async fn merge_entity(&self, entity: &Entity) -> Result<()>;
    async fn merge_relationship(&self, relationship: &Relationship) -> Result<()>;
    /// `names` are lowercase fragments; an entity matches when its name
    /// contains any of them, case-insensitively.
    async fn related_entities(&self, names: &[String], limit: usize) -> Result<Vec<GraphHit>>;
    async fn counts(&self) -> Result<GraphCounts>;
}

/// Labels and relationship types cannot be passed as Cypher parameters,
/// so anything interpolated into query text is reduced to
/// `[A-Za-z0-9_]` first. Returns None when nothing survives.
pub fn sanitize_graph_token(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() || cleaned.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(cleaned.to_string())
}

fn edge_type_for(predicate: &str) -> String {
    sanitize_graph_token(predicate)
        .map(|t| t.to_uppercase())
        .unwrap_or_else(|| "RELATED_TO".to_string())
}

pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn ensure_schema(&self) -> Result<()> {
        let query = Query::new(
            "CREATE INDEX entity_id_index IF NOT EXISTS FOR (e:Entity) ON (e.id)".to_string(),
        );
        self.graph
            .run(query)
            .await
            .context("Failed to create index on Entity.id")?;

        let query = Query::new(
            "CREATE INDEX entity_name_index IF NOT EXISTS FOR (e:Entity) ON (e.name)".to_string(),
        );
        self.graph
            .run(query)
            .await
            .context("Failed to create index on Entity.name")?;

        info!("Neo4j indexes ready");
        Ok(())
    }

    async fn merge_entity(&self, entity: &Entity) -> Result<()> {
        // Every entity carries the Entity label; its type becomes a
        // second label so new types need no schema change.
        let type_label = sanitize_graph_token(&entity.entity_type);
        let cypher = match &type_label {
            Some(label) => format!(
                r#"
                MERGE (e:Entity {{id: $id}})
                SET e.name = $name,
                    e.type = $type,
                    e.description = $description,
                    e:{label}
                "#
            ),
            None => r#"
                MERGE (e:Entity {id: $id})
                SET e.name = $name,
                    e.type = $type,
                    e.description = $description
                "#
            .to_string(),
        };

        let query = Query::new(cypher)
            .param("id", entity.entity_id.clone())
            .param("name", entity.name.clone())
            .param("type", entity.entity_type.clone())
            .param("description", entity.description.clone());

        self.graph
            .run(query)
            .await
            .context("Failed to merge entity node")?;

        Ok(())
    }

    async fn merge_relationship(&self, relationship: &Relationship) -> Result<()> {
        let edge_type = edge_type_for(&relationship.predicate);
        let cypher = format!(
            r#"
            MATCH (s:Entity {{id: $subject_id}})
            MATCH (o:Entity {{id: $object_id}})
            MERGE (s)-[r:{edge_type} {{id: $id}}]->(o)
            SET r.predicate = $predicate,
                r.chunk_id = $chunk_id
            "#
        );

        let query = Query::new(cypher)
            .param("id", relationship.relationship_id.clone())
            .param("subject_id", relationship.subject_entity_id.clone())
            .param("object_id", relationship.object_entity_id.clone())
            .param("predicate", relationship.predicate.clone())
            .param("chunk_id", relationship.originating_chunk_id.clone());

        self.graph
            .run(query)
            .await
            .context("Failed to merge relationship edge")?;

        Ok(())
    }

    async fn related_entities(&self, names: &[String], limit: usize) -> Result<Vec<GraphHit>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let query = Query::new(
            r#"
            MATCH (e:Entity)
            WHERE any(n IN $names WHERE toLower(e.name) CONTAINS n)
            OPTIONAL MATCH (e)-[r]-()
            WITH e, count(r) AS degree
            RETURN e.id AS id, e.name AS name, e.type AS type,
                   e.description AS description, degree
            ORDER BY degree DESC, name ASC
            LIMIT $limit
            "#
            .to_string(),
        )
        .param("names", names.to_vec())
        .param("limit", limit as i64);

        let mut result = self
            .graph
            .execute(query)
            .await
            .context("Graph neighborhood query failed")?;

        let mut hits = Vec::new();
        while let Some(row) = result.next().await? {
            hits.push(GraphHit {
                entity_id: row.get::<String>("id").unwrap_or_default(),
                name: row.get::<String>("name").unwrap_or_default(),
                entity_type: row.get::<String>("type").unwrap_or_default(),
                description: row.get::<String>("description").unwrap_or_default(),
                degree: row.get::<i64>("degree").unwrap_or(0) as usize,
            });
        }

        Ok(hits)
    }

    async fn counts(&self) -> Result<GraphCounts> {
        let query = Query::new("MATCH (e:Entity) RETURN count(e) AS count".to_string());
        let mut result = self.graph.execute(query).await?;
        let entity_count = match result.next().await? {
            Some(row) => row.get::<i64>("count").unwrap_or(0) as usize,
            None => 0,
        };

        let query = Query::new("MATCH (:Entity)-[r]->(:Entity) RETURN count(r) AS count".to_string());
        let mut result = self.graph.execute(query).await?;
        let relationship_count = match result.next().await? {
            Some(row) => row.get::<i64>("count").unwrap_or(0) as usize,
            None => 0,
        };

        Ok(GraphCounts {
            entity_count,
            relationship_count,
        })
    }
}

/// In-memory graph used by tests: same merge-on-id semantics as the
/// Neo4j store, degree computed from the edge list.
#[derive(Default)]
pub struct MemoryGraphStore {
    inner: tokio::sync::Mutex<MemoryGraphInner>,
}

#[derive(Default)]
struct MemoryGraphInner {
    nodes: HashMap<String, Entity>,
    edges: HashMap<String, Relationship>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn merge_entity(&self, entity: &Entity) -> Result<()> {
        self.inner
            .lock()
            .await
            .nodes
            .insert(entity.entity_id.clone(), entity.clone());
        Ok(())
    }

    async fn merge_relationship(&self, relationship: &Relationship) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.nodes.contains_key(&relationship.subject_entity_id)
            || !inner.nodes.contains_key(&relationship.object_entity_id)
        {
            anyhow::bail!(
                "Relationship '{}' references a missing entity",
                relationship.relationship_id
            );
        }
        inner
            .edges
            .insert(relationship.relationship_id.clone(), relationship.clone());
        Ok(())
    }

    async fn related_entities(&self, names: &[String], limit: usize) -> Result<Vec<GraphHit>> {
        let inner = self.inner.lock().await;
        let mut hits: Vec<GraphHit> = inner
            .nodes
            .values()
            .filter(|e| {
                let name = e.name.to_lowercase();
                names.iter().any(|n| name.contains(n.as_str()))
            })
            .map(|e| {
                let degree = inner
                    .edges
                    .values()
                    .filter(|r| {
                        r.subject_entity_id == e.entity_id || r.object_entity_id == e.entity_id
                    })
                    .count();
                GraphHit {
                    entity_id: e.entity_id.clone(),
                    name: e.name.clone(),
                    entity_type: e.entity_type.clone(),
                    description: e.description.clone(),
                    degree,
                }
            })
            .collect();

        hits.sort_by(|a, b| b.degree.cmp(&a.degree).then_with(|| a.name.cmp(&b.name)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn counts(&self) -> Result<GraphCounts> {
        let inner = self.inner.lock().await;
        Ok(GraphCounts {
            entity_count: inner.nodes.len(),
            relationship_count: inner.edges.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, name: &str) -> Entity {
        Entity {
            entity_id: id.to_string(),
            name: name.to_string(),
            entity_type: "PERSON".to_string(),
            description: String::new(),
            confidence_score: 0.9,
            originating_chunk_ids: Default::default(),
        }
    }

    fn relationship(id: &str, subject: &str, object: &str) -> Relationship {
        Relationship {
            relationship_id: id.to_string(),
            subject_entity_id: subject.to_string(),
            predicate: "works_for".to_string(),
            object_entity_id: object.to_string(),
            originating_chunk_id: "c1".to_string(),
        }
    }

    #[test]
    fn sanitize_strips_unsafe_characters() {
        assert_eq!(
            sanitize_graph_token("works for; DROP"),
            Some("works_for__DROP".to_string())
        );
        assert_eq!(sanitize_graph_token("PERSON"), Some("PERSON".to_string()));
        assert_eq!(sanitize_graph_token("42abc"), None);
        assert_eq!(sanitize_graph_token("  "), None);
    }

    #[test]
    fn edge_type_falls_back_when_empty() {
        assert_eq!(edge_type_for("works_for"), "WORKS_FOR");
        assert_eq!(edge_type_for("!!!"), "RELATED_TO");
    }

    #[tokio::test]
    async fn merge_is_idempotent_on_id() {
        let store = MemoryGraphStore::new();
        store.merge_entity(&entity("e1", "Ada")).await.unwrap();
        store.merge_entity(&entity("e1", "Ada")).await.unwrap();
        store.merge_entity(&entity("e2", "Babbage")).await.unwrap();
        store
            .merge_relationship(&relationship("r1", "e1", "e2"))
            .await
            .unwrap();
        store
            .merge_relationship(&relationship("r1", "e1", "e2"))
            .await
            .unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.entity_count, 2);
        assert_eq!(counts.relationship_count, 1);
    }

    #[tokio::test]
    async fn related_entities_ranked_by_degree() {
        let store = MemoryGraphStore::new();
        store.merge_entity(&entity("e1", "Ada Lovelace")).await.unwrap();
        store.merge_entity(&entity("e2", "Ada Systems")).await.unwrap();
        store.merge_entity(&entity("e3", "Babbage")).await.unwrap();
        store
            .merge_relationship(&relationship("r1", "e1", "e3"))
            .await
            .unwrap();

        let hits = store
            .related_entities(&["ada".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entity_id, "e1");
        assert_eq!(hits[0].degree, 1);
    }

    #[tokio::test]
    async fn relationship_requires_both_endpoints() {
        let store = MemoryGraphStore::new();
        store.merge_entity(&entity("e1", "Ada")).await.unwrap();
        let err = store
            .merge_relationship(&relationship("r1", "e1", "missing"))
            .await;
        assert!(err.is_err());
    }
}
