//! SQLite-backed graph adapter

use super::{
    rel, DocumentSubgraph, GraphEdge, GraphNode, GraphStore, DOCUMENT_LABELS,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

const GRAPH_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS graph_nodes (
    id TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    properties_json TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS graph_edges (
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    relationship_name TEXT NOT NULL,
    PRIMARY KEY (source_id, target_id, relationship_name)
);

CREATE INDEX IF NOT EXISTS idx_graph_nodes_label ON graph_nodes(label);
CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target_id);
"#;

#[derive(Debug, FromRow)]
struct NodeRow {
    id: String,
    label: String,
    properties_json: String,
}

impl From<NodeRow> for GraphNode {
    fn from(row: NodeRow) -> Self {
        let properties: Map<String, Value> =
            serde_json::from_str(&row.properties_json).unwrap_or_default();
        GraphNode {
            id: row.id,
            label: row.label,
            properties,
        }
    }
}

/// Graph store handle
#[derive(Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    /// Open (and create if needed) the graph database at `path`
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to graph database at {:?}", path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(GRAPH_SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<GraphNode>> {
        let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM graph_nodes WHERE id = ?")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(GraphNode::from))
    }

    /// Nodes with an edge pointing *into* `node_id` under one of `relationships`
    async fn sources_into(&self, node_id: &str, relationships: &[&str]) -> Result<Vec<GraphNode>> {
        let placeholders = relationships.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let statement = format!(
            r#"
            SELECT DISTINCT n.* FROM graph_edges e
            JOIN graph_nodes n ON n.id = e.source_id
            WHERE e.target_id = ? AND e.relationship_name IN ({})
            ORDER BY n.id
            "#,
            placeholders
        );
        let mut query = sqlx::query_as::<_, NodeRow>(&statement).bind(node_id);
        for relationship in relationships {
            query = query.bind(*relationship);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(GraphNode::from).collect())
    }

    /// Nodes that `node_id` points *at* under one of `relationships`
    async fn targets_of(&self, node_id: &str, relationships: &[&str]) -> Result<Vec<GraphNode>> {
        let placeholders = relationships.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let statement = format!(
            r#"
            SELECT DISTINCT n.* FROM graph_edges e
            JOIN graph_nodes n ON n.id = e.target_id
            WHERE e.source_id = ? AND e.relationship_name IN ({})
            ORDER BY n.id
            "#,
            placeholders
        );
        let mut query = sqlx::query_as::<_, NodeRow>(&statement).bind(node_id);
        for relationship in relationships {
            query = query.bind(*relationship);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(GraphNode::from).collect())
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn get_document_subgraph(&self, document_id: &str) -> Result<Option<DocumentSubgraph>> {
        let document = match self.get_node(document_id).await? {
            Some(node) if DOCUMENT_LABELS.contains(&node.label.as_str()) => node,
            _ => return Ok(None),
        };

        let chunks = self.sources_into(&document.id, &[rel::IS_PART_OF]).await?;
        let chunk_ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();

        let mut entities: Vec<GraphNode> = Vec::new();
        let mut seen_entities = HashSet::new();
        for chunk in &chunks {
            for entity in self.targets_of(&chunk.id, &[rel::CONTAINS]).await? {
                if seen_entities.insert(entity.id.clone()) {
                    entities.push(entity);
                }
            }
        }

        // entities contained only by this document's chunks
        let mut orphan_entities = Vec::new();
        for entity in entities {
            let containers = self.sources_into(&entity.id, &[rel::CONTAINS]).await?;
            if !containers.is_empty() && containers.iter().all(|c| chunk_ids.contains(c.id.as_str()))
            {
                orphan_entities.push(entity);
            }
        }
        let orphan_ids: HashSet<&str> = orphan_entities.iter().map(|e| e.id.as_str()).collect();

        // types referenced only by orphaned entities
        let type_relationships = [rel::IS_A, rel::INSTANCE_OF];
        let mut orphan_types = Vec::new();
        let mut seen_types = HashSet::new();
        for entity in &orphan_entities {
            for ty in self.targets_of(&entity.id, &type_relationships).await? {
                if ty.label != "EntityType" || seen_types.contains(&ty.id) {
                    continue;
                }
                let members = self.sources_into(&ty.id, &type_relationships).await?;
                if members.iter().all(|m| orphan_ids.contains(m.id.as_str())) {
                    seen_types.insert(ty.id.clone());
                    orphan_types.push(ty);
                }
            }
        }

        let mut made_from_nodes = Vec::new();
        let mut seen_made_from = HashSet::new();
        for chunk in &chunks {
            for node in self.sources_into(&chunk.id, &[rel::MADE_FROM]).await? {
                if seen_made_from.insert(node.id.clone()) {
                    made_from_nodes.push(node);
                }
            }
        }

        Ok(Some(DocumentSubgraph {
            orphan_entities,
            orphan_types,
            made_from_nodes,
            chunks,
            document: vec![document],
        }))
    }

    async fn delete_node(&self, node_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM graph_edges WHERE source_id = ? OR target_id = ?")
            .bind(node_id)
            .bind(node_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM graph_nodes WHERE id = ?")
            .bind(node_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_degree_one_nodes(&self, label: &str) -> Result<Vec<GraphNode>> {
        if label != "Entity" && label != "EntityType" {
            return Err(Error::Graph(format!(
                "degree-one lookup only supports Entity or EntityType, got '{}'",
                label
            )));
        }

        let rows = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT n.* FROM graph_nodes n
            WHERE n.label = ?
              AND (SELECT COUNT(*) FROM graph_edges e
                   WHERE e.source_id = n.id OR e.target_id = n.id) = 1
            ORDER BY n.id
            "#,
        )
        .bind(label)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(GraphNode::from).collect())
    }

    async fn add_node(&self, node: &GraphNode) -> Result<()> {
        let properties = serde_json::to_string(&node.properties)?;
        sqlx::query(
            r#"
            INSERT INTO graph_nodes (id, label, properties_json) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                label = excluded.label,
                properties_json = excluded.properties_json
            "#,
        )
        .bind(&node.id)
        .bind(&node.label)
        .bind(properties)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_edge(&self, edge: &GraphEdge) -> Result<()> {
        for endpoint in [&edge.source_id, &edge.target_id] {
            if !self.node_exists(endpoint).await? {
                return Err(Error::Graph(format!(
                    "cannot add '{}' edge: node {} does not exist",
                    edge.relationship_name, endpoint
                )));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO graph_edges (source_id, target_id, relationship_name) VALUES (?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&edge.source_id)
        .bind(&edge.target_id)
        .bind(&edge.relationship_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn node_exists(&self, node_id: &str) -> Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM graph_nodes WHERE id = ?")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn node_degree(&self, node_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM graph_edges WHERE source_id = ? OR target_id = ?",
        )
        .bind(node_id)
        .bind(node_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SubgraphCategory;
    use tempfile::TempDir;

    async fn setup_graph() -> (SqliteGraphStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let graph = SqliteGraphStore::new(&tmp.path().join("graph.db"))
            .await
            .unwrap();
        (graph, tmp)
    }

    async fn edge(graph: &SqliteGraphStore, source: &str, target: &str, relationship: &str) {
        graph
            .add_edge(&GraphEdge {
                source_id: source.to_string(),
                target_id: target.to_string(),
                relationship_name: relationship.to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_subgraph_categories() {
        let (graph, _tmp) = setup_graph().await;

        for node in [
            GraphNode::new("doc", "TextDocument"),
            GraphNode::new("other-doc", "TextDocument"),
            GraphNode::new("chunk", "DocumentChunk"),
            GraphNode::new("other-chunk", "DocumentChunk"),
            GraphNode::new("summary", "TextSummary"),
            GraphNode::new("solo", "Entity"),
            GraphNode::new("shared", "Entity"),
            GraphNode::new("person", "EntityType"),
            GraphNode::new("place", "EntityType"),
        ] {
            graph.add_node(&node).await.unwrap();
        }

        edge(&graph, "chunk", "doc", rel::IS_PART_OF).await;
        edge(&graph, "other-chunk", "other-doc", rel::IS_PART_OF).await;
        edge(&graph, "summary", "chunk", rel::MADE_FROM).await;
        edge(&graph, "chunk", "solo", rel::CONTAINS).await;
        edge(&graph, "chunk", "shared", rel::CONTAINS).await;
        edge(&graph, "other-chunk", "shared", rel::CONTAINS).await;
        edge(&graph, "solo", "person", rel::IS_A).await;
        edge(&graph, "shared", "place", rel::IS_A).await;

        let subgraph = graph.get_document_subgraph("doc").await.unwrap().unwrap();
        let ids = |category| {
            subgraph
                .nodes(category)
                .iter()
                .map(|n| n.id.as_str())
                .collect::<Vec<_>>()
        };

        assert_eq!(ids(SubgraphCategory::Document), vec!["doc"]);
        assert_eq!(ids(SubgraphCategory::Chunks), vec!["chunk"]);
        assert_eq!(ids(SubgraphCategory::MadeFromNodes), vec!["summary"]);
        assert_eq!(ids(SubgraphCategory::OrphanEntities), vec!["solo"]);
        assert_eq!(ids(SubgraphCategory::OrphanTypes), vec!["person"]);
        assert_eq!(subgraph.node_count(), 5);
    }

    #[tokio::test]
    async fn test_missing_or_non_document_root() {
        let (graph, _tmp) = setup_graph().await;
        graph
            .add_node(&GraphNode::new("entity", "Entity"))
            .await
            .unwrap();

        assert!(graph.get_document_subgraph("nope").await.unwrap().is_none());
        assert!(graph.get_document_subgraph("entity").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_node_removes_incident_edges() {
        let (graph, _tmp) = setup_graph().await;
        graph.add_node(&GraphNode::new("a", "Entity")).await.unwrap();
        graph.add_node(&GraphNode::new("b", "Entity")).await.unwrap();
        edge(&graph, "a", "b", "related_to").await;
        assert_eq!(graph.node_degree("b").await.unwrap(), 1);

        graph.delete_node("a").await.unwrap();
        assert!(!graph.node_exists("a").await.unwrap());
        assert_eq!(graph.node_degree("b").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_degree_one_nodes() {
        let (graph, _tmp) = setup_graph().await;
        graph.add_node(&GraphNode::new("leaf", "Entity")).await.unwrap();
        graph.add_node(&GraphNode::new("hub", "Entity")).await.unwrap();
        graph
            .add_node(&GraphNode::new("kind", "EntityType"))
            .await
            .unwrap();
        edge(&graph, "leaf", "hub", "related_to").await;
        edge(&graph, "hub", "kind", rel::IS_A).await;

        let leaves = graph.get_degree_one_nodes("Entity").await.unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].id, "leaf");

        let types = graph.get_degree_one_nodes("EntityType").await.unwrap();
        assert_eq!(types[0].id, "kind");

        assert!(graph.get_degree_one_nodes("DocumentChunk").await.is_err());
    }

    #[tokio::test]
    async fn test_edge_requires_both_endpoints() {
        let (graph, _tmp) = setup_graph().await;
        graph.add_node(&GraphNode::new("a", "Entity")).await.unwrap();
        let err = graph
            .add_edge(&GraphEdge {
                source_id: "a".to_string(),
                target_id: "ghost".to_string(),
                relationship_name: "related_to".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Graph(_)));
    }

    #[tokio::test]
    async fn test_properties_survive_round_trip() {
        let (graph, _tmp) = setup_graph().await;
        let node = GraphNode::new("doc", "TextDocument").with_property("name", "text_abc");
        graph.add_node(&node).await.unwrap();

        let loaded = graph.get_node("doc").await.unwrap().unwrap();
        assert_eq!(loaded, node);
    }
}
