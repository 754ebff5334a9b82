//! Graph store abstraction
//!
//! The deletion path only needs a handful of operations from the graph
//! database: resolve a document's subgraph, delete nodes, and find nodes left
//! with a single edge. [`SqliteGraphStore`] is the bundled adapter.

mod sqlite;

pub use sqlite::*;

use crate::error::Result;
use crate::meta::{MetaDb, RelationshipLedgerEntry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Node labels treated as document roots
pub const DOCUMENT_LABELS: &[&str] = &[
    "TextDocument",
    "PdfDocument",
    "AudioDocument",
    "ImageDocument",
    "CsvDocument",
    "UnstructuredDocument",
];

/// Structural relationship names
pub mod rel {
    pub const IS_PART_OF: &str = "is_part_of";
    pub const CONTAINS: &str = "contains";
    pub const MADE_FROM: &str = "made_from";
    pub const IS_A: &str = "is_a";
    pub const INSTANCE_OF: &str = "instance_of";
}

/// A graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

/// A directed, labelled edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source_id: String,
    pub target_id: String,
    pub relationship_name: String,
}

/// Subgraph categories, in the order they must be deleted. Derived nodes go
/// before the chunks they hang off, and chunks before the document root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubgraphCategory {
    OrphanEntities,
    OrphanTypes,
    MadeFromNodes,
    Chunks,
    Document,
}

impl SubgraphCategory {
    pub const DELETION_ORDER: [SubgraphCategory; 5] = [
        SubgraphCategory::OrphanEntities,
        SubgraphCategory::OrphanTypes,
        SubgraphCategory::MadeFromNodes,
        SubgraphCategory::Chunks,
        SubgraphCategory::Document,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubgraphCategory::OrphanEntities => "orphan_entities",
            SubgraphCategory::OrphanTypes => "orphan_types",
            SubgraphCategory::MadeFromNodes => "made_from_nodes",
            SubgraphCategory::Chunks => "chunks",
            SubgraphCategory::Document => "document",
        }
    }
}

impl std::fmt::Display for SubgraphCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a document uniquely owns in the graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSubgraph {
    pub orphan_entities: Vec<GraphNode>,
    pub orphan_types: Vec<GraphNode>,
    pub made_from_nodes: Vec<GraphNode>,
    pub chunks: Vec<GraphNode>,
    pub document: Vec<GraphNode>,
}

impl DocumentSubgraph {
    pub fn nodes(&self, category: SubgraphCategory) -> &[GraphNode] {
        match category {
            SubgraphCategory::OrphanEntities => &self.orphan_entities,
            SubgraphCategory::OrphanTypes => &self.orphan_types,
            SubgraphCategory::MadeFromNodes => &self.made_from_nodes,
            SubgraphCategory::Chunks => &self.chunks,
            SubgraphCategory::Document => &self.document,
        }
    }

    pub fn node_count(&self) -> usize {
        SubgraphCategory::DELETION_ORDER
            .iter()
            .map(|c| self.nodes(*c).len())
            .sum()
    }
}

/// Graph database operations used by this crate
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Resolve the subgraph rooted at a document node, `None` if there is no
    /// document node with that id
    async fn get_document_subgraph(&self, document_id: &str) -> Result<Option<DocumentSubgraph>>;

    /// Remove a node together with every edge touching it
    async fn delete_node(&self, node_id: &str) -> Result<()>;

    /// Nodes of `label` with exactly one remaining edge. Only `Entity` and
    /// `EntityType` are accepted.
    async fn get_degree_one_nodes(&self, label: &str) -> Result<Vec<GraphNode>>;

    async fn add_node(&self, node: &GraphNode) -> Result<()>;

    async fn add_edge(&self, edge: &GraphEdge) -> Result<()>;

    async fn node_exists(&self, node_id: &str) -> Result<bool>;

    async fn node_degree(&self, node_id: &str) -> Result<usize>;
}

/// Add an edge and record it in the relationship ledger
pub async fn link_nodes(
    graph: &dyn GraphStore,
    db: &MetaDb,
    edge: &GraphEdge,
    creator_function: &str,
    user_id: Option<&str>,
) -> Result<()> {
    graph.add_edge(edge).await?;
    let entry = RelationshipLedgerEntry::new(
        edge.source_id.clone(),
        edge.target_id.clone(),
        creator_function,
        Some(edge.relationship_name.clone()),
        user_id.map(str::to_string),
    );
    db.record_relationship(&entry).await
}
