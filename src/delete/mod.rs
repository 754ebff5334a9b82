//! Document deletion across the graph, vector, and relational stores
//!
//! A delete walks the document's subgraph in a fixed category order (derived
//! nodes first, the document root last), optionally sweeps entities left
//! hanging by a single edge, removes the matching vectors, and finally
//! detaches the document from its dataset in the relational store.
//!
//! Nothing is rolled back: a failure part way through leaves the earlier
//! steps applied, and the error is returned to the caller.

use crate::error::{Error, Result};
use crate::graph::{GraphStore, SubgraphCategory};
use crate::meta::MetaDb;
use crate::retry::{retry_with_backoff, BackoffPolicy};
use crate::store::{CollectionRegistry, VectorStore};
use crate::sync::DatasetLocks;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Labels swept by hard deletes, in sweep order
const HARD_DELETE_LABELS: [&str; 2] = ["Entity", "EntityType"];

/// How far a delete reaches beyond the document's own subgraph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Only nodes the document uniquely owns
    #[default]
    Soft,
    /// Also entities and types left with a single edge afterwards
    Hard,
}

impl std::fmt::Display for DeleteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteMode::Soft => f.write_str("soft"),
            DeleteMode::Hard => f.write_str("hard"),
        }
    }
}

impl FromStr for DeleteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "soft" => Ok(DeleteMode::Soft),
            "hard" => Ok(DeleteMode::Hard),
            other => Err(Error::Other(format!(
                "unknown delete mode '{}', expected 'soft' or 'hard'",
                other
            ))),
        }
    }
}

/// Nodes deleted per category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedCounts {
    pub orphan_entities: usize,
    pub orphan_types: usize,
    pub made_from_nodes: usize,
    pub chunks: usize,
    pub document: usize,
    /// Hard mode only
    pub degree_one_entities: usize,
    /// Hard mode only
    pub degree_one_types: usize,
}

impl DeletedCounts {
    fn bump(&mut self, category: SubgraphCategory) {
        match category {
            SubgraphCategory::OrphanEntities => self.orphan_entities += 1,
            SubgraphCategory::OrphanTypes => self.orphan_types += 1,
            SubgraphCategory::MadeFromNodes => self.made_from_nodes += 1,
            SubgraphCategory::Chunks => self.chunks += 1,
            SubgraphCategory::Document => self.document += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.orphan_entities
            + self.orphan_types
            + self.made_from_nodes
            + self.chunks
            + self.document
            + self.degree_one_entities
            + self.degree_one_types
    }
}

/// Summary of a completed delete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionResult {
    pub status: String,
    pub mode: DeleteMode,
    pub data_id: String,
    pub dataset_id: String,
    pub deleted_counts: DeletedCounts,
    /// Every removed graph node, in deletion order
    pub deleted_node_ids: Vec<String>,
    /// Vector collections that were cleaned
    pub vector_collections: Vec<String>,
    pub ledger_rows_marked: u64,
    /// False when another dataset still links to the data item
    pub data_deleted: bool,
}

/// Removes a document and everything derived from it
pub struct DeletionCoordinator {
    db: MetaDb,
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    registry: CollectionRegistry,
    locks: DatasetLocks,
    policy: BackoffPolicy,
}

impl DeletionCoordinator {
    pub fn new(
        db: MetaDb,
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        registry: CollectionRegistry,
        locks: DatasetLocks,
    ) -> Self {
        Self {
            db,
            graph,
            vectors,
            registry,
            locks,
            policy: BackoffPolicy::default(),
        }
    }

    /// Retry policy for the relational step
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Delete `data_id` from `dataset_id`.
    ///
    /// The caller is expected to have checked that `user_id` may delete from
    /// the dataset.
    pub async fn delete(
        &self,
        data_id: &str,
        dataset_id: &str,
        mode: DeleteMode,
        user_id: &str,
    ) -> Result<DeletionResult> {
        let _guard = self.locks.acquire(dataset_id).await;
        debug!(data_id, dataset_id, %mode, "Deleting document");

        if self.db.get_dataset(dataset_id).await?.is_none() {
            return Err(Error::DatasetNotFound(dataset_id.to_string()));
        }

        let linked = match self.db.get_data(data_id).await? {
            Some(_) => self.db.is_linked(dataset_id, data_id).await?,
            None => false,
        };
        if !linked {
            return Err(Error::DocumentNotFound(format!(
                "{} in dataset {}",
                data_id, dataset_id
            )));
        }

        let subgraph = self
            .graph
            .get_document_subgraph(data_id)
            .await?
            .ok_or_else(|| Error::DocumentSubgraphNotFound(data_id.to_string()))?;

        debug!(nodes = subgraph.node_count(), "Resolved document subgraph");

        let mut counts = DeletedCounts::default();
        let mut deleted: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for category in SubgraphCategory::DELETION_ORDER {
            for node in subgraph.nodes(category) {
                if !seen.insert(node.id.clone()) {
                    continue;
                }
                self.graph.delete_node(&node.id).await?;
                counts.bump(category);
                deleted.push(node.id.clone());
            }
            debug!(%category, "Deleted subgraph category");
        }

        if mode == DeleteMode::Hard {
            for label in HARD_DELETE_LABELS {
                let nodes = self.graph.get_degree_one_nodes(label).await?;
                for node in nodes {
                    if !seen.insert(node.id.clone()) {
                        continue;
                    }
                    self.graph.delete_node(&node.id).await?;
                    if label == "Entity" {
                        counts.degree_one_entities += 1;
                    } else {
                        counts.degree_one_types += 1;
                    }
                    deleted.push(node.id);
                }
            }
        }

        let vector_collections = self.delete_vectors(&deleted).await?;

        let outcome = retry_with_backoff(&self.policy, "detach_document", || {
            self.db.detach_document(dataset_id, data_id, &deleted)
        })
        .await?;

        if !outcome.data_deleted {
            info!("Data item kept, still linked to another dataset");
        }

        info!(
            data_id,
            dataset_id,
            nodes = deleted.len(),
            ledger_rows = outcome.ledger_rows_marked,
            user_id,
            "Deleted document"
        );

        Ok(DeletionResult {
            status: "success".to_string(),
            mode,
            data_id: data_id.to_string(),
            dataset_id: dataset_id.to_string(),
            deleted_counts: counts,
            deleted_node_ids: deleted,
            vector_collections,
            ledger_rows_marked: outcome.ledger_rows_marked,
            data_deleted: outcome.data_deleted,
        })
    }

    /// Remove vectors for `node_ids` from every registered collection that
    /// exists. Returns the collections touched.
    async fn delete_vectors(&self, node_ids: &[String]) -> Result<Vec<String>> {
        let mut touched = Vec::new();
        if node_ids.is_empty() {
            return Ok(touched);
        }

        for collection in self.registry.collection_names() {
            if !self.vectors.has_collection(&collection).await? {
                debug!(collection = %collection, "Skipping missing vector collection");
                continue;
            }
            self.vectors
                .delete_data_points(&collection, node_ids)
                .await
                .inspect_err(|e| warn!(collection = %collection, "Vector delete failed: {}", e))?;
            touched.push(collection);
        }

        Ok(touched)
    }
}
