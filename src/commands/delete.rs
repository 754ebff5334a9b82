//! Delete command implementation

use crate::config::Config;
use crate::delete::{DeleteMode, DeletionCoordinator, DeletionResult};
use crate::error::Result;
use crate::graph::SqliteGraphStore;
use crate::meta::MetaDb;
use crate::store::{CollectionRegistry, QdrantStore};
use crate::sync::DatasetLocks;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct DeleteOptions {
    pub data_id: String,
    pub dataset_id: String,
    pub mode: DeleteMode,
    pub user_id: String,
}

/// Delete one document from a dataset across all three stores
pub async fn cmd_delete(config: &Config, db: &MetaDb, options: DeleteOptions) -> Result<DeletionResult> {
    let graph = SqliteGraphStore::new(&config.paths.graph_file).await?;
    let vectors = QdrantStore::connect(config).await?;
    let registry = CollectionRegistry::from_config(&config.vector)?;

    let coordinator = DeletionCoordinator::new(
        db.clone(),
        Arc::new(graph),
        Arc::new(vectors),
        registry,
        DatasetLocks::new(),
    )
    .with_policy(config.retry.backoff_policy());

    coordinator
        .delete(
            &options.data_id,
            &options.dataset_id,
            options.mode,
            &options.user_id,
        )
        .await
}

pub fn print_deletion(result: &DeletionResult) {
    let counts = &result.deleted_counts;
    println!("✓ Deleted {} ({} mode)", result.data_id, result.mode);
    println!("  Dataset: {}", result.dataset_id);
    println!("  Graph nodes removed: {}", counts.total());
    println!("    orphan entities: {}", counts.orphan_entities);
    println!("    orphan types: {}", counts.orphan_types);
    println!("    derived nodes: {}", counts.made_from_nodes);
    println!("    chunks: {}", counts.chunks);
    println!("    document: {}", counts.document);
    if result.mode == DeleteMode::Hard {
        println!("    degree-one entities: {}", counts.degree_one_entities);
        println!("    degree-one types: {}", counts.degree_one_types);
    }
    println!("  Vector collections cleaned: {}", result.vector_collections.len());
    println!("  Ledger rows retired: {}", result.ledger_rows_marked);
    if !result.data_deleted {
        println!("  Data item kept: still linked to another dataset");
    }
}
