//! Qdrant vector database integration
//!
//! This module wraps the Qdrant client and provides:
//! - The [`VectorStore`] seam used by deletion
//! - Collection existence checks and point deletion
//! - The collection registry that decides which collections a node may live in

mod registry;

#[cfg(test)]
pub(crate) mod memory;

pub use registry::*;

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{DeletePointsBuilder, PointId};
use qdrant_client::Qdrant;
use tracing::{debug, info};
use uuid::Uuid;

/// Vector store operations used by deletion
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn has_collection(&self, collection: &str) -> Result<bool>;

    /// Delete points by node id. Ids that are not present are ignored.
    async fn delete_data_points(&self, collection: &str, ids: &[String]) -> Result<()>;
}

/// Qdrant store handle
pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    /// Connect to Qdrant using config
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(&config.qdrant_url, config.qdrant_api_key()).await
    }

    /// Create a new store connection directly with a URL
    pub async fn new(url: &str, api_key: Option<String>) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Qdrant(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn has_collection(&self, collection: &str) -> Result<bool> {
        let exists = self.client.collection_exists(collection).await?;
        Ok(exists)
    }

    async fn delete_data_points(&self, collection: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        debug!(
            "Deleting {} points from collection {}",
            ids.len(),
            collection
        );

        let point_ids: Vec<PointId> = ids.iter().map(|id| point_id_for(id)).collect();

        self.client
            .delete_points(DeletePointsBuilder::new(collection).points(point_ids))
            .await?;

        info!("Deleted {} points from {}", ids.len(), collection);
        Ok(())
    }
}

/// Map a graph node id onto a Qdrant point id.
///
/// Qdrant only accepts UUIDs and unsigned integers. Node ids in either form
/// pass through unchanged; anything else is mapped to a stable v5 UUID so the
/// same node always lands on the same point.
pub fn point_id_for(node_id: &str) -> PointId {
    if let Ok(uuid) = Uuid::try_parse(node_id) {
        return PointId::from(uuid.to_string());
    }
    if let Ok(num) = node_id.parse::<u64>() {
        return PointId::from(num);
    }
    PointId::from(Uuid::new_v5(&Uuid::NAMESPACE_OID, node_id.as_bytes()).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::point_id::PointIdOptions;

    #[test]
    fn test_point_id_mapping() {
        let uuid = Uuid::new_v4().to_string();
        assert_eq!(
            point_id_for(&uuid).point_id_options,
            Some(PointIdOptions::Uuid(uuid.clone()))
        );

        assert_eq!(
            point_id_for("42").point_id_options,
            Some(PointIdOptions::Num(42))
        );

        let first = point_id_for("chunk-a");
        let second = point_id_for("chunk-a");
        assert_eq!(first, second);
        assert_ne!(first, point_id_for("chunk-b"));
    }

    #[tokio::test]
    async fn test_delete_without_ids_skips_network() {
        // nothing listens on this port; an empty delete must not try
        let store = QdrantStore::new("http://127.0.0.1:1", None)
            .await
            .expect("store should initialize");
        store
            .delete_data_points("DocumentChunk_text", &[])
            .await
            .unwrap();
    }
}
