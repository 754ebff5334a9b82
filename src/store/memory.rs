use super::VectorStore;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// In-process stand-in for Qdrant
#[derive(Default)]
pub(crate) struct MemoryVectorStore {
    collections: Mutex<HashMap<String, HashSet<String>>>,
}

impl MemoryVectorStore {
    pub(crate) fn insert(&self, collection: &str, id: &str) {
        let mut collections = self.collections.lock().unwrap();
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string());
    }

    pub(crate) fn contains(&self, collection: &str, id: &str) -> bool {
        let collections = self.collections.lock().unwrap();
        collections
            .get(collection)
            .map(|ids| ids.contains(id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn has_collection(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.lock().unwrap().contains_key(collection))
    }

    async fn delete_data_points(&self, collection: &str, ids: &[String]) -> Result<()> {
        if let Some(points) = self.collections.lock().unwrap().get_mut(collection) {
            for id in ids {
                points.remove(id);
            }
        }
        Ok(())
    }
}
