//! Dataset listing

use crate::error::{Error, Result};
use crate::meta::{Dataset, DatasetStats, MetaDb};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Dataset with its item statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    #[serde(flatten)]
    pub dataset: Dataset,
    pub stats: DatasetStats,
}

/// List all datasets with their stats
pub async fn cmd_list_datasets(db: &MetaDb) -> Result<Vec<DatasetInfo>> {
    info!("Listing datasets");

    let datasets = db.list_datasets().await?;
    let mut result = Vec::with_capacity(datasets.len());
    for dataset in datasets {
        let stats = db.get_dataset_stats(&dataset.id).await?;
        result.push(DatasetInfo { dataset, stats });
    }
    Ok(result)
}

/// Find a dataset by id, falling back to a name owned by `owner_id`
pub async fn resolve_dataset(db: &MetaDb, key: &str, owner_id: &str) -> Result<Dataset> {
    if let Some(dataset) = db.get_dataset(key).await? {
        return Ok(dataset);
    }
    db.get_dataset_by_name(owner_id, key)
        .await?
        .ok_or_else(|| Error::DatasetNotFound(key.to_string()))
}

pub fn print_datasets(datasets: &[DatasetInfo]) {
    println!("\n📚 Datasets\n");

    if datasets.is_empty() {
        println!("No datasets found.");
        return;
    }

    for info in datasets {
        println!("• {}", info.dataset.name);
        println!("  ID: {}", info.dataset.id);
        println!("  Owner: {}", info.dataset.owner_id);
        println!(
            "  Items: {}, Bytes: {}",
            info.stats.item_count, info.stats.total_bytes
        );
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::tests::setup_test_db;

    #[tokio::test]
    async fn test_resolve_by_id_or_name() {
        let (db, _tmp) = setup_test_db().await;
        let dataset = Dataset::new("papers", "user-1");
        db.insert_dataset(&dataset).await.unwrap();

        assert_eq!(
            resolve_dataset(&db, &dataset.id, "user-1").await.unwrap().id,
            dataset.id
        );
        assert_eq!(
            resolve_dataset(&db, "papers", "user-1").await.unwrap().id,
            dataset.id
        );
        assert!(matches!(
            resolve_dataset(&db, "papers", "someone-else").await,
            Err(Error::DatasetNotFound(_))
        ));

        let listed = cmd_list_datasets(&db).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].stats.item_count, 0);
    }
}
