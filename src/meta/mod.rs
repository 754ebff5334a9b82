//! Relational metadata storage using SQLite
//!
//! This module handles all local relational state including:
//! - Datasets and the data items linked to them
//! - The graph relationship ledger (see [`ledger`])
//! - Sync operation records and their state machine (see [`sync_ops`])

pub mod ledger;
mod schema;
pub mod sync_ops;

pub use ledger::*;
pub use schema::*;
pub use sync_ops::*;

use crate::config::Config;
use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// A named, owned collection of data items
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Dataset {
    pub fn new(name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            owner_id: owner_id.into(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// One ingested unit of content
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DataItem {
    pub id: String,
    pub name: String,
    pub extension: Option<String>,
    pub mime_type: Option<String>,
    /// MD5 of the raw bytes, computed at ingestion time
    pub content_hash: Option<String>,
    pub data_size: Option<i64>,
    pub raw_data_location: String,
    pub owner_id: String,
    pub node_set_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl DataItem {
    pub fn new(
        name: impl Into<String>,
        raw_data_location: impl Into<String>,
        content_hash: Option<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        let name = name.into();
        let extension = Path::new(&name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());
        let mime_type = mime_guess::from_path(&name)
            .first()
            .map(|mime| mime.essence_str().to_string());

        Self {
            id: Uuid::new_v4().to_string(),
            name,
            extension,
            mime_type,
            content_hash,
            data_size: None,
            raw_data_location: raw_data_location.into(),
            owner_id: owner_id.into(),
            node_set_json: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn with_node_set(mut self, node_set: &[String]) -> Self {
        self.node_set_json = serde_json::to_string(node_set).ok();
        self
    }

    pub fn node_set(&self) -> Option<Vec<String>> {
        self.node_set_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
    }
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the metadata database
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file).await
    }

    async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create database with path directly, initializing the schema if needed
    pub async fn new(db_path: &Path) -> Result<Self> {
        let db = Self::open(db_path).await?;
        if !db.is_initialized().await? {
            db.init_schema().await?;
        }
        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='sync_operations'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(result.is_some())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ===== Dataset Operations =====

    /// Insert a new dataset
    pub async fn insert_dataset(&self, dataset: &Dataset) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO datasets (id, name, owner_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&dataset.id)
        .bind(&dataset.name)
        .bind(&dataset.owner_id)
        .bind(&dataset.created_at)
        .bind(&dataset.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get dataset by ID
    pub async fn get_dataset(&self, id: &str) -> Result<Option<Dataset>> {
        let dataset = sqlx::query_as::<_, Dataset>("SELECT * FROM datasets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(dataset)
    }

    /// Get dataset by owner and name
    pub async fn get_dataset_by_name(&self, owner_id: &str, name: &str) -> Result<Option<Dataset>> {
        let dataset = sqlx::query_as::<_, Dataset>(
            "SELECT * FROM datasets WHERE owner_id = ? AND name = ?",
        )
        .bind(owner_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(dataset)
    }

    /// List all datasets
    pub async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        let datasets =
            sqlx::query_as::<_, Dataset>("SELECT * FROM datasets ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(datasets)
    }

    // ===== Data Operations =====

    /// Insert a data item
    pub async fn insert_data(&self, item: &DataItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO data (id, name, extension, mime_type, content_hash, data_size, raw_data_location, owner_id, node_set_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(&item.extension)
        .bind(&item.mime_type)
        .bind(&item.content_hash)
        .bind(item.data_size)
        .bind(&item.raw_data_location)
        .bind(&item.owner_id)
        .bind(&item.node_set_json)
        .bind(&item.created_at)
        .bind(&item.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get data item by ID
    pub async fn get_data(&self, id: &str) -> Result<Option<DataItem>> {
        let item = sqlx::query_as::<_, DataItem>("SELECT * FROM data WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    /// List data items linked to a dataset
    pub async fn list_dataset_data(&self, dataset_id: &str) -> Result<Vec<DataItem>> {
        let items = sqlx::query_as::<_, DataItem>(
            r#"
            SELECT d.* FROM data d
            JOIN dataset_data dd ON dd.data_id = d.id
            WHERE dd.dataset_id = ?
            ORDER BY d.created_at, d.id
            "#,
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    // ===== Link Operations =====

    /// Link a data item into a dataset (no-op if already linked)
    pub async fn link_data(&self, dataset_id: &str, data_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dataset_data (dataset_id, data_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(dataset_id, data_id) DO NOTHING
            "#,
        )
        .bind(dataset_id)
        .bind(data_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether the data item is linked to the dataset
    pub async fn is_linked(&self, dataset_id: &str, data_id: &str) -> Result<bool> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM dataset_data WHERE dataset_id = ? AND data_id = ?")
                .bind(dataset_id)
                .bind(data_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Number of datasets that link to the data item
    pub async fn count_links(&self, data_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dataset_data WHERE data_id = ?")
            .bind(data_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Remove a document from a dataset in one transaction: soft delete the
    /// ledger rows that touch `deleted_node_ids`, drop the link row, and drop
    /// the data row once no dataset links to it any more.
    pub async fn detach_document(
        &self,
        dataset_id: &str,
        data_id: &str,
        deleted_node_ids: &[String],
    ) -> Result<DetachOutcome> {
        let mut tx = self.pool.begin().await?;

        let ledger_rows_marked = ledger::mark_deleted_in(&mut *tx, deleted_node_ids).await?;

        sqlx::query("DELETE FROM dataset_data WHERE dataset_id = ? AND data_id = ?")
            .bind(dataset_id)
            .bind(data_id)
            .execute(&mut *tx)
            .await?;

        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM dataset_data WHERE data_id = ?")
                .bind(data_id)
                .fetch_one(&mut *tx)
                .await?;

        let data_deleted = remaining == 0;
        if data_deleted {
            sqlx::query("DELETE FROM data WHERE id = ?")
                .bind(data_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(DetachOutcome {
            ledger_rows_marked,
            data_deleted,
        })
    }

    // ===== Statistics =====

    /// Get dataset statistics
    pub async fn get_dataset_stats(&self, dataset_id: &str) -> Result<DatasetStats> {
        let (item_count, total_bytes): (i64, Option<i64>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), SUM(d.data_size) FROM data d
            JOIN dataset_data dd ON dd.data_id = d.id
            WHERE dd.dataset_id = ?
            "#,
        )
        .bind(dataset_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(DatasetStats {
            item_count: item_count as usize,
            total_bytes: total_bytes.unwrap_or(0) as u64,
        })
    }
}

/// What the relational part of a document deletion did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachOutcome {
    pub ledger_rows_marked: u64,
    /// False when another dataset still links to the item
    pub data_deleted: bool,
}

/// Statistics for a single dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub item_count: usize,
    pub total_bytes: u64,
}
