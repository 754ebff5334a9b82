//! Sync operation records and their state machine
//!
//! ```text
//! STARTED -> IN_PROGRESS -> { COMPLETED | FAILED | CANCELLED }
//!    \________________________________^
//! ```
//!
//! Every write is a partial update ([`SyncOperationUpdate`]) applied inside
//! its own transaction. [`SyncOperationStore`] routes those writes through
//! [`retry_with_backoff`] so lock contention and dropped connections are
//! retried while data errors surface immediately.

use super::MetaDb;
use crate::error::{Error, Result};
use crate::retry::{retry_with_backoff, BackoffPolicy};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

/// Sync run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Started,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Cancelled
        )
    }

    /// Forward-only transitions; re-entering the current state is allowed
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            SyncStatus::Started => next != SyncStatus::Started,
            SyncStatus::InProgress => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Started => write!(f, "STARTED"),
            SyncStatus::InProgress => write!(f, "IN_PROGRESS"),
            SyncStatus::Completed => write!(f, "COMPLETED"),
            SyncStatus::Failed => write!(f, "FAILED"),
            SyncStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "STARTED" => Ok(SyncStatus::Started),
            "IN_PROGRESS" => Ok(SyncStatus::InProgress),
            "COMPLETED" => Ok(SyncStatus::Completed),
            "FAILED" => Ok(SyncStatus::Failed),
            "CANCELLED" => Ok(SyncStatus::Cancelled),
            _ => Err(Error::Other(format!("Unknown sync status: {}", s))),
        }
    }
}

/// A persisted sync run
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: String,
    /// Opaque token handed back to callers
    pub run_id: String,
    pub status: String,
    pub progress_percentage: i64,
    pub dataset_ids_json: String,
    pub dataset_names_json: String,
    pub user_id: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub total_records_to_sync: Option<i64>,
    pub total_records_to_upload: Option<i64>,
    pub records_processed: i64,
    pub records_uploaded: i64,
    pub records_downloaded: i64,
    pub bytes_uploaded: i64,
    pub bytes_downloaded: i64,
    pub error_message: Option<String>,
    pub retry_count: i64,
}

impl SyncOperation {
    pub fn new(
        run_id: impl Into<String>,
        dataset_ids: &[String],
        dataset_names: &[String],
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            status: SyncStatus::Started.to_string(),
            progress_percentage: 0,
            dataset_ids_json: serde_json::to_string(dataset_ids).unwrap_or_else(|_| "[]".into()),
            dataset_names_json: serde_json::to_string(dataset_names)
                .unwrap_or_else(|_| "[]".into()),
            user_id: user_id.into(),
            created_at: Utc::now().to_rfc3339(),
            started_at: None,
            completed_at: None,
            total_records_to_sync: None,
            total_records_to_upload: None,
            records_processed: 0,
            records_uploaded: 0,
            records_downloaded: 0,
            bytes_uploaded: 0,
            bytes_downloaded: 0,
            error_message: None,
            retry_count: 0,
        }
    }

    pub fn get_status(&self) -> Result<SyncStatus> {
        self.status.parse()
    }

    pub fn is_terminal(&self) -> bool {
        self.get_status().map(SyncStatus::is_terminal).unwrap_or(false)
    }

    pub fn dataset_ids(&self) -> Vec<String> {
        serde_json::from_str(&self.dataset_ids_json).unwrap_or_default()
    }

    pub fn dataset_names(&self) -> Vec<String> {
        serde_json::from_str(&self.dataset_names_json).unwrap_or_default()
    }

    /// Apply a partial update in memory, enforcing the state machine
    pub fn apply(&mut self, update: &SyncOperationUpdate) -> Result<()> {
        if let Some(started_at) = &update.started_at {
            self.started_at = Some(started_at.clone());
        }
        if let Some(completed_at) = &update.completed_at {
            self.completed_at = Some(completed_at.clone());
        }

        if let Some(next) = update.status {
            let current = self.get_status()?;
            if !current.can_transition_to(next) {
                return Err(Error::InvalidTransition {
                    from: current.to_string(),
                    to: next.to_string(),
                });
            }
            self.status = next.to_string();

            let now = Utc::now().to_rfc3339();
            if next == SyncStatus::InProgress && self.started_at.is_none() {
                self.started_at = Some(now.clone());
            }
            if next.is_terminal() && self.completed_at.is_none() {
                self.completed_at = Some(now);
            }
        }

        if let Some(progress) = update.progress_percentage {
            // clamp, and never move backwards within a run
            self.progress_percentage = progress.clamp(0, 100).max(self.progress_percentage);
        }

        if let Some(v) = update.total_records_to_sync {
            self.total_records_to_sync = Some(v);
        }
        if let Some(v) = update.total_records_to_upload {
            self.total_records_to_upload = Some(v);
        }
        if let Some(v) = update.records_processed {
            self.records_processed = v;
        }
        if let Some(v) = update.records_uploaded {
            self.records_uploaded = v;
        }
        if let Some(v) = update.records_downloaded {
            self.records_downloaded = v;
        }
        if let Some(v) = update.bytes_uploaded {
            self.bytes_uploaded = v;
        }
        if let Some(v) = update.bytes_downloaded {
            self.bytes_downloaded = v;
        }
        if let Some(message) = &update.error_message {
            self.error_message = Some(message.clone());
        }
        if let Some(v) = update.retry_count {
            self.retry_count = v;
        }

        Ok(())
    }
}

/// Partial update: `None` leaves the column untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOperationUpdate {
    pub status: Option<SyncStatus>,
    pub progress_percentage: Option<i64>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub total_records_to_sync: Option<i64>,
    pub total_records_to_upload: Option<i64>,
    pub records_processed: Option<i64>,
    pub records_uploaded: Option<i64>,
    pub records_downloaded: Option<i64>,
    pub bytes_uploaded: Option<i64>,
    pub bytes_downloaded: Option<i64>,
    pub error_message: Option<String>,
    pub retry_count: Option<i64>,
}

impl SyncOperationUpdate {
    pub fn status(status: SyncStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(percentage: i64) -> Self {
        Self {
            progress_percentage: Some(percentage),
            ..Self::default()
        }
    }
}

/// Final counters recorded when a run completes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounters {
    pub records_processed: i64,
    pub records_uploaded: i64,
    pub bytes_uploaded: i64,
}

impl MetaDb {
    /// Insert a new sync operation row
    pub async fn create_sync_operation(&self, op: &SyncOperation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_operations (
                id, run_id, status, progress_percentage, dataset_ids_json, dataset_names_json,
                user_id, created_at, started_at, completed_at, total_records_to_sync,
                total_records_to_upload, records_processed, records_uploaded, records_downloaded,
                bytes_uploaded, bytes_downloaded, error_message, retry_count
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&op.id)
        .bind(&op.run_id)
        .bind(&op.status)
        .bind(op.progress_percentage)
        .bind(&op.dataset_ids_json)
        .bind(&op.dataset_names_json)
        .bind(&op.user_id)
        .bind(&op.created_at)
        .bind(&op.started_at)
        .bind(&op.completed_at)
        .bind(op.total_records_to_sync)
        .bind(op.total_records_to_upload)
        .bind(op.records_processed)
        .bind(op.records_uploaded)
        .bind(op.records_downloaded)
        .bind(op.bytes_uploaded)
        .bind(op.bytes_downloaded)
        .bind(&op.error_message)
        .bind(op.retry_count)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Get sync operation by its public run id
    pub async fn get_sync_operation(&self, run_id: &str) -> Result<Option<SyncOperation>> {
        let op = sqlx::query_as::<_, SyncOperation>(
            "SELECT * FROM sync_operations WHERE run_id = ?",
        )
        .bind(run_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(op)
    }

    /// Sync operations touching a dataset, newest first
    pub async fn list_sync_operations_for_dataset(
        &self,
        dataset_id: &str,
    ) -> Result<Vec<SyncOperation>> {
        let ops = sqlx::query_as::<_, SyncOperation>(
            r#"
            SELECT * FROM sync_operations
            WHERE EXISTS (SELECT 1 FROM json_each(dataset_ids_json) WHERE value = ?)
            ORDER BY created_at DESC
            "#,
        )
        .bind(dataset_id)
        .fetch_all(self.pool())
        .await?;
        Ok(ops)
    }

    /// Apply a partial update inside one transaction. Any error drops the
    /// transaction, which rolls it back.
    pub async fn update_sync_operation(
        &self,
        run_id: &str,
        update: &SyncOperationUpdate,
    ) -> Result<SyncOperation> {
        let mut tx = self.pool().begin().await?;

        let mut op = sqlx::query_as::<_, SyncOperation>(
            "SELECT * FROM sync_operations WHERE run_id = ?",
        )
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::SyncOperationNotFound(run_id.to_string()))?;

        op.apply(update)?;

        sqlx::query(
            r#"
            UPDATE sync_operations SET
                status = ?,
                progress_percentage = ?,
                started_at = ?,
                completed_at = ?,
                total_records_to_sync = ?,
                total_records_to_upload = ?,
                records_processed = ?,
                records_uploaded = ?,
                records_downloaded = ?,
                bytes_uploaded = ?,
                bytes_downloaded = ?,
                error_message = ?,
                retry_count = ?
            WHERE run_id = ?
            "#,
        )
        .bind(&op.status)
        .bind(op.progress_percentage)
        .bind(&op.started_at)
        .bind(&op.completed_at)
        .bind(op.total_records_to_sync)
        .bind(op.total_records_to_upload)
        .bind(op.records_processed)
        .bind(op.records_uploaded)
        .bind(op.records_downloaded)
        .bind(op.bytes_uploaded)
        .bind(op.bytes_downloaded)
        .bind(&op.error_message)
        .bind(op.retry_count)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(op)
    }
}

/// Retrying facade over the sync operation table
#[derive(Clone)]
pub struct SyncOperationStore {
    db: MetaDb,
    policy: BackoffPolicy,
}

impl SyncOperationStore {
    pub fn new(db: MetaDb, policy: BackoffPolicy) -> Self {
        Self { db, policy }
    }

    pub fn db(&self) -> &MetaDb {
        &self.db
    }

    pub async fn create(&self, op: &SyncOperation) -> Result<()> {
        retry_with_backoff(&self.policy, "create_sync_operation", || {
            self.db.create_sync_operation(op)
        })
        .await
    }

    pub async fn get(&self, run_id: &str) -> Result<SyncOperation> {
        retry_with_backoff(&self.policy, "get_sync_operation", || {
            self.db.get_sync_operation(run_id)
        })
        .await?
        .ok_or_else(|| Error::SyncOperationNotFound(run_id.to_string()))
    }

    pub async fn list_for_dataset(&self, dataset_id: &str) -> Result<Vec<SyncOperation>> {
        retry_with_backoff(&self.policy, "list_sync_operations", || {
            self.db.list_sync_operations_for_dataset(dataset_id)
        })
        .await
    }

    pub async fn latest_for_dataset(&self, dataset_id: &str) -> Result<Option<SyncOperation>> {
        Ok(self.list_for_dataset(dataset_id).await?.into_iter().next())
    }

    pub async fn update(&self, run_id: &str, update: SyncOperationUpdate) -> Result<SyncOperation> {
        debug!(run_id = %run_id, ?update, "Updating sync operation");
        retry_with_backoff(&self.policy, "update_sync_operation", || {
            self.db.update_sync_operation(run_id, &update)
        })
        .await
    }

    pub async fn set_progress(&self, run_id: &str, percentage: i64) -> Result<SyncOperation> {
        self.update(run_id, SyncOperationUpdate::progress(percentage))
            .await
    }

    pub async fn mark_started(&self, run_id: &str, total_records: i64) -> Result<SyncOperation> {
        self.update(
            run_id,
            SyncOperationUpdate {
                status: Some(SyncStatus::InProgress),
                total_records_to_sync: Some(total_records),
                ..SyncOperationUpdate::default()
            },
        )
        .await
    }

    pub async fn mark_completed(
        &self,
        run_id: &str,
        counters: SyncCounters,
    ) -> Result<SyncOperation> {
        self.update(
            run_id,
            SyncOperationUpdate {
                status: Some(SyncStatus::Completed),
                progress_percentage: Some(100),
                records_processed: Some(counters.records_processed),
                records_uploaded: Some(counters.records_uploaded),
                bytes_uploaded: Some(counters.bytes_uploaded),
                ..SyncOperationUpdate::default()
            },
        )
        .await
    }

    pub async fn mark_failed(&self, run_id: &str, message: &str) -> Result<SyncOperation> {
        self.update(
            run_id,
            SyncOperationUpdate {
                status: Some(SyncStatus::Failed),
                error_message: Some(message.to_string()),
                ..SyncOperationUpdate::default()
            },
        )
        .await
    }

    pub async fn mark_cancelled(&self, run_id: &str) -> Result<SyncOperation> {
        self.update(
            run_id,
            SyncOperationUpdate {
                status: Some(SyncStatus::Cancelled),
                error_message: Some("Cancelled by operator".to_string()),
                ..SyncOperationUpdate::default()
            },
        )
        .await
    }
}
