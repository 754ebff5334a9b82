//! Content-addressed replication of a dataset to the cloud
//!
//! [`SyncOrchestrator::start_sync`] records a `STARTED` operation and hands the
//! run to the [`SyncSupervisor`]. The background run then goes:
//!
//! 1. extract local file info (items without a content hash are skipped)
//! 2. `IN_PROGRESS`, one diff request with every local hash (25%)
//! 3. upload each missing item, progress moving through 25-75%
//! 4. optional prune, best effort
//! 5. cognify if anything was uploaded, best effort
//! 6. `COMPLETED` at 100%
//!
//! Any error in 1-3 ends the run as `FAILED` with the error text. Nothing
//! escapes the background task.

mod cloud;
mod diff;
mod supervisor;

pub use cloud::*;
pub use diff::*;
pub use supervisor::*;

use crate::config::CloudConfig;
use crate::error::Result;
use crate::meta::{
    Dataset, MetaDb, SyncCounters, SyncOperation, SyncOperationStore, SyncOperationUpdate,
};
use crate::storage::StorageBackend;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DIFF_DONE_PERCENT: i64 = 25;
const UPLOAD_DONE_PERCENT: i64 = 75;

/// Per-run switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Ask the remote to drop items that no longer exist locally
    pub prune: bool,
}

/// Returned to the caller as soon as the run is queued
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHandle {
    pub run_id: String,
    pub status: String,
    pub dataset_id: String,
    pub dataset_name: String,
    pub message: String,
    pub timestamp: String,
    pub user_id: String,
}

/// Starts sync runs and answers status queries
#[derive(Clone)]
pub struct SyncOrchestrator {
    db: MetaDb,
    store: SyncOperationStore,
    storage: Arc<dyn StorageBackend>,
    cloud: CloudClient,
    supervisor: SyncSupervisor,
    locks: DatasetLocks,
    upload_concurrency: usize,
    progress_interval: usize,
}

impl SyncOrchestrator {
    pub fn new(
        store: SyncOperationStore,
        storage: Arc<dyn StorageBackend>,
        cloud: CloudClient,
        locks: DatasetLocks,
        config: &CloudConfig,
    ) -> Self {
        Self {
            db: store.db().clone(),
            supervisor: SyncSupervisor::new(store.clone()),
            store,
            storage,
            cloud,
            locks,
            upload_concurrency: config.upload_concurrency.max(1),
            progress_interval: config.progress_interval.max(1),
        }
    }

    pub fn supervisor(&self) -> &SyncSupervisor {
        &self.supervisor
    }

    /// Queue a sync of `dataset` and return without waiting for it
    pub async fn start_sync(
        &self,
        dataset: &Dataset,
        user_id: &str,
        options: SyncOptions,
    ) -> Result<SyncHandle> {
        let run_id = Uuid::new_v4().to_string();
        let op = SyncOperation::new(
            run_id.as_str(),
            std::slice::from_ref(&dataset.id),
            std::slice::from_ref(&dataset.name),
            user_id,
        );
        self.store.create(&op).await?;

        info!(run_id = %run_id, dataset = %dataset.name, "Sync queued");

        let run = SyncRun {
            orchestrator: self.clone(),
            run_id: run_id.clone(),
            dataset: dataset.clone(),
            options,
        };
        self.supervisor.spawn(&run_id, run.execute());

        Ok(SyncHandle {
            run_id,
            status: "started".to_string(),
            dataset_id: dataset.id.clone(),
            dataset_name: dataset.name.clone(),
            message: format!(
                "Sync started for dataset '{}'; poll the run id for progress",
                dataset.name
            ),
            timestamp: Utc::now().to_rfc3339(),
            user_id: user_id.to_string(),
        })
    }

    /// Current snapshot of a run
    pub async fn get_sync_status(&self, run_id: &str) -> Result<SyncOperation> {
        self.store.get(run_id).await
    }

    /// Most recent runs for a dataset, newest first
    pub async fn list_runs(&self, dataset_id: &str) -> Result<Vec<SyncOperation>> {
        self.store.list_for_dataset(dataset_id).await
    }

    pub async fn latest_run(&self, dataset_id: &str) -> Result<Option<SyncOperation>> {
        self.store.latest_for_dataset(dataset_id).await
    }

    /// Abort a queued or running sync
    pub async fn cancel(&self, run_id: &str) -> Result<SyncOperation> {
        self.supervisor.cancel(run_id).await
    }

    /// Wait for every queued run to finish
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await
    }
}

/// One background sync run
struct SyncRun {
    orchestrator: SyncOrchestrator,
    run_id: String,
    dataset: Dataset,
    options: SyncOptions,
}

impl SyncRun {
    async fn execute(self) {
        let _guard = self.orchestrator.locks.acquire(&self.dataset.id).await;
        let store = &self.orchestrator.store;

        match self.run().await {
            Ok(counters) => {
                info!(
                    run_id = %self.run_id,
                    processed = counters.records_processed,
                    uploaded = counters.records_uploaded,
                    bytes = counters.bytes_uploaded,
                    "Sync completed"
                );
                if let Err(e) = store.mark_completed(&self.run_id, counters).await {
                    error!(run_id = %self.run_id, "Failed to record sync completion: {}", e);
                }
            }
            Err(e) => {
                error!(run_id = %self.run_id, "Sync failed: {}", e);
                if let Err(e) = store.mark_failed(&self.run_id, &e.to_string()).await {
                    error!(run_id = %self.run_id, "Failed to record sync failure: {}", e);
                }
            }
        }
    }

    async fn run(&self) -> Result<SyncCounters> {
        let orchestrator = &self.orchestrator;
        let store = &orchestrator.store;
        let dataset_id = self.dataset.id.as_str();

        let items = orchestrator.db.list_dataset_data(dataset_id).await?;
        let files = extract_local_files(items, orchestrator.storage.as_ref()).await?;
        store.mark_started(&self.run_id, files.len() as i64).await?;

        let hashes = local_hashes(&files);
        let missing = orchestrator.cloud.diff(dataset_id, &hashes).await?;
        let to_upload = files_to_upload(&files, &missing);
        debug!(
            run_id = %self.run_id,
            local = hashes.len(),
            missing = to_upload.len(),
            "Diff complete"
        );

        store
            .update(
                &self.run_id,
                SyncOperationUpdate {
                    progress_percentage: Some(DIFF_DONE_PERCENT),
                    total_records_to_upload: Some(to_upload.len() as i64),
                    ..SyncOperationUpdate::default()
                },
            )
            .await?;

        let (uploaded, bytes_uploaded) = self.upload_all(&to_upload).await?;
        store
            .set_progress(&self.run_id, UPLOAD_DONE_PERCENT)
            .await?;

        if self.options.prune {
            match orchestrator.cloud.prune(dataset_id, &hashes).await {
                Ok(report) => info!(
                    run_id = %self.run_id,
                    entries = report.deleted_database_entries,
                    files = report.deleted_files,
                    "Pruned remote dataset"
                ),
                Err(e) => warn!(run_id = %self.run_id, "Prune failed: {}", e),
            }
        }

        if uploaded > 0 {
            if let Err(e) = orchestrator.cloud.cognify(dataset_id).await {
                warn!(run_id = %self.run_id, "Cognify trigger failed: {}", e);
            }
        }

        Ok(SyncCounters {
            records_processed: files.len() as i64,
            records_uploaded: uploaded,
            bytes_uploaded,
        })
    }

    /// Upload with bounded concurrency. The first failure aborts the rest.
    async fn upload_all(&self, files: &[&LocalFileInfo]) -> Result<(i64, i64)> {
        let orchestrator = &self.orchestrator;
        let total = files.len() as i64;
        if total == 0 {
            return Ok((0, 0));
        }

        let pending: Vec<_> = files
            .iter()
            .map(|file| self.upload_one((*file).clone()))
            .collect();
        let mut uploads = stream::iter(pending).buffer_unordered(orchestrator.upload_concurrency);

        let mut uploaded: i64 = 0;
        let mut bytes: i64 = 0;

        while let Some(result) = uploads.next().await {
            bytes += result? as i64;
            uploaded += 1;

            if uploaded % orchestrator.progress_interval as i64 == 0 || uploaded == total {
                let span = UPLOAD_DONE_PERCENT - DIFF_DONE_PERCENT;
                let progress = DIFF_DONE_PERCENT + span * uploaded / total;
                orchestrator
                    .store
                    .update(
                        &self.run_id,
                        SyncOperationUpdate {
                            progress_percentage: Some(progress),
                            records_uploaded: Some(uploaded),
                            bytes_uploaded: Some(bytes),
                            ..SyncOperationUpdate::default()
                        },
                    )
                    .await?;
            }
        }

        Ok((uploaded, bytes))
    }

    async fn upload_one(&self, file: LocalFileInfo) -> Result<u64> {
        let reader = self.orchestrator.storage.open(&file.location).await?;
        self.orchestrator
            .cloud
            .upload(&self.dataset.id, &self.dataset.name, &file, reader)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::tests::setup_test_db;
    use crate::meta::{DataItem, SyncStatus};
    use crate::retry::BackoffPolicy;
    use crate::storage::LocalStorage;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        orchestrator: SyncOrchestrator,
        dataset: Dataset,
        items: Vec<DataItem>,
        _db_tmp: TempDir,
        _files_tmp: TempDir,
    }

    /// Dataset with three files hashed h1, h2, h3
    async fn fixture(server: &MockServer) -> Fixture {
        let (db, db_tmp) = setup_test_db().await;
        let files_tmp = TempDir::new().unwrap();

        let dataset = Dataset::new("docs", "user-1");
        db.insert_dataset(&dataset).await.unwrap();

        let mut items = Vec::new();
        for (i, hash) in ["h1", "h2", "h3"].iter().enumerate() {
            let name = format!("file{}.txt", i + 1);
            std::fs::write(files_tmp.path().join(&name), format!("content {}", i + 1)).unwrap();
            let item = DataItem::new(name.as_str(), name.as_str(), Some(hash.to_string()), "user-1");
            db.insert_data(&item).await.unwrap();
            db.link_data(&dataset.id, &item.id).await.unwrap();
            items.push(item);
        }

        let config = CloudConfig {
            url: server.uri(),
            progress_interval: 1,
            ..CloudConfig::default()
        };
        let store = SyncOperationStore::new(
            db,
            BackoffPolicy {
                initial: Duration::from_millis(1),
                ..BackoffPolicy::default()
            },
        );
        let orchestrator = SyncOrchestrator::new(
            store,
            Arc::new(LocalStorage::new(files_tmp.path())),
            CloudClient::new(&config).unwrap().with_api_key("secret"),
            DatasetLocks::new(),
            &config,
        );

        Fixture {
            orchestrator,
            dataset,
            items,
            _db_tmp: db_tmp,
            _files_tmp: files_tmp,
        }
    }

    async fn mock_diff(server: &MockServer, missing: &[&str]) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/api/sync/[^/]+/diff$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "missing": missing })),
            )
            .mount(server)
            .await;
    }

    async fn run_to_end(fx: &Fixture, options: SyncOptions) -> SyncOperation {
        let handle = fx
            .orchestrator
            .start_sync(&fx.dataset, "user-1", options)
            .await
            .unwrap();
        assert_eq!(handle.status, "started");
        assert_eq!(handle.dataset_id, fx.dataset.id);

        fx.orchestrator.shutdown().await;
        fx.orchestrator.get_sync_status(&handle.run_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_uploads_only_missing_items() {
        let server = MockServer::start().await;
        mock_diff(&server, &["h2"]).await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/api/sync/[^/]+/data/[^/]+$"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/cognify"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server).await;
        let op = run_to_end(&fx, SyncOptions::default()).await;

        assert_eq!(op.get_status().unwrap(), SyncStatus::Completed);
        assert_eq!(op.progress_percentage, 100);
        assert_eq!(op.records_processed, 3);
        assert_eq!(op.records_uploaded, 1);
        assert_eq!(op.bytes_uploaded, "content 2".len() as i64);
        assert_eq!(op.total_records_to_sync, Some(3));
        assert!(op.started_at.is_some());
        assert!(op.completed_at.is_some());

        let requests = server.received_requests().await.unwrap();
        let put = requests
            .iter()
            .find(|r| r.method.as_str() == "PUT")
            .unwrap();
        assert!(put.url.path().ends_with(&fx.items[1].id));
        let body = String::from_utf8_lossy(&put.body);
        assert!(body.contains("content 2"));
        assert!(body.contains("h2"));
    }

    #[tokio::test]
    async fn test_unchanged_dataset_uploads_nothing() {
        let server = MockServer::start().await;
        mock_diff(&server, &[]).await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/cognify"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let fx = fixture(&server).await;
        let op = run_to_end(&fx, SyncOptions::default()).await;

        assert_eq!(op.get_status().unwrap(), SyncStatus::Completed);
        assert_eq!(op.records_processed, 3);
        assert_eq!(op.records_uploaded, 0);
        assert_eq!(op.bytes_uploaded, 0);
    }

    #[tokio::test]
    async fn test_stale_stored_size_does_not_break_upload() {
        let server = MockServer::start().await;
        mock_diff(&server, &["h4", "h5"]).await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/api/sync/[^/]+/data/[^/]+$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/cognify"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let fx = fixture(&server).await;
        // recorded sizes too large and too small for the 9-byte files
        for (name, hash, recorded) in [("big.txt", "h4", 100), ("small.txt", "h5", 3)] {
            std::fs::write(fx._files_tmp.path().join(name), "content x").unwrap();
            let mut item = DataItem::new(name, name, Some(hash.to_string()), "user-1");
            item.data_size = Some(recorded);
            fx.orchestrator.db.insert_data(&item).await.unwrap();
            fx.orchestrator
                .db
                .link_data(&fx.dataset.id, &item.id)
                .await
                .unwrap();
        }

        let op = run_to_end(&fx, SyncOptions::default()).await;

        assert_eq!(op.get_status().unwrap(), SyncStatus::Completed, "{:?}", op.error_message);
        assert_eq!(op.records_uploaded, 2);
        assert_eq!(op.bytes_uploaded, 2 * "content x".len() as i64);

        let requests = server.received_requests().await.unwrap();
        let puts: Vec<_> = requests
            .iter()
            .filter(|r| r.method.as_str() == "PUT")
            .collect();
        assert_eq!(puts.len(), 2);
        for put in puts {
            let body = String::from_utf8_lossy(&put.body);
            assert!(body.contains("content x"));
            // closing multipart boundary made it through
            assert!(body.trim_end().ends_with("--"), "{body}");
        }
    }

    #[tokio::test]
    async fn test_upload_failure_fails_run() {
        let server = MockServer::start().await;
        mock_diff(&server, &["h1", "h3"]).await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/cognify"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let fx = fixture(&server).await;
        let op = run_to_end(&fx, SyncOptions::default()).await;

        assert_eq!(op.get_status().unwrap(), SyncStatus::Failed);
        let message = op.error_message.unwrap();
        assert!(message.contains("500"), "{message}");
        assert!(op.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cognify_failure_is_best_effort() {
        let server = MockServer::start().await;
        mock_diff(&server, &["h1"]).await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/cognify"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server).await;
        let op = run_to_end(&fx, SyncOptions::default()).await;

        assert_eq!(op.get_status().unwrap(), SyncStatus::Completed);
        assert_eq!(op.records_uploaded, 1);
    }

    #[tokio::test]
    async fn test_unreachable_remote_fails_run() {
        let server = MockServer::start().await;
        let fx = fixture(&server).await;
        // no mocks mounted: wiremock answers 404
        let op = run_to_end(&fx, SyncOptions::default()).await;

        assert_eq!(op.get_status().unwrap(), SyncStatus::Failed);
        assert!(op.error_message.unwrap().contains("diff"));
    }

    #[tokio::test]
    async fn test_prune_runs_when_requested() {
        let server = MockServer::start().await;
        mock_diff(&server, &[]).await;
        Mock::given(method("PUT"))
            .and(query_param("prune", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "deletedDatabaseEntries": 1,
                "deletedFiles": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server).await;
        let op = run_to_end(&fx, SyncOptions { prune: true }).await;
        assert_eq!(op.get_status().unwrap(), SyncStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_running_sync() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/api/sync/[^/]+/diff$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "missing": [] }))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let fx = fixture(&server).await;
        let handle = fx
            .orchestrator
            .start_sync(&fx.dataset, "user-1", SyncOptions::default())
            .await
            .unwrap();

        // let the run reach the diff request
        tokio::time::sleep(Duration::from_millis(200)).await;

        let op = fx.orchestrator.cancel(&handle.run_id).await.unwrap();
        assert_eq!(op.get_status().unwrap(), SyncStatus::Cancelled);
        assert!(fx.orchestrator.supervisor().active_runs().is_empty());
    }

    #[tokio::test]
    async fn test_runs_are_listed_newest_first() {
        let server = MockServer::start().await;
        mock_diff(&server, &[]).await;

        let fx = fixture(&server).await;
        let first = run_to_end(&fx, SyncOptions::default()).await;
        let second = run_to_end(&fx, SyncOptions::default()).await;

        let runs = fx.orchestrator.list_runs(&fx.dataset.id).await.unwrap();
        assert_eq!(runs.len(), 2);
        let latest = fx.orchestrator.latest_run(&fx.dataset.id).await.unwrap().unwrap();
        assert_eq!(latest.run_id, second.run_id);
        assert_ne!(latest.run_id, first.run_id);
    }
}
