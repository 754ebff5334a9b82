//! Sync command implementation

use super::resolve_dataset;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::{MetaDb, SyncOperation, SyncOperationStore};
use crate::progress::sync_progress_bar;
use crate::storage::LocalStorage;
use crate::sync::{CloudClient, DatasetLocks, SyncOptions, SyncOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct SyncCommandOptions {
    /// Dataset id or name
    pub dataset: String,
    pub user_id: String,
    pub prune: bool,
}

/// Build an orchestrator from config
pub fn build_orchestrator(config: &Config, db: &MetaDb) -> Result<SyncOrchestrator> {
    let store = SyncOperationStore::new(db.clone(), config.retry.backoff_policy());
    let storage_root = config
        .storage_root
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| config.paths.base_dir.join("data"));
    let cloud = CloudClient::new(&config.cloud)?;

    Ok(SyncOrchestrator::new(
        store,
        Arc::new(LocalStorage::new(storage_root)),
        cloud,
        DatasetLocks::new(),
        &config.cloud,
    ))
}

/// Start a sync and follow it to a terminal state. Ctrl-C cancels the run
/// and returns [`Error::Cancelled`].
pub async fn cmd_sync(config: &Config, db: &MetaDb, options: SyncCommandOptions) -> Result<SyncOperation> {
    let dataset = resolve_dataset(db, &options.dataset, &options.user_id).await?;
    let orchestrator = build_orchestrator(config, db)?;

    let handle = orchestrator
        .start_sync(
            &dataset,
            &options.user_id,
            SyncOptions {
                prune: options.prune,
            },
        )
        .await?;
    info!("{} (run {})", handle.message, handle.run_id);

    let bar = sync_progress_bar(&dataset.name);

    let op = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling run {}", handle.run_id);
                orchestrator.cancel(&handle.run_id).await?;
                bar.abandon();
                return Err(Error::Cancelled(handle.run_id));
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                let op = orchestrator.get_sync_status(&handle.run_id).await?;
                bar.set_position(op.progress_percentage.clamp(0, 100) as u64);
                if op.is_terminal() {
                    break op;
                }
            }
        }
    };

    bar.finish_and_clear();
    orchestrator.shutdown().await;
    Ok(op)
}
