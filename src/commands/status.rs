//! Sync status and history commands

use crate::config::Config;
use crate::error::Result;
use crate::meta::{MetaDb, SyncOperation, SyncOperationStore};
use tracing::info;

/// Snapshot of one sync run
pub async fn cmd_status(config: &Config, db: &MetaDb, run_id: &str) -> Result<SyncOperation> {
    info!("Getting sync status for {}", run_id);
    SyncOperationStore::new(db.clone(), config.retry.backoff_policy())
        .get(run_id)
        .await
}

/// Sync runs for a dataset, newest first
pub async fn cmd_history(config: &Config, db: &MetaDb, dataset_id: &str) -> Result<Vec<SyncOperation>> {
    info!("Listing sync history for {}", dataset_id);
    SyncOperationStore::new(db.clone(), config.retry.backoff_policy())
        .list_for_dataset(dataset_id)
        .await
}

/// Print one run in detail
pub fn print_operation(op: &SyncOperation) {
    let marker = match op.status.as_str() {
        "COMPLETED" => "✓",
        "FAILED" => "✗",
        "CANCELLED" => "⊘",
        _ => "…",
    };
    println!("\n{} Sync run {}\n", marker, op.run_id);
    println!("Status: {} ({}%)", op.status, op.progress_percentage);
    println!("Datasets: {}", op.dataset_names().join(", "));
    println!("User: {}", op.user_id);
    println!("Created: {}", op.created_at);
    if let Some(started) = &op.started_at {
        println!("Started: {}", started);
    }
    if let Some(completed) = &op.completed_at {
        println!("Completed: {}", completed);
    }
    println!("\nRecords:");
    if let Some(total) = op.total_records_to_sync {
        println!("  To sync: {}", total);
    }
    println!("  Processed: {}", op.records_processed);
    println!("  Uploaded: {}", op.records_uploaded);
    println!("  Bytes uploaded: {}", op.bytes_uploaded);
    if let Some(error) = &op.error_message {
        println!("\nError: {}", error);
    }
}

/// Print a compact run list
pub fn print_history(ops: &[SyncOperation]) {
    if ops.is_empty() {
        println!("No sync runs recorded for this dataset.");
        return;
    }

    for op in ops {
        println!(
            "• {} {:<11} {:>3}%  uploaded {}/{}  {}",
            op.created_at,
            op.status,
            op.progress_percentage,
            op.records_uploaded,
            op.records_processed,
            op.run_id
        );
    }
}
