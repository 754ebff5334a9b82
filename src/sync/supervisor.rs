//! Lifecycle tracking for background sync runs and per-dataset locking

use crate::error::Result;
use crate::meta::{SyncOperation, SyncOperationStore};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type LockMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Advisory locks keyed by dataset id
///
/// Deletions and sync runs on the same dataset take the same lock, so they
/// queue behind each other instead of interleaving. An entry lives only while
/// someone holds or waits for it.
#[derive(Clone, Default)]
pub struct DatasetLocks {
    locks: LockMap,
}

impl DatasetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `dataset_id`
    pub async fn acquire(&self, dataset_id: &str) -> DatasetGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(dataset_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        if lock.try_lock().is_err() {
            debug!(dataset_id, "Waiting for dataset lock");
        }

        DatasetGuard {
            guard: Some(lock.lock_owned().await),
            dataset_id: dataset_id.to_string(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Whether someone currently holds the lock for `dataset_id`
    pub fn is_locked(&self, dataset_id: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(dataset_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

/// Held access to one dataset; released on drop
pub struct DatasetGuard {
    guard: Option<OwnedMutexGuard<()>>,
    dataset_id: String,
    locks: LockMap,
}

impl Drop for DatasetGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // waiters hold their own clone, so a count of one means only the map
        // still refers to the mutex
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.dataset_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.dataset_id);
        }
    }
}

/// Tracks spawned sync runs so they can be observed, cancelled, and drained
#[derive(Clone)]
pub struct SyncSupervisor {
    store: SyncOperationStore,
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl SyncSupervisor {
    pub fn new(store: SyncOperationStore) -> Self {
        Self {
            store,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn `work` as the background unit for `run_id`
    pub fn spawn<F>(&self, run_id: &str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tasks = Arc::clone(&self.tasks);
        let key = run_id.to_string();
        let mut registry = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

        // the registry lock is held across spawn, so the task cannot try to
        // deregister before it has been registered
        let handle = tokio::spawn(async move {
            work.await;
            tasks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key);
        });
        registry.insert(run_id.to_string(), handle);
    }

    /// Run ids whose background unit is still running
    pub fn active_runs(&self) -> Vec<String> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut runs: Vec<String> = tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(run_id, _)| run_id.clone())
            .collect();
        runs.sort();
        runs
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks
            .get(run_id)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Abort a run and mark it `CANCELLED`.
    ///
    /// A run that already reached a terminal state is returned unchanged.
    pub async fn cancel(&self, run_id: &str) -> Result<SyncOperation> {
        let handle = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.remove(run_id)
        };

        if let Some(handle) = handle {
            handle.abort();
            // aborted tasks resolve with a cancellation error
            let _ = handle.await;
        }

        let op = self.store.get(run_id).await?;
        if op.is_terminal() {
            debug!(run_id, status = %op.status, "Run already finished, nothing to cancel");
            return Ok(op);
        }

        info!(run_id, "Cancelling sync run");
        self.store.mark_cancelled(run_id).await
    }

    /// Wait for every tracked run to finish
    pub async fn shutdown(&self) {
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain().collect()
        };

        for (run_id, handle) in handles {
            if let Err(e) = handle.await {
                warn!(run_id, "Sync task ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::tests::setup_test_db;
    use crate::meta::SyncStatus;
    use crate::retry::BackoffPolicy;
    use std::time::Duration;

    #[tokio::test]
    async fn test_locks_serialize_same_dataset() {
        let locks = DatasetLocks::new();
        let guard = locks.acquire("ds-1").await;
        assert!(locks.is_locked("ds-1"));
        assert!(!locks.is_locked("ds-2"));

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = other.acquire("ds-1").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!locks.is_locked("ds-1"));
    }

    #[tokio::test]
    async fn test_released_locks_are_forgotten() {
        let locks = DatasetLocks::new();
        let tracked = |locks: &DatasetLocks| locks.locks.lock().unwrap().len();

        for i in 0..10 {
            let _guard = locks.acquire(&format!("ds-{i}")).await;
        }
        assert_eq!(tracked(&locks), 0);

        let guard = locks.acquire("ds-1").await;
        let other = locks.clone();
        let waiter = tokio::spawn(async move { other.acquire("ds-1").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // the waiter keeps the entry alive after the first holder lets go
        drop(guard);
        let second = waiter.await.unwrap();
        assert_eq!(tracked(&locks), 1);
        assert!(locks.is_locked("ds-1"));

        drop(second);
        assert_eq!(tracked(&locks), 0);
    }

    #[tokio::test]
    async fn test_cancel_marks_run_cancelled() {
        let (db, _tmp) = setup_test_db().await;
        let store = SyncOperationStore::new(db, BackoffPolicy::default());
        let op = SyncOperation::new("run-1", &["ds".to_string()], &["docs".to_string()], "user-1");
        store.create(&op).await.unwrap();

        let supervisor = SyncSupervisor::new(store.clone());
        supervisor.spawn("run-1", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        assert!(supervisor.is_active("run-1"));
        assert_eq!(supervisor.active_runs(), vec!["run-1".to_string()]);

        let cancelled = supervisor.cancel("run-1").await.unwrap();
        assert_eq!(cancelled.get_status().unwrap(), SyncStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());
        assert!(supervisor.active_runs().is_empty());

        // second cancel is a no-op on a terminal run
        let again = supervisor.cancel("run-1").await.unwrap();
        assert_eq!(again.get_status().unwrap(), SyncStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_shutdown_drains_tasks() {
        let (db, _tmp) = setup_test_db().await;
        let supervisor = SyncSupervisor::new(SyncOperationStore::new(db, BackoffPolicy::default()));
        let (tx, rx) = tokio::sync::oneshot::channel();

        supervisor.spawn("run-2", async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(());
        });

        supervisor.shutdown().await;
        assert!(rx.await.is_ok());
        assert!(supervisor.active_runs().is_empty());
    }
}
