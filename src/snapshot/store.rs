//! Schema Snapshot Store
//!
//! The repository trait every backend implements, and the in-memory backend.

use crate::error::DumpResult;
use crate::snapshot::{NewSnapshot, Snapshot, SnapshotSummary};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

/// Exclusive hold on a store; must be released explicitly
#[async_trait]
pub trait StoreLock: Send {
    async fn release(self: Box<Self>) -> DumpResult<()>;
}

/// Persistent history of dumps
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a new snapshot, assigning id, sequence and timestamp
    async fn create(&self, new: NewSnapshot) -> DumpResult<Snapshot>;

    /// All snapshots, newest first
    async fn list(&self) -> DumpResult<Vec<SnapshotSummary>>;

    async fn get(&self, id: Uuid) -> DumpResult<Option<Snapshot>>;

    /// Returns whether a snapshot was removed
    async fn delete(&self, id: Uuid) -> DumpResult<bool>;

    /// Take the store-wide exclusive lock
    async fn lock(&self) -> DumpResult<Box<dyn StoreLock>>;

    async fn latest(&self) -> DumpResult<Option<SnapshotSummary>> {
        Ok(self.list().await?.into_iter().next())
    }

    /// Delete all but the `keep` newest snapshots, oldest first
    async fn delete_oldest(&self, keep: usize) -> DumpResult<usize> {
        let summaries = self.list().await?;
        let mut removed = 0;
        for summary in summaries.iter().skip(keep).rev() {
            if self.delete(summary.id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("Pruned {} old snapshots, keeping {}", removed, keep);
        }
        Ok(removed)
    }
}

// =============================================================================
// MEMORY BACKEND
// =============================================================================

struct MemoryLock(OwnedMutexGuard<()>);

#[async_trait]
impl StoreLock for MemoryLock {
    async fn release(self: Box<Self>) -> DumpResult<()> {
        drop(self.0);
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    /// Sequence -> Snapshot
    snapshots: BTreeMap<u64, Snapshot>,
    last_sequence: u64,
}

/// Snapshot store kept in process memory
#[derive(Clone, Default)]
pub struct MemorySnapshotStore {
    state: Arc<RwLock<MemoryState>>,
    lock: Arc<Mutex<()>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn create(&self, new: NewSnapshot) -> DumpResult<Snapshot> {
        let mut state = self.state.write().await;
        state.last_sequence += 1;
        let snapshot = Snapshot::from_new(new, state.last_sequence);
        state.snapshots.insert(snapshot.sequence, snapshot.clone());

        tracing::info!(
            "Saved snapshot #{} ({}) with hash {}",
            snapshot.sequence,
            snapshot.id,
            snapshot.content_hash
        );
        Ok(snapshot)
    }

    async fn list(&self) -> DumpResult<Vec<SnapshotSummary>> {
        let state = self.state.read().await;
        Ok(state.snapshots.values().rev().map(SnapshotSummary::from).collect())
    }

    async fn get(&self, id: Uuid) -> DumpResult<Option<Snapshot>> {
        let state = self.state.read().await;
        Ok(state.snapshots.values().find(|s| s.id == id).cloned())
    }

    async fn delete(&self, id: Uuid) -> DumpResult<bool> {
        let mut state = self.state.write().await;
        let sequence = state
            .snapshots
            .values()
            .find(|s| s.id == id)
            .map(|s| s.sequence);
        Ok(match sequence {
            Some(seq) => state.snapshots.remove(&seq).is_some(),
            None => false,
        })
    }

    async fn lock(&self) -> DumpResult<Box<dyn StoreLock>> {
        let guard = self.lock.clone().lock_owned().await;
        Ok(Box::new(MemoryLock(guard)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::OutputMode;
    use std::time::Duration;

    pub(crate) fn new_snapshot(content: &str) -> NewSnapshot {
        NewSnapshot {
            content: content.to_string(),
            files: Vec::new(),
            engine_version: "test".to_string(),
            output_mode: OutputMode::SingleFile,
            archive: None,
        }
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let store = MemorySnapshotStore::new();
        for i in 0..3 {
            store.create(new_snapshot(&format!("v{}\n", i))).await.unwrap();
        }
        let sequences: Vec<u64> = store.list().await.unwrap().iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![3, 2, 1]);
        assert_eq!(store.latest().await.unwrap().unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn test_delete_oldest_keeps_newest() {
        let store = MemorySnapshotStore::new();
        for i in 0..5 {
            store.create(new_snapshot(&format!("v{}\n", i))).await.unwrap();
        }
        assert_eq!(store.delete_oldest(2).await.unwrap(), 3);
        let sequences: Vec<u64> = store.list().await.unwrap().iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![5, 4]);
        assert_eq!(store.delete_oldest(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sequence_is_not_reused_after_delete() {
        let store = MemorySnapshotStore::new();
        let first = store.create(new_snapshot("a\n")).await.unwrap();
        assert!(store.delete(first.id).await.unwrap());
        assert!(!store.delete(first.id).await.unwrap());
        let second = store.create(new_snapshot("b\n")).await.unwrap();
        assert_eq!(second.sequence, 2);
        assert!(store.get(first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let store = MemorySnapshotStore::new();
        let held = store.lock().await.unwrap();

        let contender = store.clone();
        let waiter = tokio::spawn(async move {
            let lock = contender.lock().await.unwrap();
            lock.release().await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        held.release().await.unwrap();
        waiter.await.unwrap();
    }
}
