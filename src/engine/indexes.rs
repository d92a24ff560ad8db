//! Lookup indexes for the two collections, ensured once per engine.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::storage::{DocumentStore, IndexSpec};

pub fn files_index() -> IndexSpec {
    IndexSpec::ascending(&["filename"])
}

/// Unique, so two writers can never both own sequence `n` of one file.
pub fn chunks_index() -> IndexSpec {
    IndexSpec::ascending(&["files_id", "n"]).unique()
}

/// Flags flip only after the store confirms the index, so a failed attempt
/// is retried on the next write.
#[derive(Default)]
pub struct IndexManager {
    files_ready: AtomicBool,
    chunks_ready: AtomicBool,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_files(&self, store: &dyn DocumentStore, collection: &str) -> Result<()> {
        Self::ensure(&self.files_ready, store, collection, &files_index())
    }

    pub fn ensure_chunks(&self, store: &dyn DocumentStore, collection: &str) -> Result<()> {
        Self::ensure(&self.chunks_ready, store, collection, &chunks_index())
    }

    /// Forget what was ensured; the collections were dropped along with their indexes.
    pub fn reset(&self) {
        self.files_ready.store(false, Ordering::SeqCst);
        self.chunks_ready.store(false, Ordering::SeqCst);
    }

    fn ensure(flag: &AtomicBool, store: &dyn DocumentStore, collection: &str, spec: &IndexSpec) -> Result<()> {
        if flag.load(Ordering::Acquire) {
            return Ok(());
        }
        store.ensure_index(collection, spec)?;
        flag.store(true, Ordering::Release);
        tracing::info!("[IndexManager] Ensured index {} on {}", spec.name, collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::FaultyStore;

    #[test]
    fn test_ensures_once_until_reset() {
        let store = FaultyStore::new();
        let manager = IndexManager::new();

        manager.ensure_chunks(&store, "fs.chunks").unwrap();
        manager.ensure_chunks(&store, "fs.chunks").unwrap();
        manager.ensure_files(&store, "fs.files").unwrap();
        assert_eq!(store.index_requests.load(Ordering::SeqCst), 2);
        assert_eq!(store.inner.indexes("fs.chunks").unwrap(), vec![chunks_index()]);
        assert_eq!(store.inner.indexes("fs.files").unwrap()[0].name, "filename_1");

        manager.reset();
        manager.ensure_chunks(&store, "fs.chunks").unwrap();
        assert_eq!(store.index_requests.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_failed_ensure_is_retried() {
        let store = FaultyStore::new();
        let manager = IndexManager::new();

        store.fail_indexes(true);
        assert!(manager.ensure_chunks(&store, "fs.chunks").is_err());

        store.fail_indexes(false);
        manager.ensure_chunks(&store, "fs.chunks").unwrap();
        assert_eq!(store.index_requests.load(Ordering::SeqCst), 2);
        assert_eq!(store.inner.indexes("fs.chunks").unwrap().len(), 1);
    }
}
