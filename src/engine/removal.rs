//! Removal Coordinator
//!
//! Deletes file records together with their chunk sets. Chunks always go
//! first, so a record never outlives its chunks; the two collections are not
//! updated atomically, so a crash in between can leave orphaned chunks or an
//! orphaned record. Repeating the removal (or dropping) cleans up.

use crate::error::{GridError, Result};
use crate::storage::{Document, DocumentStore, QueryOptions, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Remove only the first matching file record.
    pub just_one: bool,
    /// Fail on the first store error instead of logging it and continuing.
    pub strict: bool,
}

impl RemoveOptions {
    pub fn one() -> Self {
        Self { just_one: true, strict: false }
    }

    pub fn all() -> Self {
        Self { just_one: false, strict: false }
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalSummary {
    pub files: u64,
    pub chunks: u64,
}

pub struct RemovalCoordinator<'a> {
    store: &'a dyn DocumentStore,
    files: &'a str,
    chunks: &'a str,
}

impl<'a> RemovalCoordinator<'a> {
    pub fn new(store: &'a dyn DocumentStore, files: &'a str, chunks: &'a str) -> Self {
        Self { store, files, chunks }
    }

    pub fn remove(&self, criteria: &Document, options: RemoveOptions) -> Result<RemovalSummary> {
        if options.just_one {
            self.remove_first(criteria, options.strict)
        } else {
            self.remove_all(criteria, options.strict)
        }
    }

    /// Strict removal of one file by id. Missing ids are a no-op.
    pub fn delete(&self, id: &Value) -> Result<RemovalSummary> {
        let criteria = Document::new().with("_id", id.clone());
        self.remove(&criteria, RemoveOptions::one().strict())
    }

    /// Remove every chunk owned by `id`.
    pub fn purge_chunks(&self, id: &Value, strict: bool) -> Result<u64> {
        let owner = Document::new().with("files_id", id.clone());
        let removed = self.attempt(strict, "purge chunks", || self.store.remove(self.chunks, &owner, false))?;
        tracing::debug!("[RemovalCoordinator] Purged {} chunk(s) of file {}", removed, id);
        Ok(removed)
    }

    fn remove_first(&self, criteria: &Document, strict: bool) -> Result<RemovalSummary> {
        let first = self.attempt(strict, "locate file", || {
            let mut cursor = self.store.query(self.files, criteria, id_only(QueryOptions::first()))?;
            cursor.next().transpose()
        })?;

        let Some(record) = first else {
            return Ok(RemovalSummary::default());
        };
        let id = record_id(&record)?;

        let chunks = self.purge_chunks(&id, strict)?;
        let by_id = Document::new().with("_id", id.clone());
        let files = self.attempt(strict, "remove file", || self.store.remove(self.files, &by_id, true))?;

        tracing::info!("[RemovalCoordinator] Removed file {} ({} chunk(s))", id, chunks);
        Ok(RemovalSummary { files, chunks })
    }

    fn remove_all(&self, criteria: &Document, strict: bool) -> Result<RemovalSummary> {
        let cursor = self.attempt(strict, "list files", || {
            self.store
                .query(self.files, criteria, id_only(QueryOptions::default()))
                .map(Some)
        })?;

        let mut chunks = 0;
        for record in cursor.into_iter().flatten() {
            let record = match record {
                Ok(record) => record,
                Err(e) if !strict => {
                    tracing::warn!("[RemovalCoordinator] Skipping unreadable file record: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            chunks += self.purge_chunks(&record_id(&record)?, strict)?;
        }

        let files = self.attempt(strict, "remove files", || self.store.remove(self.files, criteria, false))?;

        tracing::info!("[RemovalCoordinator] Removed {} file(s) ({} chunk(s))", files, chunks);
        Ok(RemovalSummary { files, chunks })
    }

    /// Strict: propagate. Otherwise log and carry on with a default result.
    fn attempt<T: Default>(&self, strict: bool, what: &str, op: impl FnOnce() -> Result<T>) -> Result<T> {
        match op() {
            Ok(value) => Ok(value),
            Err(e) if strict => Err(e),
            Err(e) => {
                tracing::warn!("[RemovalCoordinator] Best-effort {} failed: {}", what, e);
                Ok(T::default())
            }
        }
    }
}

fn id_only(mut options: QueryOptions) -> QueryOptions {
    options.projection = Some(vec!["_id".to_string()]);
    options
}

fn record_id(record: &Document) -> Result<Value> {
    record
        .get("_id")
        .cloned()
        .ok_or_else(|| GridError::store("file record without _id"))
}
