//! Fault-injecting store wrapper for engine tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{Cursor, Document, DocumentStore, IndexSpec, MemoryStore, QueryOptions, Value};
use crate::error::{GridError, Result};
use crate::hash::ContentHash;

/// Delegates to a `MemoryStore`, optionally lying about aggregate hashes or
/// failing removals and inserts on chosen collections.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    forged_hash: Mutex<Option<ContentHash>>,
    fail_removes_on: Mutex<Option<String>>,
    fail_inserts_on: Mutex<Option<String>>,
    pub hash_requests: AtomicUsize,
    pub index_requests: AtomicUsize,
    fail_indexes: AtomicBool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forge_hash(&self, hash: ContentHash) {
        *self.forged_hash.lock().unwrap() = Some(hash);
    }

    pub fn fail_removes_on(&self, collection: &str) {
        *self.fail_removes_on.lock().unwrap() = Some(collection.to_string());
    }

    pub fn fail_inserts_on(&self, collection: &str) {
        *self.fail_inserts_on.lock().unwrap() = Some(collection.to_string());
    }

    pub fn fail_indexes(&self, fail: bool) {
        self.fail_indexes.store(fail, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        *self.fail_removes_on.lock().unwrap() = None;
        *self.fail_inserts_on.lock().unwrap() = None;
        self.fail_indexes(false);
    }

    fn should_fail(slot: &Mutex<Option<String>>, collection: &str) -> bool {
        slot.lock().unwrap().as_deref() == Some(collection)
    }
}

impl DocumentStore for FaultyStore {
    fn backend_name(&self) -> &'static str {
        "faulty"
    }

    fn insert(&self, collection: &str, doc: Document) -> Result<()> {
        if Self::should_fail(&self.fail_inserts_on, collection) {
            return Err(GridError::store(format!("injected insert failure on {collection}")));
        }
        self.inner.insert(collection, doc)
    }

    fn remove(&self, collection: &str, criteria: &Document, just_one: bool) -> Result<u64> {
        if Self::should_fail(&self.fail_removes_on, collection) {
            return Err(GridError::store(format!("injected remove failure on {collection}")));
        }
        self.inner.remove(collection, criteria, just_one)
    }

    fn query(&self, collection: &str, criteria: &Document, options: QueryOptions) -> Result<Cursor> {
        self.inner.query(collection, criteria, options)
    }

    fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<()> {
        self.index_requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_indexes.load(Ordering::SeqCst) {
            return Err(GridError::store("injected index failure"));
        }
        self.inner.ensure_index(collection, index)
    }

    fn drop_collection(&self, collection: &str) -> Result<()> {
        self.inner.drop_collection(collection)
    }

    fn aggregate_hash(&self, root: &str, file_id: &Value) -> Result<ContentHash> {
        self.hash_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(forged) = *self.forged_hash.lock().unwrap() {
            return Ok(forged);
        }
        self.inner.aggregate_hash(root, file_id)
    }
}
