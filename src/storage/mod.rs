// FILE: src/storage/mod.rs
pub mod connection;
pub mod document;
pub mod memory;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::{GridError, Result};
use crate::hash::ContentHash;

// Common exports
pub use document::{Document, Value};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Single-pass cursor over query results. Not restartable once consumed.
pub type Cursor = Box<dyn Iterator<Item = Result<Document>> + Send>;

pub fn files_collection(prefix: &str) -> String {
    format!("{prefix}.files")
}

pub fn chunks_collection(prefix: &str) -> String {
    format!("{prefix}.chunks")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn suffix(self) -> i8 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub sort: Vec<(String, SortOrder)>,
    pub limit: Option<usize>,
    /// Fields to keep (`_id` is always kept). `None` returns whole documents.
    pub projection: Option<Vec<String>>,
}

impl QueryOptions {
    pub fn sorted_by(field: &str) -> Self {
        Self {
            sort: vec![(field.to_string(), SortOrder::Ascending)],
            ..Self::default()
        }
    }

    pub fn first() -> Self {
        Self {
            limit: Some(1),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<(String, SortOrder)>,
    pub unique: bool,
}

impl IndexSpec {
    /// Ascending index over `fields`, named like `files_id_1_n_1`.
    pub fn ascending(fields: &[&str]) -> Self {
        let keys: Vec<(String, SortOrder)> = fields
            .iter()
            .map(|f| (f.to_string(), SortOrder::Ascending))
            .collect();
        let name = keys
            .iter()
            .map(|(field, order)| format!("{}_{}", field, order.suffix()))
            .collect::<Vec<_>>()
            .join("_");
        Self { name, keys, unique: false }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// The backing document store the engine orchestrates.
///
/// Implementations own connection management and indexing; the engine only
/// issues the calls below and never retries them.
pub trait DocumentStore: Send + Sync {
    /// Short identifier for logs.
    fn backend_name(&self) -> &'static str;

    /// Insert one document. A duplicate `_id` in the same collection is an error.
    fn insert(&self, collection: &str, doc: Document) -> Result<()>;

    /// Remove the first match (`just_one`) or every match. Returns the number removed.
    fn remove(&self, collection: &str, criteria: &Document, just_one: bool) -> Result<u64>;

    fn query(&self, collection: &str, criteria: &Document, options: QueryOptions) -> Result<Cursor>;

    /// Idempotent.
    fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<()>;

    /// Idempotent; dropping a missing collection succeeds.
    fn drop_collection(&self, collection: &str) -> Result<()>;

    /// Hash of the concatenated chunk payloads of `file_id` under `root`,
    /// taken in ascending sequence order.
    fn aggregate_hash(&self, root: &str, file_id: &Value) -> Result<ContentHash> {
        let criteria = Document::new().with("files_id", file_id.clone());
        let cursor = self.query(&chunks_collection(root), &criteria, QueryOptions::sorted_by("n"))?;
        hash_chunk_cursor(cursor)
    }

    fn count(&self, collection: &str, criteria: &Document) -> Result<u64> {
        let mut total = 0;
        for doc in self.query(collection, criteria, QueryOptions::default())? {
            doc?;
            total += 1;
        }
        Ok(total)
    }
}

pub(crate) fn hash_chunk_cursor(cursor: Cursor) -> Result<ContentHash> {
    let mut hasher = ContentHash::hasher();
    for chunk in cursor {
        let chunk = chunk?;
        let data = chunk
            .get("data")
            .and_then(Value::as_binary)
            .ok_or_else(|| GridError::store("chunk document without binary data"))?;
        hasher.update(data);
    }
    Ok(hasher.finalize())
}
