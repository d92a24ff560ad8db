//! In-process document store
//!
//! Collections are insertion-ordered vectors; unique indexes are enforced on
//! insert. Used by tests and for running the engine without a database file.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use super::{Cursor, Document, DocumentStore, IndexSpec, QueryOptions, SortOrder, Value};
use crate::error::{GridError, Result};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    indexes: RwLock<HashMap<String, Vec<IndexSpec>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index specs ensured on `collection`, in creation order.
    pub fn indexes(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        let indexes = self.indexes.read().map_err(|_| poisoned())?;
        Ok(indexes.get(collection).cloned().unwrap_or_default())
    }

    pub fn len(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections.get(collection).map_or(0, Vec::len))
    }

    fn unique_violation(&self, collection: &str, existing: &[Document], doc: &Document) -> Result<Option<String>> {
        let indexes = self.indexes.read().map_err(|_| poisoned())?;
        let Some(specs) = indexes.get(collection) else {
            return Ok(None);
        };
        for spec in specs.iter().filter(|s| s.unique) {
            let key: Document = spec
                .keys
                .iter()
                .map(|(field, _)| (field.clone(), doc.get(field).cloned().unwrap_or(Value::Null)))
                .collect();
            let clash = existing.iter().any(|other| {
                key.iter()
                    .all(|(field, value)| other.get(field).unwrap_or(&Value::Null) == value)
            });
            if clash {
                return Ok(Some(spec.name.clone()));
            }
        }
        Ok(None)
    }
}

fn poisoned() -> GridError {
    GridError::store("Poisoned lock")
}

fn compare_by(a: &Document, b: &Document, sort: &[(String, SortOrder)]) -> Ordering {
    for (field, order) in sort {
        let ordering = match (a.get(field), b.get(field)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x.sort_cmp(y),
        };
        let ordering = match order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

impl DocumentStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn insert(&self, collection: &str, mut doc: Document) -> Result<()> {
        if !doc.contains_key("_id") {
            doc.insert("_id", Uuid::new_v4().to_string());
        }

        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let docs = collections.entry(collection.to_string()).or_default();

        let id = doc.get("_id");
        if docs.iter().any(|existing| existing.get("_id") == id) {
            return Err(GridError::store(format!(
                "duplicate _id {} in {}",
                id.map(Value::to_string).unwrap_or_default(),
                collection
            )));
        }
        if let Some(index) = self.unique_violation(collection, docs, &doc)? {
            return Err(GridError::store(format!(
                "unique index {index} violated in {collection}"
            )));
        }

        docs.push(doc);
        Ok(())
    }

    fn remove(&self, collection: &str, criteria: &Document, just_one: bool) -> Result<u64> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };

        if just_one {
            return Ok(match docs.iter().position(|d| d.matches(criteria)) {
                Some(pos) => {
                    docs.remove(pos);
                    1
                }
                None => 0,
            });
        }

        let before = docs.len();
        docs.retain(|d| !d.matches(criteria));
        Ok((before - docs.len()) as u64)
    }

    fn query(&self, collection: &str, criteria: &Document, options: QueryOptions) -> Result<Cursor> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        let mut matched: Vec<Document> = collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| d.matches(criteria)).cloned().collect())
            .unwrap_or_default();
        drop(collections);

        if !options.sort.is_empty() {
            matched.sort_by(|a, b| compare_by(a, b, &options.sort));
        }
        if let Some(limit) = options.limit {
            matched.truncate(limit);
        }
        if let Some(fields) = &options.projection {
            let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
            matched = matched.iter().map(|d| d.project(&fields)).collect();
        }

        Ok(Box::new(matched.into_iter().map(Ok)))
    }

    fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<()> {
        let mut indexes = self.indexes.write().map_err(|_| poisoned())?;
        let specs = indexes.entry(collection.to_string()).or_default();
        if !specs.iter().any(|s| s.name == index.name) {
            specs.push(index.clone());
        }
        Ok(())
    }

    fn drop_collection(&self, collection: &str) -> Result<()> {
        self.collections.write().map_err(|_| poisoned())?.remove(collection);
        self.indexes.write().map_err(|_| poisoned())?.remove(collection);
        Ok(())
    }
}
