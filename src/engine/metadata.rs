//! File records: the metadata document committed once a file's chunks are in.

use chrono::{DateTime, SubsecRound, Utc};

use crate::error::{GridError, Result};
use crate::storage::{Document, DocumentStore, QueryOptions, Value};

pub const FIELD_ID: &str = "_id";
pub const FIELD_LENGTH: &str = "length";
pub const FIELD_CHUNK_SIZE: &str = "chunkSize";
pub const FIELD_UPLOAD_DATE: &str = "uploadDate";
pub const FIELD_HASH: &str = "sha256";
pub const FIELD_FILENAME: &str = "filename";

/// Fields the engine computes; callers may not set them.
pub const RESERVED_FIELDS: &[&str] = &[FIELD_LENGTH, FIELD_CHUNK_SIZE, FIELD_UPLOAD_DATE, FIELD_HASH];

/// Every field a projection keeps regardless of what the caller asked for.
pub const ENGINE_FIELDS: &[&str] = &[FIELD_ID, FIELD_LENGTH, FIELD_CHUNK_SIZE, FIELD_UPLOAD_DATE, FIELD_HASH];

#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: Value,
    pub length: u64,
    pub chunk_size: u64,
    pub upload_date: DateTime<Utc>,
    /// Lowercase hex SHA-256 of the content.
    pub hash: String,
    /// Caller-supplied fields, engine fields excluded.
    pub metadata: Document,
}

impl FileRecord {
    pub fn filename(&self) -> Option<&str> {
        self.metadata.get_str(FIELD_FILENAME)
    }

    /// ceil(length / chunk_size); zero for an empty file.
    pub fn chunk_count(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.length.div_ceil(self.chunk_size)
    }

    pub fn to_document(&self) -> Document {
        let mut doc = self.metadata.clone();
        doc.insert(FIELD_ID, self.id.clone());
        doc.insert(FIELD_LENGTH, self.length as i64);
        doc.insert(FIELD_CHUNK_SIZE, self.chunk_size as i64);
        doc.insert(FIELD_UPLOAD_DATE, self.upload_date);
        doc.insert(FIELD_HASH, self.hash.clone());
        doc
    }

    pub fn from_document(mut doc: Document) -> Result<Self> {
        let id = doc
            .remove(FIELD_ID)
            .ok_or_else(|| malformed("missing _id"))?;
        let length = take_count(&mut doc, FIELD_LENGTH, &id)?;
        let chunk_size = take_count(&mut doc, FIELD_CHUNK_SIZE, &id)?;
        let upload_date = doc
            .remove(FIELD_UPLOAD_DATE)
            .and_then(|v| v.as_timestamp())
            .ok_or_else(|| malformed(format!("file {id} has no upload date")))?;
        let hash = match doc.remove(FIELD_HASH) {
            Some(Value::Text(hash)) => hash,
            _ => return Err(malformed(format!("file {id} has no content hash"))),
        };

        Ok(Self { id, length, chunk_size, upload_date, hash, metadata: doc })
    }
}

fn malformed(msg: impl Into<String>) -> GridError {
    GridError::store(format!("malformed file record: {}", msg.into()))
}

fn take_count(doc: &mut Document, field: &str, id: &Value) -> Result<u64> {
    doc.remove(field)
        .and_then(|v| v.as_i64())
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| malformed(format!("file {id} has no valid {field}")))
}

/// Reject caller metadata that would clash with engine fields.
pub fn validate_metadata(metadata: &Document) -> Result<()> {
    for field in RESERVED_FIELDS {
        if metadata.contains_key(field) {
            return Err(GridError::argument(format!("metadata field {field:?} is reserved")));
        }
    }
    if let Some(id) = metadata.get(FIELD_ID) {
        if !id.is_id_like() {
            return Err(GridError::argument(format!("file id must be text or integer, got {id}")));
        }
    }
    if let Some(name) = metadata.get(FIELD_FILENAME) {
        if name.as_str().is_none() {
            return Err(GridError::argument(format!("filename must be text, got {name}")));
        }
    }
    check_document(metadata, "")
}

/// Keys starting with `$` are reserved for stored binary and date values, and
/// non-finite floats have no stored form.
fn check_document(doc: &Document, path: &str) -> Result<()> {
    for (key, value) in doc.iter() {
        let path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
        if key.starts_with('$') {
            return Err(GridError::argument(format!("metadata key {path:?} must not start with '$'")));
        }
        check_value(value, &path)?;
    }
    Ok(())
}

fn check_value(value: &Value, path: &str) -> Result<()> {
    match value {
        Value::Float(f) if !f.is_finite() => Err(GridError::argument(format!(
            "metadata field {path:?} holds a non-finite number"
        ))),
        Value::Document(doc) => check_document(doc, path),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, item)| check_value(item, &format!("{path}[{i}]"))),
        _ => Ok(()),
    }
}

pub struct MetadataManager<'a> {
    store: &'a dyn DocumentStore,
    collection: &'a str,
}

impl<'a> MetadataManager<'a> {
    pub fn new(store: &'a dyn DocumentStore, collection: &'a str) -> Self {
        Self { store, collection }
    }

    /// Merge caller metadata with the engine fields and insert the record.
    pub fn commit(
        &self,
        target_id: &Value,
        mut user_metadata: Document,
        length: u64,
        chunk_size: u64,
        hash: &str,
    ) -> Result<FileRecord> {
        user_metadata.remove(FIELD_ID);
        let record = FileRecord {
            id: target_id.clone(),
            length,
            chunk_size,
            // Stored timestamps keep microseconds.
            upload_date: Utc::now().trunc_subsecs(6),
            hash: hash.to_string(),
            metadata: user_metadata,
        };

        self.store.insert(self.collection, record.to_document())?;
        tracing::info!(
            "[MetadataManager] Committed file {} ({} bytes, chunk size {})",
            record.id,
            length,
            chunk_size
        );
        Ok(record)
    }

    pub fn get(&self, id: &Value) -> Result<Option<FileRecord>> {
        let criteria = Document::new().with(FIELD_ID, id.clone());
        let mut cursor = self.store.query(self.collection, &criteria, QueryOptions::first())?;
        cursor
            .next()
            .transpose()?
            .map(FileRecord::from_document)
            .transpose()
    }

    pub fn exists(&self, id: &Value) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }
}
