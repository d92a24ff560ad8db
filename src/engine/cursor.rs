//! Enumerating stored files
//!
//! `FileCursor` wraps the store's record cursor: lazy, finite, single pass.
//! Every yielded `GridFile` keeps a handle to the store so its content can
//! be read back later.

use std::io::Write;
use std::sync::Arc;

use super::metadata::FileRecord;
use crate::error::{GridError, Result};
use crate::storage::{Cursor, Document, DocumentStore, QueryOptions, Value};

pub struct GridFile {
    record: FileRecord,
    store: Arc<dyn DocumentStore>,
    chunks: String,
}

impl GridFile {
    pub(crate) fn new(record: FileRecord, store: Arc<dyn DocumentStore>, chunks: String) -> Self {
        Self { record, store, chunks }
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    pub fn into_record(self) -> FileRecord {
        self.record
    }

    pub fn id(&self) -> &Value {
        &self.record.id
    }

    pub fn length(&self) -> u64 {
        self.record.length
    }

    pub fn filename(&self) -> Option<&str> {
        self.record.filename()
    }

    /// The whole content in memory.
    pub fn slurp(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.record.length as usize);
        self.write_to(&mut out, None, 0)?;
        Ok(out)
    }

    /// Stream up to `length` bytes starting at `offset` into `out`.
    /// Returns the number of bytes written; an offset past the end writes nothing.
    pub fn write_to<W: Write>(&self, out: &mut W, length: Option<u64>, offset: u64) -> Result<u64> {
        let available = self.record.length.saturating_sub(offset);
        let wanted = length.map_or(available, |l| l.min(available));
        if wanted == 0 {
            return Ok(0);
        }

        let criteria = Document::new().with("files_id", self.record.id.clone());
        let cursor = self.store.query(&self.chunks, &criteria, QueryOptions::sorted_by("n"))?;

        let mut expected_n: i64 = 0;
        let mut position: u64 = 0;
        let mut written: u64 = 0;

        for chunk in cursor {
            let chunk = chunk?;
            if chunk.get_i64("n") != Some(expected_n) {
                return Err(self.missing_chunk(expected_n));
            }
            let data = chunk
                .get("data")
                .and_then(Value::as_binary)
                .ok_or_else(|| GridError::store(format!("chunk {expected_n} of file {} has no data", self.record.id)))?;
            expected_n += 1;

            let chunk_start = position;
            position += data.len() as u64;
            if position <= offset {
                continue;
            }

            let skip = offset.saturating_sub(chunk_start) as usize;
            let take = ((data.len() - skip) as u64).min(wanted - written) as usize;
            out.write_all(&data[skip..skip + take])?;
            written += take as u64;

            if written == wanted {
                return Ok(written);
            }
        }

        Err(self.missing_chunk(expected_n))
    }

    fn missing_chunk(&self, n: i64) -> GridError {
        GridError::NotFound(format!("chunk {} of file {}", n, self.record.id))
    }
}

impl std::fmt::Debug for GridFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridFile")
            .field("record", &self.record)
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

impl std::fmt::Display for GridFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (name: {}, length: {}, sha256: {})",
            self.record.id,
            self.filename().unwrap_or("-"),
            self.record.length,
            self.record.hash
        )
    }
}

pub struct FileCursor {
    inner: Cursor,
    store: Arc<dyn DocumentStore>,
    chunks: String,
}

impl FileCursor {
    pub(crate) fn new(inner: Cursor, store: Arc<dyn DocumentStore>, chunks: String) -> Self {
        Self { inner, store, chunks }
    }
}

impl Iterator for FileCursor {
    type Item = Result<GridFile>;

    fn next(&mut self) -> Option<Self::Item> {
        let doc = match self.inner.next()? {
            Ok(doc) => doc,
            Err(e) => return Some(Err(e)),
        };
        Some(
            FileRecord::from_document(doc)
                .map(|record| GridFile::new(record, Arc::clone(&self.store), self.chunks.clone())),
        )
    }
}
