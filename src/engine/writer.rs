//! Chunk Writer
//!
//! Splits a byte stream into `{files_id, n, data}` chunk documents:
//! - every chunk but the last carries exactly `chunk_size` bytes
//! - sequence numbers run 0..count with no gaps
//! - an empty stream produces no chunks
//!
//! Chunks are inserted one at a time as they fill, so readers can see a
//! partially written file.

use std::io::{self, Read};

use crate::error::{GridError, Result};
use crate::hash::{ContentHash, ContentHasher};
use crate::storage::{Document, DocumentStore, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub chunks: u64,
    pub length: u64,
    /// Hash of the bytes as they streamed past; only when a hasher was supplied.
    pub local_hash: Option<ContentHash>,
}

pub struct ChunkWriter<'a> {
    store: &'a dyn DocumentStore,
    collection: &'a str,
}

impl<'a> ChunkWriter<'a> {
    pub fn new(store: &'a dyn DocumentStore, collection: &'a str) -> Self {
        Self { store, collection }
    }

    pub fn write<R: Read>(
        &self,
        source: &mut R,
        target_id: &Value,
        chunk_size: usize,
        mut hasher: Option<ContentHasher>,
    ) -> Result<WriteSummary> {
        if chunk_size == 0 {
            return Err(GridError::argument("chunk size must be greater than zero"));
        }

        let mut buf = vec![0u8; chunk_size];
        let mut next_n: i64 = 0;
        let mut length: u64 = 0;

        loop {
            let filled = fill_block(source, &mut buf)?;
            if filled == 0 {
                break;
            }

            let block = &buf[..filled];
            if let Some(h) = hasher.as_mut() {
                h.update(block);
            }

            let chunk = Document::new()
                .with("files_id", target_id.clone())
                .with("n", next_n)
                .with("data", block.to_vec());
            self.store.insert(self.collection, chunk)?;

            next_n += 1;
            length += filled as u64;

            // A short block means the source hit EOF.
            if filled < chunk_size {
                break;
            }
        }

        tracing::debug!(
            "[ChunkWriter] Wrote {} chunk(s), {} bytes for file {}",
            next_n,
            length,
            target_id
        );

        Ok(WriteSummary {
            chunks: next_n as u64,
            length,
            local_hash: hasher.map(ContentHasher::finalize),
        })
    }
}

/// Read until `buf` is full or the source is exhausted.
fn fill_block<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
