// FILE: src/engine/mod.rs
//! The chunking-and-consistency engine.
//!
//! A put walks `Init -> WritingChunks -> Verifying -> Committed`, or ends in
//! `Failed` with its chunk set purged and no file record. Unsafe puts skip
//! `Verifying` and trust the store's hash.

pub mod cursor;
pub mod indexes;
pub mod metadata;
pub mod removal;
pub mod verifier;
pub mod writer;

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::{self, GridConfig};
use crate::error::{GridError, Result};
use crate::hash::ContentHash;
use crate::storage::{Document, DocumentStore, QueryOptions, Value};

pub use cursor::{FileCursor, GridFile};
pub use indexes::IndexManager;
pub use metadata::{FileRecord, MetadataManager};
pub use removal::{RemovalCoordinator, RemovalSummary, RemoveOptions};
pub use verifier::IntegrityVerifier;
pub use writer::{ChunkWriter, WriteSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Init,
    WritingChunks,
    Verifying,
    Committed,
    Failed,
}

impl fmt::Display for WriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteState::Init => "init",
            WriteState::WritingChunks => "writing-chunks",
            WriteState::Verifying => "verifying",
            WriteState::Committed => "committed",
            WriteState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Verify the store's hash against one computed while streaming.
    pub safe: bool,
    /// Overrides the configured chunk size for this put.
    pub chunk_size: Option<usize>,
}

impl PutOptions {
    pub fn safe() -> Self {
        Self { safe: true, chunk_size: None }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }
}

pub struct GridFs {
    store: Arc<dyn DocumentStore>,
    config: GridConfig,
    files: String,
    chunks: String,
    indexes: IndexManager,
}

impl GridFs {
    pub fn new(store: Arc<dyn DocumentStore>, config: GridConfig) -> Result<Self> {
        config.validate()?;
        tracing::debug!(
            "[GridFs] Using {} backend, prefix {:?}, chunk size {}",
            store.backend_name(),
            config.prefix,
            config.chunk_size
        );
        Ok(Self {
            files: config.files_collection(),
            chunks: config.chunks_collection(),
            store,
            config,
            indexes: IndexManager::new(),
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn removal(&self) -> RemovalCoordinator<'_> {
        RemovalCoordinator::new(self.store.as_ref(), &self.files, &self.chunks)
    }

    fn metadata(&self) -> MetadataManager<'_> {
        MetadataManager::new(self.store.as_ref(), &self.files)
    }

    fn bind(&self, record: FileRecord) -> GridFile {
        GridFile::new(record, Arc::clone(&self.store), self.chunks.clone())
    }

    /// Store `source` with the configured defaults.
    pub fn insert<R: Read>(&self, source: R, metadata: Document) -> Result<FileRecord> {
        let options = PutOptions { safe: self.config.safe, chunk_size: None };
        self.insert_with(source, metadata, options)
    }

    /// Store the file at `path`, defaulting `filename` to its file name.
    pub fn insert_path(&self, path: &Path, mut metadata: Document, options: PutOptions) -> Result<FileRecord> {
        if !path.is_file() {
            return Err(GridError::argument(format!("not a readable file: {}", path.display())));
        }
        let file = File::open(path)
            .map_err(|e| GridError::argument(format!("cannot open {}: {}", path.display(), e)))?;

        if !metadata.contains_key(metadata::FIELD_FILENAME) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                metadata.insert(metadata::FIELD_FILENAME, name);
            }
        }
        self.insert_with(BufReader::new(file), metadata, options)
    }

    pub fn insert_with<R: Read>(&self, mut source: R, metadata: Document, options: PutOptions) -> Result<FileRecord> {
        let chunk_size = options.chunk_size.unwrap_or(self.config.chunk_size);
        config::check_chunk_size(chunk_size)?;
        metadata::validate_metadata(&metadata)?;

        let target_id = match metadata.get(metadata::FIELD_ID) {
            Some(id) => {
                if self.metadata().exists(id)? {
                    return Err(GridError::argument(format!("file id {id} already exists")));
                }
                id.clone()
            }
            None => Value::Text(Uuid::new_v4().to_string()),
        };

        let mut state = WriteState::Init;
        let result = self.run_put(&mut source, &target_id, metadata, chunk_size, options.safe, &mut state);
        match &result {
            Ok(_) => tracing::debug!("[GridFs] Put {} reached {}", target_id, state),
            Err(e) => tracing::warn!("[GridFs] Put {} failed while {}: {}", target_id, state, e),
        }
        result
    }

    fn run_put<R: Read>(
        &self,
        source: &mut R,
        target_id: &Value,
        metadata: Document,
        chunk_size: usize,
        safe: bool,
        state: &mut WriteState,
    ) -> Result<FileRecord> {
        self.indexes.ensure_chunks(self.store.as_ref(), &self.chunks)?;

        *state = WriteState::WritingChunks;
        let hasher = safe.then(ContentHash::hasher);
        let summary = match ChunkWriter::new(self.store.as_ref(), &self.chunks)
            .write(source, target_id, chunk_size, hasher)
        {
            Ok(summary) => summary,
            Err(e) => return Err(self.fail(state, target_id, e)),
        };

        if safe {
            *state = WriteState::Verifying;
        }
        // The verifier purges on mismatch itself.
        let hash = match IntegrityVerifier::new(self.store.as_ref(), &self.config.prefix).verify(
            target_id,
            summary.local_hash,
            &self.removal(),
        ) {
            Ok(hash) => hash,
            Err(e @ GridError::Integrity { .. }) => {
                *state = WriteState::Failed;
                return Err(e);
            }
            Err(e) => return Err(self.fail(state, target_id, e)),
        };

        let committed = self
            .indexes
            .ensure_files(self.store.as_ref(), &self.files)
            .and_then(|()| {
                self.metadata().commit(
                    target_id,
                    metadata,
                    summary.length,
                    chunk_size as u64,
                    &hash.to_hex(),
                )
            });
        match committed {
            Ok(record) => {
                *state = WriteState::Committed;
                Ok(record)
            }
            Err(e) => Err(self.fail(state, target_id, e)),
        }
    }

    /// Best-effort purge of a half-written chunk set.
    fn fail(&self, state: &mut WriteState, target_id: &Value, err: GridError) -> GridError {
        *state = WriteState::Failed;
        if let Err(purge_err) = self.removal().purge_chunks(target_id, false) {
            tracing::warn!("[GridFs] Could not purge chunks of {}: {}", target_id, purge_err);
        }
        err
    }

    pub fn get(&self, id: &Value) -> Result<Option<GridFile>> {
        Ok(self.metadata().get(id)?.map(|record| self.bind(record)))
    }

    /// Resolve an id typed as text, such as a command-line argument. Integer
    /// ids are tried first, then the literal text.
    pub fn resolve_id(&self, raw: &str) -> Result<Option<Value>> {
        let mut candidates = Vec::with_capacity(2);
        if let Ok(n) = raw.parse::<i64>() {
            candidates.push(Value::Int(n));
        }
        candidates.push(Value::from(raw));

        for id in candidates {
            if self.metadata().exists(&id)? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// First file matching `criteria`. `projection` limits the caller metadata
    /// returned; engine fields are always present.
    pub fn find_one(&self, criteria: &Document, projection: Option<&[&str]>) -> Result<Option<GridFile>> {
        let mut options = QueryOptions::first();
        options.projection = projection.map(|fields| {
            metadata::ENGINE_FIELDS
                .iter()
                .chain(fields.iter())
                .map(|f| f.to_string())
                .collect()
        });

        let mut cursor = self.store.query(&self.files, criteria, options)?;
        match cursor.next().transpose()? {
            Some(doc) => Ok(Some(self.bind(FileRecord::from_document(doc)?))),
            None => Ok(None),
        }
    }

    pub fn find(&self, criteria: &Document) -> Result<FileCursor> {
        let inner = self.store.query(&self.files, criteria, QueryOptions::default())?;
        Ok(FileCursor::new(inner, Arc::clone(&self.store), self.chunks.clone()))
    }

    pub fn all(&self) -> Result<FileCursor> {
        self.find(&Document::new())
    }

    pub fn remove(&self, criteria: &Document, options: RemoveOptions) -> Result<RemovalSummary> {
        self.removal().remove(criteria, options)
    }

    pub fn delete(&self, id: &Value) -> Result<RemovalSummary> {
        self.removal().delete(id)
    }

    /// Empty both collections, bypassing per-file accounting.
    pub fn drop_all(&self) -> Result<()> {
        self.store.drop_collection(&self.chunks)?;
        self.store.drop_collection(&self.files)?;
        self.indexes.reset();
        tracing::info!("[GridFs] Dropped {} and {}", self.files, self.chunks);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::testing::FaultyStore;
    use crate::storage::MemoryStore;
    use std::io::{self, Cursor};
    use std::sync::atomic::Ordering;

    fn grid_on(store: Arc<dyn DocumentStore>, chunk_size: usize) -> GridFs {
        GridFs::new(store, GridConfig::default().with_chunk_size(chunk_size)).unwrap()
    }

    fn chunk_count(store: &dyn DocumentStore, id: &Value) -> u64 {
        store
            .count("fs.chunks", &Document::new().with("files_id", id.clone()))
            .unwrap()
    }

    #[test]
    fn test_put_example_layout() {
        let store = Arc::new(MemoryStore::new());
        let grid = grid_on(store.clone(), 4);

        let record = grid
            .insert_with(
                Cursor::new(b"ABCDEFGHIJ"),
                Document::new().with("filename", "letters.txt"),
                PutOptions::safe(),
            )
            .unwrap();
        assert_eq!(record.length, 10);
        assert_eq!(record.chunk_size, 4);
        assert_eq!(record.hash, ContentHash::compute(b"ABCDEFGHIJ").to_hex());

        let payloads: Vec<Vec<u8>> = store
            .query(
                "fs.chunks",
                &Document::new().with("files_id", record.id.clone()),
                QueryOptions::sorted_by("n"),
            )
            .unwrap()
            .map(|d| d.unwrap().get("data").and_then(Value::as_binary).unwrap().to_vec())
            .collect();
        assert_eq!(payloads, vec![b"ABCD".to_vec(), b"EFGH".to_vec(), b"IJ".to_vec()]);

        let file = grid.get(&record.id).unwrap().unwrap();
        assert_eq!(file.slurp().unwrap(), b"ABCDEFGHIJ");
        assert_eq!(file.filename(), Some("letters.txt"));
    }

    #[test]
    fn test_unsafe_put_uses_config_default_and_store_hash() {
        let store = Arc::new(FaultyStore::new());
        let forged = ContentHash::compute(b"not the content");
        store.forge_hash(forged);
        let grid = grid_on(store.clone(), 3);

        let record = grid.insert(Cursor::new(b"hello"), Document::new()).unwrap();
        assert_eq!(record.hash, forged.to_hex());
        assert_eq!(chunk_count(store.as_ref(), &record.id), 2);
        assert_eq!(store.hash_requests.load(Ordering::SeqCst), 1);

        // Rejected metadata never reaches the store.
        let err = grid
            .insert(Cursor::new(b"hello"), Document::new().with("length", 5))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(store.hash_requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_safe_put_with_forged_hash_leaves_nothing() {
        let store = Arc::new(FaultyStore::new());
        store.forge_hash(ContentHash::compute(b"forged"));
        let grid = grid_on(store.clone(), 4);

        let id = Value::from("doomed");
        let err = grid
            .insert_with(
                Cursor::new(b"ABCDEFGHIJ"),
                Document::new().with("_id", "doomed"),
                PutOptions::safe(),
            )
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(store.hash_requests.load(Ordering::SeqCst), 1);
        assert_eq!(chunk_count(store.as_ref(), &id), 0);
        assert!(grid.get(&id).unwrap().is_none());
    }

    #[test]
    fn test_config_safe_applies_to_insert() {
        let store = Arc::new(FaultyStore::new());
        store.forge_hash(ContentHash::compute(b"forged"));
        let grid = GridFs::new(store.clone(), GridConfig::default().with_safe(true)).unwrap();

        let err = grid.insert(Cursor::new(b"data"), Document::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(store.inner.len("fs.files").unwrap(), 0);
    }

    #[test]
    fn test_duplicate_id_rejected_before_writing() {
        let store = Arc::new(MemoryStore::new());
        let grid = grid_on(store.clone(), 4);
        let meta = Document::new().with("_id", 42);

        grid.insert(Cursor::new(b"first"), meta.clone()).unwrap();
        let chunks_before = store.len("fs.chunks").unwrap();

        let err = grid.insert(Cursor::new(b"second"), meta).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(store.len("fs.chunks").unwrap(), chunks_before);
        assert_eq!(grid.get(&Value::from(42)).unwrap().unwrap().slurp().unwrap(), b"first");
    }

    #[test]
    fn test_resolve_id_tries_integer_then_text() {
        let store = Arc::new(MemoryStore::new());
        let grid = grid_on(store, 4);
        grid.insert(Cursor::new(b"int"), Document::new().with("_id", 7)).unwrap();
        grid.insert(Cursor::new(b"text"), Document::new().with("_id", "123")).unwrap();
        grid.insert(Cursor::new(b"name"), Document::new().with("_id", "report")).unwrap();

        assert_eq!(grid.resolve_id("7").unwrap(), Some(Value::Int(7)));
        assert_eq!(grid.resolve_id("123").unwrap(), Some(Value::from("123")));
        assert_eq!(grid.resolve_id("report").unwrap(), Some(Value::from("report")));
        assert_eq!(grid.resolve_id("8").unwrap(), None);

        let id = grid.resolve_id("123").unwrap().unwrap();
        assert_eq!(grid.get(&id).unwrap().unwrap().slurp().unwrap(), b"text");
    }

    #[test]
    fn test_bad_arguments() {
        let store = Arc::new(MemoryStore::new());
        let grid = grid_on(store.clone(), 4);

        let err = grid
            .insert_with(Cursor::new(b"x"), Document::new(), PutOptions::default().with_chunk_size(0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);

        let oversized = PutOptions::default().with_chunk_size(usize::MAX);
        let err = grid.insert_with(Cursor::new(b"x"), Document::new(), oversized).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert!(GridFs::new(store.clone(), GridConfig::default().with_chunk_size(usize::MAX)).is_err());

        let err = grid
            .insert(Cursor::new(b"x"), Document::new().with("chunkSize", 9))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);

        let err = grid
            .insert_path(Path::new("/definitely/not/here.bin"), Document::new(), PutOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);

        assert_eq!(store.len("fs.chunks").unwrap(), 0);
        assert!(GridFs::new(store, GridConfig::default().with_prefix("")).is_err());
    }

    struct FailsAfter {
        served: usize,
        limit: usize,
    }

    impl Read for FailsAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served >= self.limit {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "source vanished"));
            }
            let n = buf.len().min(self.limit - self.served);
            buf[..n].fill(b'z');
            self.served += n;
            Ok(n)
        }
    }

    #[test]
    fn test_source_failure_mid_stream_purges_chunks() {
        let store = Arc::new(MemoryStore::new());
        let grid = grid_on(store.clone(), 4);

        let err = grid
            .insert(FailsAfter { served: 0, limit: 9 }, Document::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(store.len("fs.chunks").unwrap(), 0);
        assert_eq!(store.len("fs.files").unwrap(), 0);
    }

    #[test]
    fn test_commit_failure_purges_chunks() {
        let store = Arc::new(FaultyStore::new());
        store.fail_inserts_on("fs.files");
        let grid = grid_on(store.clone(), 2);

        let err = grid.insert(Cursor::new(b"abcdef"), Document::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackingStore);
        assert_eq!(store.inner.len("fs.chunks").unwrap(), 0);
    }

    #[test]
    fn test_indexes_created_before_first_write() {
        let store = Arc::new(MemoryStore::new());
        let grid = grid_on(store.clone(), 4);
        assert!(store.indexes("fs.chunks").unwrap().is_empty());

        grid.insert(Cursor::new(b""), Document::new()).unwrap();
        assert_eq!(store.indexes("fs.chunks").unwrap(), vec![indexes::chunks_index()]);
        assert_eq!(store.indexes("fs.files").unwrap(), vec![indexes::files_index()]);
    }

    #[test]
    fn test_empty_file() {
        let store = Arc::new(MemoryStore::new());
        let grid = grid_on(store.clone(), 4);
        let record = grid.insert_with(Cursor::new(b""), Document::new(), PutOptions::safe()).unwrap();

        assert_eq!(record.length, 0);
        assert_eq!(record.chunk_count(), 0);
        assert_eq!(chunk_count(store.as_ref(), &record.id), 0);
        assert!(grid.get(&record.id).unwrap().unwrap().slurp().unwrap().is_empty());
    }

    #[test]
    fn test_all_is_single_pass() {
        let store = Arc::new(MemoryStore::new());
        let grid = grid_on(store, 4);
        assert_eq!(grid.all().unwrap().count(), 0);

        for name in ["a", "b", "c"] {
            grid.insert(Cursor::new(name.as_bytes()), Document::new().with("filename", name))
                .unwrap();
        }

        let mut cursor = grid.all().unwrap();
        let names: Vec<String> = cursor
            .by_ref()
            .map(|f| f.unwrap().filename().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_find_one_with_projection() {
        let store = Arc::new(MemoryStore::new());
        let grid = grid_on(store, 4);
        grid.insert(
            Cursor::new(b"x"),
            Document::new().with("filename", "x").with("owner", "ops").with("tag", "t"),
        )
        .unwrap();

        let file = grid
            .find_one(&Document::new().with("tag", "t"), Some(&["owner"]))
            .unwrap()
            .unwrap();
        assert_eq!(file.record().metadata.get_str("owner"), Some("ops"));
        assert!(!file.record().metadata.contains_key("tag"));
        assert_eq!(file.length(), 1);

        assert!(grid.find_one(&Document::new().with("tag", "zzz"), None).unwrap().is_none());
    }

    #[test]
    fn test_remove_and_delete() {
        let store = Arc::new(MemoryStore::new());
        let grid = grid_on(store.clone(), 2);
        let mut ids = Vec::new();
        for i in 0..3 {
            let record = grid
                .insert(Cursor::new(format!("file-{i}").into_bytes()), Document::new().with("tag", "t"))
                .unwrap();
            ids.push(record.id);
        }

        let summary = grid.remove(&Document::new().with("tag", "t"), RemoveOptions::one()).unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(chunk_count(store.as_ref(), &ids[0]), 0);
        assert_eq!(chunk_count(store.as_ref(), &ids[1]), 3);

        grid.delete(&ids[1]).unwrap();
        assert!(grid.get(&ids[1]).unwrap().is_none());

        grid.remove(&Document::new(), RemoveOptions::all().strict()).unwrap();
        assert_eq!(store.len("fs.files").unwrap(), 0);
        assert_eq!(store.len("fs.chunks").unwrap(), 0);
    }

    #[test]
    fn test_drop_all_resets_everything() {
        let store = Arc::new(MemoryStore::new());
        let grid = grid_on(store.clone(), 4);
        grid.insert(Cursor::new(b"some bytes"), Document::new()).unwrap();

        grid.drop_all().unwrap();
        assert_eq!(store.len("fs.files").unwrap(), 0);
        assert_eq!(store.len("fs.chunks").unwrap(), 0);
        assert!(store.indexes("fs.chunks").unwrap().is_empty());

        // Indexes come back with the next write.
        grid.insert(Cursor::new(b"again"), Document::new()).unwrap();
        assert_eq!(store.indexes("fs.chunks").unwrap().len(), 1);
    }
}
