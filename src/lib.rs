//! gridstore: chunked file storage over a document store
//!
//! Files are split into fixed-size chunk documents (`<prefix>.chunks`) and
//! described by one metadata document each (`<prefix>.files`):
//! - engine: chunk writing, hash verification, commit and removal ordering
//! - storage: the document store seam plus SQLite and in-memory backends

pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod storage;

pub use config::GridConfig;
pub use engine::{FileCursor, FileRecord, GridFile, GridFs, PutOptions, RemovalSummary, RemoveOptions};
pub use error::{ErrorKind, GridError, Result};
pub use hash::ContentHash;
pub use storage::{Document, DocumentStore, MemoryStore, SqliteStore, Value};
