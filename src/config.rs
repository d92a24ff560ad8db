//! Engine configuration
//!
//! Fixed at construction; the engine never mutates it afterwards.

use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};
use crate::storage::{chunks_collection, files_collection};

pub const DEFAULT_PREFIX: &str = "fs";
/// 255 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;
/// Each chunk is buffered whole while writing.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

pub fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(GridError::argument("chunk size must be greater than zero"));
    }
    if chunk_size > MAX_CHUNK_SIZE {
        return Err(GridError::argument(format!(
            "chunk size {chunk_size} exceeds the maximum of {MAX_CHUNK_SIZE} bytes"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GridConfig {
    /// Collection name prefix: `<prefix>.files` and `<prefix>.chunks`.
    pub prefix: String,
    /// Chunk size used when a put does not override it.
    pub chunk_size: usize,
    /// Whether puts verify the content hash unless told otherwise.
    pub safe: bool,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            safe: false,
        }
    }
}

impl GridConfig {
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_safe(mut self, safe: bool) -> Self {
        self.safe = safe;
        self
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: GridConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefix.trim().is_empty() {
            return Err(GridError::argument("collection prefix must not be empty"));
        }
        check_chunk_size(self.chunk_size)
    }

    pub fn files_collection(&self) -> String {
        files_collection(&self.prefix)
    }

    pub fn chunks_collection(&self) -> String {
        chunks_collection(&self.prefix)
    }
}
