//! Database connection management
//!
//! Opens the SQLite file that backs `SqliteStore`, creating its directory
//! and applying the journal/sync pragmas the store expects.

use std::path::Path;

use rusqlite::Connection;

use crate::error::{GridError, Result};

/// Open (or create) the database at `db_path` with WAL journaling.
pub fn open_connection(db_path: &Path) -> Result<Connection> {
    let db_dir = db_path
        .parent()
        .ok_or_else(|| GridError::argument(format!("Invalid database path: {}", db_path.display())))?;

    if !db_dir.as_os_str().is_empty() {
        std::fs::create_dir_all(db_dir)?;
    }

    let conn = Connection::open(db_path)?;

    // Enable WAL mode for better concurrent access
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", WAL, |row| row.get(0))?;
    tracing::debug!("journal_mode = {}", mode);

    // Optimize for performance
    conn.pragma_update(None, "synchronous", NORMAL)?;

    tracing::info!("Database opened at: {}", db_path.display());
    Ok(conn)
}

/// Private in-memory database, gone when the connection drops.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    tracing::debug!("Opened in-memory database");
    Ok(conn)
}

// SQL pragma constants
const WAL: &str = "WAL";
const NORMAL: &str = "NORMAL";
