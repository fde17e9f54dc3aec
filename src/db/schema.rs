//! Database schema definitions and creation
//!
//! Three tables live in the catalog database:
//! - `chunks`: durable per-chunk lifecycle state, one row per
//!   (run_id, source, chunk_name)
//! - `files`: catalog rows parsed from raw listings
//! - `runs`: one provenance row per (run_id, source)

use crate::error::DbResult;
use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Chunk state table
const CREATE_CHUNKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    run_id TEXT NOT NULL,
    source TEXT NOT NULL,
    chunk_name TEXT NOT NULL,
    status TEXT NOT NULL,         -- listing, listed, error, ingested
    raw_file TEXT NOT NULL,
    rclone_command TEXT NOT NULL, -- exact listing command line
    updated_at TEXT NOT NULL,     -- ISO 8601 UTC
    PRIMARY KEY (run_id, source, chunk_name)
)
"#;

/// Catalog rows
const CREATE_FILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    source TEXT NOT NULL,
    remote TEXT NOT NULL,
    chunk_name TEXT,
    path TEXT NOT NULL,           -- relative to the source root
    size INTEGER NOT NULL,
    modtime TEXT NOT NULL,
    ext TEXT NOT NULL,            -- lowercase, without dot
    is_media INTEGER NOT NULL,
    media_kind TEXT NOT NULL,     -- photo, video, other
    ignored_reason TEXT NOT NULL,
    UNIQUE (run_id, source, path)
)
"#;

/// Per-source provenance
const CREATE_RUNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT NOT NULL,
    source TEXT NOT NULL,
    remote TEXT NOT NULL,
    started_at TEXT NOT NULL,
    raw_file TEXT NOT NULL,
    rclone_command TEXT NOT NULL,
    completed_at TEXT,
    PRIMARY KEY (run_id, source)
)
"#;

/// Schema metadata
const CREATE_META_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS catalog_info (
    key TEXT PRIMARY KEY,
    value TEXT
)
"#;

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_files_source_media ON files(source, is_media)",
    "CREATE INDEX IF NOT EXISTS idx_files_path ON files(path)",
    "CREATE INDEX IF NOT EXISTS idx_files_size ON files(size)",
    "CREATE INDEX IF NOT EXISTS idx_files_run ON files(run_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_status ON chunks(run_id, status)",
];

/// Pragmas for a store shared by the orchestrator and the ingest subcommand
///
/// Status rows must survive a crash, so synchronous stays on.
const CATALOG_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA busy_timeout = 30000;
PRAGMA temp_store = MEMORY;
PRAGMA cache_size = -64000;      -- 64MB cache
"#;

/// Create tables and indexes if missing
pub fn create_database(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(CATALOG_PRAGMAS)?;

    conn.execute(CREATE_CHUNKS_TABLE, [])?;
    conn.execute(CREATE_FILES_TABLE, [])?;
    conn.execute(CREATE_RUNS_TABLE, [])?;
    conn.execute(CREATE_META_TABLE, [])?;

    for sql in CREATE_INDEXES {
        conn.execute(sql, [])?;
    }

    set_info(conn, keys::SCHEMA_VERSION, &SCHEMA_VERSION.to_string())?;
    Ok(())
}

/// Store catalog metadata
pub fn set_info(conn: &Connection, key: &str, value: &str) -> DbResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO catalog_info (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Get catalog metadata
pub fn get_info(conn: &Connection, key: &str) -> DbResult<Option<String>> {
    let result = conn.query_row(
        "SELECT value FROM catalog_info WHERE key = ?1",
        [key],
        |row| row.get(0),
    );

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Metadata keys
pub mod keys {
    /// Schema version
    pub const SCHEMA_VERSION: &str = "schema_version";

    /// Version of the tool that last opened the catalog
    pub const TOOL_VERSION: &str = "tool_version";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_database() {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for table in ["catalog_info", "chunks", "files", "runs"] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_create_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn).unwrap();
        create_database(&conn).unwrap();

        assert_eq!(
            get_info(&conn, keys::SCHEMA_VERSION).unwrap(),
            Some(SCHEMA_VERSION.to_string())
        );
        assert_eq!(get_info(&conn, "missing").unwrap(), None);
    }
}
