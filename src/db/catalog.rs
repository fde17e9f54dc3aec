//! Catalog database: chunk state store and file rows
//!
//! All access goes through one connection behind a mutex. Callers on the
//! async side run these methods inside `spawn_blocking`.

use crate::chunk::ChunkStatus;
use crate::db::ingest::{
    catalog_path, classify_ext, parse_listing_line, IngestRequest, IngestSummary,
    INGEST_BATCH_SIZE,
};
use crate::db::schema::{self, keys};
use crate::error::{DbError, DbResult};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Status upsert; a chunk that reached `ingested` keeps that state
const UPSERT_CHUNK: &str = r#"
INSERT INTO chunks (run_id, source, chunk_name, status, raw_file, rclone_command, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT (run_id, source, chunk_name) DO UPDATE SET
    status = excluded.status,
    raw_file = excluded.raw_file,
    rclone_command = excluded.rclone_command,
    updated_at = excluded.updated_at
WHERE chunks.status != 'ingested'
"#;

/// Provenance upsert; the first ingestion of a source fixes `started_at`
const UPSERT_RUN: &str = r#"
INSERT INTO runs (run_id, source, remote, started_at, raw_file, rclone_command)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT (run_id, source) DO UPDATE SET
    remote = excluded.remote,
    raw_file = excluded.raw_file,
    rclone_command = excluded.rclone_command,
    completed_at = NULL
"#;

const INSERT_FILE: &str = r#"
INSERT OR IGNORE INTO files
    (run_id, source, remote, chunk_name, path, size, modtime, ext, is_media, media_kind, ignored_reason)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
"#;

/// Identity and provenance of one chunk status write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEntry {
    pub run_id: String,
    pub source: String,
    pub chunk_name: String,
    pub raw_file: String,
    pub command: String,
}

/// Stored chunk row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkRecord {
    pub run_id: String,
    pub source: String,
    pub chunk_name: String,
    pub status: ChunkStatus,
    pub raw_file: String,
    pub rclone_command: String,
    pub updated_at: String,
}

/// SQLite-backed catalog
pub struct Catalog {
    conn: Mutex<Connection>,
}

impl Catalog {
    /// Open (creating if needed) the catalog at `path`
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path).map_err(|e| DbError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::init(conn)
    }

    /// Private in-memory catalog
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        schema::create_database(&conn)?;
        schema::set_info(&conn, keys::TOOL_VERSION, env!("CARGO_PKG_VERSION"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Stored status of a chunk; `None` means pending
    pub fn chunk_status(
        &self,
        run_id: &str,
        source: &str,
        chunk_name: &str,
    ) -> DbResult<Option<ChunkStatus>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT status FROM chunks WHERE run_id = ?1 AND source = ?2 AND chunk_name = ?3",
                params![run_id, source, chunk_name],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|s| parse_status(&s)).transpose()
    }

    /// Record a chunk's status
    ///
    /// Returns `false` when the write was ignored because the chunk is
    /// already `ingested`.
    pub fn set_chunk_status(&self, entry: &ChunkEntry, status: ChunkStatus) -> DbResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            UPSERT_CHUNK,
            params![
                entry.run_id,
                entry.source,
                entry.chunk_name,
                status.as_str(),
                entry.raw_file,
                entry.command,
                now_utc(),
            ],
        )?;

        debug!(
            source = %entry.source,
            chunk = %entry.chunk_name,
            status = %status,
            applied = changed > 0,
            "Chunk status recorded"
        );
        Ok(changed > 0)
    }

    /// All chunk rows of a run, ordered by source then chunk name
    pub fn chunks_for_run(&self, run_id: &str) -> DbResult<Vec<ChunkRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT run_id, source, chunk_name, status, raw_file, rclone_command, updated_at
             FROM chunks WHERE run_id = ?1 ORDER BY source, chunk_name",
        )?;

        let rows = stmt
            .query_map([run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(run_id, source, chunk_name, status, raw_file, rclone_command, updated_at)| {
                    Ok(ChunkRecord {
                        run_id,
                        source,
                        chunk_name,
                        status: parse_status(&status)?,
                        raw_file,
                        rclone_command,
                        updated_at,
                    })
                },
            )
            .collect()
    }

    /// Number of catalogued files for a run, optionally for one source
    pub fn file_count(&self, run_id: &str, source: Option<&str>) -> DbResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = match source {
            Some(source) => conn.query_row(
                "SELECT COUNT(*) FROM files WHERE run_id = ?1 AND source = ?2",
                params![run_id, source],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM files WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )?,
        };
        Ok(count as u64)
    }

    /// Parse a raw listing and upsert its rows
    ///
    /// Rows already present for `(run_id, source, path)` are left alone, so
    /// ingesting the same artifact twice changes nothing.
    pub fn ingest_listing(&self, request: &IngestRequest) -> DbResult<IngestSummary> {
        let raw = File::open(&request.raw_file).map_err(|e| DbError::RawFile {
            path: request.raw_file.clone(),
            reason: e.to_string(),
        })?;
        let mut reader = BufReader::new(raw);
        let mut rejects = RejectLog::open(request.error_log.as_deref())?;

        let raw_file = request.raw_file.display().to_string();
        let mut conn = self.conn.lock();
        conn.execute(
            UPSERT_RUN,
            params![
                request.run_id,
                request.source,
                request.remote,
                now_utc(),
                raw_file,
                request.command,
            ],
        )?;

        let mut summary = IngestSummary::default();
        let mut buf = Vec::new();
        let mut batch = Vec::with_capacity(INGEST_BATCH_SIZE);

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| DbError::RawFile {
                    path: request.raw_file.clone(),
                    reason: e.to_string(),
                })?;
            if read == 0 {
                break;
            }
            summary.lines += 1;

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                continue;
            }

            match parse_listing_line(line) {
                Ok(record) => {
                    batch.push(FileRow {
                        path: catalog_path(request.path_prefix.as_deref(), record.path),
                        size: record.size,
                        modtime: record.modtime,
                    });
                    summary.accepted += 1;
                }
                Err(reason) => {
                    rejects.write(reason.label(), line)?;
                    summary.rejected += 1;
                }
            }

            if batch.len() >= INGEST_BATCH_SIZE {
                summary.inserted += insert_batch(&mut conn, request, &mut batch)?;
            }
        }

        if !batch.is_empty() {
            summary.inserted += insert_batch(&mut conn, request, &mut batch)?;
        }

        conn.execute(
            "UPDATE runs SET completed_at = ?1 WHERE run_id = ?2 AND source = ?3",
            params![now_utc(), request.run_id, request.source],
        )?;

        debug!(
            source = %request.source,
            chunk = request.chunk_name.as_deref().unwrap_or("-"),
            lines = summary.lines,
            inserted = summary.inserted,
            rejected = summary.rejected,
            "Listing ingested"
        );
        Ok(summary)
    }
}

struct FileRow {
    path: String,
    size: u64,
    modtime: String,
}

/// Insert one batch in a single transaction, returning new rows
fn insert_batch(
    conn: &mut Connection,
    request: &IngestRequest,
    batch: &mut Vec<FileRow>,
) -> DbResult<u64> {
    let tx = conn.transaction()?;
    let mut inserted = 0u64;

    {
        let mut stmt = tx.prepare_cached(INSERT_FILE)?;
        for row in batch.drain(..) {
            let class = classify_ext(&row.path);
            inserted += stmt.execute(params![
                request.run_id,
                request.source,
                request.remote,
                request.chunk_name,
                row.path,
                row.size as i64,
                row.modtime,
                class.ext,
                class.is_media() as i64,
                class.kind.as_str(),
                class.ignored_reason,
            ])? as u64;
        }
    }

    tx.commit()?;
    Ok(inserted)
}

/// Append-only log of rejected listing lines
struct RejectLog {
    file: Option<(PathBuf, File)>,
}

impl RejectLog {
    fn open(path: Option<&Path>) -> DbResult<Self> {
        let file = match path {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| DbError::ErrorLog {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })?;
                Some((path.to_path_buf(), file))
            }
            None => None,
        };
        Ok(Self { file })
    }

    fn write(&mut self, label: &str, line: &str) -> DbResult<()> {
        if let Some((path, file)) = &mut self.file {
            writeln!(file, "{}: {}", label, line).map_err(|e| DbError::ErrorLog {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

fn parse_status(raw: &str) -> DbResult<ChunkStatus> {
    raw.parse::<ChunkStatus>()
        .map_err(|_| DbError::UnknownStatus(raw.to_string()))
}

/// Current UTC time in the catalog's timestamp format
pub fn now_utc() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn entry(chunk: &str) -> ChunkEntry {
        ChunkEntry {
            run_id: "r1".into(),
            source: "wasabi".into(),
            chunk_name: chunk.into(),
            raw_file: format!("/out/raw/{}.lsl", chunk),
            command: "lister list wasabi:".into(),
        }
    }

    fn request(raw_file: PathBuf, chunk: &str, prefix: Option<&str>) -> IngestRequest {
        IngestRequest {
            run_id: "r1".into(),
            source: "wasabi".into(),
            remote: "wasabi:".into(),
            raw_file,
            command: "lister list wasabi:".into(),
            chunk_name: Some(chunk.into()),
            path_prefix: prefix.map(String::from),
            error_log: None,
        }
    }

    #[test]
    fn test_absent_chunk_is_pending() {
        let catalog = Catalog::open_in_memory().unwrap();
        assert_eq!(catalog.chunk_status("r1", "wasabi", "__root__").unwrap(), None);
    }

    #[test]
    fn test_status_transitions() {
        let catalog = Catalog::open_in_memory().unwrap();
        let e = entry("a/");

        assert!(catalog.set_chunk_status(&e, ChunkStatus::Listing).unwrap());
        assert!(catalog.set_chunk_status(&e, ChunkStatus::Error).unwrap());
        assert_eq!(
            catalog.chunk_status("r1", "wasabi", "a/").unwrap(),
            Some(ChunkStatus::Error)
        );

        assert!(catalog.set_chunk_status(&e, ChunkStatus::Listed).unwrap());
        assert!(catalog.set_chunk_status(&e, ChunkStatus::Ingested).unwrap());
        assert_eq!(
            catalog.chunk_status("r1", "wasabi", "a/").unwrap(),
            Some(ChunkStatus::Ingested)
        );
    }

    #[test]
    fn test_ingested_is_never_downgraded() {
        let catalog = Catalog::open_in_memory().unwrap();
        let e = entry("a/");
        catalog.set_chunk_status(&e, ChunkStatus::Ingested).unwrap();

        for status in [ChunkStatus::Listing, ChunkStatus::Listed, ChunkStatus::Error] {
            assert!(!catalog.set_chunk_status(&e, status).unwrap());
        }
        assert_eq!(
            catalog.chunk_status("r1", "wasabi", "a/").unwrap(),
            Some(ChunkStatus::Ingested)
        );
    }

    #[test]
    fn test_status_is_scoped_by_run_and_source() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog
            .set_chunk_status(&entry("__root__"), ChunkStatus::Ingested)
            .unwrap();

        assert_eq!(catalog.chunk_status("r2", "wasabi", "__root__").unwrap(), None);
        assert_eq!(catalog.chunk_status("r1", "b2", "__root__").unwrap(), None);
    }

    #[test]
    fn test_chunks_for_run() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.set_chunk_status(&entry("b/"), ChunkStatus::Listed).unwrap();
        catalog.set_chunk_status(&entry("__root__"), ChunkStatus::Ingested).unwrap();

        let rows = catalog.chunks_for_run("r1").unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.chunk_name.as_str()).collect();
        assert_eq!(names, vec!["__root__", "b/"]);
        assert_eq!(rows[1].status, ChunkStatus::Listed);
        assert_eq!(rows[1].rclone_command, "lister list wasabi:");
        assert!(catalog.chunks_for_run("other").unwrap().is_empty());
    }

    #[test]
    fn test_ingest_is_idempotent() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("root.lsl");
        fs::write(
            &raw,
            "10 2024-01-01 00:00:00 a.jpg\n\n20 2024-01-02 00:00:00 b.txt\n",
        )
        .unwrap();

        let catalog = Catalog::open(&dir.path().join("catalog.db")).unwrap();
        let first = catalog.ingest_listing(&request(raw.clone(), "__root__", None)).unwrap();
        assert_eq!(first.lines, 3);
        assert_eq!(first.accepted, 2);
        assert_eq!(first.inserted, 2);

        let second = catalog.ingest_listing(&request(raw, "__root__", None)).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates(), 2);
        assert_eq!(catalog.file_count("r1", None).unwrap(), 2);
    }

    #[test]
    fn test_ingest_prefixes_directory_paths() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("dir.lsl");
        fs::write(&raw, "5 2024-01-01 00:00:00 x/clip.MOV\n").unwrap();

        let catalog = Catalog::open_in_memory().unwrap();
        catalog
            .ingest_listing(&request(raw, "seagate/Photos/", Some("seagate/Photos/")))
            .unwrap();

        let conn = catalog.conn.lock();
        let (path, chunk, kind, media): (String, String, String, i64) = conn
            .query_row(
                "SELECT path, chunk_name, media_kind, is_media FROM files",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(path, "seagate/Photos/x/clip.MOV");
        assert_eq!(chunk, "seagate/Photos/");
        assert_eq!(kind, "video");
        assert_eq!(media, 1);
    }

    #[test]
    fn test_ingest_logs_rejects_and_completes_run() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("bad.lsl");
        fs::write(
            &raw,
            "oops\nNaN 2024-01-01 00:00:00 a.jpg\n3 2024-01-01 00:00:00 ok.png\n",
        )
        .unwrap();
        let log = dir.path().join("parse_errors_wasabi_r1.log");

        let catalog = Catalog::open_in_memory().unwrap();
        let mut req = request(raw, "__root__", None);
        req.error_log = Some(log.clone());
        let summary = catalog.ingest_listing(&req).unwrap();

        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.inserted, 1);
        let logged = fs::read_to_string(&log).unwrap();
        assert!(logged.contains("Unparseable line: oops"));
        assert!(logged.contains("Invalid size: NaN"));

        let conn = catalog.conn.lock();
        let completed: Option<String> = conn
            .query_row(
                "SELECT completed_at FROM runs WHERE run_id = 'r1' AND source = 'wasabi'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(completed.is_some());
    }

    #[test]
    fn test_missing_raw_file() {
        let catalog = Catalog::open_in_memory().unwrap();
        let err = catalog
            .ingest_listing(&request(PathBuf::from("/nonexistent/x.lsl"), "__root__", None))
            .unwrap_err();
        assert!(matches!(err, DbError::RawFile { .. }));
    }
}
