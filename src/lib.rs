//! remote-catalog - Resumable, chunked cataloging of remote storage
//!
//! Lists one or more remote storage backends through an external listing
//! tool and ingests the listings into a SQLite catalog. The object space of
//! each remote is split into chunks that are listed and ingested on their
//! own, with every chunk's progress recorded, so an interrupted run picks
//! up where it stopped.
//!
//! # Features
//!
//! - **Directory Chunking**: A two-level directory probe decides the chunks;
//!   root-level objects form their own chunk.
//!
//! - **Hash Partitions**: Each chunk can be split into N hash ranges that
//!   are listed in parallel under a concurrency cap.
//!
//! - **Resumable**: Finished listings are kept on disk and chunk states are
//!   stored in the catalog. Re-running a run id skips completed work.
//!
//! - **Crash Safe**: Listings are written to a `.partial` file and renamed
//!   only after the tool exits cleanly. Ingestion ignores rows it has.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Run Driver                             │
//! │           sources in order, last_run_id at the end              │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Chunk Identity Resolver                      │
//! │      list-dirs --max-depth 2  ──►  [__root__, a/b/, c/d/ ...]   │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ chunk (or N partitions)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Task Pool (semaphore, join_all)                │
//! │  ┌─────────────┐  ┌─────────────┐         ┌─────────────┐       │
//! │  │ Orchestrator│  │ Orchestrator│  ...    │ Orchestrator│       │
//! │  │  chunk#0/N  │  │  chunk#1/N  │         │ chunk#N-1/N │       │
//! │  └──────┬──────┘  └──────┬──────┘         └──────┬──────┘       │
//! │         │ Listing Executor (child process, heartbeats)          │
//! │         ▼                ▼                       ▼              │
//! │   raw/*.lsl.partial ──rename──► raw/*.lsl ──► ingest            │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │      SQLite DB       │
//!                    │  chunks, files, runs │
//!                    └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Catalog two remotes
//! remote-catalog run --source wasabi=wasabi: --source b2=b2:media --out /data/catalog
//!
//! # Partition every chunk and list 8 partitions at a time
//! remote-catalog run --source wasabi=wasabi: --hash-partitions 8 --max-parallel 8
//!
//! # Continue the last run after an interrupt
//! remote-catalog run --source wasabi=wasabi: --resume
//!
//! # Query results
//! sqlite3 /data/catalog/catalog.db "SELECT media_kind, COUNT(*) FROM files GROUP BY 1"
//! ```

pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod layout;
pub mod listing;
pub mod progress;
pub mod runner;
pub mod shutdown;

pub use chunk::{ChunkRef, ChunkStatus};
pub use config::{CliArgs, RunConfig, SourceSpec};
pub use error::{CatalogError, Result};
pub use runner::{RunDriver, RunSummary};
