//! Catalog database
//!
//! One SQLite file holds both the durable chunk state and the catalogued
//! file rows.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Chunk Orchestrator                     │
//! │  - status reads / monotonic status upserts          │
//! │  - ingest_listing on a promoted artifact            │
//! └─────────────────────┬───────────────────────────────┘
//!                       │ spawn_blocking
//!                       ▼
//! ┌─────────────────────────────────────────────────────┐
//! │           Catalog (Mutex<Connection>)               │
//! │  - chunks: (run_id, source, chunk_name) -> status   │
//! │  - files: batched INSERT OR IGNORE, 1000 per txn    │
//! │  - runs: provenance per (run_id, source)            │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod ingest;
pub mod schema;

pub use catalog::{now_utc, Catalog, ChunkEntry, ChunkRecord};
pub use ingest::{
    classify_ext, parse_listing_line, Classification, IngestRequest, IngestSummary, LineError,
    ListingRecord, MediaKind,
};
pub use schema::{create_database, keys};
