//! Chunk orchestrator - drives one chunk through its lifecycle
//!
//! ```text
//!   stored status ingested ───────────────────────────────► skip
//!   artifact on disk (no --force) ──► listed ──┐
//!   otherwise ──► listing ──► run tool ──┬─ ok ─► rename ─► listed ─► ingest ─► ingested
//!                                        └─ fail ─► error
//! ```
//!
//! The artifact is the listing cache and the status table is the ingestion
//! record: a file on disk skips listing, only `ingested` skips ingestion.
//! Ingestion ignores rows it already has, so a chunk stuck at `listed` after
//! a crash is simply ingested again.

use crate::chunk::{ChunkRef, ChunkStatus};
use crate::config::SourceSpec;
use crate::db::{Catalog, ChunkEntry, IngestRequest, IngestSummary};
use crate::error::{CatalogError, DbError, DbResult, ListingError, Result};
use crate::layout::{partial_path, OutputLayout};
use crate::listing::{ListingExecutor, ListingJob};
use crate::progress::ProgressReporter;
use crate::shutdown::Shutdown;
use humansize::{format_size, BINARY};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to a chunk that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Already ingested in this run
    Skipped,
    /// Ingested; `listed` is false when an existing artifact was reused
    Ingested { listed: bool, rows: IngestSummary },
}

/// Runs the chunk state machine
pub struct ChunkOrchestrator {
    catalog: Arc<Catalog>,
    executor: Arc<ListingExecutor>,
    layout: Arc<OutputLayout>,
    reporter: Arc<ProgressReporter>,
    shutdown: Shutdown,
    run_id: String,
    force: bool,
}

impl ChunkOrchestrator {
    pub fn new(
        catalog: Arc<Catalog>,
        executor: Arc<ListingExecutor>,
        layout: Arc<OutputLayout>,
        reporter: Arc<ProgressReporter>,
        shutdown: Shutdown,
        run_id: impl Into<String>,
        force: bool,
    ) -> Self {
        Self {
            catalog,
            executor,
            layout,
            reporter,
            shutdown,
            run_id: run_id.into(),
            force,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Process one chunk or partition
    ///
    /// A listing failure leaves the chunk at `error`, an ingestion failure
    /// leaves it at `listed`, and an interrupt leaves it at `listing`.
    pub async fn process(&self, source: &SourceSpec, chunk: &ChunkRef) -> Result<ChunkOutcome> {
        let key = chunk.key();

        let status = {
            let catalog = Arc::clone(&self.catalog);
            let (run_id, label, name) = (self.run_id.clone(), source.label.clone(), key.clone());
            blocking(move || catalog.chunk_status(&run_id, &label, &name)).await?
        };
        if status == Some(ChunkStatus::Ingested) {
            info!(source = %source.label, chunk = %key, "Skipping chunk (already ingested)");
            return Ok(ChunkOutcome::Skipped);
        }

        let tool = self.executor.tool();
        let args = tool.list_args(&source.connection, chunk);
        let final_path = self.layout.artifact_path(&source.label, &self.run_id, chunk);
        let entry = ChunkEntry {
            run_id: self.run_id.clone(),
            source: source.label.clone(),
            chunk_name: key.clone(),
            raw_file: final_path.display().to_string(),
            command: tool.command_line(&args),
        };

        let listed = if final_path.exists() && !self.force {
            info!(source = %source.label, chunk = %key, "Reusing existing listing");
            self.record(&entry, ChunkStatus::Listed).await?;
            false
        } else {
            if self.shutdown.is_triggered() {
                return Err(CatalogError::Interrupted);
            }
            self.list(source, chunk, &entry, args).await?;
            true
        };

        let request = IngestRequest {
            run_id: self.run_id.clone(),
            source: source.label.clone(),
            remote: source.connection.clone(),
            raw_file: final_path,
            command: entry.command.clone(),
            chunk_name: Some(key.clone()),
            path_prefix: chunk.directory_path().map(String::from),
            error_log: Some(self.layout.parse_error_log(&source.label, &self.run_id)),
        };

        self.reporter
            .set_status(&format!("[{}] ingesting {}", source.label, key));
        let rows = {
            let catalog = Arc::clone(&self.catalog);
            match blocking(move || catalog.ingest_listing(&request)).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(source = %source.label, chunk = %key, error = %e, "Ingestion failed");
                    return Err(e.into());
                }
            }
        };

        self.record(&entry, ChunkStatus::Ingested).await?;
        info!(
            source = %source.label,
            chunk = %key,
            rows = rows.inserted,
            rejected = rows.rejected,
            "Chunk ingested"
        );

        Ok(ChunkOutcome::Ingested { listed, rows })
    }

    /// Run the listing tool and promote its output
    async fn list(
        &self,
        source: &SourceSpec,
        chunk: &ChunkRef,
        entry: &ChunkEntry,
        args: Vec<String>,
    ) -> Result<()> {
        let key = &entry.chunk_name;
        let final_path = self.layout.artifact_path(&source.label, &self.run_id, chunk);
        let job = ListingJob {
            source: source.label.clone(),
            chunk: chunk.clone(),
            args,
            temp_path: partial_path(&final_path),
            log_path: self.layout.log_path(&source.label, &self.run_id),
        };

        self.record(entry, ChunkStatus::Listing).await?;
        info!(source = %source.label, chunk = %key, "Listing chunk");
        self.reporter
            .set_status(&format!("[{}] listing {}", source.label, key));

        let output = match self.executor.run(&job).await {
            Ok(output) => output,
            Err(e) if e.is_interrupt() => {
                // Status stays at listing and the partial file is never promoted
                warn!(source = %source.label, chunk = %key, "Listing interrupted");
                return Err(e.into());
            }
            Err(e) => {
                warn!(source = %source.label, chunk = %key, error = %e, "Listing failed");
                self.record(entry, ChunkStatus::Error).await?;
                return Err(e.into());
            }
        };

        if let Err(e) = tokio::fs::rename(&job.temp_path, &final_path).await {
            self.record(entry, ChunkStatus::Error).await?;
            return Err(ListingError::Artifact {
                path: final_path,
                reason: e.to_string(),
            }
            .into());
        }

        self.record(entry, ChunkStatus::Listed).await?;
        debug!(
            source = %source.label,
            chunk = %key,
            size = %format_size(output.bytes, BINARY),
            secs = output.elapsed.as_secs(),
            "Listing promoted"
        );
        Ok(())
    }

    async fn record(&self, entry: &ChunkEntry, status: ChunkStatus) -> Result<()> {
        let catalog = Arc::clone(&self.catalog);
        let entry = entry.clone();
        blocking(move || catalog.set_chunk_status(&entry, status)).await?;
        Ok(())
    }
}

/// Run a catalog call off the async workers
async fn blocking<T, F>(f: F) -> DbResult<T>
where
    F: FnOnce() -> DbResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DbError::Task(e.to_string()))?
}
