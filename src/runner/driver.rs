//! Run driver - sources in order, chunks in order, partitions in parallel
//!
//! ```text
//! for each source:
//!     probe (or cached dir list) ──► [__root__, dir1/, dir2/, ...]
//!     for each chunk:
//!         N == 1: orchestrator.process(chunk)
//!         N  > 1: submit chunk#0/N .. chunk#N-1/N to the pool, join all
//! write last_run_id
//! ```
//!
//! A failed probe skips its source, a failed chunk is counted and the run
//! moves on. An interrupt stops scheduling and ends the run.

use crate::chunk::{ChunkRef, ChunkResolver};
use crate::config::{RunConfig, SourceSpec};
use crate::db::Catalog;
use crate::error::{CatalogError, Result};
use crate::layout::OutputLayout;
use crate::listing::{HeartbeatFn, ListingExecutor, TaskFailure, TaskPool};
use crate::progress::ProgressReporter;
use crate::runner::orchestrator::{ChunkOrchestrator, ChunkOutcome};
use crate::shutdown::Shutdown;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Per-source counters
#[derive(Debug, Clone, Default)]
pub struct SourceSummary {
    pub label: String,
    /// Units processed (partitions count individually)
    pub chunks: usize,
    /// Already ingested
    pub skipped: usize,
    /// Listing tool invocations that succeeded
    pub listed: usize,
    pub ingested: usize,
    pub failed: usize,
    /// Rows new to the catalog
    pub rows_inserted: u64,
    /// Set when the directory probe failed
    pub probe_error: Option<String>,
}

impl SourceSummary {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.probe_error.is_none() && self.failed == 0
    }
}

/// Result of a whole run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub sources: Vec<SourceSummary>,
    /// Stopped by a shutdown request
    pub interrupted: bool,
}

impl RunSummary {
    /// No failures and not interrupted
    pub fn success(&self) -> bool {
        !self.interrupted && self.sources.iter().all(SourceSummary::succeeded)
    }

    pub fn failed_chunks(&self) -> usize {
        self.sources.iter().map(|s| s.failed).sum()
    }

    pub fn rows_inserted(&self) -> u64 {
        self.sources.iter().map(|s| s.rows_inserted).sum()
    }

    pub fn listings(&self) -> usize {
        self.sources.iter().map(|s| s.listed).sum()
    }
}

/// Drives a run over all configured sources
pub struct RunDriver {
    config: RunConfig,
    layout: Arc<OutputLayout>,
    resolver: ChunkResolver,
    orchestrator: Arc<ChunkOrchestrator>,
    shutdown: Shutdown,
}

impl RunDriver {
    /// Prepare the output directory, open the catalog and fix the run id
    pub fn new(
        config: RunConfig,
        reporter: Arc<ProgressReporter>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let layout = Arc::new(OutputLayout::new(&config.out_dir, &config.db_name));
        let run_id = layout.resolve_run_id(&config.run_id)?;
        layout.prepare()?;
        let catalog = Catalog::open(&layout.db_path())?;

        let tool = Arc::new(config.tool.clone());
        let heartbeat_reporter = Arc::clone(&reporter);
        let on_heartbeat: HeartbeatFn = Arc::new(move |hb| heartbeat_reporter.heartbeat(hb));
        let executor = Arc::new(ListingExecutor::new(
            Arc::clone(&tool),
            config.heartbeat_interval,
            on_heartbeat,
            shutdown.clone(),
        ));

        let orchestrator = Arc::new(ChunkOrchestrator::new(
            Arc::new(catalog),
            executor,
            Arc::clone(&layout),
            reporter,
            shutdown.clone(),
            run_id,
            config.force,
        ));

        Ok(Self {
            resolver: ChunkResolver::new(tool, config.force),
            config,
            layout,
            orchestrator,
            shutdown,
        })
    }

    pub fn run_id(&self) -> &str {
        self.orchestrator.run_id()
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Process every source, then record the last-run pointer
    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary {
            run_id: self.run_id().to_string(),
            sources: Vec::with_capacity(self.config.sources.len()),
            interrupted: false,
        };

        info!(run_id = %summary.run_id, sources = self.config.sources.len(), "Starting run");

        for source in &self.config.sources {
            if self.shutdown.is_triggered() {
                summary.interrupted = true;
                break;
            }

            let (stats, interrupted) = self.run_source(source).await;
            summary.sources.push(stats);
            if interrupted {
                summary.interrupted = true;
                break;
            }
        }

        if let Err(e) = self.layout.write_last_run(self.run_id()) {
            warn!(error = %e, "Failed to write last run pointer");
        }

        if summary.interrupted {
            warn!(run_id = %summary.run_id, "Run interrupted");
        } else {
            info!(
                run_id = %summary.run_id,
                failed = summary.failed_chunks(),
                rows = summary.rows_inserted(),
                "Run finished"
            );
        }
        Ok(summary)
    }

    /// Returns the source's counters and whether an interrupt was seen
    async fn run_source(&self, source: &SourceSpec) -> (SourceSummary, bool) {
        let mut stats = SourceSummary::new(&source.label);
        let cache = self.layout.topdirs_path(&source.label, self.run_id());

        let resolved = match self
            .resolver
            .resolve(&source.label, &source.connection, &cache, &self.shutdown)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                let e = CatalogError::from(e);
                if e.is_interrupt() {
                    return (stats, true);
                }
                error!(source = %source.label, error = %e, "Directory probe failed; skipping source");
                stats.probe_error = Some(e.to_string());
                return (stats, false);
            }
        };

        info!(
            source = %source.label,
            chunks = resolved.chunks.len(),
            partitions = self.config.hash_partitions,
            "Resolved chunks"
        );

        let mut pool: TaskPool<ChunkOutcome, CatalogError> = TaskPool::new(self.config.max_parallel);

        for chunk in &resolved.chunks {
            if self.shutdown.is_triggered() {
                return (stats, true);
            }

            let interrupted = if self.config.hash_partitions > 1 {
                self.run_partitions(&mut pool, source, chunk, &mut stats).await
            } else {
                let result = self.orchestrator.process(source, chunk).await;
                tally(&mut stats, &source.label, &chunk.key(), result)
            };

            if interrupted {
                return (stats, true);
            }
        }

        (stats, false)
    }

    /// Fan one chunk out into hash partitions and wait for all of them
    async fn run_partitions(
        &self,
        pool: &mut TaskPool<ChunkOutcome, CatalogError>,
        source: &SourceSpec,
        chunk: &ChunkRef,
        stats: &mut SourceSummary,
    ) -> bool {
        for part in chunk.partitions(self.config.hash_partitions) {
            let orchestrator = Arc::clone(&self.orchestrator);
            let source = source.clone();
            pool.submit(part.key(), async move { orchestrator.process(&source, &part).await })
                .await;
        }

        let report = pool.join_all().await;
        let mut interrupted = false;
        for task in report.results {
            let result = task.result.map_err(|failure| match failure {
                TaskFailure::Failed(e) => e,
                TaskFailure::Aborted(reason) => {
                    crate::error::ListingError::TaskAborted {
                        chunk: task.label.clone(),
                        reason,
                    }
                    .into()
                }
            });
            interrupted |= tally(stats, &source.label, &task.label, result);
        }
        interrupted
    }
}

/// Count one chunk result; returns true for an interrupt
fn tally(
    stats: &mut SourceSummary,
    source: &str,
    chunk: &str,
    result: Result<ChunkOutcome>,
) -> bool {
    stats.chunks += 1;
    match result {
        Ok(ChunkOutcome::Skipped) => {
            stats.skipped += 1;
            false
        }
        Ok(ChunkOutcome::Ingested { listed, rows }) => {
            stats.ingested += 1;
            if listed {
                stats.listed += 1;
            }
            stats.rows_inserted += rows.inserted;
            false
        }
        Err(e) if e.is_interrupt() => true,
        Err(e) => {
            error!(source = %source, chunk = %chunk, error = %e, "Chunk failed");
            stats.failed += 1;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::IngestSummary;

    #[test]
    fn test_tally() {
        let mut stats = SourceSummary::new("wasabi");
        let rows = IngestSummary {
            lines: 3,
            accepted: 3,
            inserted: 2,
            rejected: 0,
        };

        assert!(!tally(&mut stats, "wasabi", "__root__", Ok(ChunkOutcome::Skipped)));
        assert!(!tally(
            &mut stats,
            "wasabi",
            "a/",
            Ok(ChunkOutcome::Ingested { listed: true, rows })
        ));
        assert!(!tally(
            &mut stats,
            "wasabi",
            "b/",
            Err(CatalogError::Listing(crate::error::ListingError::Failed {
                chunk: "b/".into(),
                code: 1
            }))
        ));
        assert!(tally(&mut stats, "wasabi", "c/", Err(CatalogError::Interrupted)));

        assert_eq!(stats.chunks, 4);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.listed, 1);
        assert_eq!(stats.ingested, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.rows_inserted, 2);
        assert!(!stats.succeeded());
    }

    #[test]
    fn test_run_summary_success() {
        let mut summary = RunSummary {
            run_id: "r1".into(),
            sources: vec![SourceSummary::new("a"), SourceSummary::new("b")],
            interrupted: false,
        };
        assert!(summary.success());

        summary.sources[1].probe_error = Some("denied".into());
        assert!(!summary.success());

        summary.sources[1].probe_error = None;
        summary.interrupted = true;
        assert!(!summary.success());
    }
}
