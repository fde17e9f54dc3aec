//! Run orchestration
//!
//! - [`driver`]: iterates sources and fans chunks out into partitions
//! - [`orchestrator`]: the per-chunk state machine

pub mod driver;
pub mod orchestrator;

pub use driver::{RunDriver, RunSummary, SourceSummary};
pub use orchestrator::{ChunkOrchestrator, ChunkOutcome};
