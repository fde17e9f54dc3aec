//! Listing tool invocation
//!
//! - [`tool`]: argument vectors for `list` and `list-dirs`
//! - [`executor`]: one child process per chunk, with heartbeats and kill on shutdown
//! - [`pool`]: caps how many executors run at once

pub mod executor;
pub mod pool;
pub mod tool;

pub use executor::{
    Heartbeat, HeartbeatFn, ListingExecutor, ListingJob, ListingOutput, DEFAULT_HEARTBEAT_INTERVAL,
};
pub use pool::{BatchReport, TaskFailure, TaskId, TaskPool, TaskResult, DEFAULT_MAX_PARALLEL};
pub use tool::{remote_path, ListingTool};
