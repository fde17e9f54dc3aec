//! Listing executor - runs one listing command with heartbeats
//!
//! Standard output goes to the chunk's temporary artifact, standard error is
//! appended to the source's run log. While the child runs, a timer peeks at
//! the temporary artifact and reports elapsed time and byte size.
//!
//! The executor never promotes the temporary artifact. That is the caller's
//! job, and only after [`ListingExecutor::run`] returns `Ok`.

use crate::chunk::ChunkRef;
use crate::error::{ListingError, ListingResult};
use crate::listing::tool::ListingTool;
use crate::shutdown::Shutdown;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic progress report for a running listing
#[derive(Debug, Clone)]
pub struct Heartbeat {
    /// Source label
    pub source: String,
    /// Chunk storage key
    pub chunk: String,
    /// Time since the child was started
    pub elapsed: Duration,
    /// Current size of the temporary artifact
    pub bytes: u64,
}

/// Callback receiving heartbeats
pub type HeartbeatFn = Arc<dyn Fn(&Heartbeat) + Send + Sync>;

/// One listing invocation
#[derive(Debug, Clone)]
pub struct ListingJob {
    /// Source label
    pub source: String,
    /// Chunk being listed
    pub chunk: ChunkRef,
    /// Arguments passed to the tool
    pub args: Vec<String>,
    /// Where stdout is written
    pub temp_path: PathBuf,
    /// Where stderr is appended
    pub log_path: PathBuf,
}

/// Result of a successful listing
#[derive(Debug, Clone, Copy)]
pub struct ListingOutput {
    /// Wall time of the child process
    pub elapsed: Duration,
    /// Size of the temporary artifact at exit
    pub bytes: u64,
}

/// Runs listing commands
pub struct ListingExecutor {
    tool: Arc<ListingTool>,
    heartbeat_interval: Duration,
    on_heartbeat: HeartbeatFn,
    shutdown: Shutdown,
}

impl ListingExecutor {
    /// Create a new executor
    pub fn new(
        tool: Arc<ListingTool>,
        heartbeat_interval: Duration,
        on_heartbeat: HeartbeatFn,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            tool,
            heartbeat_interval,
            on_heartbeat,
            shutdown,
        }
    }

    /// Tool used by this executor
    pub fn tool(&self) -> &ListingTool {
        &self.tool
    }

    /// Run the listing to completion
    ///
    /// Returns `Failed` on a non-zero exit and `Interrupted` if shutdown was
    /// requested while the child was running (the child is killed).
    pub async fn run(&self, job: &ListingJob) -> ListingResult<ListingOutput> {
        let chunk = job.chunk.key();

        let stdout = File::create(&job.temp_path).map_err(|e| ListingError::Artifact {
            path: job.temp_path.clone(),
            reason: e.to_string(),
        })?;
        let stderr = open_log(&job.log_path, &chunk, &self.tool.command_line(&job.args))?;

        let mut child = self
            .tool
            .command(&job.args)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| ListingError::SpawnFailed {
                chunk: chunk.clone(),
                reason: e.to_string(),
            })?;

        debug!(source = %job.source, chunk = %chunk, pid = ?child.id(), "Listing started");

        let start = Instant::now();
        let mut ticker = interval_at(start + self.heartbeat_interval, self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown.clone();

        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|e| ListingError::SpawnFailed {
                        chunk: chunk.clone(),
                        reason: e.to_string(),
                    })?;
                }
                _ = ticker.tick() => {
                    let heartbeat = Heartbeat {
                        source: job.source.clone(),
                        chunk: chunk.clone(),
                        elapsed: start.elapsed(),
                        bytes: artifact_size(&job.temp_path).await,
                    };
                    (self.on_heartbeat)(&heartbeat);
                }
                _ = shutdown.triggered() => {
                    warn!(source = %job.source, chunk = %chunk, "Killing listing on shutdown");
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "Failed to signal listing process");
                    }
                    let _ = child.wait().await;
                    return Err(ListingError::Interrupted { chunk });
                }
            }
        };

        let output = ListingOutput {
            elapsed: start.elapsed(),
            bytes: artifact_size(&job.temp_path).await,
        };

        if !status.success() {
            return Err(ListingError::Failed {
                chunk,
                code: status.code().unwrap_or(-1),
            });
        }

        debug!(
            source = %job.source,
            chunk = %chunk,
            bytes = output.bytes,
            secs = output.elapsed.as_secs_f64(),
            "Listing finished"
        );
        Ok(output)
    }
}

/// Open the run log for appending and stamp the command about to run
fn open_log(path: &Path, chunk: &str, command_line: &str) -> ListingResult<File> {
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ListingError::Artifact {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    writeln!(
        log,
        "[{}] chunk {}: {}",
        Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        chunk,
        command_line
    )
    .map_err(|e| ListingError::Artifact {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(log)
}

async fn artifact_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::shutdown;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn script_tool(script: &str) -> Arc<ListingTool> {
        Arc::new(ListingTool::new("sh").with_base_args(["-c", script, "lister"]))
    }

    fn job(dir: &Path, tool: &ListingTool) -> ListingJob {
        let chunk = ChunkRef::directory("a/b/");
        ListingJob {
            source: "src".into(),
            args: tool.list_args("remote:", &chunk),
            chunk,
            temp_path: dir.join("out.lsl.partial"),
            log_path: dir.join("src.log"),
        }
    }

    fn no_heartbeat() -> HeartbeatFn {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn test_success_writes_stdout_and_log() {
        let dir = tempdir().unwrap();
        let tool = script_tool("echo \"12 2024-01-01 10:00:00 x.jpg\"; echo oops >&2");
        let job = job(dir.path(), &tool);
        let (_trigger, shutdown) = shutdown::channel();
        let exec = ListingExecutor::new(tool, Duration::from_secs(60), no_heartbeat(), shutdown);

        let out = exec.run(&job).await.unwrap();
        assert!(out.bytes > 0);

        let body = std::fs::read_to_string(&job.temp_path).unwrap();
        assert_eq!(body, "12 2024-01-01 10:00:00 x.jpg\n");
        let log = std::fs::read_to_string(&job.log_path).unwrap();
        assert!(log.contains("chunk a/b/"));
        assert!(log.contains("oops"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = tempdir().unwrap();
        let tool = script_tool("echo partial; exit 7");
        let job = job(dir.path(), &tool);
        let (_trigger, shutdown) = shutdown::channel();
        let exec = ListingExecutor::new(tool, Duration::from_secs(60), no_heartbeat(), shutdown);

        let err = exec.run(&job).await.unwrap_err();
        assert!(matches!(err, ListingError::Failed { code: 7, .. }));
    }

    #[tokio::test]
    async fn test_heartbeats_while_running() {
        let dir = tempdir().unwrap();
        let tool = script_tool("echo line; sleep 1");
        let job = job(dir.path(), &tool);
        let (_trigger, shutdown) = shutdown::channel();
        let beats = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&beats);
        let exec = ListingExecutor::new(
            tool,
            Duration::from_millis(100),
            Arc::new(move |hb: &Heartbeat| {
                assert_eq!(hb.chunk, "a/b/");
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            shutdown,
        );

        exec.run(&job).await.unwrap();
        assert!(beats.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_shutdown_kills_child() {
        let dir = tempdir().unwrap();
        let tool = script_tool("sleep 30");
        let job = job(dir.path(), &tool);
        let (trigger, shutdown) = shutdown::channel();
        let exec = ListingExecutor::new(tool, Duration::from_secs(60), no_heartbeat(), shutdown);

        let started = std::time::Instant::now();
        let run = exec.run(&job);
        tokio::pin!(run);
        tokio::select! {
            _ = &mut run => panic!("listing finished before shutdown"),
            _ = tokio::time::sleep(Duration::from_millis(200)) => trigger.trigger(),
        }
        let err = run.await.unwrap_err();
        assert!(err.is_interrupt());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
