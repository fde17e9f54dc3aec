//! Chunk identity resolver
//!
//! Probes a source two levels deep and turns the directories it finds into
//! listing chunks:
//!
//! 1. every second-level directory (`a/b/`) if there is at least one
//! 2. otherwise every first-level directory (`a/`)
//! 3. otherwise nothing, and only the root chunk is listed
//!
//! The root chunk lists depth 1 only. When second-level directories exist,
//! files sitting directly in a first-level directory, and first-level
//! directories that have no subdirectory, belong to no chunk and are not
//! catalogued.

use crate::chunk::ChunkRef;
use crate::error::ProbeError;
use crate::layout::write_atomic;
use crate::listing::ListingTool;
use crate::shutdown::Shutdown;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which probe level produced the directory chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirLevel {
    /// `a/b/` entries
    SecondLevel,
    /// `a/` entries, no second level found
    FirstLevel,
    /// No directories at all
    RootOnly,
}

/// Directories chosen from a probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirSelection {
    /// Normalized paths with a trailing `/`, in probe order
    pub dirs: Vec<String>,
    pub level: DirLevel,
}

/// Pick chunk directories from probe output
///
/// Only lines ending in `/` are directories. Duplicates are dropped and
/// the first occurrence keeps its position.
pub fn select_chunk_dirs(probe_output: &str) -> DirSelection {
    let mut first = Vec::new();
    let mut second = Vec::new();

    for line in probe_output.lines() {
        let line = line.trim_end_matches('\r');
        if !line.ends_with('/') {
            continue;
        }
        let segments: Vec<&str> = line.split('/').filter(|s| !s.is_empty()).collect();
        match segments.len() {
            0 => {}
            1 => first.push(format!("{}/", segments[0])),
            _ => second.push(format!("{}/", segments.join("/"))),
        }
    }

    if !second.is_empty() {
        DirSelection {
            dirs: dedup(second),
            level: DirLevel::SecondLevel,
        }
    } else if !first.is_empty() {
        DirSelection {
            dirs: dedup(first),
            level: DirLevel::FirstLevel,
        }
    } else {
        DirSelection {
            dirs: Vec::new(),
            level: DirLevel::RootOnly,
        }
    }
}

fn dedup(dirs: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    dirs.into_iter().filter(|d| seen.insert(d.clone())).collect()
}

/// Chunks of one source, root first
#[derive(Debug, Clone)]
pub struct ResolvedChunks {
    pub chunks: Vec<ChunkRef>,
    pub level: DirLevel,
    /// True when the directory list came from the cache file
    pub from_cache: bool,
}

impl ResolvedChunks {
    fn from_selection(selection: DirSelection, from_cache: bool) -> Self {
        let chunks = std::iter::once(ChunkRef::Root)
            .chain(selection.dirs.iter().map(|d| ChunkRef::directory(d)))
            .collect();
        Self {
            chunks,
            level: selection.level,
            from_cache,
        }
    }
}

/// Runs the directory probe and caches its result
pub struct ChunkResolver {
    tool: Arc<ListingTool>,
    force: bool,
}

impl ChunkResolver {
    /// Create a resolver; `force` ignores an existing cache
    pub fn new(tool: Arc<ListingTool>, force: bool) -> Self {
        Self { tool, force }
    }

    /// Resolve the chunks of a source
    ///
    /// `cache_path` holds the selected directories, one per line. It is
    /// reused when present unless the resolver was built with `force`.
    pub async fn resolve(
        &self,
        source: &str,
        connection: &str,
        cache_path: &Path,
        shutdown: &Shutdown,
    ) -> Result<ResolvedChunks, ProbeError> {
        if !self.force && cache_path.exists() {
            let cached = fs::read_to_string(cache_path).map_err(|e| ProbeError::Cache {
                path: cache_path.to_path_buf(),
                reason: e.to_string(),
            })?;
            let selection = select_chunk_dirs(&cached);
            debug!(
                source = %source,
                dirs = selection.dirs.len(),
                path = %cache_path.display(),
                "Using cached directory list"
            );
            return Ok(self.finish(source, selection, true));
        }

        let output = self.probe(connection, shutdown).await?;
        let selection = select_chunk_dirs(&output);

        let mut body = selection.dirs.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        write_atomic(cache_path, body.as_bytes()).map_err(|e| ProbeError::Cache {
            path: cache_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(self.finish(source, selection, false))
    }

    fn finish(&self, source: &str, selection: DirSelection, from_cache: bool) -> ResolvedChunks {
        match selection.level {
            DirLevel::SecondLevel => info!(
                source = %source,
                dirs = selection.dirs.len(),
                "Chunking by second-level directories"
            ),
            DirLevel::FirstLevel => info!(
                source = %source,
                dirs = selection.dirs.len(),
                "No second-level directories; chunking by first-level directories"
            ),
            DirLevel::RootOnly => warn!(
                source = %source,
                "No directories found; only root-level objects will be catalogued"
            ),
        }
        ResolvedChunks::from_selection(selection, from_cache)
    }

    /// Run `list-dirs` and return its stdout
    async fn probe(&self, connection: &str, shutdown: &Shutdown) -> Result<String, ProbeError> {
        let args = self.tool.probe_args(connection);
        debug!(command = %self.tool.command_line(&args), "Probing directories");

        let mut cmd = self.tool.command(&args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut shutdown = shutdown.clone();
        let output = tokio::select! {
            output = cmd.output() => output.map_err(|e| ProbeError::SpawnFailed {
                remote: connection.to_string(),
                reason: e.to_string(),
            })?,
            _ = shutdown.triggered() => {
                return Err(ProbeError::Interrupted {
                    remote: connection.to_string(),
                });
            }
        };

        if !output.status.success() {
            return Err(ProbeError::Failed {
                remote: connection.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_second_level() {
        let sel = select_chunk_dirs("seagate/\nseagate/Photos/\nseagate/Video/\nnotes.txt\nb2/\n");
        assert_eq!(sel.level, DirLevel::SecondLevel);
        assert_eq!(sel.dirs, vec!["seagate/Photos/", "seagate/Video/"]);
    }

    #[test]
    fn test_falls_back_to_first_level() {
        let sel = select_chunk_dirs("alpha/\nbeta/\nfile.jpg\n");
        assert_eq!(sel.level, DirLevel::FirstLevel);
        assert_eq!(sel.dirs, vec!["alpha/", "beta/"]);
    }

    #[test]
    fn test_root_only() {
        let sel = select_chunk_dirs("a.jpg\nb.jpg\n");
        assert_eq!(sel.level, DirLevel::RootOnly);
        assert!(sel.dirs.is_empty());
        assert_eq!(select_chunk_dirs("").level, DirLevel::RootOnly);
    }

    #[test]
    fn test_dedup_keeps_order() {
        let sel = select_chunk_dirs("z/y/\r\na/b/\nz/y/\n/a/b/\n");
        assert_eq!(sel.dirs, vec!["z/y/", "a/b/"]);
    }

    #[test]
    fn test_root_is_first() {
        let resolved = ResolvedChunks::from_selection(select_chunk_dirs("a/b/\nc/d/\n"), false);
        let keys: Vec<_> = resolved.chunks.iter().map(|c| c.key()).collect();
        assert_eq!(keys, vec!["__root__", "a/b/", "c/d/"]);
    }

    #[cfg(unix)]
    mod probe {
        use crate::chunk::resolver::{ChunkResolver, DirLevel};
        use crate::chunk::ChunkRef;
        use crate::error::ProbeError;
        use crate::listing::ListingTool;
        use crate::shutdown;
        use std::sync::Arc;
        use tempfile::tempdir;

        fn script_tool(script: &str) -> Arc<ListingTool> {
            Arc::new(ListingTool::new("sh").with_base_args(["-c", script, "lister"]))
        }

        #[tokio::test]
        async fn test_probe_writes_cache_and_reuses_it() {
            let dir = tempdir().unwrap();
            let cache = dir.path().join("src_r1.topdirs");
            let (_trigger, shutdown) = shutdown::channel();

            let resolver = ChunkResolver::new(script_tool("printf 'a/\\na/b/\\n'"), false);
            let first = resolver.resolve("src", "remote:", &cache, &shutdown).await.unwrap();
            assert!(!first.from_cache);
            assert_eq!(first.chunks.len(), 2);
            assert_eq!(std::fs::read_to_string(&cache).unwrap(), "a/b/\n");

            // A failing tool proves the second call never probes
            let cached = ChunkResolver::new(script_tool("exit 9"), false);
            let second = cached.resolve("src", "remote:", &cache, &shutdown).await.unwrap();
            assert!(second.from_cache);
            assert_eq!(second.chunks, first.chunks);
        }

        #[tokio::test]
        async fn test_force_reprobes() {
            let dir = tempdir().unwrap();
            let cache = dir.path().join("src_r1.topdirs");
            std::fs::write(&cache, "old/dir/\n").unwrap();
            let (_trigger, shutdown) = shutdown::channel();

            let resolver = ChunkResolver::new(script_tool("printf 'new/\\n'"), true);
            let resolved = resolver.resolve("src", "remote:", &cache, &shutdown).await.unwrap();
            assert_eq!(resolved.level, DirLevel::FirstLevel);
            assert_eq!(resolved.chunks[1], ChunkRef::directory("new/"));
        }

        #[tokio::test]
        async fn test_probe_failure_carries_stderr() {
            let dir = tempdir().unwrap();
            let cache = dir.path().join("src_r1.topdirs");
            let (_trigger, shutdown) = shutdown::channel();

            let resolver = ChunkResolver::new(script_tool("echo 'access denied' >&2; exit 3"), false);
            let err = resolver
                .resolve("src", "remote:", &cache, &shutdown)
                .await
                .unwrap_err();
            match err {
                ProbeError::Failed { code, stderr, .. } => {
                    assert_eq!(code, 3);
                    assert_eq!(stderr, "access denied");
                }
                other => panic!("unexpected error: {}", other),
            }
            assert!(!cache.exists());
        }
    }
}
