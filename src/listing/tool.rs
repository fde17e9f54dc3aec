//! Command construction for the external listing tool
//!
//! The tool is invoked in two shapes:
//!
//! ```text
//! <tool> list <remote-path> [--depth 1] [--hash-filter k/N] [extra flags]
//! <tool> list-dirs <remote-path> --max-depth 2
//! ```
//!
//! The argument vector for a chunk is a pure function of the chunk, so the
//! audit string stored alongside a chunk's status always matches what ran.

use crate::chunk::ChunkRef;
use std::process::Stdio;
use tokio::process::Command;

/// Depth used by the directory probe
pub const PROBE_MAX_DEPTH: u32 = 2;

/// Depth used for the root chunk
pub const ROOT_LIST_DEPTH: u32 = 1;

/// External listing tool description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingTool {
    /// Program to execute
    program: String,

    /// Arguments placed before the subcommand (e.g. a script path)
    base_args: Vec<String>,

    /// Extra flags appended to every `list` invocation
    extra_flags: Vec<String>,
}

impl ListingTool {
    /// Create a tool description for the given program
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            extra_flags: Vec::new(),
        }
    }

    /// Set arguments that precede the subcommand
    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set flags appended to every listing
    pub fn with_extra_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    /// Program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments (after the program) for listing one chunk of a source
    pub fn list_args(&self, connection: &str, chunk: &ChunkRef) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.push("list".to_string());
        args.push(remote_path(connection, chunk.directory_path()));

        if chunk.is_root() {
            args.push("--depth".to_string());
            args.push(ROOT_LIST_DEPTH.to_string());
        }

        if let Some((index, total)) = chunk.hash_filter() {
            args.push("--hash-filter".to_string());
            args.push(format!("{}/{}", index, total));
        }

        args.extend(self.extra_flags.iter().cloned());
        args
    }

    /// Arguments (after the program) for the directory probe
    pub fn probe_args(&self, connection: &str) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.push("list-dirs".to_string());
        args.push(connection.to_string());
        args.push("--max-depth".to_string());
        args.push(PROBE_MAX_DEPTH.to_string());
        args
    }

    /// Printable command line, recorded for provenance
    pub fn command_line(&self, args: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build a child process for the given arguments
    ///
    /// Stdin is closed and the child is killed if its handle is dropped.
    pub fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }
}

/// Join a source connection string and an optional directory
///
/// `wasabi:` + `a/b/` gives `wasabi:a/b/`; `s3:bucket` + `a/` gives
/// `s3:bucket/a/`.
pub fn remote_path(connection: &str, dir: Option<&str>) -> String {
    match dir {
        None => connection.to_string(),
        Some(dir) => {
            let dir = dir.trim_start_matches('/');
            if connection.ends_with(':') || connection.ends_with('/') {
                format!("{}{}", connection, dir)
            } else {
                format!("{}/{}", connection, dir)
            }
        }
    }
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@#%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_args() {
        let tool = ListingTool::new("lister");
        let args = tool.list_args("wasabi:", &ChunkRef::Root);
        assert_eq!(args, vec!["list", "wasabi:", "--depth", "1"]);
    }

    #[test]
    fn test_directory_partition_args_with_extras() {
        let tool = ListingTool::new("lister").with_extra_flags(["--fast-list"]);
        let chunk = ChunkRef::directory("seagate/Photos/").partitions(4).remove(1);
        let args = tool.list_args("wasabi:", &chunk);
        assert_eq!(
            args,
            vec![
                "list",
                "wasabi:seagate/Photos/",
                "--hash-filter",
                "1/4",
                "--fast-list"
            ]
        );
    }

    #[test]
    fn test_root_partition_keeps_depth() {
        let tool = ListingTool::new("lister");
        let chunk = ChunkRef::Root.partitions(2).remove(0);
        let args = tool.list_args("wasabi:", &chunk);
        assert_eq!(args, vec!["list", "wasabi:", "--depth", "1", "--hash-filter", "0/2"]);
    }

    #[test]
    fn test_probe_args_with_base() {
        let tool = ListingTool::new("sh").with_base_args(["fake.sh"]);
        assert_eq!(
            tool.probe_args("b2:media"),
            vec!["fake.sh", "list-dirs", "b2:media", "--max-depth", "2"]
        );
    }

    #[test]
    fn test_remote_path() {
        assert_eq!(remote_path("wasabi:", None), "wasabi:");
        assert_eq!(remote_path("wasabi:", Some("a/b/")), "wasabi:a/b/");
        assert_eq!(remote_path("s3:bucket", Some("a/")), "s3:bucket/a/");
        assert_eq!(remote_path("/mnt/data/", Some("/x/")), "/mnt/data/x/");
    }

    #[test]
    fn test_command_line_quoting() {
        let tool = ListingTool::new("lister");
        let args = tool.list_args("wasabi:", &ChunkRef::directory("My Photos/"));
        assert_eq!(tool.command_line(&args), "lister list 'wasabi:My Photos/'");
    }
}
