//! Configuration types for remote-catalog
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - `LABEL=CONNECTION` source parsing

use crate::error::ConfigError;
use crate::layout::{RunIdChoice, DEFAULT_DB_NAME};
use crate::listing::{ListingTool, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_PARALLEL};
use clap::{Args, Parser, Subcommand, ValueEnum};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

/// Maximum concurrent listings
pub const MAX_PARALLEL: usize = 64;

/// Maximum hash partitions per chunk
pub const MAX_HASH_PARTITIONS: u32 = 256;

/// Listing tool used when none is configured
pub const DEFAULT_TOOL: &str = "rclone-lister";

/// Default output directory
pub const DEFAULT_OUT_DIR: &str = "catalog_out";

/// Source labels end up in file names
static SOURCE_LABEL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Invalid source label regex"));

/// Resumable, chunked cataloging of remote storage
#[derive(Parser, Debug, Clone)]
#[command(
    name = "remote-catalog",
    version,
    about = "Resumable, chunked cataloging of remote storage into SQLite",
    long_about = "Lists remote storage through an external listing tool, one chunk at a time,\n\
                  and ingests the listings into a SQLite catalog.\n\n\
                  Every chunk's progress is recorded, so re-running with the same run id\n\
                  (or --resume) skips finished work and retries what failed.",
    after_help = "EXAMPLES:\n    \
        remote-catalog run --source wasabi=wasabi: --out /data/catalog\n    \
        remote-catalog run --source b2=b2:media --hash-partitions 8 --max-parallel 4\n    \
        remote-catalog run --source wasabi=wasabi: --resume\n    \
        remote-catalog status --out /data/catalog --format json"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List and ingest every chunk of the given sources
    Run(RunArgs),

    /// Ingest one raw listing, or only record a chunk status
    Ingest(IngestArgs),

    /// Show chunk states of a run
    Status(StatusArgs),
}

/// Arguments of `run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Source to catalog as LABEL=CONNECTION (repeatable, processed in order)
    #[arg(long = "source", value_name = "LABEL=CONNECTION", required = true, action = clap::ArgAction::Append)]
    pub sources: Vec<String>,

    /// Output directory for the database, raw listings and logs
    #[arg(short, long, env = "CATALOG_OUT", default_value = DEFAULT_OUT_DIR, value_name = "DIR")]
    pub out: PathBuf,

    /// Run identifier to start or resume
    #[arg(long, value_name = "ID", conflicts_with = "resume")]
    pub run_id: Option<String>,

    /// Resume the run recorded in the last-run pointer
    #[arg(long)]
    pub resume: bool,

    /// Re-probe directories and re-list chunks even if their files exist
    #[arg(long)]
    pub force: bool,

    /// Split every chunk into N hash partitions listed in parallel
    #[arg(long, default_value = "1", value_name = "N")]
    pub hash_partitions: u32,

    /// Maximum concurrent listings
    #[arg(short = 'j', long, default_value_t = DEFAULT_MAX_PARALLEL, value_name = "N")]
    pub max_parallel: usize,

    /// Extra flag passed to every listing (repeatable)
    #[arg(long = "extra-flag", value_name = "FLAG", allow_hyphen_values = true, action = clap::ArgAction::Append)]
    pub extra_flags: Vec<String>,

    /// Listing tool program
    #[arg(long, env = "CATALOG_LIST_TOOL", default_value = DEFAULT_TOOL, value_name = "PROGRAM")]
    pub tool: String,

    /// Argument placed before the tool subcommand (repeatable)
    #[arg(long = "tool-arg", value_name = "ARG", allow_hyphen_values = true, action = clap::ArgAction::Append)]
    pub tool_args: Vec<String>,

    /// Seconds between heartbeat lines while a listing runs
    #[arg(
        long,
        default_value_t = DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..),
        value_name = "SECS"
    )]
    pub heartbeat_secs: u64,

    /// Database file name inside the output directory
    #[arg(long, default_value = DEFAULT_DB_NAME, value_name = "NAME")]
    pub db_name: String,

    /// Quiet mode - suppress the spinner and summary
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

/// Arguments of `ingest`
#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// Catalog database
    #[arg(long, value_name = "FILE")]
    pub db: PathBuf,

    #[arg(long, value_name = "ID")]
    pub run_id: String,

    /// Source label
    #[arg(long, value_name = "LABEL")]
    pub source: String,

    /// Source connection string
    #[arg(long, value_name = "CONNECTION")]
    pub remote: String,

    /// Raw listing file
    #[arg(long, value_name = "FILE")]
    pub raw_file: PathBuf,

    /// Command that produced the raw listing
    #[arg(long, value_name = "COMMAND")]
    pub rclone_command: String,

    /// Chunk the listing belongs to
    #[arg(long, value_name = "NAME")]
    pub chunk_name: Option<String>,

    /// Only record this status for the chunk; nothing is parsed
    #[arg(long, value_name = "STATUS", requires = "chunk_name")]
    pub chunk_status: Option<String>,
}

/// Status output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFormat {
    #[default]
    Text,
    Json,
}

/// Arguments of `status`
#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Output directory of the run
    #[arg(short, long, env = "CATALOG_OUT", default_value = DEFAULT_OUT_DIR, value_name = "DIR")]
    pub out: PathBuf,

    /// Database file name inside the output directory
    #[arg(long, default_value = DEFAULT_DB_NAME, value_name = "NAME")]
    pub db_name: String,

    /// Run to show (defaults to the last run)
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    #[arg(long, value_enum, default_value_t = StatusFormat::Text)]
    pub format: StatusFormat,
}

/// A named remote endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    /// Short label used in file names and catalog rows
    pub label: String,
    /// Connection string handed to the listing tool
    pub connection: String,
}

impl SourceSpec {
    pub fn new(label: impl Into<String>, connection: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            connection: connection.into(),
        }
    }
}

impl FromStr for SourceSpec {
    type Err = ConfigError;

    /// Parse `LABEL=CONNECTION`
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidSource {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (label, connection) = spec
            .split_once('=')
            .ok_or_else(|| invalid("expected LABEL=CONNECTION"))?;
        let label = label.trim();
        let connection = connection.trim();

        if !SOURCE_LABEL_REGEX.is_match(label) {
            return Err(invalid("label must use letters, digits, '_' or '-'"));
        }
        if connection.is_empty() {
            return Err(invalid("connection string is empty"));
        }

        Ok(Self::new(label, connection))
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.label, self.connection)
    }
}

/// Validated configuration of a `run`
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Sources in processing order
    pub sources: Vec<SourceSpec>,

    /// Output directory
    pub out_dir: PathBuf,

    /// Database file name inside `out_dir`
    pub db_name: String,

    /// How the run id is chosen
    pub run_id: RunIdChoice,

    /// Ignore cached probes and existing artifacts
    pub force: bool,

    /// Partitions per chunk (1 = unpartitioned)
    pub hash_partitions: u32,

    /// Concurrent listing cap
    pub max_parallel: usize,

    /// Listing tool with its base arguments and extra flags
    pub tool: ListingTool,

    /// Heartbeat period
    pub heartbeat_interval: Duration,

    /// Show spinner and summary
    pub show_progress: bool,
}

impl RunConfig {
    /// Configuration with defaults for everything but the essentials
    pub fn new(sources: Vec<SourceSpec>, out_dir: impl Into<PathBuf>, tool: ListingTool) -> Self {
        Self {
            sources,
            out_dir: out_dir.into(),
            db_name: DEFAULT_DB_NAME.to_string(),
            run_id: RunIdChoice::Generate,
            force: false,
            hash_partitions: 1,
            max_parallel: DEFAULT_MAX_PARALLEL,
            tool,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            show_progress: false,
        }
    }

    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: RunArgs) -> Result<Self, ConfigError> {
        let sources = args
            .sources
            .iter()
            .map(|s| s.parse::<SourceSpec>())
            .collect::<Result<Vec<_>, _>>()?;

        if sources.is_empty() {
            return Err(ConfigError::NoSources);
        }

        let mut seen = HashSet::new();
        for source in &sources {
            if !seen.insert(source.label.as_str()) {
                return Err(ConfigError::DuplicateSource(source.label.clone()));
            }
        }

        // Validate parallelism
        if args.max_parallel == 0 || args.max_parallel > MAX_PARALLEL {
            return Err(ConfigError::InvalidParallelism {
                count: args.max_parallel,
                max: MAX_PARALLEL,
            });
        }

        // Validate partition count
        if args.hash_partitions == 0 || args.hash_partitions > MAX_HASH_PARTITIONS {
            return Err(ConfigError::InvalidPartitions {
                count: args.hash_partitions,
                max: MAX_HASH_PARTITIONS,
            });
        }

        if args.db_name.is_empty() || args.db_name.contains(['/', '\\']) {
            return Err(ConfigError::InvalidOutputPath {
                path: PathBuf::from(&args.db_name),
                reason: "database name must be a plain file name".to_string(),
            });
        }

        if args.out.is_file() {
            return Err(ConfigError::InvalidOutputPath {
                path: args.out.clone(),
                reason: "exists and is not a directory".to_string(),
            });
        }

        let run_id = match (args.run_id, args.resume) {
            (Some(id), _) => {
                crate::layout::validate_run_id(&id)?;
                RunIdChoice::Given(id)
            }
            (None, true) => RunIdChoice::ResumeLast,
            (None, false) => RunIdChoice::Generate,
        };

        let tool = ListingTool::new(args.tool)
            .with_base_args(args.tool_args)
            .with_extra_flags(args.extra_flags);

        Ok(Self {
            sources,
            out_dir: args.out,
            db_name: args.db_name,
            run_id,
            force: args.force,
            hash_partitions: args.hash_partitions,
            max_parallel: args.max_parallel,
            tool,
            heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
            show_progress: !args.quiet,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["remote-catalog", "run", "--source", "wasabi=wasabi:"];
        argv.extend_from_slice(extra);
        match CliArgs::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_source() {
        let spec: SourceSpec = "wasabi=wasabi:".parse().unwrap();
        assert_eq!(spec.label, "wasabi");
        assert_eq!(spec.connection, "wasabi:");

        let spec: SourceSpec = "b2=b2:bucket/path=with=equals".parse().unwrap();
        assert_eq!(spec.connection, "b2:bucket/path=with=equals");
        assert_eq!(spec.to_string(), "b2=b2:bucket/path=with=equals");
    }

    #[test]
    fn test_parse_source_invalid() {
        assert!("wasabi".parse::<SourceSpec>().is_err());
        assert!("=wasabi:".parse::<SourceSpec>().is_err());
        assert!("was abi=wasabi:".parse::<SourceSpec>().is_err());
        assert!("wasabi=".parse::<SourceSpec>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::from_args(run_args(&[])).unwrap();
        assert_eq!(config.hash_partitions, 1);
        assert_eq!(config.max_parallel, DEFAULT_MAX_PARALLEL);
        assert_eq!(config.db_name, "catalog.db");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(config.run_id, RunIdChoice::Generate);
        assert!(config.show_progress);
        assert!(!config.force);
    }

    #[test]
    fn test_tool_arguments() {
        let config = RunConfig::from_args(run_args(&[
            "--tool",
            "sh",
            "--tool-arg",
            "fake.sh",
            "--extra-flag",
            "--fast-list",
        ]))
        .unwrap();
        assert_eq!(config.tool.program(), "sh");
        let args = config.tool.list_args("wasabi:", &crate::chunk::ChunkRef::Root);
        assert_eq!(args, vec!["fake.sh", "list", "wasabi:", "--depth", "1", "--fast-list"]);
    }

    #[test]
    fn test_run_id_choice() {
        let given = RunConfig::from_args(run_args(&["--run-id", "r1"])).unwrap();
        assert_eq!(given.run_id, RunIdChoice::Given("r1".into()));

        let resume = RunConfig::from_args(run_args(&["--resume"])).unwrap();
        assert_eq!(resume.run_id, RunIdChoice::ResumeLast);

        assert!(RunConfig::from_args(run_args(&["--run-id", "../x"])).is_err());
    }

    #[test]
    fn test_validation_limits() {
        assert!(matches!(
            RunConfig::from_args(run_args(&["--max-parallel", "0"])),
            Err(ConfigError::InvalidParallelism { .. })
        ));
        assert!(matches!(
            RunConfig::from_args(run_args(&["--hash-partitions", "257"])),
            Err(ConfigError::InvalidPartitions { .. })
        ));
        assert!(matches!(
            RunConfig::from_args(run_args(&["--source", "wasabi=other:"])),
            Err(ConfigError::DuplicateSource(_))
        ));
    }

    #[test]
    fn test_chunk_status_requires_chunk_name() {
        let parsed = CliArgs::try_parse_from([
            "remote-catalog",
            "ingest",
            "--db",
            "c.db",
            "--run-id",
            "r",
            "--source",
            "s",
            "--remote",
            "s:",
            "--raw-file",
            "x.lsl",
            "--rclone-command",
            "lister list s:",
            "--chunk-status",
            "listed",
        ]);
        assert!(parsed.is_err());
    }
}
