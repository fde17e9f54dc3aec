//! On-disk layout of a catalog output directory
//!
//! ```text
//! <out>/
//!   catalog.db                                 relational store
//!   last_run_id                                advisory pointer
//!   parse_errors_<source>_<run>.log            ingestion rejects
//!   raw/<source>_<run>.<chunk-stem>.lsl        listing artifacts
//!   raw/<source>_<run>.<chunk-stem>.lsl.partial  in-progress listings
//!   raw/<source>_<run>.topdirs                 cached directory probe
//!   logs/<source>_<run>.log                    listing tool stderr
//! ```

use crate::chunk::ChunkRef;
use crate::error::ConfigError;
use chrono::Utc;
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Default database file name
pub const DEFAULT_DB_NAME: &str = "catalog.db";

/// Name of the last-run pointer file
pub const LAST_RUN_FILE: &str = "last_run_id";

/// Suffix of in-progress artifacts
pub const PARTIAL_SUFFIX: &str = ".partial";

static RUN_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("Invalid run id regex"));

/// How the run identifier is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunIdChoice {
    /// New timestamp-derived identifier
    Generate,
    /// Caller-supplied identifier (resumes if it was used before)
    Given(String),
    /// Identifier read from the last-run pointer
    ResumeLast,
}

/// Paths under one output directory
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    db_name: String,
}

impl OutputLayout {
    /// Describe a layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>, db_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            db_name: db_name.into(),
        }
    }

    /// Create the output, raw and log directories
    pub fn prepare(&self) -> io::Result<()> {
        fs::create_dir_all(self.raw_dir())?;
        fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(&self.db_name)
    }

    pub fn last_run_path(&self) -> PathBuf {
        self.root.join(LAST_RUN_FILE)
    }

    /// Final artifact path for a chunk
    pub fn artifact_path(&self, source: &str, run_id: &str, chunk: &ChunkRef) -> PathBuf {
        self.raw_dir()
            .join(format!("{}_{}.{}.lsl", source, run_id, chunk.artifact_stem()))
    }

    /// Cached directory probe for a source
    pub fn topdirs_path(&self, source: &str, run_id: &str) -> PathBuf {
        self.raw_dir().join(format!("{}_{}.topdirs", source, run_id))
    }

    /// Listing tool stderr log for a source
    pub fn log_path(&self, source: &str, run_id: &str) -> PathBuf {
        self.logs_dir().join(format!("{}_{}.log", source, run_id))
    }

    /// Ingestion rejects log for a source
    pub fn parse_error_log(&self, source: &str, run_id: &str) -> PathBuf {
        self.root
            .join(format!("parse_errors_{}_{}.log", source, run_id))
    }

    /// Resolve the run identifier for this invocation
    pub fn resolve_run_id(&self, choice: &RunIdChoice) -> Result<String, ConfigError> {
        match choice {
            RunIdChoice::Generate => Ok(generate_run_id()),
            RunIdChoice::Given(id) => {
                validate_run_id(id)?;
                Ok(id.clone())
            }
            RunIdChoice::ResumeLast => self
                .read_last_run()
                .ok_or_else(|| ConfigError::NoLastRun(self.last_run_path())),
        }
    }

    /// Read the last-run pointer, if present and valid
    pub fn read_last_run(&self) -> Option<String> {
        let raw = fs::read_to_string(self.last_run_path()).ok()?;
        let id = raw.trim();
        validate_run_id(id).ok()?;
        Some(id.to_string())
    }

    /// Record the last-run pointer
    pub fn write_last_run(&self, run_id: &str) -> io::Result<()> {
        write_atomic(&self.last_run_path(), format!("{}\n", run_id).as_bytes())
    }
}

/// Temporary sibling of a final artifact path
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Write a file through a temporary sibling and rename it into place
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = partial_path(path);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

/// New run identifier from the current UTC time
pub fn generate_run_id() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Run identifiers end up in file names
pub fn validate_run_id(run_id: &str) -> Result<(), ConfigError> {
    if RUN_ID_REGEX.is_match(run_id) {
        Ok(())
    } else {
        Err(ConfigError::InvalidRunId {
            run_id: run_id.to_string(),
            reason: "use letters, digits, '.', '_' or '-'".to_string(),
        })
    }
}
