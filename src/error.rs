//! Error types for remote-catalog
//!
//! This module defines the error hierarchy that covers:
//! - Directory probe failures (fatal for one source)
//! - Listing tool failures (fatal for one chunk)
//! - SQLite catalog and chunk-state errors
//! - Configuration and CLI errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include the source/chunk they belong to
//! - Preserve error chains for debugging

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the remote-catalog application
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Directory probe errors
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Listing tool errors
    #[error("Listing error: {0}")]
    Listing(#[from] ListingError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors (artifacts, logs, pointer file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Interrupted by signal
    #[error("Operation interrupted by signal")]
    Interrupted,
}

impl CatalogError {
    /// Check if this error came from a shutdown request
    pub fn is_interrupt(&self) -> bool {
        match self {
            CatalogError::Interrupted => true,
            CatalogError::Listing(e) => e.is_interrupt(),
            CatalogError::Probe(ProbeError::Interrupted { .. }) => true,
            _ => false,
        }
    }
}

/// Directory probe errors
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The probe command could not be started
    #[error("Failed to launch directory probe for '{remote}': {reason}")]
    SpawnFailed { remote: String, reason: String },

    /// The probe command exited non-zero
    #[error("Directory probe for '{remote}' exited with status {code}: {stderr}")]
    Failed {
        remote: String,
        code: i32,
        stderr: String,
    },

    /// Cached probe result could not be read or written
    #[error("Directory list cache '{path}': {reason}")]
    Cache { path: PathBuf, reason: String },

    /// The probe was killed by a shutdown request
    #[error("Directory probe for '{remote}' was interrupted")]
    Interrupted { remote: String },
}

/// Listing tool errors
#[derive(Error, Debug)]
pub enum ListingError {
    /// The listing command could not be started
    #[error("Failed to launch listing for chunk '{chunk}': {reason}")]
    SpawnFailed { chunk: String, reason: String },

    /// The listing command exited non-zero
    #[error("Listing for chunk '{chunk}' exited with status {code}")]
    Failed { chunk: String, code: i32 },

    /// The listing was killed by a shutdown request
    #[error("Listing for chunk '{chunk}' was interrupted")]
    Interrupted { chunk: String },

    /// Artifact file handling failed
    #[error("Artifact '{path}': {reason}")]
    Artifact { path: PathBuf, reason: String },

    /// A task in the listing pool panicked or was cancelled
    #[error("Listing task for chunk '{chunk}' aborted: {reason}")]
    TaskAborted { chunk: String, reason: String },
}

impl ListingError {
    /// Check if this error came from an interrupt rather than a tool failure
    pub fn is_interrupt(&self) -> bool {
        matches!(self, ListingError::Interrupted { .. })
    }
}

/// Database errors
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to open or create the database file
    #[error("Failed to open database at '{path}': {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    /// Stored status string is not one of the known states
    #[error("Unknown chunk status '{0}' in chunk table")]
    UnknownStatus(String),

    /// Raw listing file could not be read during ingestion
    #[error("Failed to read raw listing '{path}': {reason}")]
    RawFile { path: PathBuf, reason: String },

    /// Parse error log could not be written
    #[error("Failed to write parse error log '{path}': {reason}")]
    ErrorLog { path: PathBuf, reason: String },

    /// Background database task failed
    #[error("Database task failed: {0}")]
    Task(String),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Source spec is not LABEL=CONNECTION
    #[error("Invalid source '{spec}': {reason}")]
    InvalidSource { spec: String, reason: String },

    /// No sources given
    #[error("At least one --source LABEL=CONNECTION is required")]
    NoSources,

    /// Duplicate source label
    #[error("Source label '{0}' given more than once")]
    DuplicateSource(String),

    /// Invalid parallelism
    #[error("Invalid max parallel listings {count}: must be between 1 and {max}")]
    InvalidParallelism { count: usize, max: usize },

    /// Invalid partition count
    #[error("Invalid hash partition count {count}: must be between 1 and {max}")]
    InvalidPartitions { count: u32, max: u32 },

    /// Invalid run identifier
    #[error("Invalid run id '{run_id}': {reason}")]
    InvalidRunId { run_id: String, reason: String },

    /// Resume requested but no pointer exists
    #[error("Cannot resume: no last run pointer at '{0}'")]
    NoLastRun(PathBuf),

    /// Output path error
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: PathBuf, reason: String },

    /// Unknown chunk status given on the command line
    #[error("Unknown chunk status '{0}': expected listing, listed, error or ingested")]
    InvalidStatus(String),
}

/// Result type alias for CatalogError
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Result type alias for DbError
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Result type alias for ListingError
pub type ListingResult<T> = std::result::Result<T, ListingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_interrupt_detection() {
        let interrupted = ListingError::Interrupted {
            chunk: "__root__".into(),
        };
        assert!(interrupted.is_interrupt());

        let failed = ListingError::Failed {
            chunk: "a/b/".into(),
            code: 3,
        };
        assert!(!failed.is_interrupt());
    }

    #[test]
    fn test_error_conversion() {
        let probe = ProbeError::Failed {
            remote: "wasabi:".into(),
            code: 1,
            stderr: "denied".into(),
        };
        let err: CatalogError = probe.into();
        assert!(matches!(err, CatalogError::Probe(_)));
        assert!(err.to_string().contains("wasabi:"));
        assert!(!err.is_interrupt());

        let killed: CatalogError = ListingError::Interrupted { chunk: "a/".into() }.into();
        assert!(killed.is_interrupt());
    }
}
