//! Chunk identity and lifecycle status
//!
//! A chunk is the unit of listing and ingestion work. Its identity within a
//! run is `(run_id, source, key)` where the key is derived from the variant:
//!
//! | Variant                 | Storage key          | Artifact stem              |
//! |-------------------------|----------------------|----------------------------|
//! | `Root`                  | `__root__`           | `__root__`                 |
//! | `Directory("a/b/")`     | `a/b/`               | `a__b`                     |
//! | `Partitioned(a/b/, 1, 4)` | `a/b/#1/4`         | `a__b+part1of4`            |
//!
//! Distinct keys always map to distinct stems.

use crate::error::ConfigError;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Storage key of the root chunk
pub const ROOT_KEY: &str = "__root__";

/// `k/N` suffix of a partition key
static PARTITION_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+/\d+$").expect("Invalid partition regex"));

/// Reference to one unit of listing work
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChunkRef {
    /// Objects directly under the source root (depth 1 only)
    Root,

    /// Everything below one discovered directory (path keeps its trailing `/`)
    Directory(String),

    /// The `index`-th of `total` hash ranges of a root or directory chunk
    Partitioned {
        base: Box<ChunkRef>,
        index: u32,
        total: u32,
    },
}

impl ChunkRef {
    /// Create a directory chunk, normalizing the trailing separator
    pub fn directory(path: &str) -> Self {
        let trimmed = path.trim_matches('/');
        ChunkRef::Directory(format!("{}/", trimmed))
    }

    /// Split this chunk into `total` hash partitions
    ///
    /// Returns the chunk itself when `total <= 1`. Partitioning an already
    /// partitioned chunk re-partitions its base.
    pub fn partitions(&self, total: u32) -> Vec<ChunkRef> {
        let base = self.base().clone();
        if total <= 1 {
            return vec![base];
        }
        (0..total)
            .map(|index| ChunkRef::Partitioned {
                base: Box::new(base.clone()),
                index,
                total,
            })
            .collect()
    }

    /// The unpartitioned chunk this one belongs to
    pub fn base(&self) -> &ChunkRef {
        match self {
            ChunkRef::Partitioned { base, .. } => base.base(),
            other => other,
        }
    }

    /// True for the root chunk and its partitions
    pub fn is_root(&self) -> bool {
        matches!(self.base(), ChunkRef::Root)
    }

    /// Directory scope, `None` for root
    pub fn directory_path(&self) -> Option<&str> {
        match self.base() {
            ChunkRef::Directory(path) => Some(path.as_str()),
            _ => None,
        }
    }

    /// `(index, total)` when this is a hash partition
    pub fn hash_filter(&self) -> Option<(u32, u32)> {
        match self {
            ChunkRef::Partitioned { index, total, .. } => Some((*index, *total)),
            _ => None,
        }
    }

    /// Key used in the chunk state table and in catalog provenance
    pub fn key(&self) -> String {
        match self {
            ChunkRef::Root => ROOT_KEY.to_string(),
            ChunkRef::Directory(path) => path.clone(),
            ChunkRef::Partitioned { base, index, total } => {
                format!("{}#{}/{}", base.key(), index, total)
            }
        }
    }

    /// File-name-safe stem used for the raw artifact
    pub fn artifact_stem(&self) -> String {
        match self {
            ChunkRef::Root => ROOT_KEY.to_string(),
            ChunkRef::Directory(path) => sanitize_path(path),
            ChunkRef::Partitioned { base, index, total } => {
                format!("{}+part{}of{}", base.artifact_stem(), index, total)
            }
        }
    }
}

impl fmt::Display for ChunkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for ChunkRef {
    type Err = String;

    /// Parse a storage key back into a chunk reference
    fn from_str(key: &str) -> Result<Self, Self::Err> {
        if let Some((base, range)) = key
            .rsplit_once('#')
            .filter(|(_, range)| PARTITION_SUFFIX.is_match(range))
        {
            let (index, total) = range
                .split_once('/')
                .ok_or_else(|| format!("partition suffix '{}' is not k/N", range))?;
            let index: u32 = index
                .parse()
                .map_err(|_| format!("invalid partition index '{}'", index))?;
            let total: u32 = total
                .parse()
                .map_err(|_| format!("invalid partition count '{}'", total))?;
            if total < 2 || index >= total {
                return Err(format!("partition {}/{} out of range", index, total));
            }
            let base: ChunkRef = base.parse()?;
            return Ok(ChunkRef::Partitioned {
                base: Box::new(base),
                index,
                total,
            });
        }

        if key == ROOT_KEY {
            return Ok(ChunkRef::Root);
        }
        if key.trim_matches('/').is_empty() {
            return Err("empty chunk name".to_string());
        }
        Ok(ChunkRef::directory(key))
    }
}

/// Turn a directory path into a single file-name component
///
/// `seagate/My Photos/` becomes `seagate__My%20Photos`. ASCII letters,
/// digits, `.` and `-` are kept, `/` becomes `__` and every other byte
/// (`_` included) is percent-encoded, so the mapping is reversible. Stems
/// never contain a lone `_` or a `+`.
pub fn sanitize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    let mut stem = String::with_capacity(trimmed.len());
    for byte in trimmed.bytes() {
        match byte {
            b'/' => stem.push_str("__"),
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' => stem.push(byte as char),
            _ => stem.push_str(&format!("%{:02X}", byte)),
        }
    }
    stem
}

/// Durable lifecycle state of a chunk
///
/// A chunk with no stored row is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    /// Listing command is running (or was interrupted)
    Listing,
    /// Raw artifact is complete on disk
    Listed,
    /// Listing failed; retried on the next invocation
    Error,
    /// Rows are in the catalog; terminal
    Ingested,
}

impl ChunkStatus {
    /// All states in lifecycle order
    pub const ALL: [ChunkStatus; 4] = [
        ChunkStatus::Listing,
        ChunkStatus::Listed,
        ChunkStatus::Error,
        ChunkStatus::Ingested,
    ];

    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Listing => "listing",
            ChunkStatus::Listed => "listed",
            ChunkStatus::Error => "error",
            ChunkStatus::Ingested => "ingested",
        }
    }

    /// Only `ingested` lets a later invocation skip the chunk
    pub fn is_done(&self) -> bool {
        matches!(self, ChunkStatus::Ingested)
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStatus {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "listing" => Ok(ChunkStatus::Listing),
            "listed" => Ok(ChunkStatus::Listed),
            "error" => Ok(ChunkStatus::Error),
            "ingested" => Ok(ChunkStatus::Ingested),
            _ => Err(ConfigError::InvalidStatus(s.to_string())),
        }
    }
}
