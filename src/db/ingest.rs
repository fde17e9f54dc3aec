//! Raw listing parsing and media classification
//!
//! A listing line is `<size> <date> <time> <path>`. The first three fields
//! are separated by runs of whitespace; everything after the third run is
//! the path, so paths may contain spaces.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Rows per insert transaction
pub const INGEST_BATCH_SIZE: usize = 1000;

/// Extensions catalogued as photos
pub const PHOTO_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "heic", "heif", "png", "gif", "tif", "tiff", "bmp", "webp", "dng", "cr2", "cr3",
    "nef", "arw", "raf", "orf", "rw2", "pef", "sr2",
];

/// Extensions catalogued as videos
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "m4v", "avi", "mkv", "mpg", "mpeg", "3gp", "3gpp", "mts", "m2ts", "ts", "wmv",
    "flv", "webm",
];

/// Ignored reason for files without an extension
pub const REASON_NO_EXTENSION: &str = "no_extension";

/// Ignored reason for files whose extension is not a media type
pub const REASON_NON_MEDIA: &str = "non_media_extension";

/// One parsed listing line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRecord<'a> {
    pub size: u64,
    /// `<date>T<time>` as printed by the tool
    pub modtime: String,
    pub path: &'a str,
}

/// Why a listing line was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineError {
    /// Fewer than four fields
    Unparseable,
    /// First field is not a non-negative integer
    InvalidSize,
}

impl LineError {
    /// Prefix written to the parse error log
    pub fn label(&self) -> &'static str {
        match self {
            LineError::Unparseable => "Unparseable line",
            LineError::InvalidSize => "Invalid size",
        }
    }
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Parse one listing line (without its line terminator)
pub fn parse_listing_line(line: &str) -> Result<ListingRecord<'_>, LineError> {
    let (size, rest) = next_field(line).ok_or(LineError::Unparseable)?;
    let (date, rest) = next_field(rest).ok_or(LineError::Unparseable)?;
    let (time, rest) = next_field(rest).ok_or(LineError::Unparseable)?;
    let path = rest.trim_start();
    if path.is_empty() {
        return Err(LineError::Unparseable);
    }

    let size: u64 = size.parse().map_err(|_| LineError::InvalidSize)?;

    Ok(ListingRecord {
        size,
        modtime: format!("{}T{}", date, time),
        path,
    })
}

/// Split off the next whitespace-delimited field
fn next_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    let end = s.find(char::is_whitespace)?;
    Some((&s[..end], &s[end..]))
}

/// Media kind stored in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Other,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Other => "other",
        }
    }
}

/// Extension-based classification of a catalogued file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Lowercase extension without the dot, empty if none
    pub ext: String,
    pub kind: MediaKind,
    /// Empty for media files
    pub ignored_reason: &'static str,
}

impl Classification {
    pub fn is_media(&self) -> bool {
        self.kind != MediaKind::Other
    }
}

/// Classify a path by the extension of its final component
pub fn classify_ext(path: &str) -> Classification {
    let name = path.rsplit('/').next().unwrap_or(path);
    let Some((_, ext)) = name.rsplit_once('.') else {
        return Classification {
            ext: String::new(),
            kind: MediaKind::Other,
            ignored_reason: REASON_NO_EXTENSION,
        };
    };

    let ext = ext.to_ascii_lowercase();
    let (kind, ignored_reason) = if PHOTO_EXTENSIONS.contains(&ext.as_str()) {
        (MediaKind::Photo, "")
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        (MediaKind::Video, "")
    } else {
        (MediaKind::Other, REASON_NON_MEDIA)
    };

    Classification {
        ext,
        kind,
        ignored_reason,
    }
}

/// Path stored in the catalog for a listed entry
///
/// Directory listings print paths relative to the listed directory; the
/// prefix puts them back under the source root.
pub fn catalog_path(prefix: Option<&str>, listed: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => {
            let prefix = prefix.trim_end_matches('/');
            format!("{}/{}", prefix, listed.trim_start_matches('/'))
        }
        _ => listed.to_string(),
    }
}

/// Everything needed to ingest one raw listing
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub run_id: String,
    pub source: String,
    /// Connection string of the source, recorded for provenance
    pub remote: String,
    pub raw_file: PathBuf,
    /// Exact listing command that produced `raw_file`
    pub command: String,
    /// Chunk the rows belong to
    pub chunk_name: Option<String>,
    /// Directory the listing was taken from, relative to the source root
    pub path_prefix: Option<String>,
    /// Rejected lines are appended here when set
    pub error_log: Option<PathBuf>,
}

/// Counters from one ingestion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Lines read, including blank ones
    pub lines: u64,
    /// Lines parsed into rows
    pub accepted: u64,
    /// Rows that were new to the catalog
    pub inserted: u64,
    /// Lines written to the parse error log
    pub rejected: u64,
}

impl IngestSummary {
    /// Accepted rows that were already catalogued
    pub fn duplicates(&self) -> u64 {
        self.accepted.saturating_sub(self.inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_line() {
        let rec = parse_listing_line("1234 2024-03-01 10:11:12.000000000 DCIM/IMG_0001.JPG").unwrap();
        assert_eq!(rec.size, 1234);
        assert_eq!(rec.modtime, "2024-03-01T10:11:12.000000000");
        assert_eq!(rec.path, "DCIM/IMG_0001.JPG");
    }

    #[test]
    fn test_parse_path_with_spaces() {
        let rec = parse_listing_line("  7   2024-03-01  10:11:12   My Photos/beach day.jpg").unwrap();
        assert_eq!(rec.size, 7);
        assert_eq!(rec.path, "My Photos/beach day.jpg");
    }

    #[test]
    fn test_parse_rejects() {
        assert_eq!(
            parse_listing_line("12 2024-03-01 10:11:12"),
            Err(LineError::Unparseable)
        );
        assert_eq!(
            parse_listing_line("12 2024-03-01 10:11:12   "),
            Err(LineError::Unparseable)
        );
        assert_eq!(parse_listing_line("garbage"), Err(LineError::Unparseable));
        assert_eq!(
            parse_listing_line("12k 2024-03-01 10:11:12 a.jpg"),
            Err(LineError::InvalidSize)
        );
        assert_eq!(
            parse_listing_line("-1 2024-03-01 10:11:12 a.jpg"),
            Err(LineError::InvalidSize)
        );
    }

    #[test]
    fn test_classify() {
        let photo = classify_ext("a/b/IMG.HEIC");
        assert_eq!(photo.ext, "heic");
        assert_eq!(photo.kind, MediaKind::Photo);
        assert!(photo.is_media());
        assert_eq!(photo.ignored_reason, "");

        let video = classify_ext("clip.m2ts");
        assert_eq!(video.kind, MediaKind::Video);

        let doc = classify_ext("notes/readme.TXT");
        assert_eq!(doc.ext, "txt");
        assert!(!doc.is_media());
        assert_eq!(doc.ignored_reason, REASON_NON_MEDIA);

        let bare = classify_ext("dir.with.dots/Makefile");
        assert_eq!(bare.ext, "");
        assert_eq!(bare.ignored_reason, REASON_NO_EXTENSION);
    }

    #[test]
    fn test_catalog_path() {
        assert_eq!(catalog_path(None, "a.jpg"), "a.jpg");
        assert_eq!(catalog_path(Some("seagate/Photos/"), "x/a.jpg"), "seagate/Photos/x/a.jpg");
        assert_eq!(catalog_path(Some(""), "a.jpg"), "a.jpg");
    }
}
