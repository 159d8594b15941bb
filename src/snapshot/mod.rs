//! Schema Snapshot Module
//!
//! Immutable records of past dumps plus the stores that retain them.
//! Think of this as "git commits" for your database schema: every run adds
//! one, and retention trims the oldest.

pub mod file_store;
pub mod pg_store;
pub mod store;

pub use file_store::FileSnapshotStore;
pub use pg_store::PostgresSnapshotStore;
pub use store::{MemorySnapshotStore, SnapshotStore, StoreLock};

use crate::config::OutputMode;
use crate::format::{sha256_hex, FormattedOutput, OutputFile, FORMAT_TYPE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hash of snapshot content; a pure function of the content
pub fn content_hash(content: &str) -> String {
    sha256_hex(content.as_bytes())
}

/// A stored dump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    /// Creation sequence, monotonic per store
    pub sequence: u64,
    /// The SQL document, or the manifest in multi-file mode
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<OutputFile>,
    pub content_hash: String,
    pub size: usize,
    pub line_count: usize,
    pub engine_version: String,
    pub format_type: String,
    pub output_mode: OutputMode,
    pub file_count: Option<usize>,
    /// Gzip tar payload; kept out of the JSON record
    #[serde(skip)]
    pub archive: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Assign identity to a new snapshot
    pub fn from_new(new: NewSnapshot, sequence: u64) -> Self {
        let file_count = match new.output_mode {
            OutputMode::MultiFile => Some(new.files.len()),
            OutputMode::SingleFile => None,
        };
        Self {
            id: Uuid::new_v4(),
            sequence,
            content_hash: content_hash(&new.content),
            size: new.content.len(),
            line_count: new.content.lines().count(),
            content: new.content,
            files: new.files,
            engine_version: new.engine_version,
            format_type: FORMAT_TYPE.to_string(),
            output_mode: new.output_mode,
            file_count,
            archive: new.archive,
            created_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary::from(self)
    }
}

/// Everything the dumper supplies; the store assigns id, sequence and time
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub content: String,
    pub files: Vec<OutputFile>,
    pub engine_version: String,
    pub output_mode: OutputMode,
    pub archive: Option<Vec<u8>>,
}

impl NewSnapshot {
    pub fn from_output(output: &FormattedOutput, engine_version: impl Into<String>) -> Self {
        Self {
            content: output.content.clone(),
            files: output.files.clone(),
            engine_version: engine_version.into(),
            output_mode: output.mode,
            archive: output.archive.clone(),
        }
    }
}

/// Metadata about a snapshot (lightweight, used for listing)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: Uuid,
    pub sequence: u64,
    pub content_hash: String,
    pub size: usize,
    pub line_count: usize,
    pub engine_version: String,
    pub format_type: String,
    pub output_mode: OutputMode,
    pub file_count: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl From<&Snapshot> for SnapshotSummary {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            id: snapshot.id,
            sequence: snapshot.sequence,
            content_hash: snapshot.content_hash.clone(),
            size: snapshot.size,
            line_count: snapshot.line_count,
            engine_version: snapshot.engine_version.clone(),
            format_type: snapshot.format_type.clone(),
            output_mode: snapshot.output_mode,
            file_count: snapshot.file_count,
            created_at: snapshot.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_pure() {
        assert_eq!(content_hash("CREATE TABLE t ();\n"), content_hash("CREATE TABLE t ();\n"));
        assert_ne!(content_hash("a\n"), content_hash("b\n"));
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_from_new_fills_metadata() {
        let new = NewSnapshot {
            content: "a\nb\n".to_string(),
            files: vec![OutputFile {
                path: "01_extensions.sql".to_string(),
                content: "x\n".to_string(),
            }],
            engine_version: "PostgreSQL 16.2".to_string(),
            output_mode: OutputMode::MultiFile,
            archive: None,
        };
        let snapshot = Snapshot::from_new(new, 7);
        assert_eq!(snapshot.sequence, 7);
        assert_eq!(snapshot.size, 4);
        assert_eq!(snapshot.line_count, 2);
        assert_eq!(snapshot.file_count, Some(1));
        assert_eq!(snapshot.format_type, "sql");
        assert_eq!(snapshot.summary().content_hash, snapshot.content_hash);
    }
}
