//! Directory-backed snapshot store
//!
//! Layout under the store directory:
//!
//! ```text
//! .lock                              advisory lock file
//! .sequence                          last assigned sequence
//! 00000000000000000001-<uuid>.json   snapshot record
//! 00000000000000000001-<uuid>.tar.gz archive payload (multi-file only)
//! ```

use crate::error::{DumpError, DumpResult};
use crate::snapshot::{NewSnapshot, Snapshot, SnapshotStore, SnapshotSummary, StoreLock};
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

const LOCK_FILE: &str = ".lock";
const SEQUENCE_FILE: &str = ".sequence";

pub struct FileSnapshotStore {
    dir: PathBuf,
}

struct FileLock(File);

#[async_trait]
impl StoreLock for FileLock {
    async fn release(self: Box<Self>) -> DumpResult<()> {
        FileExt::unlock(&self.0)
            .map_err(|e| DumpError::persistence(format!("failed to release store lock: {}", e)))
    }
}

fn persistence(context: &str, e: impl std::fmt::Display) -> DumpError {
    DumpError::persistence(format!("{}: {}", context, e))
}

/// Write through a temporary file so readers never see a partial record
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

impl FileSnapshotStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> DumpResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| persistence(&format!("cannot create store {}", dir.display()), e))?;
        Ok(Self { dir })
    }

    fn stem(sequence: u64, id: Uuid) -> String {
        format!("{:020}-{}", sequence, id)
    }

    fn record_path(&self, sequence: u64, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", Self::stem(sequence, id)))
    }

    fn archive_path(&self, sequence: u64, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.tar.gz", Self::stem(sequence, id)))
    }

    fn next_sequence(&self) -> DumpResult<u64> {
        let path = self.dir.join(SEQUENCE_FILE);
        let last = match fs::read_to_string(&path) {
            Ok(text) => text
                .trim()
                .parse::<u64>()
                .map_err(|e| persistence("corrupt sequence file", e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self
                .read_all()?
                .iter()
                .map(|s| s.sequence)
                .max()
                .unwrap_or(0),
            Err(e) => return Err(persistence("cannot read sequence file", e)),
        };
        let next = last + 1;
        write_atomic(&path, next.to_string().as_bytes())
            .map_err(|e| persistence("cannot write sequence file", e))?;
        Ok(next)
    }

    /// Every record in the directory, archives not loaded
    fn read_all(&self) -> DumpResult<Vec<Snapshot>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| persistence(&format!("cannot read store {}", self.dir.display()), e))?;

        let mut snapshots = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| persistence("cannot read store entry", e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = fs::read_to_string(&path)
                .map_err(|e| persistence(&format!("cannot read {}", path.display()), e))?;
            let snapshot: Snapshot = serde_json::from_str(&text)
                .map_err(|e| persistence(&format!("corrupt snapshot {}", path.display()), e))?;
            snapshots.push(snapshot);
        }
        snapshots.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        Ok(snapshots)
    }

    fn find(&self, id: Uuid) -> DumpResult<Option<Snapshot>> {
        Ok(self.read_all()?.into_iter().find(|s| s.id == id))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn create(&self, new: NewSnapshot) -> DumpResult<Snapshot> {
        let sequence = self.next_sequence()?;
        let snapshot = Snapshot::from_new(new, sequence);

        if let Some(archive) = &snapshot.archive {
            write_atomic(&self.archive_path(sequence, snapshot.id), archive)
                .map_err(|e| persistence("cannot write snapshot archive", e))?;
        }

        let record = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| persistence("cannot serialize snapshot", e))?;
        if let Err(e) = write_atomic(&self.record_path(sequence, snapshot.id), &record) {
            let _ = fs::remove_file(self.archive_path(sequence, snapshot.id));
            return Err(persistence("cannot write snapshot", e));
        }

        info!(
            "Saved snapshot #{} ({}) to {}",
            snapshot.sequence,
            snapshot.id,
            self.dir.display()
        );
        Ok(snapshot)
    }

    async fn list(&self) -> DumpResult<Vec<SnapshotSummary>> {
        Ok(self.read_all()?.iter().map(SnapshotSummary::from).collect())
    }

    async fn get(&self, id: Uuid) -> DumpResult<Option<Snapshot>> {
        let Some(mut snapshot) = self.find(id)? else {
            return Ok(None);
        };
        let archive = self.archive_path(snapshot.sequence, snapshot.id);
        if archive.exists() {
            snapshot.archive = Some(
                fs::read(&archive).map_err(|e| persistence("cannot read snapshot archive", e))?,
            );
        }
        Ok(Some(snapshot))
    }

    async fn delete(&self, id: Uuid) -> DumpResult<bool> {
        let Some(snapshot) = self.find(id)? else {
            return Ok(false);
        };
        fs::remove_file(self.record_path(snapshot.sequence, snapshot.id))
            .map_err(|e| persistence("cannot delete snapshot", e))?;
        let archive = self.archive_path(snapshot.sequence, snapshot.id);
        if archive.exists() {
            fs::remove_file(&archive).map_err(|e| persistence("cannot delete snapshot archive", e))?;
        }
        Ok(true)
    }

    async fn lock(&self) -> DumpResult<Box<dyn StoreLock>> {
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| persistence("cannot open store lock", e))?;

        // flock blocks the calling thread
        let file = tokio::task::spawn_blocking(move || file.lock_exclusive().map(|_| file))
            .await
            .map_err(|e| persistence("store lock task failed", e))?
            .map_err(|e| persistence("cannot acquire store lock", e))?;

        Ok(Box::new(FileLock(file)))
    }
}
