//! Artifact staging
//!
//! Output files are written next to their destinations under temporary names
//! and only moved into place by `commit`. Until then the previous artifacts
//! stay untouched, and `discard` removes everything that was staged.

use crate::config::{OutputMode, RunConfig};
use crate::error::{DumpError, DumpResult};
use crate::format::{FormattedOutput, MANIFEST_FILE};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
struct StagedEntry {
    staged: PathBuf,
    target: PathBuf,
}

/// Artifacts written to temporary siblings of their destinations
#[derive(Debug)]
pub struct StagedArtifacts {
    entries: Vec<StagedEntry>,
    run_id: Uuid,
}

/// Temporary sibling of `target` tagged with the run id
fn sibling(target: &Path, run_id: Uuid, tag: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let file = format!(".{}.{}.{}", name, run_id.simple(), tag);
    match target.parent() {
        Some(parent) => parent.join(file),
        None => PathBuf::from(file),
    }
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

impl StagedArtifacts {
    /// Write every artifact of `output` to a temporary location
    pub fn stage(output: &FormattedOutput, config: &RunConfig) -> DumpResult<Self> {
        let mut staged = Self {
            entries: Vec::new(),
            run_id: Uuid::new_v4(),
        };

        if let Err(e) = staged.write_all(output, config) {
            staged.discard();
            return Err(e);
        }
        debug!("Staged {} artifact(s)", staged.entries.len());
        Ok(staged)
    }

    fn write_all(&mut self, output: &FormattedOutput, config: &RunConfig) -> DumpResult<()> {
        let target = config.output_path.clone();
        ensure_parent(&target)?;
        let path = sibling(&target, self.run_id, "tmp");

        match output.mode {
            OutputMode::SingleFile => {
                self.entries.push(StagedEntry {
                    staged: path.clone(),
                    target,
                });
                fs::write(&path, output.content.as_bytes())?;
            }
            OutputMode::MultiFile => {
                self.entries.push(StagedEntry {
                    staged: path.clone(),
                    target,
                });
                fs::create_dir_all(&path)?;
                for file in &output.files {
                    let dest = path.join(&file.path);
                    ensure_parent(&dest)?;
                    fs::write(&dest, file.content.as_bytes())?;
                }
                fs::write(path.join(MANIFEST_FILE), output.content.as_bytes())?;

                if let (Some(archive_path), Some(archive)) = (&config.archive_path, &output.archive) {
                    ensure_parent(archive_path)?;
                    let staged_archive = sibling(archive_path, self.run_id, "tmp");
                    self.entries.push(StagedEntry {
                        staged: staged_archive.clone(),
                        target: archive_path.clone(),
                    });
                    fs::write(&staged_archive, archive)?;
                }
            }
        }
        Ok(())
    }

    /// Move staged artifacts into place
    ///
    /// Existing destinations are set aside first; if any rename fails, the
    /// already-committed entries are rolled back and the previous artifacts
    /// restored.
    pub fn commit(mut self) -> DumpResult<Vec<PathBuf>> {
        let entries = std::mem::take(&mut self.entries);
        let mut done: Vec<(&StagedEntry, Option<PathBuf>)> = Vec::new();

        for entry in &entries {
            match self.commit_entry(entry) {
                Ok(backup) => done.push((entry, backup)),
                Err(e) => {
                    for (prior, backup) in done.into_iter().rev() {
                        rollback(prior, backup.as_deref());
                    }
                    for pending in &entries {
                        let _ = remove_path(&pending.staged);
                    }
                    return Err(DumpError::persistence(format!(
                        "failed to commit {}: {}",
                        entry.target.display(),
                        e
                    )));
                }
            }
        }

        for (_, backup) in &done {
            if let Some(backup) = backup {
                if let Err(e) = remove_path(backup) {
                    warn!("Could not remove previous artifact {}: {}", backup.display(), e);
                }
            }
        }

        Ok(entries.into_iter().map(|e| e.target).collect())
    }

    fn commit_entry(&self, entry: &StagedEntry) -> std::io::Result<Option<PathBuf>> {
        let backup = if entry.target.exists() {
            let backup = sibling(&entry.target, self.run_id, "old");
            fs::rename(&entry.target, &backup)?;
            Some(backup)
        } else {
            None
        };

        if let Err(e) = fs::rename(&entry.staged, &entry.target) {
            if let Some(backup) = &backup {
                let _ = fs::rename(backup, &entry.target);
            }
            return Err(e);
        }
        Ok(backup)
    }

    /// Remove everything that was staged
    pub fn discard(self) {
        for entry in self.entries {
            if entry.staged.exists() {
                if let Err(e) = remove_path(&entry.staged) {
                    warn!("Could not remove staged {}: {}", entry.staged.display(), e);
                }
            }
        }
    }
}

fn rollback(entry: &StagedEntry, backup: Option<&Path>) {
    let _ = remove_path(&entry.target);
    if let Some(backup) = backup {
        if let Err(e) = fs::rename(backup, &entry.target) {
            warn!("Could not restore {}: {}", entry.target.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::OutputFile;
    use tempfile::TempDir;

    fn single(content: &str) -> FormattedOutput {
        FormattedOutput {
            mode: OutputMode::SingleFile,
            content: content.to_string(),
            files: Vec::new(),
            archive: None,
        }
    }

    fn entries_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_single_file_commit_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("structure.sql");
        fs::write(&target, "old\n").unwrap();
        let config = RunConfig::new(&target);

        let staged = StagedArtifacts::stage(&single("new\n"), &config).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "old\n");

        let committed = staged.commit().unwrap();
        assert_eq!(committed, vec![target.clone()]);
        assert_eq!(fs::read_to_string(&target).unwrap(), "new\n");
        assert_eq!(entries_in(dir.path()), vec!["structure.sql"]);
    }

    #[test]
    fn test_discard_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig::new(dir.path().join("structure.sql"));

        let staged = StagedArtifacts::stage(&single("x\n"), &config).unwrap();
        staged.discard();
        assert!(entries_in(dir.path()).is_empty());
    }

    #[test]
    fn test_multi_file_commit_with_archive() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("schema");
        fs::create_dir_all(out.join("stale")).unwrap();
        let mut config = RunConfig::new(&out);
        config.output_mode = OutputMode::MultiFile;
        config.archive_path = Some(dir.path().join("schema.tar.gz"));

        let output = FormattedOutput {
            mode: OutputMode::MultiFile,
            content: "{}\n".to_string(),
            files: vec![OutputFile {
                path: "04_tables/t.sql".to_string(),
                content: "CREATE TABLE t ();\n".to_string(),
            }],
            archive: Some(vec![1, 2, 3]),
        };

        let committed = StagedArtifacts::stage(&output, &config)
            .unwrap()
            .commit()
            .unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(entries_in(&out), vec!["04_tables", "manifest.json"]);
        assert_eq!(fs::read(dir.path().join("schema.tar.gz")).unwrap(), vec![1, 2, 3]);
        assert_eq!(entries_in(dir.path()), vec!["schema", "schema.tar.gz"]);
    }
}
