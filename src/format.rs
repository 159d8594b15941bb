//! Output formatting
//!
//! Assembles rendered fragments into the final dump: one SQL document, or a
//! directory of SQL files plus `manifest.json` and a gzip tar archive. Output
//! is a pure function of the fragments, so repeated runs over the same catalog
//! produce byte-identical artifacts.

use crate::catalog::{Dialect, RelationName};
use crate::config::OutputMode;
use crate::error::{DumpError, DumpResult};
use crate::generator::Fragment;
use crate::introspection::{CatalogModel, Section};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const FORMAT_TYPE: &str = "sql";

/// SHA-256 of `data` as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Normalize line endings and whitespace
///
/// CRLF and CR become LF, trailing whitespace is stripped from every line and
/// the text ends with exactly one newline. Blank input stays empty.
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.lines().map(str::trim_end).collect();
    let body = lines.join("\n");
    let body = body.trim_end_matches('\n');
    if body.trim().is_empty() {
        return String::new();
    }
    format!("{}\n", body)
}

fn banner(section: Section) -> String {
    format!("--\n-- {}\n--", section.title())
}

/// Banner per non-empty section, blank line between fragments
fn render_sections<'a>(fragments: impl IntoIterator<Item = &'a Fragment>) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Option<Section> = None;
    for fragment in fragments {
        if current != Some(fragment.section) {
            blocks.push(banner(fragment.section));
            current = Some(fragment.section);
        }
        blocks.push(fragment.sql.clone());
    }
    normalize(&blocks.join("\n\n"))
}

fn line_count(text: &str) -> usize {
    text.lines().count()
}

// =============================================================================
// OUTPUT TYPES
// =============================================================================

/// One file of a multi-file dump, path relative to the output directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub sha256: String,
    pub size: usize,
    pub lines: usize,
}

/// Load-ordered listing of a multi-file dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format: String,
    pub dialect: Dialect,
    pub namespace: String,
    pub files: Vec<ManifestEntry>,
}

/// Formatted dump ready to hash and persist
#[derive(Debug, Clone)]
pub struct FormattedOutput {
    pub mode: OutputMode,
    /// The SQL document, or the manifest JSON in multi-file mode
    pub content: String,
    /// Files in load order; empty in single-file mode
    pub files: Vec<OutputFile>,
    /// Gzip tar of files plus manifest; multi-file mode only
    pub archive: Option<Vec<u8>>,
}

impl FormattedOutput {
    pub fn content_hash(&self) -> String {
        sha256_hex(self.content.as_bytes())
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn line_count(&self) -> usize {
        line_count(&self.content)
    }
}

// =============================================================================
// FORMATTER
// =============================================================================

pub struct Formatter {
    mode: OutputMode,
    dialect: Dialect,
    namespace: String,
}

impl Formatter {
    pub fn new(mode: OutputMode, model: &CatalogModel) -> Self {
        Self {
            mode,
            dialect: model.dialect,
            namespace: model.namespace.clone(),
        }
    }

    pub fn format(&self, fragments: &[Fragment]) -> DumpResult<FormattedOutput> {
        match self.mode {
            OutputMode::SingleFile => Ok(FormattedOutput {
                mode: self.mode,
                content: render_sections(fragments),
                files: Vec::new(),
                archive: None,
            }),
            OutputMode::MultiFile => self.format_multi(fragments),
        }
    }

    fn format_multi(&self, fragments: &[Fragment]) -> DumpResult<FormattedOutput> {
        let files = self.split_files(fragments);

        let manifest = Manifest {
            format: FORMAT_TYPE.to_string(),
            dialect: self.dialect,
            namespace: self.namespace.clone(),
            files: files
                .iter()
                .map(|f| ManifestEntry {
                    path: f.path.clone(),
                    sha256: sha256_hex(f.content.as_bytes()),
                    size: f.content.len(),
                    lines: line_count(&f.content),
                })
                .collect(),
        };
        let mut content = serde_json::to_string_pretty(&manifest)
            .map_err(|e| DumpError::Formatting(format!("manifest serialization failed: {}", e)))?;
        content.push('\n');

        let archive = build_archive(&files, &content)?;

        Ok(FormattedOutput {
            mode: self.mode,
            content,
            files,
            archive: Some(archive),
        })
    }

    /// Distribute fragments over files whose lexical order is load order
    fn split_files(&self, fragments: &[Fragment]) -> Vec<OutputFile> {
        let mut stems = StemAllocator::default();
        let mut flat: BTreeMap<&'static str, Vec<&Fragment>> = BTreeMap::new();
        let mut per_table: BTreeMap<String, Vec<&Fragment>> = BTreeMap::new();

        for fragment in fragments {
            let directory = match fragment.section {
                Section::Tables | Section::Indexes => Some("04_tables"),
                Section::ForeignKeys => Some("05_foreign_keys"),
                _ => None,
            };

            match (directory, &fragment.owning_table) {
                (Some(dir), Some(table)) => {
                    let stem = stems.stem_for(table, &self.namespace);
                    per_table
                        .entry(format!("{}/{}.sql", dir, stem))
                        .or_default()
                        .push(fragment);
                }
                _ => flat
                    .entry(flat_file_name(fragment.section))
                    .or_default()
                    .push(fragment),
            }
        }

        let mut files: Vec<OutputFile> = flat
            .into_iter()
            .map(|(path, members)| OutputFile {
                path: path.to_string(),
                content: render_sections(members),
            })
            .collect();
        files.extend(per_table.into_iter().map(|(path, members)| OutputFile {
            path,
            content: render_sections(members),
        }));
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }
}

fn flat_file_name(section: Section) -> &'static str {
    match section {
        Section::Extensions => "01_extensions.sql",
        Section::Types => "02_types.sql",
        Section::Sequences => "03_sequences.sql",
        // only reached for fragments without an owning table
        Section::Tables | Section::Indexes => "04_tables.sql",
        Section::ForeignKeys => "05_foreign_keys.sql",
        Section::Views => "06_views.sql",
        Section::Functions => "07_functions.sql",
        Section::Triggers => "08_triggers.sql",
        Section::DeferredConstraints => "09_deferred_constraints.sql",
    }
}

/// Assigns each table a stable, filesystem-safe file stem
#[derive(Default)]
struct StemAllocator {
    by_table: HashMap<RelationName, String>,
    taken: HashSet<String>,
}

impl StemAllocator {
    fn stem_for(&mut self, table: &RelationName, namespace: &str) -> String {
        if let Some(existing) = self.by_table.get(table) {
            return existing.clone();
        }

        let raw = if table.schema == namespace {
            table.name.clone()
        } else {
            table.qualified()
        };
        let base = sanitize_stem(&raw);

        // case-insensitive so the layout survives case-folding filesystems
        let mut stem = base.clone();
        let mut n = 1;
        while self.taken.contains(&stem.to_lowercase()) {
            n += 1;
            stem = format!("{}-{}", base, n);
        }

        self.taken.insert(stem.to_lowercase());
        self.by_table.insert(table.clone(), stem.clone());
        stem
    }
}

pub fn sanitize_stem(raw: &str) -> String {
    let stem: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_start_matches('.').to_string();
    if stem.is_empty() {
        "_".to_string()
    } else {
        stem
    }
}

/// Pack files and manifest into a gzip tar with fixed metadata
fn build_archive(files: &[OutputFile], manifest: &str) -> DumpResult<Vec<u8>> {
    let archive_err = |e: std::io::Error| DumpError::Formatting(format!("archive packaging failed: {}", e));

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.mode(tar::HeaderMode::Deterministic);

    let entries = files
        .iter()
        .map(|f| (f.path.as_str(), f.content.as_bytes()))
        .chain(std::iter::once((MANIFEST_FILE, manifest.as_bytes())));

    for (path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder.append_data(&mut header, path, data).map_err(archive_err)?;
    }

    let encoder = builder.into_inner().map_err(archive_err)?;
    encoder.finish().map_err(archive_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ObjectKind;
    use flate2::read::GzDecoder;
    use pretty_assertions::assert_eq;
    use std::io::Read;

    fn fragment(kind: ObjectKind, section: Section, qualified: &str, table: Option<&str>, sql: &str) -> Fragment {
        Fragment {
            kind,
            section,
            qualified: qualified.to_string(),
            owning_table: table.map(|t| RelationName::new("public", t)),
            sql: sql.to_string(),
        }
    }

    fn formatter(mode: OutputMode) -> Formatter {
        Formatter {
            mode,
            dialect: Dialect::Postgres,
            namespace: "public".to_string(),
        }
    }

    fn sample() -> Vec<Fragment> {
        vec![
            fragment(ObjectKind::Type, Section::Types, "public.mood", None, "CREATE TYPE mood AS ENUM ('ok');"),
            fragment(ObjectKind::Table, Section::Tables, "public.a", Some("a"), "CREATE TABLE a (\n    id integer\n);"),
            fragment(ObjectKind::Table, Section::Tables, "public.b", Some("b"), "CREATE TABLE b (\n    id integer\n);"),
            fragment(ObjectKind::Index, Section::Indexes, "public.a_idx", Some("a"), "CREATE INDEX a_idx ON a (id);"),
            fragment(ObjectKind::ForeignKey, Section::ForeignKeys, "public.b.b_a_fk", Some("b"), "ALTER TABLE b\n    ADD CONSTRAINT b_a_fk FOREIGN KEY (id) REFERENCES a (id);"),
        ]
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("a  \r\nb\rc\t\n\n\n"), "a\nb\nc\n");
        assert_eq!(normalize("\n \n"), "");
    }

    #[test]
    fn test_single_document_layout() {
        let output = formatter(OutputMode::SingleFile).format(&sample()[..2]).unwrap();
        assert_eq!(
            output.content,
            "--\n-- Types\n--\n\nCREATE TYPE mood AS ENUM ('ok');\n\n--\n-- Tables\n--\n\nCREATE TABLE a (\n    id integer\n);\n"
        );
        assert!(output.files.is_empty());
        assert!(output.archive.is_none());
        assert_eq!(output.line_count(), 13);
    }

    #[test]
    fn test_empty_sections_emit_nothing() {
        let output = formatter(OutputMode::SingleFile).format(&[]).unwrap();
        assert_eq!(output.content, "");
    }

    #[test]
    fn test_multi_file_layout() {
        let output = formatter(OutputMode::MultiFile).format(&sample()).unwrap();
        let paths: Vec<&str> = output.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "02_types.sql",
                "04_tables/a.sql",
                "04_tables/b.sql",
                "05_foreign_keys/b.sql",
            ]
        );
        assert!(output.files[1].content.contains("CREATE INDEX a_idx"));

        let manifest: Manifest = serde_json::from_str(&output.content).unwrap();
        assert_eq!(manifest.files.len(), 4);
        assert_eq!(manifest.files[0].sha256, sha256_hex(output.files[0].content.as_bytes()));
        assert_eq!(manifest.files[0].lines, 5);
    }

    #[test]
    fn test_manifest_ignores_server_version() {
        let model = |version: &str| CatalogModel {
            dialect: Dialect::Postgres,
            namespace: "public".to_string(),
            engine_version: version.to_string(),
            groups: Vec::new(),
        };
        let before = Formatter::new(OutputMode::MultiFile, &model("PostgreSQL 16.2"))
            .format(&sample())
            .unwrap();
        let after = Formatter::new(OutputMode::MultiFile, &model("PostgreSQL 16.3"))
            .format(&sample())
            .unwrap();
        assert_eq!(before.content_hash(), after.content_hash());
        assert!(!before.content.contains("16.2"));
    }

    #[test]
    fn test_archive_is_deterministic_and_complete() {
        let first = formatter(OutputMode::MultiFile).format(&sample()).unwrap();
        let second = formatter(OutputMode::MultiFile).format(&sample()).unwrap();
        assert_eq!(first.archive, second.archive);

        let bytes = first.archive.unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            assert_eq!(entry.header().mtime().unwrap(), 0);
            assert_eq!(entry.header().mode().unwrap(), 0o644);
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            names.push(entry.path().unwrap().to_string_lossy().into_owned());
        }
        assert_eq!(names.last().map(String::as_str), Some(MANIFEST_FILE));
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn test_stem_collisions_get_suffixes() {
        let mut stems = StemAllocator::default();
        let a = stems.stem_for(&RelationName::new("public", "a b"), "public");
        let b = stems.stem_for(&RelationName::new("public", "a_b"), "public");
        let c = stems.stem_for(&RelationName::new("public", "A_B"), "public");
        let again = stems.stem_for(&RelationName::new("public", "a b"), "public");
        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("a_b", "a_b-2", "A_B-3"));
        assert_eq!(again, "a_b");
        assert_eq!(sanitize_stem("../etc/passwd"), "_etc_passwd");
        assert_eq!(
            stems.stem_for(&RelationName::new("audit", "log"), "public"),
            "audit.log"
        );
    }
}
