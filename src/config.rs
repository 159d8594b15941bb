//! Configuration module
//!
//! `RunConfig` is the immutable per-run value handed to the dumper.
//! `Settings` is the process-level configuration the CLI loads from an
//! optional TOML file, `.env` and `SCHEMADUMP__*` environment variables.

use crate::catalog::{Capabilities, Dialect, ObjectKind};
use crate::error::{DumpError, DumpResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use validator::Validate;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required setting: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// How the formatted dump is packaged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    #[default]
    SingleFile,
    MultiFile,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::SingleFile => "single_file",
            OutputMode::MultiFile => "multi_file",
        }
    }
}

/// Per-kind inclusion toggles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectToggles {
    pub extensions: bool,
    pub types: bool,
    pub sequences: bool,
    pub tables: bool,
    pub indexes: bool,
    pub foreign_keys: bool,
    pub views: bool,
    pub functions: bool,
    pub triggers: bool,
}

impl Default for ObjectToggles {
    fn default() -> Self {
        Self {
            extensions: true,
            types: true,
            sequences: true,
            tables: true,
            indexes: true,
            foreign_keys: true,
            views: true,
            functions: true,
            triggers: true,
        }
    }
}

impl ObjectToggles {
    /// Toggles with only the given kinds switched on
    pub fn only(kinds: &[ObjectKind]) -> Self {
        let mut toggles = Self {
            extensions: false,
            types: false,
            sequences: false,
            tables: false,
            indexes: false,
            foreign_keys: false,
            views: false,
            functions: false,
            triggers: false,
        };
        for kind in kinds {
            toggles.set(*kind, true);
        }
        toggles
    }

    pub fn enabled(&self, kind: ObjectKind) -> bool {
        match kind {
            ObjectKind::Extension => self.extensions,
            ObjectKind::Type => self.types,
            ObjectKind::Sequence => self.sequences,
            ObjectKind::Table => self.tables,
            ObjectKind::Index => self.indexes,
            ObjectKind::ForeignKey => self.foreign_keys,
            ObjectKind::View => self.views,
            ObjectKind::Function => self.functions,
            ObjectKind::Trigger => self.triggers,
        }
    }

    pub fn set(&mut self, kind: ObjectKind, on: bool) {
        match kind {
            ObjectKind::Extension => self.extensions = on,
            ObjectKind::Type => self.types = on,
            ObjectKind::Sequence => self.sequences = on,
            ObjectKind::Table => self.tables = on,
            ObjectKind::Index => self.indexes = on,
            ObjectKind::ForeignKey => self.foreign_keys = on,
            ObjectKind::View => self.views = on,
            ObjectKind::Function => self.functions = on,
            ObjectKind::Trigger => self.triggers = on,
        }
    }
}

/// Immutable settings for one dump run
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RunConfig {
    /// SQL file in single-file mode, directory in multi-file mode
    pub output_path: PathBuf,
    /// Where to also write the archive in multi-file mode
    pub archive_path: Option<PathBuf>,
    /// Expected dialect; checked against the adapter when set
    pub dialect: Option<Dialect>,
    #[validate(length(min = 1, message = "namespace must not be empty"))]
    pub namespace: Option<String>,
    pub toggles: ObjectToggles,
    #[validate(range(min = 1, message = "retention must be a positive integer"))]
    pub retention: usize,
    pub output_mode: OutputMode,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("db/structure.sql"),
            archive_path: None,
            dialect: None,
            namespace: None,
            toggles: ObjectToggles::default(),
            retention: 10,
            output_mode: OutputMode::SingleFile,
        }
    }
}

impl RunConfig {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            ..Self::default()
        }
    }

    /// Search namespace, falling back to the dialect default
    pub fn namespace_for(&self, dialect: Dialect) -> String {
        self.namespace
            .clone()
            .unwrap_or_else(|| dialect.default_namespace().to_string())
    }

    /// Kinds that are both enabled and supported, in precedence order
    pub fn enabled_kinds(&self, capabilities: &Capabilities) -> Vec<ObjectKind> {
        ObjectKind::ALL
            .into_iter()
            .filter(|kind| self.toggles.enabled(*kind) && capabilities.supports(*kind))
            .collect()
    }

    /// Reject invalid toggle/dialect combinations before anything is queried
    pub fn validate_for(&self, dialect: Dialect, capabilities: &Capabilities) -> DumpResult<()> {
        self.validate()
            .map_err(|e| DumpError::Config(e.to_string().replace('\n', "; ")))?;

        if self.output_path.as_os_str().is_empty() {
            return Err(DumpError::Config("output_path must not be empty".to_string()));
        }

        if let Some(expected) = self.dialect {
            if expected != dialect {
                return Err(DumpError::Config(format!(
                    "configured dialect {} does not match connected {} database",
                    expected, dialect
                )));
            }
        }

        let toggles = &self.toggles;
        if !toggles.tables {
            for dependent in [ObjectKind::Index, ObjectKind::ForeignKey, ObjectKind::Trigger] {
                if toggles.enabled(dependent) && capabilities.supports(dependent) {
                    return Err(DumpError::Config(format!(
                        "{} output requires tables to be enabled",
                        dependent
                    )));
                }
            }
        }

        if toggles.triggers
            && !toggles.functions
            && capabilities.supports_triggers()
            && capabilities.supports_functions()
        {
            return Err(DumpError::Config(format!(
                "triggers require functions to be enabled on {}",
                dialect
            )));
        }

        match self.output_mode {
            OutputMode::SingleFile if self.archive_path.is_some() => Err(DumpError::Config(
                "archive_path is only used in multi_file mode".to_string(),
            )),
            OutputMode::MultiFile if self.output_path.is_file() => Err(DumpError::Config(format!(
                "output_path {} must be a directory in multi_file mode",
                self.output_path.display()
            ))),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// PROCESS SETTINGS
// =============================================================================

/// Snapshot store backends selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Directory for the file backend
    pub path: PathBuf,
    /// Table for the postgres backend
    pub table: String,
    /// Connection string for the postgres backend; defaults to the target
    pub url: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: PathBuf::from(".schemadump/snapshots"),
            table: "schema_snapshots".to_string(),
            url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawSettings {
    database_url: Option<String>,
    max_pool_size: Option<usize>,
    #[serde(default)]
    store: StoreSettings,
    #[serde(default)]
    run: RunConfig,
}

/// Complete process settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub max_pool_size: usize,
    pub store: StoreSettings,
    pub run: RunConfig,
}

impl Settings {
    /// Load settings from an optional file plus the environment
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        builder = match file {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("schemadump").required(false)),
        };
        builder = builder.add_source(
            config::Environment::with_prefix("SCHEMADUMP")
                .separator("__")
                .try_parsing(true),
        );

        let raw: RawSettings = builder.build()?.try_deserialize()?;
        Self::from_raw(raw, std::env::var("DATABASE_URL").ok())
    }

    fn from_raw(raw: RawSettings, env_url: Option<String>) -> Result<Self, ConfigError> {
        let database_url = raw
            .database_url
            .or(env_url)
            .ok_or_else(|| ConfigError::MissingVar("database_url (or DATABASE_URL)".to_string()))?;

        if Dialect::from_url(&database_url).is_none() {
            return Err(ConfigError::InvalidValue(
                "database_url must start with postgres:// or sqlite://".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            max_pool_size: raw.max_pool_size.unwrap_or(4),
            store: raw.store,
            run: raw.run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(url: Option<&str>) -> RawSettings {
        RawSettings {
            database_url: url.map(str::to_string),
            max_pool_size: None,
            store: StoreSettings::default(),
            run: RunConfig::default(),
        }
    }

    #[test]
    fn test_default_run_config() {
        let config = RunConfig::default();
        assert_eq!(config.retention, 10);
        assert_eq!(config.output_mode, OutputMode::SingleFile);
        assert_eq!(config.namespace_for(Dialect::Postgres), "public");
        assert_eq!(config.namespace_for(Dialect::Sqlite), "main");
    }

    #[test]
    fn test_enabled_kinds_intersect_capabilities() {
        let config = RunConfig::default();
        let kinds = config.enabled_kinds(&Dialect::Sqlite.capabilities());
        assert_eq!(
            kinds,
            vec![ObjectKind::Table, ObjectKind::Index, ObjectKind::View, ObjectKind::Trigger]
        );
    }

    #[test]
    fn test_zero_retention_rejected() {
        let mut config = RunConfig::default();
        config.retention = 0;
        let err = config
            .validate_for(Dialect::Postgres, &Capabilities::all())
            .unwrap_err();
        assert!(matches!(err, DumpError::Config(_)));
    }

    #[test]
    fn test_dialect_mismatch_rejected() {
        let mut config = RunConfig::default();
        config.dialect = Some(Dialect::Sqlite);
        assert!(config
            .validate_for(Dialect::Postgres, &Capabilities::all())
            .is_err());
    }

    #[test]
    fn test_triggers_without_functions() {
        let mut config = RunConfig::default();
        config.toggles.functions = false;

        // Postgres triggers call functions
        assert!(config
            .validate_for(Dialect::Postgres, &Dialect::Postgres.capabilities())
            .is_err());
        // SQLite triggers carry their own bodies
        assert!(config
            .validate_for(Dialect::Sqlite, &Dialect::Sqlite.capabilities())
            .is_ok());
    }

    #[test]
    fn test_indexes_require_tables() {
        let mut config = RunConfig::default();
        config.toggles = ObjectToggles::only(&[ObjectKind::Index]);
        assert!(config
            .validate_for(Dialect::Postgres, &Capabilities::all())
            .is_err());
    }

    #[test]
    fn test_settings_fall_back_to_database_url_env() {
        let settings = Settings::from_raw(raw(None), Some("postgres://u:p@h/db".to_string())).unwrap();
        assert_eq!(settings.database_url, "postgres://u:p@h/db");
        assert_eq!(settings.max_pool_size, 4);
        assert_eq!(settings.store.backend, StoreBackend::File);
    }

    #[test]
    fn test_settings_require_known_scheme() {
        assert!(matches!(
            Settings::from_raw(raw(None), None),
            Err(ConfigError::MissingVar(_))
        ));
        assert!(matches!(
            Settings::from_raw(raw(Some("mysql://h/db")), None),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
