//! schemadump - deterministic database schema snapshots
//!
//! Introspects a live database catalog, renders every object as SQL in a
//! stable dependency-respecting order, writes the result as one document or a
//! directory of files, and records each run as an immutable snapshot with
//! bounded history.
//!
//! The pipeline is driven by [`Dumper`]:
//! - [`catalog`]: per-dialect catalog adapters (PostgreSQL, SQLite, fixtures)
//! - [`introspection`]: normalization, dependencies and canonical order
//! - [`generator`]: one SQL fragment per object
//! - [`format`]: document, multi-file layout, manifest and archive
//! - [`snapshot`]: snapshot records and their stores

pub mod artifact;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod dumper;
pub mod error;
pub mod format;
pub mod generator;
pub mod ident;
pub mod introspection;
pub mod snapshot;

pub use catalog::{CatalogAdapter, Dialect, FixtureAdapter, ObjectKind, PostgresAdapter, SqliteAdapter};
pub use config::{ObjectToggles, OutputMode, RunConfig, Settings};
pub use dumper::{DumpOutcome, DumpStage, Dumper};
pub use error::{DumpError, DumpResult, RunFailure};
pub use snapshot::{
    FileSnapshotStore, MemorySnapshotStore, PostgresSnapshotStore, Snapshot, SnapshotStore,
    SnapshotSummary,
};
