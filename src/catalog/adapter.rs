//! Catalog adapter trait definition

use crate::catalog::{Capabilities, Dialect, ObjectKind, RawRow};
use crate::error::{DumpError, DumpResult};
use async_trait::async_trait;

/// Per-dialect access to the database catalog
///
/// Implementations must be Send + Sync so the introspector can issue
/// independent kind queries concurrently.
#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    /// Dialect identifier for logging and configuration checks
    fn dialect(&self) -> Dialect;

    /// Kinds this adapter can enumerate
    fn capabilities(&self) -> Capabilities;

    /// List the raw catalog rows for one kind inside `namespace`
    ///
    /// Kinds outside [`capabilities`](Self::capabilities) fail with
    /// [`DumpError::DialectUnsupported`] instead of returning an empty list.
    async fn list_objects(&self, kind: ObjectKind, namespace: &str) -> DumpResult<Vec<RawRow>>;

    /// Server version string recorded on every snapshot
    async fn server_version(&self) -> DumpResult<String>;

    /// Shared guard for `list_objects` implementations
    fn ensure_supported(&self, kind: ObjectKind) -> DumpResult<()> {
        if self.capabilities().supports(kind) {
            Ok(())
        } else {
            Err(DumpError::DialectUnsupported {
                dialect: self.dialect(),
                kind,
            })
        }
    }
}
