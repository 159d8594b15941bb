//! Fixture catalog adapter
//!
//! Serves catalog rows from memory. Used by tests and by embedders that
//! already hold a catalog description (for example one exported as JSON).

use crate::catalog::{CatalogAdapter, Capabilities, Dialect, ObjectKind, RawRow};
use crate::error::{DumpError, DumpResult};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};

/// In-memory catalog adapter
#[derive(Debug, Clone)]
pub struct FixtureAdapter {
    dialect: Dialect,
    capabilities: Capabilities,
    version: String,
    rows: HashMap<ObjectKind, Vec<RawRow>>,
    failing: BTreeSet<ObjectKind>,
}

impl FixtureAdapter {
    /// Empty catalog with the dialect's native capabilities
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            capabilities: dialect.capabilities(),
            version: format!("{} fixture", dialect),
            rows: HashMap::new(),
            failing: BTreeSet::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Make every query for `kind` fail as if the catalog were unreachable
    pub fn failing(mut self, kind: ObjectKind) -> Self {
        self.failing.insert(kind);
        self
    }

    pub fn push(&mut self, kind: ObjectKind, row: RawRow) {
        self.rows.entry(kind).or_default().push(row);
    }

    pub fn with_row(mut self, kind: ObjectKind, row: RawRow) -> Self {
        self.push(kind, row);
        self
    }

    /// Mutable access to the rows of one kind
    pub fn rows_mut(&mut self, kind: ObjectKind) -> &mut Vec<RawRow> {
        self.rows.entry(kind).or_default()
    }

    /// Reverse every row list, simulating a different native enumeration order
    pub fn reversed(mut self) -> Self {
        for rows in self.rows.values_mut() {
            rows.reverse();
        }
        self
    }
}

#[async_trait]
impl CatalogAdapter for FixtureAdapter {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    async fn list_objects(&self, kind: ObjectKind, namespace: &str) -> DumpResult<Vec<RawRow>> {
        self.ensure_supported(kind)?;

        if self.failing.contains(&kind) {
            return Err(DumpError::introspection(kind, "fixture catalog unreachable"));
        }

        let rows = self
            .rows
            .get(&kind)
            .map(|rows| {
                rows.iter()
                    .filter(|row| match row.opt_str("schema") {
                        Ok(Some(schema)) => schema == namespace,
                        _ => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(rows)
    }

    async fn server_version(&self) -> DumpResult<String> {
        Ok(self.version.clone())
    }
}
