//! SQLite catalog adapter
//!
//! Reads `sqlite_master` and the table-valued pragma functions. Tables and
//! indexes keep the statement SQLite stored for them, since constraints,
//! column options and table options only survive there. Columns are still
//! listed so the model can be inspected.

use crate::catalog::{CatalogAdapter, Capabilities, Dialect, ObjectKind, RawRow};
use crate::error::{DumpError, DumpResult};
use crate::ident::quote_ident;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::debug;

/// Captures the optional column list and the body of a stored view statement
static VIEW_BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)^\s*CREATE\s+(?:TEMP\s+|TEMPORARY\s+)?VIEW\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:"(?:[^"]|"")*"|`[^`]*`|\[[^\]]*\]|[^\s("`\[])+\s*(?:\(([^)]*)\))?\s*AS\s+(.*)$"#,
    )
    .unwrap()
});

/// Catalog adapter for SQLite databases
pub struct SqliteAdapter {
    conn: Mutex<Connection>,
}

impl SqliteAdapter {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn master_query(namespace: &str, object_type: &str) -> String {
        format!(
            "SELECT name, tbl_name, sql FROM {}.sqlite_master \
             WHERE type = '{}' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            quote_ident(namespace),
            object_type
        )
    }

    fn list_master(
        conn: &Connection,
        namespace: &str,
        object_type: &str,
    ) -> rusqlite::Result<Vec<(String, String, Option<String>)>> {
        let mut stmt = conn.prepare(&Self::master_query(namespace, object_type))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        rows.collect()
    }

    fn list_tables(conn: &Connection, namespace: &str) -> rusqlite::Result<Vec<RawRow>> {
        let mut tables = Vec::new();

        for (name, _, sql) in Self::list_master(conn, namespace, "table")? {
            let mut columns = Vec::new();

            // hidden: 2 and 3 mark generated columns, 1 the hidden columns of virtual tables
            let mut stmt = conn.prepare(
                "SELECT name, type, \"notnull\", dflt_value, pk, hidden \
                 FROM pragma_table_xinfo(?1, ?2) WHERE hidden IN (0, 2, 3) ORDER BY cid",
            )?;
            let mut rows = stmt.query(params![name, namespace])?;
            while let Some(row) = rows.next()? {
                let column: String = row.get(0)?;
                let data_type: String = row.get(1)?;
                let not_null: bool = row.get(2)?;
                let default: Option<String> = row.get(3)?;
                let pk: i64 = row.get(4)?;
                let generated = match row.get::<_, i64>(5)? {
                    2 => Some("virtual"),
                    3 => Some("stored"),
                    _ => None,
                };
                columns.push(json!({
                    "name": column,
                    "data_type": if data_type.is_empty() { "blob".to_string() } else { data_type.to_lowercase() },
                    // SQLite reports notnull = 0 for primary key columns
                    "nullable": !not_null && pk == 0,
                    "default": default,
                    "generated": generated,
                }));
            }

            let row = json!({
                "schema": namespace,
                "name": name,
                "columns": columns,
                "raw": sql,
            });
            if let Some(raw) = RawRow::from_value(row) {
                tables.push(raw);
            }
        }

        Ok(tables)
    }

    fn list_indexes(conn: &Connection, namespace: &str) -> rusqlite::Result<Vec<RawRow>> {
        let mut indexes = Vec::new();

        for (name, table, sql) in Self::list_master(conn, namespace, "index")? {
            // Indexes without SQL back UNIQUE/PRIMARY KEY constraints
            let Some(sql) = sql else { continue };

            let mut stmt = conn.prepare(
                "SELECT \"unique\" FROM pragma_index_list(?1, ?2) WHERE name = ?3",
            )?;
            let unique: bool = stmt.query_row(params![table, namespace, name], |row| row.get(0))?;

            let row = json!({
                "schema": namespace,
                "name": name,
                "table": table,
                "unique": unique,
                "raw": sql,
            });
            if let Some(raw) = RawRow::from_value(row) {
                indexes.push(raw);
            }
        }

        Ok(indexes)
    }

    fn list_views(conn: &Connection, namespace: &str) -> DumpResult<Vec<RawRow>> {
        let views = Self::list_master(conn, namespace, "view")
            .map_err(|e| DumpError::introspection(ObjectKind::View, e.to_string()))?;
        let relations: Vec<String> = Self::list_master(conn, namespace, "table")
            .map_err(|e| DumpError::introspection(ObjectKind::View, e.to_string()))?
            .into_iter()
            .map(|(name, _, _)| name)
            .chain(views.iter().map(|(name, _, _)| name.clone()))
            .collect();

        let mut rows = Vec::new();
        for (name, _, sql) in views {
            let sql = sql.unwrap_or_default();
            let captures = VIEW_BODY.captures(&sql).ok_or_else(|| {
                DumpError::introspection(ObjectKind::View, format!("cannot parse view {}", name))
            })?;
            let columns: Vec<String> = captures
                .get(1)
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(unquote)
                        .filter(|c| !c.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            let body = captures.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();

            let references: Vec<serde_json::Value> = relations
                .iter()
                .filter(|other| **other != name && mentions(&body, other))
                .map(|other| json!({ "schema": namespace, "name": other }))
                .collect();

            let row = json!({
                "schema": namespace,
                "name": name,
                "columns": columns,
                "body": body,
                "references": references,
            });
            if let Some(raw) = RawRow::from_value(row) {
                rows.push(raw);
            }
        }
        Ok(rows)
    }

    fn list_triggers(conn: &Connection, namespace: &str) -> rusqlite::Result<Vec<RawRow>> {
        Ok(Self::list_master(conn, namespace, "trigger")?
            .into_iter()
            .filter_map(|(name, table, sql)| {
                RawRow::from_value(json!({
                    "schema": namespace,
                    "name": name,
                    "table": table,
                    "definition": sql,
                }))
            })
            .collect())
    }
}

/// Strip SQLite identifier quoting: "x", `x` or [x]
fn unquote(ident: &str) -> String {
    let ident = ident.trim();
    let inner = |open: char, close: char| {
        ident
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
    };
    if let Some(inner) = inner('"', '"') {
        inner.replace("\"\"", "\"")
    } else if let Some(inner) = inner('`', '`').or_else(|| inner('[', ']')) {
        inner.to_string()
    } else {
        ident.to_string()
    }
}

/// Whether `body` mentions `relation` as a whole word, quoted or not
fn mentions(body: &str, relation: &str) -> bool {
    let pattern = format!(r#"(?i)(^|[^A-Za-z0-9_$]){}($|[^A-Za-z0-9_$])"#, regex::escape(relation));
    Regex::new(&pattern).map(|re| re.is_match(body)).unwrap_or(false)
}

#[async_trait]
impl CatalogAdapter for SqliteAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn capabilities(&self) -> Capabilities {
        Dialect::Sqlite.capabilities()
    }

    async fn list_objects(&self, kind: ObjectKind, namespace: &str) -> DumpResult<Vec<RawRow>> {
        self.ensure_supported(kind)?;

        let conn = self.conn.lock().await;
        let rows = match kind {
            ObjectKind::Table => Self::list_tables(&conn, namespace),
            ObjectKind::Index => Self::list_indexes(&conn, namespace),
            ObjectKind::Trigger => Self::list_triggers(&conn, namespace),
            ObjectKind::View => return Self::list_views(&conn, namespace),
            other => {
                return Err(DumpError::DialectUnsupported {
                    dialect: Dialect::Sqlite,
                    kind: other,
                })
            }
        }
        .map_err(|e| DumpError::introspection(kind, format!("Catalog query failed: {}", e)))?;

        debug!("Listed {} {} rows in {}", rows.len(), kind, namespace);
        Ok(rows)
    }

    async fn server_version(&self) -> DumpResult<String> {
        let conn = self.conn.lock().await;
        let version: String = conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))
            .map_err(|e| DumpError::CatalogUnavailable(e.to_string()))?;
        Ok(format!("SQLite {}", version))
    }
}
