//! PostgreSQL catalog adapter
//!
//! Every query returns one `json_build_object` per catalog object so the
//! introspector sees the same row shape for every dialect.

use crate::catalog::{CatalogAdapter, Capabilities, Dialect, ObjectKind, RawRow};
use crate::error::{DumpError, DumpResult};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tracing::debug;

const EXTENSIONS_QUERY: &str = r#"
    SELECT json_build_object(
        'schema', n.nspname,
        'name', e.extname
    )
    FROM pg_extension e
    JOIN pg_namespace n ON n.oid = e.extnamespace
    WHERE n.nspname = $1
      AND e.extname <> 'plpgsql'
"#;

const TYPES_QUERY: &str = r#"
    SELECT json_build_object(
        'schema', n.nspname,
        'name', t.typname,
        'type_kind', CASE t.typtype WHEN 'e' THEN 'enum' WHEN 'd' THEN 'domain' ELSE 'composite' END,
        'labels', (
            SELECT json_agg(e.enumlabel ORDER BY e.enumsortorder)
            FROM pg_enum e
            WHERE e.enumtypid = t.oid
        ),
        'base_type', CASE WHEN t.typtype = 'd' THEN format_type(t.typbasetype, t.typtypmod) END,
        'not_null', t.typnotnull,
        'default', t.typdefault,
        'checks', (
            SELECT json_agg(pg_get_constraintdef(con.oid, true) ORDER BY con.conname)
            FROM pg_constraint con
            WHERE con.contypid = t.oid
        ),
        'attributes', (
            SELECT json_agg(json_build_object(
                'name', a.attname,
                'data_type', format_type(a.atttypid, a.atttypmod)
            ) ORDER BY a.attnum)
            FROM pg_attribute a
            WHERE a.attrelid = t.typrelid AND a.attnum > 0 AND NOT a.attisdropped
        )
    )
    FROM pg_type t
    JOIN pg_namespace n ON n.oid = t.typnamespace
    LEFT JOIN pg_class rel ON rel.oid = t.typrelid
    WHERE n.nspname = $1
      AND (t.typtype IN ('e', 'd') OR (t.typtype = 'c' AND rel.relkind = 'c'))
      AND NOT EXISTS (
          SELECT 1 FROM pg_depend d WHERE d.objid = t.oid AND d.deptype = 'e'
      )
"#;

const SEQUENCES_QUERY: &str = r#"
    SELECT json_build_object(
        'schema', s.schemaname,
        'name', s.sequencename,
        'data_type', s.data_type::text,
        'start', s.start_value,
        'increment', s.increment_by,
        'min_value', s.min_value,
        'max_value', s.max_value,
        'cache', s.cache_size,
        'cycle', s.cycle,
        'owned_by_schema', own.nspname,
        'owned_by_table', own.relname,
        'owned_by_column', own.attname
    )
    FROM pg_sequences s
    JOIN pg_namespace sn ON sn.nspname = s.schemaname
    JOIN pg_class sc ON sc.relnamespace = sn.oid AND sc.relname = s.sequencename
    LEFT JOIN LATERAL (
        SELECT tn.nspname, tc.relname, a.attname
        FROM pg_depend d
        JOIN pg_class tc ON tc.oid = d.refobjid
        JOIN pg_namespace tn ON tn.oid = tc.relnamespace
        JOIN pg_attribute a ON a.attrelid = tc.oid AND a.attnum = d.refobjsubid
        WHERE d.objid = sc.oid
          AND d.classid = 'pg_class'::regclass
          AND d.refclassid = 'pg_class'::regclass
          AND d.deptype = 'a'
        LIMIT 1
    ) own ON true
    WHERE s.schemaname = $1
      AND NOT EXISTS (
          SELECT 1 FROM pg_depend d
          WHERE d.objid = sc.oid AND d.deptype IN ('i', 'e')
      )
"#;

const TABLES_QUERY: &str = r#"
    SELECT json_build_object(
        'schema', n.nspname,
        'name', c.relname,
        'columns', (
            SELECT json_agg(json_build_object(
                'name', a.attname,
                'data_type', format_type(a.atttypid, a.atttypmod),
                'nullable', NOT a.attnotnull,
                'default', pg_get_expr(ad.adbin, ad.adrelid),
                'identity', NULLIF(a.attidentity::text, ''),
                'generated', NULLIF(a.attgenerated::text, '')
            ) ORDER BY a.attnum)
            FROM pg_attribute a
            LEFT JOIN pg_attrdef ad ON ad.adrelid = a.attrelid AND ad.adnum = a.attnum
            WHERE a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
        ),
        'constraints', (
            SELECT json_agg(json_build_object(
                'name', con.conname,
                'kind', con.contype::text,
                'definition', pg_get_constraintdef(con.oid, true)
            ) ORDER BY con.conname)
            FROM pg_constraint con
            WHERE con.conrelid = c.oid
              AND con.contype IN ('p', 'u', 'c', 'x')
              AND con.conislocal
              AND con.conparentid = 0
        ),
        'partition_key', CASE WHEN c.relkind = 'p' THEN pg_get_partkeydef(c.oid) END,
        'partition_of_schema', parent.nspname,
        'partition_of', parent.relname,
        'partition_bound', CASE WHEN c.relispartition THEN pg_get_expr(c.relpartbound, c.oid) END
    )
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    LEFT JOIN LATERAL (
        SELECT pn.nspname, pc.relname
        FROM pg_inherits inh
        JOIN pg_class pc ON pc.oid = inh.inhparent
        JOIN pg_namespace pn ON pn.oid = pc.relnamespace
        WHERE inh.inhrelid = c.oid AND c.relispartition
    ) parent ON true
    WHERE n.nspname = $1
      AND c.relkind IN ('r', 'p')
      AND NOT EXISTS (
          SELECT 1 FROM pg_depend d WHERE d.objid = c.oid AND d.deptype = 'e'
      )
"#;

const INDEXES_QUERY: &str = r#"
    SELECT json_build_object(
        'schema', n.nspname,
        'name', i.relname,
        'table', t.relname,
        'unique', ix.indisunique,
        'method', am.amname,
        'columns', (
            SELECT json_agg(json_build_object(
                'column', CASE WHEN k.attnum <> 0 THEN a.attname END,
                'expression', CASE WHEN k.attnum = 0
                    THEN pg_get_indexdef(ix.indexrelid, k.ord::int, true) END,
                'collation', CASE WHEN coll.oid IS NOT NULL
                        AND coll.collname <> 'default'
                        AND coll.oid IS DISTINCT FROM a.attcollation
                    THEN quote_ident(coll.collname) END,
                'opclass', CASE WHEN NOT opc.opcdefault THEN quote_ident(opc.opcname) END,
                'descending', (ix.indoption[k.ord - 1] & 1) = 1,
                'nulls_first', (ix.indoption[k.ord - 1] & 2) = 2
            ) ORDER BY k.ord)
            FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
            LEFT JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
            LEFT JOIN pg_collation coll ON coll.oid = ix.indcollation[k.ord - 1]
            LEFT JOIN pg_opclass opc ON opc.oid = ix.indclass[k.ord - 1]
            WHERE k.ord <= ix.indnkeyatts
        ),
        'include', (
            SELECT json_agg(a.attname ORDER BY k.ord)
            FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
            WHERE k.ord > ix.indnkeyatts
        ),
        'predicate', pg_get_expr(ix.indpred, ix.indrelid, true)
    )
    FROM pg_index ix
    JOIN pg_class i ON i.oid = ix.indexrelid
    JOIN pg_class t ON t.oid = ix.indrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_am am ON am.oid = i.relam
    WHERE n.nspname = $1
      AND t.relkind IN ('r', 'p')
      AND NOT ix.indisprimary
      AND NOT i.relispartition
      AND NOT EXISTS (
          SELECT 1 FROM pg_constraint con
          WHERE con.conindid = ix.indexrelid
            AND con.conrelid = ix.indrelid
            AND con.contype IN ('p', 'u', 'x')
      )
"#;

const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT json_build_object(
        'schema', n.nspname,
        'name', con.conname,
        'table', t.relname,
        'columns', (
            SELECT json_agg(a.attname ORDER BY k.ord)
            FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
        ),
        'referenced_schema', rn.nspname,
        'referenced_table', r.relname,
        'referenced_columns', (
            SELECT json_agg(a.attname ORDER BY k.ord)
            FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
        ),
        'on_update', con.confupdtype::text,
        'on_delete', con.confdeltype::text,
        'deferrable', con.condeferrable,
        'initially_deferred', con.condeferred
    )
    FROM pg_constraint con
    JOIN pg_class t ON t.oid = con.conrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_class r ON r.oid = con.confrelid
    JOIN pg_namespace rn ON rn.oid = r.relnamespace
    WHERE con.contype = 'f'
      AND con.conparentid = 0
      AND n.nspname = $1
"#;

const VIEWS_QUERY: &str = r#"
    SELECT json_build_object(
        'schema', n.nspname,
        'name', c.relname,
        'materialized', c.relkind = 'm',
        'body', pg_get_viewdef(c.oid, true),
        'references', (
            SELECT json_agg(DISTINCT jsonb_build_object('schema', dn.nspname, 'name', dc.relname))
            FROM pg_rewrite rw
            JOIN pg_depend d ON d.objid = rw.oid
                AND d.classid = 'pg_rewrite'::regclass
                AND d.refclassid = 'pg_class'::regclass
            JOIN pg_class dc ON dc.oid = d.refobjid
            JOIN pg_namespace dn ON dn.oid = dc.relnamespace
            WHERE rw.ev_class = c.oid AND dc.oid <> c.oid
        )
    )
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1
      AND c.relkind IN ('v', 'm')
      AND NOT EXISTS (
          SELECT 1 FROM pg_depend d WHERE d.objid = c.oid AND d.deptype = 'e'
      )
"#;

const FUNCTIONS_QUERY: &str = r#"
    SELECT json_build_object(
        'schema', n.nspname,
        'name', p.proname || '(' || pg_get_function_identity_arguments(p.oid) || ')',
        'definition', pg_get_functiondef(p.oid)
    )
    FROM pg_proc p
    JOIN pg_namespace n ON n.oid = p.pronamespace
    WHERE n.nspname = $1
      AND p.prokind IN ('f', 'p')
      AND NOT EXISTS (
          SELECT 1 FROM pg_depend d WHERE d.objid = p.oid AND d.deptype = 'e'
      )
"#;

const TRIGGERS_QUERY: &str = r#"
    SELECT json_build_object(
        'schema', n.nspname,
        'name', tg.tgname,
        'table', c.relname,
        'definition', pg_get_triggerdef(tg.oid, true),
        'function_schema', pn.nspname,
        'function_name', p.proname || '(' || pg_get_function_identity_arguments(p.oid) || ')'
    )
    FROM pg_trigger tg
    JOIN pg_class c ON c.oid = tg.tgrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_proc p ON p.oid = tg.tgfoid
    JOIN pg_namespace pn ON pn.oid = p.pronamespace
    WHERE n.nspname = $1
      AND NOT tg.tgisinternal
      AND tg.tgparentid = 0
"#;

/// Catalog adapter for PostgreSQL
pub struct PostgresAdapter {
    pool: Pool,
}

impl PostgresAdapter {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn query_for(kind: ObjectKind) -> &'static str {
        match kind {
            ObjectKind::Extension => EXTENSIONS_QUERY,
            ObjectKind::Type => TYPES_QUERY,
            ObjectKind::Sequence => SEQUENCES_QUERY,
            ObjectKind::Table => TABLES_QUERY,
            ObjectKind::Index => INDEXES_QUERY,
            ObjectKind::ForeignKey => FOREIGN_KEYS_QUERY,
            ObjectKind::View => VIEWS_QUERY,
            ObjectKind::Function => FUNCTIONS_QUERY,
            ObjectKind::Trigger => TRIGGERS_QUERY,
        }
    }
}

#[async_trait]
impl CatalogAdapter for PostgresAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn capabilities(&self) -> Capabilities {
        Dialect::Postgres.capabilities()
    }

    async fn list_objects(&self, kind: ObjectKind, namespace: &str) -> DumpResult<Vec<RawRow>> {
        self.ensure_supported(kind)?;

        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DumpError::introspection(kind, format!("Database pool error: {}", e)))?;

        let rows = client
            .query(Self::query_for(kind), &[&namespace])
            .await
            .map_err(|e| DumpError::introspection(kind, format!("Catalog query failed: {}", e)))?;

        let objects = rows
            .iter()
            .map(|row| {
                let value: serde_json::Value = row
                    .try_get(0)
                    .map_err(|e| DumpError::introspection(kind, e.to_string()))?;
                RawRow::try_from(value).map_err(|e| DumpError::introspection(kind, e))
            })
            .collect::<DumpResult<Vec<_>>>()?;

        debug!("Listed {} {} rows in {}", objects.len(), kind, namespace);
        Ok(objects)
    }

    async fn server_version(&self) -> DumpResult<String> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DumpError::CatalogUnavailable(e.to_string()))?;
        let row = client
            .query_one("SELECT current_setting('server_version')", &[])
            .await
            .map_err(|e| DumpError::CatalogUnavailable(e.to_string()))?;
        let version: String = row.get(0);
        Ok(format!("PostgreSQL {}", version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_namespace_scoped_query() {
        for kind in ObjectKind::ALL {
            let sql = PostgresAdapter::query_for(kind);
            assert!(sql.contains("$1"), "{} query is not namespace scoped", kind);
            assert!(sql.contains("json_build_object"));
        }
    }

    #[test]
    fn test_partition_children_do_not_repeat_parent_objects() {
        let tables = PostgresAdapter::query_for(ObjectKind::Table);
        assert!(tables.contains("pg_get_partkeydef"));
        assert!(tables.contains("con.conislocal"));
        assert!(PostgresAdapter::query_for(ObjectKind::Index).contains("NOT i.relispartition"));
        assert!(PostgresAdapter::query_for(ObjectKind::Trigger).contains("tg.tgparentid = 0"));
    }

    #[test]
    fn test_index_query_reports_key_options() {
        let indexes = PostgresAdapter::query_for(ObjectKind::Index);
        for field in ["'collation'", "'opclass'", "'descending'", "'nulls_first'", "'include'"] {
            assert!(indexes.contains(field), "index query lacks {}", field);
        }
        assert!(PostgresAdapter::query_for(ObjectKind::Table).contains("attgenerated"));
    }
}
