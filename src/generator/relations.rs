//! Tables, indexes and foreign keys

use super::{terminate, RenderContext};
use crate::catalog::{
    CatalogObject, ColumnDef, ForeignKeyDef, IdentityKind, IndexColumn, IndexDef, IndexKey,
    ObjectKind, PartitionOf, ReferentialAction, TableDef,
};
use crate::error::{DumpError, DumpResult};
use crate::ident::{qualify, quote_ident, quote_list};

pub(super) fn table_sql(
    object: &CatalogObject,
    def: &TableDef,
    ctx: &RenderContext,
) -> DumpResult<String> {
    let fail = |message: &str| DumpError::generation(ObjectKind::Table, &object.qualified, message);
    if def.columns.is_empty() {
        return Err(fail("table has no columns"));
    }

    let table = qualify(&object.relation(), &ctx.namespace);
    let mut sql = match (&def.raw, &def.partition_of) {
        (Some(raw), _) => {
            if raw.trim().is_empty() {
                return Err(fail("table definition is empty"));
            }
            terminate(raw)
        }
        (None, Some(partition)) => partition_sql(&table, def, partition, ctx),
        (None, None) => {
            let mut lines = Vec::with_capacity(def.columns.len() + def.constraints.len());
            for column in &def.columns {
                lines.push(column_sql(column).map_err(|m| fail(&m))?);
            }
            lines.extend(constraint_lines(def));

            let mut sql = format!("CREATE TABLE {} (\n{}\n)", table, lines.join(",\n"));
            if let Some(key) = &def.partition_key {
                sql.push_str(&format!(" PARTITION BY {}", key));
            }
            sql.push(';');
            sql
        }
    };

    if ctx.toggles.sequences {
        for owned in &def.owned_sequences {
            sql.push_str(&format!(
                "\n\nALTER SEQUENCE {} OWNED BY {}.{};",
                qualify(&owned.sequence, &ctx.namespace),
                table,
                quote_ident(&owned.column)
            ));
        }
    }

    Ok(sql)
}

fn constraint_lines(def: &TableDef) -> Vec<String> {
    def.constraints
        .iter()
        .map(|constraint| match &constraint.name {
            Some(name) => format!(
                "    CONSTRAINT {} {}",
                quote_ident(name),
                constraint.definition
            ),
            None => format!("    {}", constraint.definition),
        })
        .collect()
}

/// Partitions take their columns from the parent; only local constraints are listed
fn partition_sql(table: &str, def: &TableDef, partition: &PartitionOf, ctx: &RenderContext) -> String {
    let mut sql = format!(
        "CREATE TABLE {} PARTITION OF {}",
        table,
        qualify(&partition.parent, &ctx.namespace)
    );
    let constraints = constraint_lines(def);
    if !constraints.is_empty() {
        sql.push_str(&format!(" (\n{}\n)", constraints.join(",\n")));
    }
    sql.push_str(&format!("\n    {}", partition.bound));
    if let Some(key) = &def.partition_key {
        sql.push_str(&format!("\n    PARTITION BY {}", key));
    }
    sql.push(';');
    sql
}

fn column_sql(column: &ColumnDef) -> Result<String, String> {
    let mut def = format!("    {} {}", quote_ident(&column.name), column.data_type);
    match (column.generated, &column.default) {
        (Some(kind), Some(expr)) => {
            def.push_str(&format!(" GENERATED ALWAYS AS ({}) {}", expr, kind.as_sql()))
        }
        (Some(_), None) => {
            return Err(format!("generated column {} has no expression", column.name))
        }
        (None, Some(default)) => def.push_str(&format!(" DEFAULT {}", default)),
        (None, None) => {}
    }
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    match column.identity {
        Some(IdentityKind::Always) => def.push_str(" GENERATED ALWAYS AS IDENTITY"),
        Some(IdentityKind::ByDefault) => def.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
        None => {}
    }
    Ok(def)
}

fn key_sql(key: &IndexKey) -> String {
    let mut sql = match &key.target {
        IndexColumn::Column(name) => quote_ident(name),
        IndexColumn::Expression(expr) if expr.starts_with('(') && expr.ends_with(')') => {
            expr.clone()
        }
        IndexColumn::Expression(expr) => format!("({})", expr),
    };
    if let Some(collation) = &key.collation {
        sql.push_str(&format!(" COLLATE {}", collation));
    }
    if let Some(opclass) = &key.opclass {
        sql.push_str(&format!(" {}", opclass));
    }
    // NULLS LAST is the default for ASC, NULLS FIRST for DESC
    match (key.descending, key.nulls_first) {
        (true, true) => sql.push_str(" DESC"),
        (true, false) => sql.push_str(" DESC NULLS LAST"),
        (false, true) => sql.push_str(" NULLS FIRST"),
        (false, false) => {}
    }
    sql
}

pub(super) fn index_sql(
    object: &CatalogObject,
    def: &IndexDef,
    ctx: &RenderContext,
) -> DumpResult<String> {
    if let Some(raw) = &def.raw {
        if raw.trim().is_empty() {
            return Err(DumpError::generation(
                ObjectKind::Index,
                &object.qualified,
                "index definition is empty",
            ));
        }
        return Ok(terminate(raw));
    }

    if def.columns.is_empty() {
        return Err(DumpError::generation(
            ObjectKind::Index,
            &object.qualified,
            "index has no key columns",
        ));
    }

    let keys: Vec<String> = def.columns.iter().map(key_sql).collect();

    let mut sql = format!(
        "CREATE {}INDEX {} ON {}",
        if def.unique { "UNIQUE " } else { "" },
        quote_ident(&object.name),
        qualify(&def.table, &ctx.namespace)
    );
    if let Some(method) = &def.method {
        sql.push_str(&format!(" USING {}", method));
    }
    sql.push_str(&format!(" ({})", keys.join(", ")));
    if !def.include.is_empty() {
        sql.push_str(&format!(" INCLUDE ({})", quote_list(&def.include)));
    }
    if let Some(predicate) = &def.predicate {
        sql.push_str(&format!(" WHERE {}", predicate));
    }
    sql.push(';');
    Ok(sql)
}

pub(super) fn foreign_key_sql(
    object: &CatalogObject,
    def: &ForeignKeyDef,
    ctx: &RenderContext,
) -> DumpResult<String> {
    if def.columns.is_empty() || def.columns.len() != def.referenced_columns.len() {
        return Err(DumpError::generation(
            ObjectKind::ForeignKey,
            &object.qualified,
            format!(
                "column lists do not match ({} local, {} referenced)",
                def.columns.len(),
                def.referenced_columns.len()
            ),
        ));
    }

    let mut sql = format!(
        "ALTER TABLE {}\n    ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        qualify(&def.table, &ctx.namespace),
        quote_ident(&object.name),
        quote_list(&def.columns),
        qualify(&def.referenced_table, &ctx.namespace),
        quote_list(&def.referenced_columns)
    );
    if def.on_update != ReferentialAction::NoAction {
        sql.push_str(&format!(" ON UPDATE {}", def.on_update.as_sql()));
    }
    if def.on_delete != ReferentialAction::NoAction {
        sql.push_str(&format!(" ON DELETE {}", def.on_delete.as_sql()));
    }
    if def.deferrable {
        sql.push_str(" DEFERRABLE");
        if def.initially_deferred {
            sql.push_str(" INITIALLY DEFERRED");
        }
    }
    sql.push(';');
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::super::tests::{column, ctx, object};
    use super::*;
    use crate::catalog::{
        ConstraintDef, ConstraintKind, GeneratedKind, ObjectDefinition, OwnedSequence, RelationName,
    };
    use crate::config::ObjectToggles;

    fn users_table() -> TableDef {
        let mut id = column("id", "bigint", false);
        id.default = Some("nextval('users_id_seq'::regclass)".to_string());
        TableDef {
            columns: vec![id, column("Email", "text", true)],
            owned_sequences: vec![OwnedSequence {
                sequence: RelationName::new("public", "users_id_seq"),
                column: "id".to_string(),
            }],
            ..TableDef::default()
        }
    }

    #[test]
    fn test_table_with_owned_sequence() {
        let def = users_table();
        let obj = object("public", "users", ObjectDefinition::Table(def.clone()));
        assert_eq!(
            table_sql(&obj, &def, &ctx()).unwrap(),
            "CREATE TABLE users (\n    id bigint DEFAULT nextval('users_id_seq'::regclass) NOT NULL,\n    \"Email\" text\n);\n\nALTER SEQUENCE users_id_seq OWNED BY users.id;"
        );
    }

    #[test]
    fn test_owned_by_omitted_without_sequences() {
        let def = users_table();
        let obj = object("public", "users", ObjectDefinition::Table(def.clone()));
        let mut toggles = ObjectToggles::default();
        toggles.sequences = false;
        let ctx = RenderContext::new("public", toggles);
        assert!(!table_sql(&obj, &def, &ctx).unwrap().contains("OWNED BY"));
    }

    #[test]
    fn test_identity_column() {
        let mut id = column("id", "integer", false);
        id.identity = Some(IdentityKind::Always);
        assert_eq!(
            column_sql(&id).unwrap(),
            "    id integer NOT NULL GENERATED ALWAYS AS IDENTITY"
        );
    }

    #[test]
    fn test_generated_column_is_not_a_default() {
        let mut cents = column("amount_cents", "bigint", true);
        cents.default = Some("(amount * 100)".to_string());
        cents.generated = Some(GeneratedKind::Stored);
        assert_eq!(
            column_sql(&cents).unwrap(),
            "    amount_cents bigint GENERATED ALWAYS AS ((amount * 100)) STORED"
        );

        cents.default = None;
        let def = TableDef {
            columns: vec![cents],
            ..TableDef::default()
        };
        let obj = object("public", "invoices", ObjectDefinition::Table(def.clone()));
        assert!(matches!(
            table_sql(&obj, &def, &ctx()),
            Err(DumpError::Generation { kind: ObjectKind::Table, .. })
        ));
    }

    #[test]
    fn test_partitioned_table_and_partition() {
        let parent = TableDef {
            columns: vec![column("id", "bigint", false), column("created_at", "date", false)],
            partition_key: Some("RANGE (created_at)".to_string()),
            ..TableDef::default()
        };
        let obj = object("public", "events", ObjectDefinition::Table(parent.clone()));
        assert_eq!(
            table_sql(&obj, &parent, &ctx()).unwrap(),
            "CREATE TABLE events (\n    id bigint NOT NULL,\n    created_at date NOT NULL\n) PARTITION BY RANGE (created_at);"
        );

        let child = TableDef {
            columns: parent.columns.clone(),
            constraints: vec![ConstraintDef {
                name: Some("events_2024_id_check".to_string()),
                kind: ConstraintKind::Check,
                definition: "CHECK (id > 0)".to_string(),
            }],
            partition_of: Some(PartitionOf {
                parent: RelationName::new("public", "events"),
                bound: "FOR VALUES FROM ('2024-01-01') TO ('2025-01-01')".to_string(),
            }),
            ..TableDef::default()
        };
        let obj = object("public", "events_2024", ObjectDefinition::Table(child.clone()));
        assert_eq!(
            table_sql(&obj, &child, &ctx()).unwrap(),
            "CREATE TABLE events_2024 PARTITION OF events (\n    CONSTRAINT events_2024_id_check CHECK (id > 0)\n)\n    FOR VALUES FROM ('2024-01-01') TO ('2025-01-01');"
        );
    }

    #[test]
    fn test_raw_table_is_kept_verbatim() {
        let def = TableDef {
            columns: vec![column("a", "integer", true)],
            raw: Some("CREATE TABLE t (a INTEGER CHECK (a > 0)) WITHOUT ROWID".to_string()),
            ..TableDef::default()
        };
        let obj = object("main", "t", ObjectDefinition::Table(def.clone()));
        assert_eq!(
            table_sql(&obj, &def, &ctx()).unwrap(),
            "CREATE TABLE t (a INTEGER CHECK (a > 0)) WITHOUT ROWID;"
        );
    }

    #[test]
    fn test_table_without_columns_fails() {
        let def = TableDef::default();
        let obj = object("public", "empty", ObjectDefinition::Table(def.clone()));
        assert!(matches!(
            table_sql(&obj, &def, &ctx()),
            Err(DumpError::Generation { kind: ObjectKind::Table, .. })
        ));
    }

    #[test]
    fn test_index() {
        let def = IndexDef {
            table: RelationName::new("public", "users"),
            unique: true,
            method: Some("btree".to_string()),
            columns: vec![
                IndexKey::new(IndexColumn::Expression("lower(email)".to_string())),
                IndexKey::new(IndexColumn::Column("tenant_id".to_string())),
            ],
            include: Vec::new(),
            predicate: Some("(deleted_at IS NULL)".to_string()),
            raw: None,
        };
        let obj = object("public", "users_email_key", ObjectDefinition::Index(def.clone()));
        assert_eq!(
            index_sql(&obj, &def, &ctx()).unwrap(),
            "CREATE UNIQUE INDEX users_email_key ON users USING btree ((lower(email)), tenant_id) WHERE (deleted_at IS NULL);"
        );
    }

    #[test]
    fn test_index_key_options_and_include() {
        let created = IndexKey {
            descending: true,
            nulls_first: false,
            ..IndexKey::new(IndexColumn::Column("created_at".to_string()))
        };
        let title = IndexKey {
            collation: Some("\"C\"".to_string()),
            opclass: Some("text_pattern_ops".to_string()),
            nulls_first: true,
            ..IndexKey::new(IndexColumn::Column("title".to_string()))
        };
        let def = IndexDef {
            table: RelationName::new("public", "posts"),
            unique: false,
            method: Some("btree".to_string()),
            columns: vec![created, title],
            include: vec!["id".to_string()],
            predicate: None,
            raw: None,
        };
        let obj = object("public", "posts_recent_idx", ObjectDefinition::Index(def.clone()));
        assert_eq!(
            index_sql(&obj, &def, &ctx()).unwrap(),
            "CREATE INDEX posts_recent_idx ON posts USING btree (created_at DESC NULLS LAST, title COLLATE \"C\" text_pattern_ops NULLS FIRST) INCLUDE (id);"
        );

        let desc_default = IndexKey {
            descending: true,
            nulls_first: true,
            ..IndexKey::new(IndexColumn::Column("created_at".to_string()))
        };
        assert_eq!(key_sql(&desc_default), "created_at DESC");
    }

    #[test]
    fn test_raw_index_is_terminated() {
        let def = IndexDef {
            table: RelationName::new("main", "node"),
            unique: false,
            method: None,
            columns: Vec::new(),
            include: Vec::new(),
            predicate: None,
            raw: Some("CREATE INDEX node_lower ON node (lower(label))".to_string()),
        };
        let obj = object("main", "node_lower", ObjectDefinition::Index(def.clone()));
        assert_eq!(
            index_sql(&obj, &def, &ctx()).unwrap(),
            "CREATE INDEX node_lower ON node (lower(label));"
        );
    }

    fn fk(columns: &[&str], referenced: &[&str]) -> ForeignKeyDef {
        ForeignKeyDef {
            table: RelationName::new("public", "orders"),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            referenced_table: RelationName::new("crm", "customers"),
            referenced_columns: referenced.iter().map(|c| c.to_string()).collect(),
            on_update: ReferentialAction::NoAction,
            on_delete: ReferentialAction::Cascade,
            deferrable: true,
            initially_deferred: true,
        }
    }

    #[test]
    fn test_foreign_key() {
        let def = fk(&["customer_id"], &["id"]);
        let obj = object("public", "orders_customer_fk", ObjectDefinition::ForeignKey(def.clone()));
        assert_eq!(
            foreign_key_sql(&obj, &def, &ctx()).unwrap(),
            "ALTER TABLE orders\n    ADD CONSTRAINT orders_customer_fk FOREIGN KEY (customer_id) REFERENCES crm.customers (id) ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED;"
        );
    }

    #[test]
    fn test_foreign_key_column_mismatch() {
        for def in [fk(&[], &[]), fk(&["a", "b"], &["id"])] {
            let obj = object("public", "bad_fk", ObjectDefinition::ForeignKey(def.clone()));
            assert!(foreign_key_sql(&obj, &def, &ctx()).is_err());
        }
    }
}
