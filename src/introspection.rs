//! Schema Introspection Module
//!
//! Drives a catalog adapter, normalizes raw rows into catalog objects, resolves
//! dependencies and produces the canonical object order every later stage
//! relies on.

use crate::catalog::{
    CatalogAdapter, CatalogObject, ColumnDef, ColumnRef, ConstraintDef, ConstraintKind, Dialect,
    ForeignKeyDef, FunctionDef, GeneratedKind, IdentityKind, IndexColumn, IndexDef, IndexKey,
    ObjectDefinition, ObjectKind, ObjectRef, OwnedSequence, PartitionOf, RawRow,
    ReferentialAction, RelationName, SequenceDef, TableDef, TriggerDef, TypeAttribute, TypeDef,
    ViewDef,
};
use crate::config::RunConfig;
use crate::error::{DumpError, DumpResult};
use futures::future::try_join_all;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::{debug, info};

/// Output sections in load order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Extensions,
    Types,
    Sequences,
    Tables,
    Indexes,
    ForeignKeys,
    Views,
    Functions,
    Triggers,
    DeferredConstraints,
}

impl Section {
    pub fn for_kind(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Extension => Section::Extensions,
            ObjectKind::Type => Section::Types,
            ObjectKind::Sequence => Section::Sequences,
            ObjectKind::Table => Section::Tables,
            ObjectKind::Index => Section::Indexes,
            ObjectKind::ForeignKey => Section::ForeignKeys,
            ObjectKind::View => Section::Views,
            ObjectKind::Function => Section::Functions,
            ObjectKind::Trigger => Section::Triggers,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Section::Extensions => "Extensions",
            Section::Types => "Types",
            Section::Sequences => "Sequences",
            Section::Tables => "Tables",
            Section::Indexes => "Indexes",
            Section::ForeignKeys => "Foreign Keys",
            Section::Views => "Views",
            Section::Functions => "Functions",
            Section::Triggers => "Triggers",
            Section::DeferredConstraints => "Deferred Constraints",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Objects of one section, already in emission order
#[derive(Debug, Clone)]
pub struct ObjectGroup {
    pub section: Section,
    pub objects: Vec<CatalogObject>,
}

/// Ordered catalog model of one run
#[derive(Debug, Clone)]
pub struct CatalogModel {
    pub dialect: Dialect,
    pub namespace: String,
    pub engine_version: String,
    pub groups: Vec<ObjectGroup>,
}

impl CatalogModel {
    /// All objects with their section, in emission order
    pub fn iter(&self) -> impl Iterator<Item = (Section, &CatalogObject)> {
        self.groups
            .iter()
            .flat_map(|g| g.objects.iter().map(move |o| (g.section, o)))
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.objects.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that every resolved dependency is emitted before its dependent
    pub fn verify_order(&self) -> DumpResult<()> {
        let mut emitted: HashSet<ObjectRef> = HashSet::new();
        for (section, object) in self.iter() {
            for dep in &object.dependencies {
                let self_ref = *dep == object.object_ref();
                if !self_ref && !emitted.contains(dep) && section != Section::DeferredConstraints {
                    return Err(DumpError::introspection(
                        object.kind(),
                        format!(
                            "{} depends on {} {} which is not emitted before it",
                            object.qualified, dep.kind, dep.name
                        ),
                    ));
                }
            }
            emitted.insert(object.object_ref());
        }
        Ok(())
    }
}

/// Schema introspector over any catalog adapter
pub struct Introspector<'a> {
    adapter: &'a dyn CatalogAdapter,
    config: &'a RunConfig,
}

impl<'a> Introspector<'a> {
    pub fn new(adapter: &'a dyn CatalogAdapter, config: &'a RunConfig) -> Self {
        Self { adapter, config }
    }

    /// Introspect every enabled kind and build the ordered model
    pub async fn introspect(&self) -> DumpResult<CatalogModel> {
        let dialect = self.adapter.dialect();
        let namespace = self.config.namespace_for(dialect);
        let kinds = self.config.enabled_kinds(&self.adapter.capabilities());

        for kind in ObjectKind::ALL {
            if self.config.toggles.enabled(kind) && !kinds.contains(&kind) {
                debug!("Skipping {}: not supported by {}", kind, dialect);
            }
        }

        let engine_version = self.adapter.server_version().await?;

        // Kinds are independent until the merge below
        let fetched = try_join_all(kinds.iter().map(|kind| {
            let namespace = namespace.as_str();
            async move {
                let rows = self.adapter.list_objects(*kind, namespace).await.map_err(|e| match e {
                    DumpError::Introspection { .. } | DumpError::DialectUnsupported { .. } => e,
                    other => DumpError::introspection(*kind, other.to_string()),
                })?;
                Ok::<_, DumpError>((*kind, rows))
            }
        }))
        .await?;

        let mut objects = Vec::new();
        for (kind, rows) in fetched {
            debug!("Fetched {} {} rows", rows.len(), kind);
            for row in &rows {
                objects.push(normalize(kind, row)?);
            }
        }

        let model = build_model(dialect, namespace, engine_version, objects)?;
        info!(
            "Introspected {} objects in {} ({})",
            model.len(),
            model.namespace,
            model.engine_version
        );
        Ok(model)
    }
}

// =============================================================================
// NORMALIZATION
// =============================================================================

/// Turn one raw catalog row into a catalog object
pub fn normalize(kind: ObjectKind, row: &RawRow) -> DumpResult<CatalogObject> {
    normalize_row(kind, row).map_err(|message| DumpError::introspection(kind, message))
}

fn normalize_row(kind: ObjectKind, row: &RawRow) -> Result<CatalogObject, String> {
    let schema = row.str("schema")?.to_string();
    let name = row.str("name")?.to_string();
    let mut qualified = format!("{}.{}", schema, name);

    let definition = match kind {
        ObjectKind::Extension => ObjectDefinition::Extension,
        ObjectKind::Type => ObjectDefinition::Type(normalize_type(row)?),
        ObjectKind::Sequence => ObjectDefinition::Sequence(normalize_sequence(row, &schema)?),
        ObjectKind::Table => ObjectDefinition::Table(normalize_table(row, &schema)?),
        ObjectKind::Index => ObjectDefinition::Index(normalize_index(row, &schema)?),
        ObjectKind::ForeignKey => {
            let def = normalize_foreign_key(row, &schema)?;
            qualified = format!("{}.{}.{}", schema, def.table.name, name);
            ObjectDefinition::ForeignKey(def)
        }
        ObjectKind::View => ObjectDefinition::View(ViewDef {
            columns: row.str_list("columns")?,
            body: row.str("body")?.to_string(),
            materialized: row.bool_or("materialized", false)?,
            references: row
                .rows("references")?
                .iter()
                .map(|r| Ok(RelationName::new(r.str("schema")?, r.str("name")?)))
                .collect::<Result<_, String>>()?,
        }),
        ObjectKind::Function => ObjectDefinition::Function(FunctionDef {
            definition: row.str("definition")?.to_string(),
        }),
        ObjectKind::Trigger => {
            let table = RelationName::new(schema.clone(), row.str("table")?);
            qualified = format!("{}.{}.{}", schema, table.name, name);
            let function = match row.opt_str("function_name")? {
                Some(f) => Some(RelationName::new(
                    row.opt_str("function_schema")?.unwrap_or_else(|| schema.clone()),
                    f,
                )),
                None => None,
            };
            ObjectDefinition::Trigger(TriggerDef {
                table,
                definition: row.str("definition")?.to_string(),
                function,
            })
        }
    };

    Ok(CatalogObject {
        schema,
        name,
        qualified,
        definition,
        dependencies: BTreeSet::new(),
    })
}

fn normalize_type(row: &RawRow) -> Result<TypeDef, String> {
    match row.str("type_kind")? {
        "enum" => Ok(TypeDef::Enum {
            labels: row.str_list("labels")?,
        }),
        "domain" => Ok(TypeDef::Domain {
            base_type: row.str("base_type")?.to_string(),
            not_null: row.bool_or("not_null", false)?,
            default: row.opt_str("default")?,
            checks: row.str_list("checks")?,
        }),
        "composite" => Ok(TypeDef::Composite {
            attributes: row
                .rows("attributes")?
                .iter()
                .map(|a| {
                    Ok(TypeAttribute {
                        name: a.str("name")?.to_string(),
                        data_type: a.str("data_type")?.to_string(),
                    })
                })
                .collect::<Result<_, String>>()?,
        }),
        other => Err(format!("unknown type kind '{}'", other)),
    }
}

fn normalize_sequence(row: &RawRow, schema: &str) -> Result<SequenceDef, String> {
    let owned_by = match (row.opt_str("owned_by_table")?, row.opt_str("owned_by_column")?) {
        (Some(table), Some(column)) => Some(ColumnRef {
            table: RelationName::new(
                row.opt_str("owned_by_schema")?.unwrap_or_else(|| schema.to_string()),
                table,
            ),
            column,
        }),
        _ => None,
    };

    Ok(SequenceDef {
        data_type: row.opt_str("data_type")?,
        start: row.opt_i64("start")?.unwrap_or(1),
        increment: row.opt_i64("increment")?.unwrap_or(1),
        min_value: row.opt_i64("min_value")?,
        max_value: row.opt_i64("max_value")?,
        cache: row.opt_i64("cache")?.unwrap_or(1),
        cycle: row.bool_or("cycle", false)?,
        owned_by,
    })
}

fn normalize_table(row: &RawRow, schema: &str) -> Result<TableDef, String> {
    let columns = row
        .rows("columns")?
        .iter()
        .map(|c| {
            let identity = match c.opt_str("identity")? {
                Some(code) => Some(
                    IdentityKind::parse(&code).ok_or_else(|| format!("unknown identity '{}'", code))?,
                ),
                None => None,
            };
            let generated = match c.opt_str("generated")? {
                Some(code) => Some(
                    GeneratedKind::parse(&code)
                        .ok_or_else(|| format!("unknown generated kind '{}'", code))?,
                ),
                None => None,
            };
            Ok(ColumnDef {
                name: c.str("name")?.to_string(),
                data_type: c.str("data_type")?.to_string(),
                nullable: c.bool_or("nullable", true)?,
                default: c.opt_str("default")?,
                identity,
                generated,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    let constraints = row
        .rows("constraints")?
        .iter()
        .map(|c| {
            let code = c.str("kind")?;
            Ok(ConstraintDef {
                name: c.opt_str("name")?,
                kind: ConstraintKind::parse(code)
                    .ok_or_else(|| format!("unknown constraint kind '{}'", code))?,
                definition: c.str("definition")?.to_string(),
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    let partition_of = match row.opt_str("partition_of")? {
        Some(parent) => Some(PartitionOf {
            parent: RelationName::new(
                row.opt_str("partition_of_schema")?.unwrap_or_else(|| schema.to_string()),
                parent,
            ),
            bound: row.str("partition_bound")?.to_string(),
        }),
        None => None,
    };

    Ok(TableDef {
        columns,
        constraints,
        owned_sequences: Vec::new(),
        partition_key: row.opt_str("partition_key")?,
        partition_of,
        raw: row.opt_str("raw")?,
    })
}

fn normalize_index(row: &RawRow, schema: &str) -> Result<IndexDef, String> {
    let columns = row
        .rows("columns")?
        .iter()
        .map(|c| {
            let target = match (c.opt_str("column")?, c.opt_str("expression")?) {
                (Some(column), _) => IndexColumn::Column(column),
                (None, Some(expr)) => IndexColumn::Expression(expr),
                (None, None) => {
                    return Err("index key has neither column nor expression".to_string())
                }
            };
            Ok(IndexKey {
                target,
                collation: c.opt_str("collation")?,
                opclass: c.opt_str("opclass")?,
                descending: c.bool_or("descending", false)?,
                nulls_first: c.bool_or("nulls_first", false)?,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    Ok(IndexDef {
        table: RelationName::new(schema, row.str("table")?),
        unique: row.bool_or("unique", false)?,
        method: row.opt_str("method")?,
        columns,
        include: row.str_list("include")?,
        predicate: row.opt_str("predicate")?,
        raw: row.opt_str("raw")?,
    })
}

fn normalize_foreign_key(row: &RawRow, schema: &str) -> Result<ForeignKeyDef, String> {
    let action = |key: &str| -> Result<ReferentialAction, String> {
        match row.opt_str(key)? {
            Some(code) => ReferentialAction::parse(&code)
                .ok_or_else(|| format!("unknown referential action '{}'", code)),
            None => Ok(ReferentialAction::NoAction),
        }
    };

    Ok(ForeignKeyDef {
        table: RelationName::new(schema, row.str("table")?),
        columns: row.str_list("columns")?,
        referenced_table: RelationName::new(
            row.opt_str("referenced_schema")?.unwrap_or_else(|| schema.to_string()),
            row.str("referenced_table")?,
        ),
        referenced_columns: row.str_list("referenced_columns")?,
        on_update: action("on_update")?,
        on_delete: action("on_delete")?,
        deferrable: row.bool_or("deferrable", false)?,
        initially_deferred: row.bool_or("initially_deferred", false)?,
    })
}

// =============================================================================
// DEPENDENCIES AND ORDERING
// =============================================================================

/// Resolve dependencies, order objects and split deferred constraints
pub fn build_model(
    dialect: Dialect,
    namespace: String,
    engine_version: String,
    mut objects: Vec<CatalogObject>,
) -> DumpResult<CatalogModel> {
    link_owned_sequences(&mut objects);

    let known: HashSet<ObjectRef> = objects.iter().map(CatalogObject::object_ref).collect();
    let mut seen: HashSet<ObjectRef> = HashSet::new();
    for object in &objects {
        if !seen.insert(object.object_ref()) {
            return Err(DumpError::introspection(
                object.kind(),
                format!("duplicate object {}", object.qualified),
            ));
        }
    }

    for object in &mut objects {
        object.dependencies = dependencies_of(object)
            .into_iter()
            .filter(|dep| known.contains(dep))
            .collect();
    }

    let deferred = deferred_foreign_keys(&objects);

    let mut sections: BTreeMap<Section, Vec<CatalogObject>> = BTreeMap::new();
    for object in objects {
        let section = if deferred.contains(&object.qualified) && object.kind() == ObjectKind::ForeignKey {
            Section::DeferredConstraints
        } else {
            Section::for_kind(object.kind())
        };
        sections.entry(section).or_default().push(object);
    }

    let mut groups = Vec::new();
    for (section, mut members) in sections {
        members.sort_by(|a, b| a.qualified.cmp(&b.qualified));
        // partitions follow their parent, views the views they select from
        if matches!(section, Section::Tables | Section::Views) {
            members = order_by_dependencies(members)?;
        }
        groups.push(ObjectGroup {
            section,
            objects: members,
        });
    }

    let model = CatalogModel {
        dialect,
        namespace,
        engine_version,
        groups,
    };
    model.verify_order()?;
    Ok(model)
}

/// Copy sequence ownership onto the owning tables
fn link_owned_sequences(objects: &mut [CatalogObject]) {
    let mut owned: HashMap<String, Vec<OwnedSequence>> = HashMap::new();
    for object in objects.iter() {
        if let ObjectDefinition::Sequence(seq) = &object.definition {
            if let Some(owner) = &seq.owned_by {
                owned.entry(owner.table.qualified()).or_default().push(OwnedSequence {
                    sequence: object.relation(),
                    column: owner.column.clone(),
                });
            }
        }
    }

    for object in objects.iter_mut() {
        let key = object.qualified.clone();
        if let ObjectDefinition::Table(table) = &mut object.definition {
            if let Some(mut sequences) = owned.remove(&key) {
                sequences.sort_by(|a, b| a.sequence.cmp(&b.sequence));
                table.owned_sequences = sequences;
            }
        }
    }
}

fn dependencies_of(object: &CatalogObject) -> BTreeSet<ObjectRef> {
    let table = |r: &RelationName| ObjectRef::new(ObjectKind::Table, r.qualified());
    let mut deps = BTreeSet::new();

    match &object.definition {
        ObjectDefinition::Table(def) => {
            for owned in &def.owned_sequences {
                deps.insert(ObjectRef::new(ObjectKind::Sequence, owned.sequence.qualified()));
            }
            if let Some(partition) = &def.partition_of {
                deps.insert(table(&partition.parent));
            }
        }
        ObjectDefinition::Index(def) => {
            deps.insert(table(&def.table));
        }
        ObjectDefinition::ForeignKey(def) => {
            deps.insert(table(&def.table));
            deps.insert(table(&def.referenced_table));
        }
        ObjectDefinition::View(def) => {
            for r in &def.references {
                deps.insert(table(r));
                deps.insert(ObjectRef::new(ObjectKind::View, r.qualified()));
            }
        }
        ObjectDefinition::Trigger(def) => {
            deps.insert(table(&def.table));
            if let Some(function) = &def.function {
                deps.insert(ObjectRef::new(ObjectKind::Function, function.qualified()));
            }
        }
        ObjectDefinition::Extension
        | ObjectDefinition::Type(_)
        | ObjectDefinition::Sequence(_)
        | ObjectDefinition::Function(_) => {}
    }

    deps
}

/// Foreign keys that reference their own table or close a table cycle
fn deferred_foreign_keys(objects: &[CatalogObject]) -> HashSet<String> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut nodes: HashMap<String, NodeIndex> = HashMap::new();

    let fks: Vec<(&CatalogObject, &ForeignKeyDef)> = objects
        .iter()
        .filter_map(|o| match &o.definition {
            ObjectDefinition::ForeignKey(def) => Some((o, def)),
            _ => None,
        })
        .collect();

    for (_, def) in &fks {
        if !def.is_self_referencing() {
            let mut node = |name: String| {
                *nodes
                    .entry(name.clone())
                    .or_insert_with(|| graph.add_node(name))
            };
            let from = node(def.table.qualified());
            let to = node(def.referenced_table.qualified());
            graph.add_edge(from, to, ());
        }
    }

    let mut component: HashMap<NodeIndex, usize> = HashMap::new();
    for (i, scc) in tarjan_scc(&graph).into_iter().enumerate() {
        if scc.len() > 1 {
            for n in scc {
                component.insert(n, i);
            }
        }
    }

    fks.iter()
        .filter(|(_, def)| {
            if def.is_self_referencing() {
                return true;
            }
            let from = nodes.get(&def.table.qualified());
            let to = nodes.get(&def.referenced_table.qualified());
            match (from.and_then(|n| component.get(n)), to.and_then(|n| component.get(n))) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        })
        .map(|(o, _)| o.qualified.clone())
        .collect()
}

/// Stable topological order within one section, ties broken by name
fn order_by_dependencies(members: Vec<CatalogObject>) -> DumpResult<Vec<CatalogObject>> {
    // members arrive sorted by name, so node index order is name order
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..members.len()).map(|i| graph.add_node(i)).collect();
    let refs: HashMap<ObjectRef, NodeIndex> = members
        .iter()
        .zip(&nodes)
        .map(|(o, n)| (o.object_ref(), *n))
        .collect();

    for (object, node) in members.iter().zip(&nodes) {
        for dep in &object.dependencies {
            if let Some(&target) = refs.get(dep) {
                if target != *node {
                    graph.update_edge(target, *node, ());
                }
            }
        }
    }

    let mut indegree: Vec<usize> = nodes
        .iter()
        .map(|n| graph.neighbors_directed(*n, Direction::Incoming).count())
        .collect();
    let mut ready: BTreeSet<NodeIndex> = nodes
        .iter()
        .copied()
        .filter(|n| indegree[n.index()] == 0)
        .collect();
    let mut order = Vec::with_capacity(members.len());
    while let Some(node) = ready.pop_first() {
        order.push(graph[node]);
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            indegree[next.index()] -= 1;
            if indegree[next.index()] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() != members.len() {
        let mut stuck: Vec<&str> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .flatten()
            .map(|n| members[graph[n]].qualified.as_str())
            .collect();
        stuck.sort_unstable();
        return Err(DumpError::introspection(
            members[0].kind(),
            format!("dependency cycle among {}", stuck.join(", ")),
        ));
    }

    let mut slots: Vec<Option<CatalogObject>> = members.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Capabilities, FixtureAdapter};
    use crate::config::ObjectToggles;
    use serde_json::json;

    fn row(value: serde_json::Value) -> RawRow {
        RawRow::try_from(value).unwrap()
    }

    fn table(name: &str) -> RawRow {
        row(json!({
            "schema": "public",
            "name": name,
            "columns": [{"name": "id", "data_type": "integer", "nullable": false}],
        }))
    }

    fn fk(name: &str, from: &str, to: &str) -> RawRow {
        row(json!({
            "schema": "public",
            "name": name,
            "table": from,
            "columns": ["ref_id"],
            "referenced_table": to,
            "referenced_columns": ["id"],
        }))
    }

    fn section_names(model: &CatalogModel, section: Section) -> Vec<String> {
        model
            .groups
            .iter()
            .find(|g| g.section == section)
            .map(|g| g.objects.iter().map(|o| o.qualified.clone()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_order_is_independent_of_catalog_order() {
        let adapter = FixtureAdapter::new(Dialect::Postgres)
            .with_row(ObjectKind::Table, table("zeta"))
            .with_row(ObjectKind::Table, table("Alpha"))
            .with_row(ObjectKind::Table, table("beta"));
        let config = RunConfig::default();

        let forward = Introspector::new(&adapter, &config).introspect().await.unwrap();
        let reversed_adapter = adapter.clone().reversed();
        let reversed = Introspector::new(&reversed_adapter, &config)
            .introspect()
            .await
            .unwrap();

        let expected = vec!["public.Alpha", "public.beta", "public.zeta"];
        assert_eq!(section_names(&forward, Section::Tables), expected);
        assert_eq!(section_names(&reversed, Section::Tables), expected);
    }

    #[tokio::test]
    async fn test_self_referencing_fk_is_deferred() {
        let adapter = FixtureAdapter::new(Dialect::Postgres)
            .with_row(ObjectKind::Table, table("node"))
            .with_row(ObjectKind::ForeignKey, fk("node_parent_fk", "node", "node"));
        let config = RunConfig::default();

        let model = Introspector::new(&adapter, &config).introspect().await.unwrap();
        assert!(section_names(&model, Section::ForeignKeys).is_empty());
        assert_eq!(
            section_names(&model, Section::DeferredConstraints),
            vec!["public.node.node_parent_fk"]
        );
        assert_eq!(model.groups.last().unwrap().section, Section::DeferredConstraints);
    }

    #[tokio::test]
    async fn test_cyclic_fks_are_deferred() {
        let adapter = FixtureAdapter::new(Dialect::Postgres)
            .with_row(ObjectKind::Table, table("a"))
            .with_row(ObjectKind::Table, table("b"))
            .with_row(ObjectKind::Table, table("c"))
            .with_row(ObjectKind::ForeignKey, fk("a_b_fk", "a", "b"))
            .with_row(ObjectKind::ForeignKey, fk("b_a_fk", "b", "a"))
            .with_row(ObjectKind::ForeignKey, fk("c_a_fk", "c", "a"));
        let config = RunConfig::default();

        let model = Introspector::new(&adapter, &config).introspect().await.unwrap();
        assert_eq!(section_names(&model, Section::ForeignKeys), vec!["public.c.c_a_fk"]);
        assert_eq!(
            section_names(&model, Section::DeferredConstraints),
            vec!["public.a.a_b_fk", "public.b.b_a_fk"]
        );
    }

    #[tokio::test]
    async fn test_disabled_and_unsupported_kinds_are_skipped() {
        let adapter = FixtureAdapter::new(Dialect::Sqlite)
            .with_row(ObjectKind::Table, row(json!({
                "schema": "main", "name": "t",
                "columns": [{"name": "id", "data_type": "integer"}],
            })))
            .with_row(ObjectKind::Trigger, row(json!({
                "schema": "main", "name": "t_touch", "table": "t",
                "definition": "CREATE TRIGGER t_touch AFTER UPDATE ON t BEGIN SELECT 1; END",
            })));
        let mut config = RunConfig::default();
        config.toggles.triggers = false;

        // functions stay enabled but sqlite cannot list them
        let model = Introspector::new(&adapter, &config).introspect().await.unwrap();
        assert_eq!(model.len(), 1);
        assert!(section_names(&model, Section::Triggers).is_empty());
    }

    #[tokio::test]
    async fn test_adapter_failure_is_introspection_error() {
        let adapter = FixtureAdapter::new(Dialect::Postgres).failing(ObjectKind::View);
        let config = RunConfig::default();

        let err = Introspector::new(&adapter, &config).introspect().await.unwrap_err();
        assert!(matches!(err, DumpError::Introspection { kind: ObjectKind::View, .. }));
    }

    #[tokio::test]
    async fn test_missing_field_is_introspection_error() {
        let adapter = FixtureAdapter::new(Dialect::Postgres)
            .with_row(ObjectKind::Index, row(json!({"schema": "public", "name": "orphan_idx"})));
        let mut config = RunConfig::default();
        config.toggles = ObjectToggles::only(&[ObjectKind::Table, ObjectKind::Index]);

        let err = Introspector::new(&adapter, &config).introspect().await.unwrap_err();
        assert!(err.to_string().contains("missing field 'table'"));
    }

    #[test]
    fn test_views_follow_their_dependencies() {
        let view = |name: &str, refs: &[&str]| {
            normalize(
                ObjectKind::View,
                &row(json!({
                    "schema": "public",
                    "name": name,
                    "body": "SELECT 1",
                    "references": refs.iter().map(|r| json!({"schema": "public", "name": r})).collect::<Vec<_>>(),
                })),
            )
            .unwrap()
        };
        let objects = vec![
            view("a_summary", &["z_base"]),
            view("z_base", &[]),
            view("m_other", &[]),
        ];

        let model = build_model(Dialect::Postgres, "public".into(), "test".into(), objects).unwrap();
        assert_eq!(
            section_names(&model, Section::Views),
            vec!["public.m_other", "public.z_base", "public.a_summary"]
        );
    }

    #[test]
    fn test_view_cycle_is_rejected() {
        let view = |name: &str, dep: &str| {
            normalize(
                ObjectKind::View,
                &row(json!({
                    "schema": "public", "name": name, "body": "SELECT 1",
                    "references": [{"schema": "public", "name": dep}],
                })),
            )
            .unwrap()
        };
        let objects = vec![view("a", "b"), view("b", "a"), view("c", "a")];
        let err = build_model(Dialect::Postgres, "public".into(), "test".into(), objects).unwrap_err();
        assert!(err.to_string().contains("dependency cycle among public.a, public.b"));
    }

    #[test]
    fn test_partitions_follow_their_parent() {
        let partition = normalize(
            ObjectKind::Table,
            &row(json!({
                "schema": "public",
                "name": "a_2024",
                "columns": [{"name": "day", "data_type": "date", "nullable": false}],
                "partition_of": "z_events",
                "partition_bound": "FOR VALUES FROM ('2024-01-01') TO ('2025-01-01')",
            })),
        )
        .unwrap();
        let parent = normalize(
            ObjectKind::Table,
            &row(json!({
                "schema": "public",
                "name": "z_events",
                "columns": [{"name": "day", "data_type": "date", "nullable": false}],
                "partition_key": "RANGE (day)",
            })),
        )
        .unwrap();

        let objects = vec![partition, parent, normalize(ObjectKind::Table, &table("m_plain")).unwrap()];
        let model = build_model(Dialect::Postgres, "public".into(), "test".into(), objects).unwrap();
        assert_eq!(
            section_names(&model, Section::Tables),
            vec!["public.m_plain", "public.z_events", "public.a_2024"]
        );
        let (_, child) = model.iter().find(|(_, o)| o.name == "a_2024").unwrap();
        assert!(child
            .dependencies
            .contains(&ObjectRef::new(ObjectKind::Table, "public.z_events")));
    }

    #[test]
    fn test_partition_without_bound_is_rejected() {
        let err = normalize(
            ObjectKind::Table,
            &row(json!({
                "schema": "public", "name": "p",
                "columns": [{"name": "id", "data_type": "integer"}],
                "partition_of": "events",
            })),
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing field 'partition_bound'"));
    }

    #[test]
    fn test_index_key_options_are_normalized() {
        let index = normalize(
            ObjectKind::Index,
            &row(json!({
                "schema": "public",
                "name": "posts_recent_idx",
                "table": "posts",
                "method": "btree",
                "columns": [
                    {"column": "created_at", "descending": true, "nulls_first": false},
                    {"expression": "lower(title)", "collation": "\"C\"", "opclass": "text_pattern_ops"},
                ],
                "include": ["id"],
            })),
        )
        .unwrap();
        match &index.definition {
            ObjectDefinition::Index(def) => {
                assert_eq!(def.columns.len(), 2);
                assert!(def.columns[0].descending);
                assert!(!def.columns[0].nulls_first);
                assert_eq!(
                    def.columns[1].target,
                    IndexColumn::Expression("lower(title)".to_string())
                );
                assert_eq!(def.columns[1].collation.as_deref(), Some("\"C\""));
                assert_eq!(def.columns[1].opclass.as_deref(), Some("text_pattern_ops"));
                assert_eq!(def.include, vec!["id".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_generated_columns_are_normalized() {
        let generated = |code: &str| {
            normalize(
                ObjectKind::Table,
                &row(json!({
                    "schema": "public", "name": "invoices",
                    "columns": [{
                        "name": "cents", "data_type": "bigint",
                        "default": "(amount * 100)", "generated": code,
                    }],
                })),
            )
        };
        match generated("s").unwrap().definition {
            ObjectDefinition::Table(def) => {
                assert_eq!(def.columns[0].generated, Some(GeneratedKind::Stored))
            }
            other => panic!("unexpected {:?}", other),
        }
        let err = generated("x").unwrap_err();
        assert!(err.to_string().contains("unknown generated kind 'x'"));
    }

    #[tokio::test]
    async fn test_narrowed_capabilities_skip_kinds() {
        let adapter = FixtureAdapter::new(Dialect::Postgres)
            .with_capabilities(Capabilities::of(&[ObjectKind::Table]))
            .with_row(ObjectKind::Table, table("users"))
            .with_row(ObjectKind::Function, row(json!({
                "schema": "public", "name": "touch()",
                "definition": "CREATE FUNCTION touch() RETURNS void LANGUAGE sql AS 'SELECT 1'",
            })));
        let config = RunConfig::default();

        let model = Introspector::new(&adapter, &config).introspect().await.unwrap();
        assert_eq!(model.len(), 1);
        assert!(section_names(&model, Section::Functions).is_empty());

        let err = adapter.list_objects(ObjectKind::Function, "public").await.unwrap_err();
        assert!(matches!(
            err,
            DumpError::DialectUnsupported { dialect: Dialect::Postgres, kind: ObjectKind::Function }
        ));
    }

    #[test]
    fn test_sequence_ownership_links_to_table() {
        let seq = normalize(
            ObjectKind::Sequence,
            &row(json!({
                "schema": "public", "name": "users_id_seq", "start": 1, "increment": 1,
                "owned_by_table": "users", "owned_by_column": "id",
            })),
        )
        .unwrap();
        let users = normalize(ObjectKind::Table, &table("users")).unwrap();

        let model =
            build_model(Dialect::Postgres, "public".into(), "test".into(), vec![users, seq]).unwrap();
        let (_, users) = model.iter().find(|(s, _)| *s == Section::Tables).unwrap();
        match &users.definition {
            ObjectDefinition::Table(def) => {
                assert_eq!(def.owned_sequences.len(), 1);
                assert_eq!(def.owned_sequences[0].column, "id");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(users
            .dependencies
            .contains(&ObjectRef::new(ObjectKind::Sequence, "public.users_id_seq")));
    }
}
