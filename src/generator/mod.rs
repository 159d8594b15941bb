//! DDL generator
//!
//! Renders each catalog object into an immutable SQL fragment. Renderers are
//! pure functions of the object and the render context; the kind of the
//! object selects the renderer.

mod relations;
mod routines;
mod types;

use crate::catalog::{CatalogObject, ObjectDefinition, ObjectKind, RelationName};
use crate::config::ObjectToggles;
use crate::error::DumpResult;
use crate::introspection::{CatalogModel, Section};
use tracing::debug;

/// Rendered SQL for one catalog object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub kind: ObjectKind,
    pub section: Section,
    pub qualified: String,
    /// Table the fragment is filed under in multi-file output
    pub owning_table: Option<RelationName>,
    pub sql: String,
}

/// Everything a renderer may consult besides the object itself
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub namespace: String,
    pub toggles: ObjectToggles,
}

impl RenderContext {
    pub fn new(namespace: impl Into<String>, toggles: ObjectToggles) -> Self {
        Self {
            namespace: namespace.into(),
            toggles,
        }
    }
}

/// Render a single object
pub fn render(object: &CatalogObject, ctx: &RenderContext) -> DumpResult<Fragment> {
    let sql = match &object.definition {
        ObjectDefinition::Extension => types::extension_sql(object),
        ObjectDefinition::Type(def) => types::type_sql(object, def, ctx)?,
        ObjectDefinition::Sequence(def) => types::sequence_sql(object, def, ctx)?,
        ObjectDefinition::Table(def) => relations::table_sql(object, def, ctx)?,
        ObjectDefinition::Index(def) => relations::index_sql(object, def, ctx)?,
        ObjectDefinition::ForeignKey(def) => relations::foreign_key_sql(object, def, ctx)?,
        ObjectDefinition::View(def) => routines::view_sql(object, def, ctx)?,
        ObjectDefinition::Function(def) => routines::function_sql(object, def)?,
        ObjectDefinition::Trigger(def) => routines::trigger_sql(object, def)?,
    };

    Ok(Fragment {
        kind: object.kind(),
        section: Section::for_kind(object.kind()),
        qualified: object.qualified.clone(),
        owning_table: object.owning_table(),
        sql,
    })
}

/// Render every object of the model, keeping model order and sections
pub fn render_model(model: &CatalogModel, ctx: &RenderContext) -> DumpResult<Vec<Fragment>> {
    let mut fragments = Vec::with_capacity(model.len());
    for (section, object) in model.iter() {
        let mut fragment = render(object, ctx)?;
        fragment.section = section;
        fragments.push(fragment);
    }
    debug!("Rendered {} fragments", fragments.len());
    Ok(fragments)
}

/// Close a statement with exactly one semicolon
fn terminate(sql: &str) -> String {
    let trimmed = sql.trim_end();
    let trimmed = trimmed.trim_end_matches(';').trim_end();
    format!("{};", trimmed)
}
