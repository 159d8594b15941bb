//! Views, functions and triggers

use super::{terminate, RenderContext};
use crate::catalog::{CatalogObject, FunctionDef, ObjectKind, TriggerDef, ViewDef};
use crate::error::{DumpError, DumpResult};
use crate::ident::{qualify, quote_list};

fn require_body(object: &CatalogObject, kind: ObjectKind, body: &str) -> DumpResult<()> {
    if body.trim().trim_end_matches(';').trim().is_empty() {
        return Err(DumpError::generation(kind, &object.qualified, "definition is empty"));
    }
    Ok(())
}

pub(super) fn view_sql(
    object: &CatalogObject,
    def: &ViewDef,
    ctx: &RenderContext,
) -> DumpResult<String> {
    require_body(object, ObjectKind::View, &def.body)?;
    let columns = if def.columns.is_empty() {
        String::new()
    } else {
        format!(" ({})", quote_list(&def.columns))
    };
    Ok(terminate(&format!(
        "CREATE {}VIEW {}{} AS\n{}",
        if def.materialized { "MATERIALIZED " } else { "" },
        qualify(&object.relation(), &ctx.namespace),
        columns,
        def.body.trim()
    )))
}

pub(super) fn function_sql(object: &CatalogObject, def: &FunctionDef) -> DumpResult<String> {
    require_body(object, ObjectKind::Function, &def.definition)?;
    Ok(terminate(&def.definition))
}

pub(super) fn trigger_sql(object: &CatalogObject, def: &TriggerDef) -> DumpResult<String> {
    require_body(object, ObjectKind::Trigger, &def.definition)?;
    Ok(terminate(&def.definition))
}
