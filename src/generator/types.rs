//! Extensions, types and sequences

use super::{terminate, RenderContext};
use crate::catalog::{CatalogObject, ObjectKind, SequenceDef, TypeDef};
use crate::error::{DumpError, DumpResult};
use crate::ident::{qualify, quote_ident, quote_literal};

pub(super) fn extension_sql(object: &CatalogObject) -> String {
    // extension versions are not pinned
    format!(
        "CREATE EXTENSION IF NOT EXISTS {} WITH SCHEMA {};",
        quote_ident(&object.name),
        quote_ident(&object.schema)
    )
}

pub(super) fn type_sql(
    object: &CatalogObject,
    def: &TypeDef,
    ctx: &RenderContext,
) -> DumpResult<String> {
    let name = qualify(&object.relation(), &ctx.namespace);
    let fail = |message: &str| DumpError::generation(ObjectKind::Type, &object.qualified, message);

    match def {
        TypeDef::Enum { labels } => {
            if labels.is_empty() {
                return Err(fail("enum type has no labels"));
            }
            let labels: Vec<String> = labels
                .iter()
                .map(|l| format!("    {}", quote_literal(l)))
                .collect();
            Ok(format!("CREATE TYPE {} AS ENUM (\n{}\n);", name, labels.join(",\n")))
        }
        TypeDef::Domain {
            base_type,
            not_null,
            default,
            checks,
        } => {
            if base_type.trim().is_empty() {
                return Err(fail("domain has no base type"));
            }
            let mut sql = format!("CREATE DOMAIN {} AS {}", name, base_type);
            if let Some(default) = default {
                sql.push_str(&format!("\n    DEFAULT {}", default));
            }
            if *not_null {
                sql.push_str("\n    NOT NULL");
            }
            for check in checks {
                sql.push_str(&format!("\n    {}", check));
            }
            sql.push(';');
            Ok(sql)
        }
        TypeDef::Composite { attributes } => {
            if attributes.is_empty() {
                return Err(fail("composite type has no attributes"));
            }
            let attributes: Vec<String> = attributes
                .iter()
                .map(|a| format!("    {} {}", quote_ident(&a.name), a.data_type))
                .collect();
            Ok(format!("CREATE TYPE {} AS (\n{}\n);", name, attributes.join(",\n")))
        }
    }
}

pub(super) fn sequence_sql(
    object: &CatalogObject,
    def: &SequenceDef,
    ctx: &RenderContext,
) -> DumpResult<String> {
    if def.increment == 0 {
        return Err(DumpError::generation(
            ObjectKind::Sequence,
            &object.qualified,
            "increment must not be zero",
        ));
    }

    let mut sql = format!("CREATE SEQUENCE {}", qualify(&object.relation(), &ctx.namespace));
    if let Some(data_type) = &def.data_type {
        sql.push_str(&format!("\n    AS {}", data_type));
    }
    sql.push_str(&format!("\n    START WITH {}", def.start));
    sql.push_str(&format!("\n    INCREMENT BY {}", def.increment));
    match def.min_value {
        Some(min) => sql.push_str(&format!("\n    MINVALUE {}", min)),
        None => sql.push_str("\n    NO MINVALUE"),
    }
    match def.max_value {
        Some(max) => sql.push_str(&format!("\n    MAXVALUE {}", max)),
        None => sql.push_str("\n    NO MAXVALUE"),
    }
    sql.push_str(&format!("\n    CACHE {}", def.cache));
    if def.cycle {
        sql.push_str("\n    CYCLE");
    }
    Ok(terminate(&sql))
}
