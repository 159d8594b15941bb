//! Identifier quoting
//!
//! Shared by the renderers and by adapters that assemble constraint text, so
//! every identifier in a dump is quoted the same way.

use crate::catalog::RelationName;
use once_cell::sync::Lazy;
use regex::Regex;

static BARE_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_$]*$").unwrap());

/// Reserved key words that can never appear bare as identifiers
const RESERVED: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric",
    "authorization", "binary", "both", "case", "cast", "check", "collate", "collation",
    "column", "concurrently", "constraint", "create", "cross", "current_catalog",
    "current_date", "current_role", "current_schema", "current_time", "current_timestamp",
    "current_user", "default", "deferrable", "desc", "distinct", "do", "else", "end",
    "except", "false", "fetch", "for", "foreign", "freeze", "from", "full", "grant",
    "group", "having", "ilike", "in", "initially", "inner", "intersect", "into", "is",
    "isnull", "join", "lateral", "leading", "left", "like", "limit", "localtime",
    "localtimestamp", "natural", "not", "notnull", "null", "offset", "on", "only", "or",
    "order", "outer", "overlaps", "placing", "primary", "references", "returning", "right",
    "select", "session_user", "similar", "some", "symmetric", "system_user", "table",
    "tablesample", "then", "to", "trailing", "true", "union", "unique", "user", "using",
    "variadic", "verbose", "when", "where", "window", "with",
];

/// Quote an identifier unless it can be written bare
pub fn quote_ident(ident: &str) -> String {
    if BARE_IDENT.is_match(ident) && !RESERVED.contains(&ident) {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// Comma-separated quoted identifier list
pub fn quote_list(idents: &[String]) -> String {
    idents
        .iter()
        .map(|i| quote_ident(i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a relation name, qualified only when it lives outside `namespace`
pub fn qualify(relation: &RelationName, namespace: &str) -> String {
    if relation.schema == namespace {
        quote_ident(&relation.name)
    } else {
        format!("{}.{}", quote_ident(&relation.schema), quote_ident(&relation.name))
    }
}

/// Single-quoted SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_identifiers() {
        assert_eq!(quote_ident("users"), "users");
        assert_eq!(quote_ident("_tmp$1"), "_tmp$1");
    }

    #[test]
    fn test_quoted_identifiers() {
        assert_eq!(quote_ident("Users"), "\"Users\"");
        assert_eq!(quote_ident("order"), "\"order\"");
        assert_eq!(quote_ident("1st"), "\"1st\"");
        assert_eq!(quote_ident("has space"), "\"has space\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_qualify_relative_to_namespace() {
        let local = RelationName::new("public", "users");
        let remote = RelationName::new("Audit", "log");
        assert_eq!(qualify(&local, "public"), "users");
        assert_eq!(qualify(&remote, "public"), "\"Audit\".log");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}
