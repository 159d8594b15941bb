//! Catalog Model
//!
//! Object kinds, dialects, raw catalog rows and the normalized catalog objects
//! the rest of the pipeline works on.

pub mod adapter;
pub mod fixture;
pub mod postgres;
pub mod sqlite;

pub use adapter::CatalogAdapter;
pub use fixture::FixtureAdapter;
pub use postgres::PostgresAdapter;
pub use sqlite::SqliteAdapter;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Kinds of schema objects, declared in dump precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Extension,
    Type,
    Sequence,
    Table,
    Index,
    ForeignKey,
    View,
    Function,
    Trigger,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 9] = [
        ObjectKind::Extension,
        ObjectKind::Type,
        ObjectKind::Sequence,
        ObjectKind::Table,
        ObjectKind::Index,
        ObjectKind::ForeignKey,
        ObjectKind::View,
        ObjectKind::Function,
        ObjectKind::Trigger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Extension => "extension",
            ObjectKind::Type => "type",
            ObjectKind::Sequence => "sequence",
            ObjectKind::Table => "table",
            ObjectKind::Index => "index",
            ObjectKind::ForeignKey => "foreign key",
            ObjectKind::View => "view",
            ObjectKind::Function => "function",
            ObjectKind::Trigger => "trigger",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported database dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Detect the dialect from a connection URL scheme
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Dialect::Postgres)
        } else if url.starts_with("sqlite:") || url.ends_with(".db") || url.ends_with(".sqlite") {
            Some(Dialect::Sqlite)
        } else {
            None
        }
    }

    /// Namespace searched when the configuration does not name one
    pub fn default_namespace(&self) -> &'static str {
        match self {
            Dialect::Postgres => "public",
            Dialect::Sqlite => "main",
        }
    }

    /// Kinds this dialect can ever enumerate
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Dialect::Postgres => Capabilities::all(),
            Dialect::Sqlite => Capabilities::of(&[
                ObjectKind::Table,
                ObjectKind::Index,
                ObjectKind::View,
                ObjectKind::Trigger,
            ]),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => f.write_str("postgres"),
            Dialect::Sqlite => f.write_str("sqlite"),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            other => Err(format!("unknown dialect '{}'", other)),
        }
    }
}

/// The set of object kinds an adapter can enumerate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities(BTreeSet<ObjectKind>);

impl Capabilities {
    pub fn all() -> Self {
        Self(ObjectKind::ALL.into_iter().collect())
    }

    pub fn of(kinds: &[ObjectKind]) -> Self {
        Self(kinds.iter().copied().collect())
    }

    pub fn supports(&self, kind: ObjectKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn supports_extensions(&self) -> bool {
        self.supports(ObjectKind::Extension)
    }

    pub fn supports_functions(&self) -> bool {
        self.supports(ObjectKind::Function)
    }

    pub fn supports_triggers(&self) -> bool {
        self.supports(ObjectKind::Trigger)
    }

    pub fn supports_views(&self) -> bool {
        self.supports(ObjectKind::View)
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjectKind> + '_ {
        self.0.iter().copied()
    }
}

// =============================================================================
// RAW ROWS
// =============================================================================

/// One row returned by a catalog query, as a JSON object
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow(Map<String, Value>);

impl RawRow {
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    fn field(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn str(&self, key: &str) -> Result<&str, String> {
        match self.field(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(format!("field '{}' is not a string: {}", key, other)),
            None => Err(format!("missing field '{}'", key)),
        }
    }

    pub fn opt_str(&self, key: &str) -> Result<Option<String>, String> {
        match self.field(key) {
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(format!("field '{}' is not a string: {}", key, other)),
            None => Ok(None),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, String> {
        match self.field(key) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::Number(n)) => Ok(n.as_i64().unwrap_or(0) != 0),
            Some(other) => Err(format!("field '{}' is not a boolean: {}", key, other)),
            None => Ok(default),
        }
    }

    pub fn opt_i64(&self, key: &str) -> Result<Option<i64>, String> {
        match self.field(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| format!("field '{}' is not an integer: {}", key, n)),
            // bigint columns arrive as strings from some json encoders
            Some(Value::String(s)) => s
                .parse()
                .map(Some)
                .map_err(|_| format!("field '{}' is not an integer: {}", key, s)),
            Some(other) => Err(format!("field '{}' is not an integer: {}", key, other)),
            None => Ok(None),
        }
    }

    pub fn str_list(&self, key: &str) -> Result<Vec<String>, String> {
        match self.field(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(format!("field '{}' has a non-string item: {}", key, other)),
                })
                .collect(),
            Some(other) => Err(format!("field '{}' is not a list: {}", key, other)),
            None => Ok(Vec::new()),
        }
    }

    pub fn rows(&self, key: &str) -> Result<Vec<RawRow>, String> {
        match self.field(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    RawRow::from_value(v.clone())
                        .ok_or_else(|| format!("field '{}' has a non-object item: {}", key, v))
                })
                .collect(),
            Some(other) => Err(format!("field '{}' is not a list: {}", key, other)),
            None => Ok(Vec::new()),
        }
    }
}

impl TryFrom<Value> for RawRow {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        RawRow::from_value(value).ok_or_else(|| "catalog row is not a JSON object".to_string())
    }
}

// =============================================================================
// CATALOG OBJECTS
// =============================================================================

/// A schema-qualified relation or routine name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationName {
    pub schema: String,
    pub name: String,
}

impl RelationName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Reference from one catalog object to another
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// One introspected database entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogObject {
    pub schema: String,
    pub name: String,
    /// Sort and reference key, unique per kind
    pub qualified: String,
    pub definition: ObjectDefinition,
    pub dependencies: BTreeSet<ObjectRef>,
}

impl CatalogObject {
    pub fn kind(&self) -> ObjectKind {
        self.definition.kind()
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.kind(), self.qualified.clone())
    }

    pub fn relation(&self) -> RelationName {
        RelationName::new(self.schema.clone(), self.name.clone())
    }

    /// Table an object belongs to, for per-table file placement
    pub fn owning_table(&self) -> Option<RelationName> {
        match &self.definition {
            ObjectDefinition::Table(_) => Some(self.relation()),
            ObjectDefinition::Index(def) => Some(def.table.clone()),
            ObjectDefinition::ForeignKey(def) => Some(def.table.clone()),
            _ => None,
        }
    }
}

/// Kind-specific payload; the variant is the object's kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectDefinition {
    Extension,
    Type(TypeDef),
    Sequence(SequenceDef),
    Table(TableDef),
    Index(IndexDef),
    ForeignKey(ForeignKeyDef),
    View(ViewDef),
    Function(FunctionDef),
    Trigger(TriggerDef),
}

impl ObjectDefinition {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectDefinition::Extension => ObjectKind::Extension,
            ObjectDefinition::Type(_) => ObjectKind::Type,
            ObjectDefinition::Sequence(_) => ObjectKind::Sequence,
            ObjectDefinition::Table(_) => ObjectKind::Table,
            ObjectDefinition::Index(_) => ObjectKind::Index,
            ObjectDefinition::ForeignKey(_) => ObjectKind::ForeignKey,
            ObjectDefinition::View(_) => ObjectKind::View,
            ObjectDefinition::Function(_) => ObjectKind::Function,
            ObjectDefinition::Trigger(_) => ObjectKind::Trigger,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type_kind", rename_all = "snake_case")]
pub enum TypeDef {
    Enum {
        labels: Vec<String>,
    },
    Domain {
        base_type: String,
        not_null: bool,
        default: Option<String>,
        checks: Vec<String>,
    },
    Composite {
        attributes: Vec<TypeAttribute>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeAttribute {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceDef {
    pub data_type: Option<String>,
    pub start: i64,
    pub increment: i64,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub cache: i64,
    pub cycle: bool,
    pub owned_by: Option<ColumnRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: RelationName,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableDef {
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<ConstraintDef>,
    /// Sequences owned by columns of this table
    pub owned_sequences: Vec<OwnedSequence>,
    /// `PARTITION BY` clause body of a partitioned table
    pub partition_key: Option<String>,
    pub partition_of: Option<PartitionOf>,
    /// Verbatim definition when the catalog cannot describe every clause
    pub raw: Option<String>,
}

/// Parent and bound of a table partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionOf {
    pub parent: RelationName,
    /// `FOR VALUES ...` or `DEFAULT`
    pub bound: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    /// Default expression, or the generation expression of a generated column
    pub default: Option<String>,
    pub identity: Option<IdentityKind>,
    pub generated: Option<GeneratedKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Always,
    ByDefault,
}

impl IdentityKind {
    /// Parse a pg_attribute.attidentity code
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "a" | "always" => Some(IdentityKind::Always),
            "d" | "by_default" => Some(IdentityKind::ByDefault),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedKind {
    Stored,
    Virtual,
}

impl GeneratedKind {
    /// Parse a pg_attribute.attgenerated code
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "s" | "stored" => Some(GeneratedKind::Stored),
            "v" | "virtual" => Some(GeneratedKind::Virtual),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            GeneratedKind::Stored => "STORED",
            GeneratedKind::Virtual => "VIRTUAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    Check,
    Exclusion,
    ForeignKey,
}

impl ConstraintKind {
    /// Parse a pg_constraint.contype code or a spelled-out kind
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "p" | "primary_key" => Some(ConstraintKind::PrimaryKey),
            "u" | "unique" => Some(ConstraintKind::Unique),
            "c" | "check" => Some(ConstraintKind::Check),
            "x" | "exclusion" => Some(ConstraintKind::Exclusion),
            "f" | "foreign_key" => Some(ConstraintKind::ForeignKey),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDef {
    /// Unnamed constraints render without a CONSTRAINT clause
    pub name: Option<String>,
    pub kind: ConstraintKind,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedSequence {
    pub sequence: RelationName,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub table: RelationName,
    pub unique: bool,
    pub method: Option<String>,
    pub columns: Vec<IndexKey>,
    /// Non-key columns of a covering index
    pub include: Vec<String>,
    pub predicate: Option<String>,
    /// Verbatim definition when the catalog cannot describe the keys
    pub raw: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexColumn {
    Column(String),
    Expression(String),
}

/// One key of an index with its ordering options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexKey {
    pub target: IndexColumn,
    pub collation: Option<String>,
    /// Non-default operator class
    pub opclass: Option<String>,
    pub descending: bool,
    pub nulls_first: bool,
}

impl IndexKey {
    /// Ascending key with default collation and operator class
    pub fn new(target: IndexColumn) -> Self {
        Self {
            target,
            collation: None,
            opclass: None,
            descending: false,
            nulls_first: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// Parse a pg_constraint action code or an SQL action phrase
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "A" | "NO ACTION" | "" => Some(ReferentialAction::NoAction),
            "R" | "RESTRICT" => Some(ReferentialAction::Restrict),
            "C" | "CASCADE" => Some(ReferentialAction::Cascade),
            "N" | "SET NULL" => Some(ReferentialAction::SetNull),
            "D" | "SET DEFAULT" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    pub table: RelationName,
    pub columns: Vec<String>,
    pub referenced_table: RelationName,
    pub referenced_columns: Vec<String>,
    pub on_update: ReferentialAction,
    pub on_delete: ReferentialAction,
    pub deferrable: bool,
    pub initially_deferred: bool,
}

impl ForeignKeyDef {
    pub fn is_self_referencing(&self) -> bool {
        self.table == self.referenced_table
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDef {
    /// Explicit output column names, empty when the query names them
    pub columns: Vec<String>,
    pub body: String,
    pub materialized: bool,
    pub references: Vec<RelationName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDef {
    pub table: RelationName,
    pub definition: String,
    /// Function the trigger executes, as `schema` + `name(args)`
    pub function: Option<RelationName>,
}
