//! Canonical schema model
//!
//! Plain structured description of a database schema: tables, columns,
//! constraints and indexes. Everything else in the crate (snapshots, the diff
//! engine, the renderer) works on these types.
//!
//! Schemas handed to the crate are usually built by an extraction layer that
//! knows about an application's models. They can also be built in code:
//!
//! ```rust
//! use tidemark::schema::{Column, ColumnType, Schema, Table};
//!
//! let schema = Schema::new().table(
//!     Table::new("users")
//!         .column(Column::new("id", ColumnType::Integer).not_null())
//!         .column(Column::new("email", ColumnType::Varchar { length: 50 }))
//!         .primary_key(["id"])
//!         .unique(["email"]),
//! );
//! assert_eq!(schema.tables.len(), 1);
//! ```

mod canonical;
mod validate;

pub use canonical::{canonicalize, generated_constraint_name, generated_index_name};
pub(crate) use canonical::{has_generated_name, index_has_generated_name};
pub use validate::{validate, SchemaError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// One point-in-time description of a database schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub tables: Vec<Table>,
}

/// A table with its columns, constraints and indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub indexes: Vec<Index>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// Position within the table, assigned by canonicalization.
    #[serde(default)]
    pub ordinal: u32,
}

fn default_nullable() -> bool {
    true
}

/// Logical column type, mapped to concrete SQL per dialect by the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnType {
    SmallInt,
    Integer,
    BigInt,
    Boolean,
    Real,
    Double,
    Decimal { precision: u32, scale: u32 },
    Char { length: u32 },
    Varchar { length: u32 },
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Binary,
    Uuid,
    Json,
    /// Dialect-specific type passed through verbatim.
    Custom { name: String },
}

/// Dialect-neutral default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DefaultValue {
    Null,
    Boolean(bool),
    /// Numeric literal kept as text so that it round-trips exactly.
    Number(String),
    /// String literal; quoted and escaped by the renderer.
    Text(String),
    /// Raw SQL expression emitted verbatim, e.g. `CURRENT_TIMESTAMP`.
    Expression(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Filled in by [`canonicalize`] when not supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: ConstraintKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey {
        columns: Vec<String>,
    },
    Unique {
        columns: Vec<String>,
    },
    ForeignKey {
        columns: Vec<String>,
        references: String,
        referenced_columns: Vec<String>,
        #[serde(default)]
        on_delete: ReferentialAction,
        #[serde(default)]
        on_update: ReferentialAction,
    },
    Check {
        expression: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper to add a table.
    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn find_table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn find_table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Structural equality that ignores column declaration order.
    ///
    /// Both sides are canonicalized first. Columns are compared by name,
    /// type, nullability and default; ordinals are ignored since there is no
    /// operation that reorders columns.
    pub fn structurally_eq(&self, other: &Schema) -> bool {
        let strip = |schema: &Schema| -> Schema {
            let mut schema = canonicalize(schema);
            for table in &mut schema.tables {
                for column in &mut table.columns {
                    column.ordinal = 0;
                }
                table.columns.sort_by(|a, b| a.name.cmp(&b.name));
            }
            schema
        };
        strip(self) == strip(other)
    }
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn primary_key<I, S>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraint(Constraint::new(ConstraintKind::PrimaryKey {
            columns: collect_names(columns),
        }))
    }

    pub fn unique<I, S>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraint(Constraint::new(ConstraintKind::Unique {
            columns: collect_names(columns),
        }))
    }

    /// Adds a foreign key with `NO ACTION` on delete and update.
    pub fn foreign_key<I, S, J, T>(self, columns: I, references: &str, referenced_columns: J) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.constraint(Constraint::new(ConstraintKind::ForeignKey {
            columns: collect_names(columns),
            references: references.to_string(),
            referenced_columns: collect_names(referenced_columns),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        }))
    }

    pub fn check(self, expression: impl Into<String>) -> Self {
        self.constraint(Constraint::new(ConstraintKind::Check {
            expression: expression.into(),
        }))
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.find_column(name).is_some()
    }

    pub fn find_constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.name() == name)
    }

    pub fn find_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name() == name)
    }

    pub fn primary_key_constraint(&self) -> Option<&Constraint> {
        self.constraints
            .iter()
            .find(|c| matches!(c.kind, ConstraintKind::PrimaryKey { .. }))
    }

    /// Foreign keys declared on this table.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(|c| c.is_foreign_key())
    }
}

impl Column {
    /// A nullable column without default.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
            ordinal: 0,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn default_value(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Identity used by rename detection: name, type and nullability.
    pub fn signature(&self) -> (&str, &ColumnType, bool) {
        (&self.name, &self.column_type, self.nullable)
    }
}

impl Constraint {
    pub fn new(kind: ConstraintKind) -> Self {
        Self { name: None, kind }
    }

    pub fn named(name: impl Into<String>, kind: ConstraintKind) -> Self {
        Self {
            name: Some(name.into()),
            kind,
        }
    }

    /// Constraint name, empty until canonicalized when none was supplied.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// Columns of this table the constraint covers. Empty for checks.
    pub fn columns(&self) -> &[String] {
        match &self.kind {
            ConstraintKind::PrimaryKey { columns }
            | ConstraintKind::Unique { columns }
            | ConstraintKind::ForeignKey { columns, .. } => columns,
            ConstraintKind::Check { .. } => &[],
        }
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, ConstraintKind::ForeignKey { .. })
    }

    pub fn is_primary_key(&self) -> bool {
        matches!(self.kind, ConstraintKind::PrimaryKey { .. })
    }

    /// Table referenced by a foreign key.
    pub fn referenced_table(&self) -> Option<&str> {
        match &self.kind {
            ConstraintKind::ForeignKey { references, .. } => Some(references),
            _ => None,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            ConstraintKind::PrimaryKey { .. } => "primary key",
            ConstraintKind::Unique { .. } => "unique",
            ConstraintKind::ForeignKey { .. } => "foreign key",
            ConstraintKind::Check { .. } => "check",
        }
    }
}

impl Index {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            columns: collect_names(columns),
            unique: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

fn collect_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::SmallInt => write!(f, "smallint"),
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::BigInt => write!(f, "bigint"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Real => write!(f, "real"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::Decimal { precision, scale } => write!(f, "decimal({precision}, {scale})"),
            ColumnType::Char { length } => write!(f, "char({length})"),
            ColumnType::Varchar { length } => write!(f, "varchar({length})"),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Date => write!(f, "date"),
            ColumnType::Time => write!(f, "time"),
            ColumnType::Timestamp => write!(f, "timestamp"),
            ColumnType::TimestampTz => write!(f, "timestamptz"),
            ColumnType::Binary => write!(f, "binary"),
            ColumnType::Uuid => write!(f, "uuid"),
            ColumnType::Json => write!(f, "json"),
            ColumnType::Custom { name } => write!(f, "{name}"),
        }
    }
}

impl fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Null => write!(f, "NULL"),
            DefaultValue::Boolean(b) => write!(f, "{b}"),
            DefaultValue::Number(n) => write!(f, "{n}"),
            DefaultValue::Text(s) => write!(f, "'{s}'"),
            DefaultValue::Expression(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        };
        f.write_str(s)
    }
}
