//! Structural change operations and their in-memory simulation
//!
//! An [`Operation`] is one atomic DDL change. The diff engine produces them,
//! the renderer turns them into SQL and [`apply`] replays them against a
//! [`Schema`] value with the same rules a database with foreign key
//! enforcement would apply. Generation uses the latter to prove that every
//! emitted migration leads from the previous snapshot to the requested schema.

use crate::schema::{canonicalize, Column, ColumnType, Constraint, ConstraintKind, DefaultValue, Index, Schema, Table};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create a table. Primary key, unique and check constraints are created
    /// with it, foreign keys only when their target already exists.
    CreateTable { table: Table },
    DropTable { name: String },
    /// Rename a table together with the objects whose generated names derive
    /// from the table name.
    RenameTable {
        from: String,
        to: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        objects: Vec<RenamedObject>,
    },
    AddColumn { table: String, column: Column },
    DropColumn { table: String, column: String },
    RenameColumn {
        table: String,
        from: String,
        to: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        objects: Vec<RenamedObject>,
    },
    /// `column` is the full definition after the change.
    AlterColumnType {
        table: String,
        column: Column,
        from: ColumnType,
    },
    AlterColumnNullability {
        table: String,
        column: Column,
        from: bool,
    },
    AlterColumnDefault {
        table: String,
        column: Column,
        from: Option<DefaultValue>,
    },
    AddConstraint { table: String, constraint: Constraint },
    DropConstraint { table: String, constraint: Constraint },
    AddIndex { table: String, index: Index },
    DropIndex { table: String, index: Index },
}

/// A constraint or index renamed as a side effect of a table or column rename.
///
/// Carries the definition under its new name so that dialects without an
/// in-place rename can recreate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum RenamedObject {
    Constraint { from: String, constraint: Constraint },
    Index { from: String, index: Index },
}

impl RenamedObject {
    pub fn from(&self) -> &str {
        match self {
            RenamedObject::Constraint { from, .. } | RenamedObject::Index { from, .. } => from,
        }
    }

    pub fn to(&self) -> &str {
        match self {
            RenamedObject::Constraint { constraint, .. } => constraint.name(),
            RenamedObject::Index { index, .. } => index.name(),
        }
    }
}

impl Operation {
    /// The table the operation acts on (the new name for renames).
    pub fn table_name(&self) -> &str {
        match self {
            Operation::CreateTable { table } => &table.name,
            Operation::DropTable { name } => name,
            Operation::RenameTable { to, .. } => to,
            Operation::AddColumn { table, .. }
            | Operation::DropColumn { table, .. }
            | Operation::RenameColumn { table, .. }
            | Operation::AlterColumnType { table, .. }
            | Operation::AlterColumnNullability { table, .. }
            | Operation::AlterColumnDefault { table, .. }
            | Operation::AddConstraint { table, .. }
            | Operation::DropConstraint { table, .. }
            | Operation::AddIndex { table, .. }
            | Operation::DropIndex { table, .. } => table,
        }
    }

    /// Operations that discard data.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Operation::DropTable { .. } | Operation::DropColumn { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateTable { .. } => "CreateTable",
            Operation::DropTable { .. } => "DropTable",
            Operation::RenameTable { .. } => "RenameTable",
            Operation::AddColumn { .. } => "AddColumn",
            Operation::DropColumn { .. } => "DropColumn",
            Operation::RenameColumn { .. } => "RenameColumn",
            Operation::AlterColumnType { .. } => "AlterColumnType",
            Operation::AlterColumnNullability { .. } => "AlterColumnNullability",
            Operation::AlterColumnDefault { .. } => "AlterColumnDefault",
            Operation::AddConstraint { .. } => "AddConstraint",
            Operation::DropConstraint { .. } => "DropConstraint",
            Operation::AddIndex { .. } => "AddIndex",
            Operation::DropIndex { .. } => "DropIndex",
        }
    }
}

fn nullability(nullable: bool) -> &'static str {
    if nullable {
        "nullable"
    } else {
        "not null"
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateTable { table } => write!(f, "+ table {}", table.name),
            Operation::DropTable { name } => write!(f, "- table {name}"),
            Operation::RenameTable { from, to, .. } => write!(f, "~ rename table {from} -> {to}"),
            Operation::AddColumn { table, column } => {
                write!(f, "+ column {table}.{} {}", column.name, column.column_type)?;
                if !column.nullable {
                    write!(f, " not null")?;
                }
                Ok(())
            }
            Operation::DropColumn { table, column } => write!(f, "- column {table}.{column}"),
            Operation::RenameColumn { table, from, to, .. } => {
                write!(f, "~ rename column {table}.{from} -> {to}")
            }
            Operation::AlterColumnType { table, column, from } => write!(
                f,
                "~ column {table}.{} type {from} -> {}",
                column.name, column.column_type
            ),
            Operation::AlterColumnNullability { table, column, from } => write!(
                f,
                "~ column {table}.{} {} -> {}",
                column.name,
                nullability(*from),
                nullability(column.nullable)
            ),
            Operation::AlterColumnDefault { table, column, from } => {
                let show = |d: &Option<DefaultValue>| {
                    d.as_ref().map_or_else(|| "(none)".to_string(), ToString::to_string)
                };
                write!(
                    f,
                    "~ column {table}.{} default {} -> {}",
                    column.name,
                    show(from),
                    show(&column.default)
                )
            }
            Operation::AddConstraint { table, constraint } => write!(
                f,
                "+ {} {} on {table}",
                constraint.kind_label(),
                constraint.name()
            ),
            Operation::DropConstraint { table, constraint } => write!(
                f,
                "- {} {} on {table}",
                constraint.kind_label(),
                constraint.name()
            ),
            Operation::AddIndex { table, index } => {
                let unique = if index.unique { "unique " } else { "" };
                write!(f, "+ {unique}index {} on {table}", index.name())
            }
            Operation::DropIndex { table, index } => write!(f, "- index {} on {table}", index.name()),
        }
    }
}

/// Reasons an operation cannot be applied to a schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("{change}: table '{table}' does not exist")]
    TableNotFound { change: String, table: String },
    #[error("{change}: table '{table}' already exists")]
    TableAlreadyExists { change: String, table: String },
    #[error("{change}: column '{table}.{column}' does not exist")]
    ColumnNotFound {
        change: String,
        table: String,
        column: String,
    },
    #[error("{change}: column '{table}.{column}' already exists")]
    ColumnAlreadyExists {
        change: String,
        table: String,
        column: String,
    },
    #[error("{change}: '{name}' does not exist on table '{table}'")]
    ObjectNotFound {
        change: String,
        table: String,
        name: String,
    },
    #[error("{change}: '{name}' already exists on table '{table}'")]
    ObjectAlreadyExists {
        change: String,
        table: String,
        name: String,
    },
    #[error("{change}: foreign key target '{target}' does not exist")]
    ForeignKeyTargetNotFound { change: String, target: String },
    #[error("{change}: foreign key target '{target}' has no column(s) {columns:?}")]
    ForeignKeyColumnsNotFound {
        change: String,
        target: String,
        columns: Vec<String>,
    },
    #[error("{change}: table '{table}' is still referenced by '{referenced_by}'")]
    TableReferenced {
        change: String,
        table: String,
        referenced_by: String,
    },
    #[error("{change}: column '{table}.{column}' is still used by '{object}'")]
    ColumnInUse {
        change: String,
        table: String,
        column: String,
        object: String,
    },
}

/// Replay `operations` in order against a copy of `schema`.
///
/// The result is canonicalized. Fails on the first operation that a database
/// with foreign key enforcement would reject.
pub fn apply(schema: &Schema, operations: &[Operation]) -> Result<Schema, ApplyError> {
    let mut schema = schema.clone();
    for operation in operations {
        apply_operation(&mut schema, operation)?;
    }
    Ok(canonicalize(&schema))
}

fn apply_operation(schema: &mut Schema, operation: &Operation) -> Result<(), ApplyError> {
    let change = || operation.to_string();

    match operation {
        Operation::CreateTable { table } => {
            if schema.find_table(&table.name).is_some() {
                return Err(ApplyError::TableAlreadyExists {
                    change: change(),
                    table: table.name.clone(),
                });
            }
            for constraint in &table.constraints {
                check_object_columns(table, constraint.name(), constraint.columns(), &change)?;
                check_foreign_key_target(schema, Some(table), constraint, &change)?;
            }
            for index in &table.indexes {
                check_object_columns(table, index.name(), &index.columns, &change)?;
            }
            schema.tables.push(table.clone());
        }

        Operation::DropTable { name } => {
            table_ref(schema, name, &change)?;
            let referencing = schema.tables.iter().find(|t| {
                t.name != *name && t.foreign_keys().any(|fk| fk.referenced_table() == Some(name.as_str()))
            });
            if let Some(other) = referencing {
                return Err(ApplyError::TableReferenced {
                    change: change(),
                    table: name.clone(),
                    referenced_by: other.name.clone(),
                });
            }
            schema.tables.retain(|t| t.name != *name);
        }

        Operation::RenameTable { from, to, objects } => {
            let source = table_ref(schema, from, &change)?;
            check_renamed_objects(source, objects, &change)?;
            if schema.find_table(to).is_some() {
                return Err(ApplyError::TableAlreadyExists {
                    change: change(),
                    table: to.clone(),
                });
            }
            rename_table(schema, from, to, objects);
        }

        Operation::AddColumn { table, column } => {
            let target = table_mut(schema, table, &change)?;
            if target.has_column(&column.name) {
                return Err(ApplyError::ColumnAlreadyExists {
                    change: change(),
                    table: table.clone(),
                    column: column.name.clone(),
                });
            }
            let mut column = column.clone();
            column.ordinal = target.columns.len() as u32;
            target.columns.push(column);
        }

        Operation::DropColumn { table, column } => {
            let target = table_ref(schema, table, &change)?;
            column_ref(target, column, &change)?;
            let user = target
                .constraints
                .iter()
                .find(|c| c.columns().contains(column))
                .map(|c| c.name().to_string())
                .or_else(|| {
                    target
                        .indexes
                        .iter()
                        .find(|i| i.columns.contains(column))
                        .map(|i| i.name().to_string())
                })
                .or_else(|| {
                    foreign_keys_referencing(schema, table, column)
                        .next()
                        .map(|(t, c)| format!("{t}.{}", c.name()))
                });
            if let Some(object) = user {
                return Err(ApplyError::ColumnInUse {
                    change: change(),
                    table: table.clone(),
                    column: column.clone(),
                    object,
                });
            }
            table_mut(schema, table, &change)?
                .columns
                .retain(|c| c.name != *column);
        }

        Operation::RenameColumn {
            table,
            from,
            to,
            objects,
        } => {
            let target = table_ref(schema, table, &change)?;
            column_ref(target, from, &change)?;
            check_renamed_objects(target, objects, &change)?;
            if target.has_column(to) {
                return Err(ApplyError::ColumnAlreadyExists {
                    change: change(),
                    table: table.clone(),
                    column: to.clone(),
                });
            }
            rename_column(schema, table, from, to, objects);
        }

        Operation::AlterColumnType { table, column, .. } => {
            column_mut(schema, table, &column.name, &change)?.column_type =
                column.column_type.clone();
        }

        Operation::AlterColumnNullability { table, column, .. } => {
            column_mut(schema, table, &column.name, &change)?.nullable = column.nullable;
        }

        Operation::AlterColumnDefault { table, column, .. } => {
            column_mut(schema, table, &column.name, &change)?.default = column.default.clone();
        }

        Operation::AddConstraint { table, constraint } => {
            let target = table_ref(schema, table, &change)?;
            if target.find_constraint(constraint.name()).is_some() {
                return Err(ApplyError::ObjectAlreadyExists {
                    change: change(),
                    table: table.clone(),
                    name: constraint.name().to_string(),
                });
            }
            check_object_columns(target, constraint.name(), constraint.columns(), &change)?;
            check_foreign_key_target(schema, None, constraint, &change)?;
            table_mut(schema, table, &change)?
                .constraints
                .push(constraint.clone());
        }

        Operation::DropConstraint { table, constraint } => {
            let target = table_mut(schema, table, &change)?;
            let position = target
                .constraints
                .iter()
                .position(|c| c.name() == constraint.name())
                .ok_or_else(|| ApplyError::ObjectNotFound {
                    change: change(),
                    table: table.clone(),
                    name: constraint.name().to_string(),
                })?;
            target.constraints.remove(position);
        }

        Operation::AddIndex { table, index } => {
            let target = table_ref(schema, table, &change)?;
            if target.find_index(index.name()).is_some() {
                return Err(ApplyError::ObjectAlreadyExists {
                    change: change(),
                    table: table.clone(),
                    name: index.name().to_string(),
                });
            }
            check_object_columns(target, index.name(), &index.columns, &change)?;
            table_mut(schema, table, &change)?.indexes.push(index.clone());
        }

        Operation::DropIndex { table, index } => {
            let target = table_mut(schema, table, &change)?;
            let position = target
                .indexes
                .iter()
                .position(|i| i.name() == index.name())
                .ok_or_else(|| ApplyError::ObjectNotFound {
                    change: change(),
                    table: table.clone(),
                    name: index.name().to_string(),
                })?;
            target.indexes.remove(position);
        }
    }
    Ok(())
}

fn table_ref<'a>(
    schema: &'a Schema,
    name: &str,
    change: &impl Fn() -> String,
) -> Result<&'a Table, ApplyError> {
    schema.find_table(name).ok_or_else(|| ApplyError::TableNotFound {
        change: change(),
        table: name.to_string(),
    })
}

fn table_mut<'a>(
    schema: &'a mut Schema,
    name: &str,
    change: &impl Fn() -> String,
) -> Result<&'a mut Table, ApplyError> {
    schema
        .find_table_mut(name)
        .ok_or_else(|| ApplyError::TableNotFound {
            change: change(),
            table: name.to_string(),
        })
}

fn column_ref<'a>(
    table: &'a Table,
    name: &str,
    change: &impl Fn() -> String,
) -> Result<&'a Column, ApplyError> {
    table.find_column(name).ok_or_else(|| ApplyError::ColumnNotFound {
        change: change(),
        table: table.name.clone(),
        column: name.to_string(),
    })
}

fn column_mut<'a>(
    schema: &'a mut Schema,
    table: &str,
    name: &str,
    change: &impl Fn() -> String,
) -> Result<&'a mut Column, ApplyError> {
    table_mut(schema, table, change)?
        .columns
        .iter_mut()
        .find(|c| c.name == name)
        .ok_or_else(|| ApplyError::ColumnNotFound {
            change: change(),
            table: table.to_string(),
            column: name.to_string(),
        })
}

fn check_object_columns(
    table: &Table,
    object: &str,
    columns: &[String],
    change: &impl Fn() -> String,
) -> Result<(), ApplyError> {
    match columns.iter().find(|c| !table.has_column(c)) {
        Some(missing) => Err(ApplyError::ColumnNotFound {
            change: format!("{} ({object})", change()),
            table: table.name.clone(),
            column: missing.clone(),
        }),
        None => Ok(()),
    }
}

/// `creating` is the table being created, which may reference itself.
fn check_foreign_key_target(
    schema: &Schema,
    creating: Option<&Table>,
    constraint: &Constraint,
    change: &impl Fn() -> String,
) -> Result<(), ApplyError> {
    let ConstraintKind::ForeignKey {
        references,
        referenced_columns,
        ..
    } = &constraint.kind
    else {
        return Ok(());
    };

    let target = match creating {
        Some(table) if table.name == *references => Some(table),
        _ => schema.find_table(references),
    }
    .ok_or_else(|| ApplyError::ForeignKeyTargetNotFound {
        change: change(),
        target: references.clone(),
    })?;

    let missing: Vec<String> = referenced_columns
        .iter()
        .filter(|c| !target.has_column(c))
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApplyError::ForeignKeyColumnsNotFound {
            change: change(),
            target: references.clone(),
            columns: missing,
        })
    }
}

/// Foreign keys in any table that point at `table.column`.
fn foreign_keys_referencing<'a>(
    schema: &'a Schema,
    table: &'a str,
    column: &'a str,
) -> impl Iterator<Item = (&'a str, &'a Constraint)> {
    schema.tables.iter().flat_map(move |t| {
        t.foreign_keys()
            .filter(move |fk| match &fk.kind {
                ConstraintKind::ForeignKey {
                    references,
                    referenced_columns,
                    ..
                } => references == table && referenced_columns.iter().any(|c| c == column),
                _ => false,
            })
            .map(move |fk| (t.name.as_str(), fk))
    })
}

fn rename_column_in_constraint(
    constraint: &mut Constraint,
    is_owner: bool,
    table: &str,
    from: &str,
    to: &str,
) {
    match &mut constraint.kind {
        ConstraintKind::PrimaryKey { columns } | ConstraintKind::Unique { columns } => {
            if is_owner {
                replace_name(columns, from, to);
            }
        }
        ConstraintKind::ForeignKey {
            columns,
            references,
            referenced_columns,
            ..
        } => {
            if is_owner {
                replace_name(columns, from, to);
            }
            if *references == table {
                replace_name(referenced_columns, from, to);
            }
        }
        ConstraintKind::Check { .. } => {}
    }
}

fn replace_name(names: &mut [String], from: &str, to: &str) {
    for name in names.iter_mut() {
        if *name == from {
            *name = to.to_string();
        }
    }
}

fn check_renamed_objects(
    table: &Table,
    objects: &[RenamedObject],
    change: &impl Fn() -> String,
) -> Result<(), ApplyError> {
    let missing = objects.iter().find(|object| match object {
        RenamedObject::Constraint { from, .. } => table.find_constraint(from).is_none(),
        RenamedObject::Index { from, .. } => table.find_index(from).is_none(),
    });
    match missing {
        Some(object) => Err(ApplyError::ObjectNotFound {
            change: change(),
            table: table.name.clone(),
            name: object.from().to_string(),
        }),
        None => Ok(()),
    }
}

/// Rename a table in place and repoint every foreign key at the new name.
pub(crate) fn rename_table(schema: &mut Schema, from: &str, to: &str, objects: &[RenamedObject]) {
    for table in &mut schema.tables {
        for constraint in &mut table.constraints {
            if let ConstraintKind::ForeignKey { references, .. } = &mut constraint.kind {
                if *references == from {
                    *references = to.to_string();
                }
            }
        }
        if table.name == from {
            table.name = to.to_string();
            rename_objects(table, objects);
        }
    }
}

/// Rename a column in place, including its uses in constraints, indexes
/// and foreign keys of other tables.
pub(crate) fn rename_column(
    schema: &mut Schema,
    table: &str,
    from: &str,
    to: &str,
    objects: &[RenamedObject],
) {
    for other in &mut schema.tables {
        let is_owner = other.name == table;
        for constraint in &mut other.constraints {
            rename_column_in_constraint(constraint, is_owner, table, from, to);
        }
        if !is_owner {
            continue;
        }
        for index in &mut other.indexes {
            replace_name(&mut index.columns, from, to);
        }
        for column in &mut other.columns {
            if column.name == from {
                column.name = to.to_string();
            }
        }
        rename_objects(other, objects);
    }
}

fn rename_objects(table: &mut Table, objects: &[RenamedObject]) {
    for object in objects {
        match object {
            RenamedObject::Constraint { from, constraint } => {
                if let Some(c) = table.constraints.iter_mut().find(|c| c.name() == from) {
                    c.name = constraint.name.clone();
                }
            }
            RenamedObject::Index { from, index } => {
                if let Some(i) = table.indexes.iter_mut().find(|i| i.name() == from) {
                    i.name = index.name.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn users() -> Table {
        Table::new("users")
            .column(Column::new("id", ColumnType::Integer).not_null())
            .column(Column::new("email", ColumnType::Text))
            .primary_key(["id"])
    }

    fn posts() -> Table {
        Table::new("posts")
            .column(Column::new("id", ColumnType::Integer).not_null())
            .column(Column::new("author_id", ColumnType::Integer))
            .foreign_key(["author_id"], "users", ["id"])
    }

    fn base() -> Schema {
        canonicalize(&Schema::new().table(users()).table(posts()))
    }

    #[test]
    fn test_create_table_requires_fk_target() {
        let result = apply(
            &Schema::new(),
            &[Operation::CreateTable {
                table: canonicalize(&Schema::new().table(posts())).tables[0].clone(),
            }],
        );
        assert!(matches!(
            result,
            Err(ApplyError::ForeignKeyTargetNotFound { .. })
        ));
    }

    #[test]
    fn test_self_referencing_create() {
        let table = Table::new("nodes")
            .column(Column::new("id", ColumnType::Integer).not_null())
            .column(Column::new("parent_id", ColumnType::Integer))
            .foreign_key(["parent_id"], "nodes", ["id"]);
        let result = apply(&Schema::new(), &[Operation::CreateTable { table }]).unwrap();
        assert_eq!(result.tables.len(), 1);
    }

    #[test]
    fn test_drop_referenced_table_fails() {
        let result = apply(
            &base(),
            &[Operation::DropTable {
                name: "users".to_string(),
            }],
        );
        assert!(matches!(result, Err(ApplyError::TableReferenced { .. })));
    }

    #[test]
    fn test_drop_constrained_column_fails() {
        let result = apply(
            &base(),
            &[Operation::DropColumn {
                table: "posts".to_string(),
                column: "author_id".to_string(),
            }],
        );
        assert!(matches!(result, Err(ApplyError::ColumnInUse { .. })));
    }

    #[test]
    fn test_rename_table_rewrites_references() {
        let result = apply(
            &base(),
            &[Operation::RenameTable {
                from: "users".to_string(),
                to: "accounts".to_string(),
                objects: vec![RenamedObject::Constraint {
                    from: "users_pkey".to_string(),
                    constraint: Constraint::named(
                        "accounts_pkey",
                        ConstraintKind::PrimaryKey {
                            columns: vec!["id".to_string()],
                        },
                    ),
                }],
            }],
        )
        .unwrap();

        let posts = result.find_table("posts").unwrap();
        assert_eq!(
            posts.foreign_keys().next().unwrap().referenced_table(),
            Some("accounts")
        );
        let accounts = result.find_table("accounts").unwrap();
        assert!(accounts.find_constraint("accounts_pkey").is_some());
    }

    #[test]
    fn test_rename_column_rewrites_references() {
        let result = apply(
            &base(),
            &[Operation::RenameColumn {
                table: "users".to_string(),
                from: "id".to_string(),
                to: "user_id".to_string(),
                objects: Vec::new(),
            }],
        )
        .unwrap();
        let users = result.find_table("users").unwrap();
        assert_eq!(users.constraints[0].columns(), ["user_id"]);
        match &result.find_table("posts").unwrap().constraints[0].kind {
            ConstraintKind::ForeignKey {
                referenced_columns, ..
            } => assert_eq!(referenced_columns, &["user_id"]),
            other => panic!("unexpected constraint {other:?}"),
        }
    }

    #[test]
    fn test_add_column_appends() {
        let result = apply(
            &base(),
            &[Operation::AddColumn {
                table: "users".to_string(),
                column: Column::new("age", ColumnType::Integer),
            }],
        )
        .unwrap();
        let users = result.find_table("users").unwrap();
        assert_eq!(users.columns.last().unwrap().name, "age");
        assert_eq!(users.columns.last().unwrap().ordinal, 2);
    }

    #[test]
    fn test_display() {
        let op = Operation::AlterColumnNullability {
            table: "users".to_string(),
            column: Column::new("email", ColumnType::Text).not_null(),
            from: true,
        };
        assert_eq!(op.to_string(), "~ column users.email nullable -> not null");
        assert_eq!(
            Operation::DropTable {
                name: "users".to_string()
            }
            .to_string(),
            "- table users"
        );
    }
}
