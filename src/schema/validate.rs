//! Structural validation of a canonical schema

use super::{ConstraintKind, Schema, Table};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("table name must not be empty")]
    EmptyTableName,
    #[error("table '{0}' is declared more than once")]
    DuplicateTable(String),
    #[error("table '{table}' has a column without a name")]
    EmptyColumnName { table: String },
    #[error("column '{column}' is declared more than once in table '{table}'")]
    DuplicateColumn { table: String, column: String },
    #[error("constraint '{name}' is declared more than once in table '{table}'")]
    DuplicateConstraint { table: String, name: String },
    #[error("index '{name}' is declared more than once in table '{table}'")]
    DuplicateIndex { table: String, name: String },
    #[error("'{object}' on table '{table}' has an empty column list")]
    EmptyColumnList { table: String, object: String },
    #[error("'{object}' on table '{table}' refers to unknown column '{column}'")]
    UnknownColumn {
        table: String,
        object: String,
        column: String,
    },
    #[error("foreign key '{constraint}' on table '{table}' references unknown table '{references}'")]
    UnknownReferencedTable {
        table: String,
        constraint: String,
        references: String,
    },
    #[error("foreign key '{constraint}' on table '{table}' references unknown column '{references}.{column}'")]
    UnknownReferencedColumn {
        table: String,
        constraint: String,
        references: String,
        column: String,
    },
    #[error("foreign key '{constraint}' on table '{table}' pairs {local} column(s) with {referenced} referenced column(s)")]
    ForeignKeyArity {
        table: String,
        constraint: String,
        local: usize,
        referenced: usize,
    },
    #[error("table '{0}' declares more than one primary key")]
    MultiplePrimaryKeys(String),
}

/// Check a canonicalized schema for structural mistakes.
///
/// Returns the first problem found. Expects constraint and index names to be
/// filled in, i.e. the input has been through [`super::canonicalize`].
pub fn validate(schema: &Schema) -> Result<(), SchemaError> {
    let mut table_names = HashSet::new();
    for table in &schema.tables {
        if table.name.is_empty() {
            return Err(SchemaError::EmptyTableName);
        }
        if !table_names.insert(table.name.as_str()) {
            return Err(SchemaError::DuplicateTable(table.name.clone()));
        }
    }

    for table in &schema.tables {
        validate_table(schema, table)?;
    }
    Ok(())
}

fn validate_table(schema: &Schema, table: &Table) -> Result<(), SchemaError> {
    let mut columns = HashSet::new();
    for column in &table.columns {
        if column.name.is_empty() {
            return Err(SchemaError::EmptyColumnName {
                table: table.name.clone(),
            });
        }
        if !columns.insert(column.name.as_str()) {
            return Err(SchemaError::DuplicateColumn {
                table: table.name.clone(),
                column: column.name.clone(),
            });
        }
    }

    let check_columns = |object: &str, names: &[String]| -> Result<(), SchemaError> {
        if names.is_empty() {
            return Err(SchemaError::EmptyColumnList {
                table: table.name.clone(),
                object: object.to_string(),
            });
        }
        match names.iter().find(|n| !columns.contains(n.as_str())) {
            Some(missing) => Err(SchemaError::UnknownColumn {
                table: table.name.clone(),
                object: object.to_string(),
                column: missing.clone(),
            }),
            None => Ok(()),
        }
    };

    let mut constraint_names = HashSet::new();
    let mut primary_keys = 0;
    for constraint in &table.constraints {
        let name = constraint.name();
        if !constraint_names.insert(name) {
            return Err(SchemaError::DuplicateConstraint {
                table: table.name.clone(),
                name: name.to_string(),
            });
        }

        match &constraint.kind {
            ConstraintKind::PrimaryKey { columns } => {
                primary_keys += 1;
                check_columns(name, columns)?;
            }
            ConstraintKind::Unique { columns } => check_columns(name, columns)?,
            ConstraintKind::ForeignKey {
                columns,
                references,
                referenced_columns,
                ..
            } => {
                check_columns(name, columns)?;
                if columns.len() != referenced_columns.len() {
                    return Err(SchemaError::ForeignKeyArity {
                        table: table.name.clone(),
                        constraint: name.to_string(),
                        local: columns.len(),
                        referenced: referenced_columns.len(),
                    });
                }
                let target = schema.find_table(references).ok_or_else(|| {
                    SchemaError::UnknownReferencedTable {
                        table: table.name.clone(),
                        constraint: name.to_string(),
                        references: references.clone(),
                    }
                })?;
                if let Some(missing) = referenced_columns.iter().find(|c| !target.has_column(c)) {
                    return Err(SchemaError::UnknownReferencedColumn {
                        table: table.name.clone(),
                        constraint: name.to_string(),
                        references: references.clone(),
                        column: missing.clone(),
                    });
                }
            }
            ConstraintKind::Check { .. } => {}
        }
    }
    if primary_keys > 1 {
        return Err(SchemaError::MultiplePrimaryKeys(table.name.clone()));
    }

    let mut index_names = HashSet::new();
    for index in &table.indexes {
        if !index_names.insert(index.name()) {
            return Err(SchemaError::DuplicateIndex {
                table: table.name.clone(),
                name: index.name().to_string(),
            });
        }
        check_columns(index.name(), &index.columns)?;
    }

    Ok(())
}
