//! DDL renderer
//!
//! Translates [`Operation`]s into SQL text for one [`Dialect`]. The renderer
//! never reorders anything: operation order is dependency order and comes
//! from the diff engine. Statements are returned without the trailing
//! semicolon; [`MigrationScript`] adds separators when it writes a file.

mod dialect;
mod script;

pub use dialect::Dialect;
pub use script::{split_statements, MigrationScript, ScriptHeader};

use crate::operation::{Operation, RenamedObject};
use crate::schema::{Column, Constraint, ConstraintKind, Index, ReferentialAction, Table};
use std::fmt::Write;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("{dialect} cannot express '{operation}': {reason}")]
    Unsupported {
        dialect: Dialect,
        operation: String,
        reason: String,
    },
}

/// The statements for one operation, with the operation's description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedOperation {
    pub description: String,
    pub statements: Vec<String>,
    /// Whether running the statements discards data.
    pub destructive: bool,
}

/// Render every operation in order.
pub fn render(operations: &[Operation], dialect: Dialect) -> Result<Vec<RenderedOperation>, RenderError> {
    operations
        .iter()
        .map(|operation| {
            Ok(RenderedOperation {
                description: operation.to_string(),
                statements: render_operation(operation, dialect)?,
                destructive: operation.is_destructive(),
            })
        })
        .collect()
}

/// Render one operation into one or more statements.
pub fn render_operation(operation: &Operation, dialect: Dialect) -> Result<Vec<String>, RenderError> {
    let sql = Sql { dialect };
    let unsupported = |reason: &str| RenderError::Unsupported {
        dialect,
        operation: operation.to_string(),
        reason: reason.to_string(),
    };

    let statements = match operation {
        Operation::CreateTable { table } => sql.create_table(table),

        Operation::DropTable { name } => vec![format!("DROP TABLE {}", sql.q(name))],

        Operation::RenameTable { from, to, objects } => {
            let mut statements = vec![match dialect {
                Dialect::MySql => format!("RENAME TABLE {} TO {}", sql.q(from), sql.q(to)),
                Dialect::Postgres | Dialect::Sqlite => {
                    format!("ALTER TABLE {} RENAME TO {}", sql.q(from), sql.q(to))
                }
            }];
            statements.extend(sql.rename_objects(to, objects));
            statements
        }

        Operation::AddColumn { table, column } => vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            sql.q(table),
            sql.column_definition(column)
        )],

        Operation::DropColumn { table, column } => vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            sql.q(table),
            sql.q(column)
        )],

        Operation::RenameColumn {
            table,
            from,
            to,
            objects,
        } => {
            let mut statements = vec![format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                sql.q(table),
                sql.q(from),
                sql.q(to)
            )];
            statements.extend(sql.rename_objects(table, objects));
            statements
        }

        Operation::AlterColumnType { table, column, .. } => match dialect {
            Dialect::Postgres => {
                let ty = dialect.column_type(&column.column_type);
                vec![format!(
                    "ALTER TABLE {} ALTER COLUMN {} TYPE {ty} USING {}::{ty}",
                    sql.q(table),
                    sql.q(&column.name),
                    sql.q(&column.name),
                )]
            }
            Dialect::MySql => vec![sql.modify_column(table, column)],
            Dialect::Sqlite => return Err(unsupported("SQLite cannot change a column type in place")),
        },

        Operation::AlterColumnNullability { table, column, .. } => match dialect {
            Dialect::Postgres => {
                let action = if column.nullable { "DROP" } else { "SET" };
                vec![format!(
                    "ALTER TABLE {} ALTER COLUMN {} {action} NOT NULL",
                    sql.q(table),
                    sql.q(&column.name)
                )]
            }
            Dialect::MySql => vec![sql.modify_column(table, column)],
            Dialect::Sqlite => {
                return Err(unsupported("SQLite cannot change column nullability in place"))
            }
        },

        Operation::AlterColumnDefault { table, column, .. } => match dialect {
            Dialect::Postgres => {
                let action = match &column.default {
                    Some(default) => format!("SET DEFAULT {}", dialect.default_literal(default)),
                    None => "DROP DEFAULT".to_string(),
                };
                vec![format!(
                    "ALTER TABLE {} ALTER COLUMN {} {action}",
                    sql.q(table),
                    sql.q(&column.name)
                )]
            }
            Dialect::MySql => vec![sql.modify_column(table, column)],
            Dialect::Sqlite => {
                return Err(unsupported("SQLite cannot change a column default in place"))
            }
        },

        Operation::AddConstraint { table, constraint } => match dialect {
            Dialect::Sqlite => {
                return Err(unsupported("SQLite cannot add constraints to an existing table"))
            }
            _ => vec![sql.add_constraint(table, constraint)],
        },

        Operation::DropConstraint { table, constraint } => match dialect {
            Dialect::Sqlite => {
                return Err(unsupported("SQLite cannot drop constraints from an existing table"))
            }
            _ => vec![sql.drop_constraint(table, constraint)],
        },

        Operation::AddIndex { table, index } => vec![sql.create_index(table, index)],

        Operation::DropIndex { table, index } => vec![sql.drop_index(table, index.name())],
    };

    Ok(statements)
}

/// Statement builders for one dialect.
struct Sql {
    dialect: Dialect,
}

impl Sql {
    fn q(&self, ident: &str) -> String {
        self.dialect.quote_ident(ident)
    }

    fn create_table(&self, table: &Table) -> Vec<String> {
        let mut lines: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect();
        lines.extend(table.constraints.iter().map(|c| {
            format!(
                "CONSTRAINT {} {}",
                self.q(c.name()),
                self.constraint_body(c)
            )
        }));

        let mut sql = String::new();
        let _ = writeln!(sql, "CREATE TABLE {} (", self.q(&table.name));
        let _ = write!(sql, "    {}", lines.join(",\n    "));
        sql.push_str("\n)");

        let mut statements = vec![sql];
        statements.extend(table.indexes.iter().map(|i| self.create_index(&table.name, i)));
        statements
    }

    fn column_definition(&self, column: &Column) -> String {
        let mut sql = format!(
            "{} {}",
            self.q(&column.name),
            self.dialect.column_type(&column.column_type)
        );
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            let _ = write!(sql, " DEFAULT {}", self.dialect.default_literal(default));
        }
        sql
    }

    fn modify_column(&self, table: &str, column: &Column) -> String {
        format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            self.q(table),
            self.column_definition(column)
        )
    }

    fn constraint_body(&self, constraint: &Constraint) -> String {
        match &constraint.kind {
            ConstraintKind::PrimaryKey { columns } => {
                format!("PRIMARY KEY ({})", self.dialect.quote_idents(columns))
            }
            ConstraintKind::Unique { columns } => {
                format!("UNIQUE ({})", self.dialect.quote_idents(columns))
            }
            ConstraintKind::ForeignKey {
                columns,
                references,
                referenced_columns,
                on_delete,
                on_update,
            } => {
                let mut sql = format!(
                    "FOREIGN KEY ({}) REFERENCES {} ({})",
                    self.dialect.quote_idents(columns),
                    self.q(references),
                    self.dialect.quote_idents(referenced_columns)
                );
                if *on_delete != ReferentialAction::NoAction {
                    let _ = write!(sql, " ON DELETE {on_delete}");
                }
                if *on_update != ReferentialAction::NoAction {
                    let _ = write!(sql, " ON UPDATE {on_update}");
                }
                sql
            }
            ConstraintKind::Check { expression } => format!("CHECK ({expression})"),
        }
    }

    fn add_constraint(&self, table: &str, constraint: &Constraint) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}",
            self.q(table),
            self.q(constraint.name()),
            self.constraint_body(constraint)
        )
    }

    fn drop_constraint(&self, table: &str, constraint: &Constraint) -> String {
        let table = self.q(table);
        let name = self.q(constraint.name());
        match self.dialect {
            Dialect::MySql => match constraint.kind {
                ConstraintKind::PrimaryKey { .. } => format!("ALTER TABLE {table} DROP PRIMARY KEY"),
                ConstraintKind::Unique { .. } => format!("ALTER TABLE {table} DROP INDEX {name}"),
                ConstraintKind::ForeignKey { .. } => {
                    format!("ALTER TABLE {table} DROP FOREIGN KEY {name}")
                }
                ConstraintKind::Check { .. } => format!("ALTER TABLE {table} DROP CHECK {name}"),
            },
            _ => format!("ALTER TABLE {table} DROP CONSTRAINT {name}"),
        }
    }

    fn create_index(&self, table: &str, index: &Index) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        format!(
            "CREATE {unique}INDEX {} ON {} ({})",
            self.q(index.name()),
            self.q(table),
            self.dialect.quote_idents(&index.columns)
        )
    }

    fn drop_index(&self, table: &str, name: &str) -> String {
        match self.dialect {
            Dialect::MySql => format!("DROP INDEX {} ON {}", self.q(name), self.q(table)),
            _ => format!("DROP INDEX {}", self.q(name)),
        }
    }

    /// Follow-up statements renaming constraints and indexes on `table`.
    fn rename_objects(&self, table: &str, objects: &[RenamedObject]) -> Vec<String> {
        let mut statements = Vec::new();
        for object in objects {
            match (self.dialect, object) {
                (Dialect::Postgres, RenamedObject::Constraint { from, constraint }) => {
                    statements.push(format!(
                        "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
                        self.q(table),
                        self.q(from),
                        self.q(constraint.name())
                    ))
                }
                (Dialect::Postgres, RenamedObject::Index { from, index }) => statements.push(
                    format!("ALTER INDEX {} RENAME TO {}", self.q(from), self.q(index.name())),
                ),

                (Dialect::MySql, RenamedObject::Constraint { from, constraint }) => {
                    match &constraint.kind {
                        // The primary key is always called PRIMARY.
                        ConstraintKind::PrimaryKey { .. } => {}
                        ConstraintKind::Unique { .. } => statements.push(format!(
                            "ALTER TABLE {} RENAME INDEX {} TO {}",
                            self.q(table),
                            self.q(from),
                            self.q(constraint.name())
                        )),
                        ConstraintKind::ForeignKey { .. } | ConstraintKind::Check { .. } => {
                            let mut old = constraint.clone();
                            old.name = Some(from.clone());
                            statements.push(self.drop_constraint(table, &old));
                            statements.push(self.add_constraint(table, constraint));
                        }
                    }
                }
                (Dialect::MySql, RenamedObject::Index { from, index }) => {
                    statements.push(format!(
                        "ALTER TABLE {} RENAME INDEX {} TO {}",
                        self.q(table),
                        self.q(from),
                        self.q(index.name())
                    ))
                }

                // Constraint names are not addressable in SQLite.
                (Dialect::Sqlite, RenamedObject::Constraint { .. }) => {}
                (Dialect::Sqlite, RenamedObject::Index { from, index }) => {
                    statements.push(self.drop_index(table, from));
                    statements.push(self.create_index(table, index));
                }
            }
        }
        statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{canonicalize, ColumnType, DefaultValue, Schema};

    fn users() -> Table {
        let schema = canonicalize(
            &Schema::new().table(
                Table::new("users")
                    .column(Column::new("id", ColumnType::Integer).not_null())
                    .column(Column::new("name", ColumnType::Varchar { length: 50 }).not_null())
                    .column(Column::new("email", ColumnType::Varchar { length: 50 }))
                    .primary_key(["id"])
                    .unique(["email"]),
            ),
        );
        schema.tables[0].clone()
    }

    #[test]
    fn test_create_table_postgres() {
        let statements = render_operation(
            &Operation::CreateTable { table: users() },
            Dialect::Postgres,
        )
        .unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0],
            "CREATE TABLE \"users\" (\n    \"id\" INTEGER NOT NULL,\n    \"name\" VARCHAR(50) NOT NULL,\n    \"email\" VARCHAR(50),\n    CONSTRAINT \"users_email_key\" UNIQUE (\"email\"),\n    CONSTRAINT \"users_pkey\" PRIMARY KEY (\"id\")\n)"
        );
    }

    #[test]
    fn test_create_table_with_index() {
        let mut table = users();
        table.indexes.push(Index::new(["name"]).named("users_name_idx"));
        let statements =
            render_operation(&Operation::CreateTable { table }, Dialect::MySql).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE `users` ("));
        assert_eq!(
            statements[1],
            "CREATE INDEX `users_name_idx` ON `users` (`name`)"
        );
    }

    #[test]
    fn test_alter_column_type() {
        let op = Operation::AlterColumnType {
            table: "users".to_string(),
            column: Column::new("id", ColumnType::BigInt).not_null(),
            from: ColumnType::Integer,
        };
        assert_eq!(
            render_operation(&op, Dialect::Postgres).unwrap(),
            ["ALTER TABLE \"users\" ALTER COLUMN \"id\" TYPE BIGINT USING \"id\"::BIGINT"]
        );
        assert_eq!(
            render_operation(&op, Dialect::MySql).unwrap(),
            ["ALTER TABLE `users` MODIFY COLUMN `id` BIGINT NOT NULL"]
        );
        assert!(matches!(
            render_operation(&op, Dialect::Sqlite),
            Err(RenderError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_alter_default() {
        let op = Operation::AlterColumnDefault {
            table: "users".to_string(),
            column: Column::new("name", ColumnType::Text)
                .default_value(DefaultValue::Text("o'brien".to_string())),
            from: None,
        };
        assert_eq!(
            render_operation(&op, Dialect::Postgres).unwrap(),
            ["ALTER TABLE \"users\" ALTER COLUMN \"name\" SET DEFAULT 'o''brien'"]
        );
    }

    #[test]
    fn test_drop_constraint_mysql_uses_kind() {
        let table = users();
        let pk = table.find_constraint("users_pkey").unwrap().clone();
        let unique = table.find_constraint("users_email_key").unwrap().clone();
        let drop = |constraint| Operation::DropConstraint {
            table: "users".to_string(),
            constraint,
        };
        assert_eq!(
            render_operation(&drop(pk.clone()), Dialect::MySql).unwrap(),
            ["ALTER TABLE `users` DROP PRIMARY KEY"]
        );
        assert_eq!(
            render_operation(&drop(unique), Dialect::MySql).unwrap(),
            ["ALTER TABLE `users` DROP INDEX `users_email_key`"]
        );
        assert_eq!(
            render_operation(&drop(pk), Dialect::Postgres).unwrap(),
            ["ALTER TABLE \"users\" DROP CONSTRAINT \"users_pkey\""]
        );
    }

    #[test]
    fn test_foreign_key_actions() {
        let constraint = Constraint::named(
            "posts_author_id_fkey",
            ConstraintKind::ForeignKey {
                columns: vec!["author_id".to_string()],
                references: "users".to_string(),
                referenced_columns: vec!["id".to_string()],
                on_delete: ReferentialAction::Cascade,
                on_update: ReferentialAction::NoAction,
            },
        );
        let op = Operation::AddConstraint {
            table: "posts".to_string(),
            constraint,
        };
        assert_eq!(
            render_operation(&op, Dialect::Postgres).unwrap(),
            ["ALTER TABLE \"posts\" ADD CONSTRAINT \"posts_author_id_fkey\" FOREIGN KEY (\"author_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE"]
        );
        assert!(render_operation(&op, Dialect::Sqlite).is_err());
    }

    #[test]
    fn test_rename_table_renames_objects() {
        let op = Operation::RenameTable {
            from: "users".to_string(),
            to: "accounts".to_string(),
            objects: vec![
                RenamedObject::Constraint {
                    from: "users_pkey".to_string(),
                    constraint: Constraint::named(
                        "accounts_pkey",
                        ConstraintKind::PrimaryKey {
                            columns: vec!["id".to_string()],
                        },
                    ),
                },
                RenamedObject::Index {
                    from: "users_name_idx".to_string(),
                    index: Index::new(["name"]).named("accounts_name_idx"),
                },
            ],
        };
        assert_eq!(
            render_operation(&op, Dialect::Postgres).unwrap(),
            [
                "ALTER TABLE \"users\" RENAME TO \"accounts\"",
                "ALTER TABLE \"accounts\" RENAME CONSTRAINT \"users_pkey\" TO \"accounts_pkey\"",
                "ALTER INDEX \"users_name_idx\" RENAME TO \"accounts_name_idx\"",
            ]
        );
        assert_eq!(
            render_operation(&op, Dialect::Sqlite).unwrap(),
            [
                "ALTER TABLE \"users\" RENAME TO \"accounts\"",
                "DROP INDEX \"users_name_idx\"",
                "CREATE INDEX \"accounts_name_idx\" ON \"accounts\" (\"name\")",
            ]
        );
        assert_eq!(
            render_operation(&op, Dialect::MySql).unwrap(),
            [
                "RENAME TABLE `users` TO `accounts`",
                "ALTER TABLE `accounts` RENAME INDEX `users_name_idx` TO `accounts_name_idx`",
            ]
        );
    }

    #[test]
    fn test_render_keeps_order() {
        let ops = vec![
            Operation::DropIndex {
                table: "users".to_string(),
                index: Index::new(["name"]).named("users_name_idx"),
            },
            Operation::DropColumn {
                table: "users".to_string(),
                column: "name".to_string(),
            },
        ];
        let rendered = render(&ops, Dialect::MySql).unwrap();
        assert_eq!(rendered[0].description, "- index users_name_idx on users");
        assert!(!rendered[0].destructive);
        assert!(rendered[1].destructive);
        assert_eq!(
            rendered[0].statements,
            ["DROP INDEX `users_name_idx` ON `users`"]
        );
        assert_eq!(
            rendered[1].statements,
            ["ALTER TABLE `users` DROP COLUMN `name`"]
        );
    }
}
