//! Snapshot diff engine
//!
//! Computes the ordered list of [`Operation`]s that turns one schema into
//! another. Both inputs are canonicalized first, so callers may pass schemas
//! in any declaration order.
//!
//! The work happens in three steps:
//!
//! 1. Rename detection for tables, then for columns of matched tables. The
//!    accepted renames are applied to a staged copy of the old schema.
//! 2. The staged schema is compared with the new one by name: tables,
//!    columns, constraints and indexes. A changed constraint or index is
//!    dropped and recreated.
//! 3. The resulting changes are emitted in an order that is safe to run
//!    against a database enforcing foreign keys.
//!
//! Emission order:
//!
//! - renames
//! - foreign key drops, then other constraint and index drops
//! - table drops, dependents first
//! - column drops
//! - table creates, referenced tables first; foreign keys that close a cycle
//!   or need a key added later in the same migration are deferred
//! - column additions and alterations
//! - index additions
//! - constraint additions, foreign keys last

mod ordering;
mod rename;

pub use ordering::{topological_order, TopologicalOrder};

use crate::operation::{rename_column, rename_table, Operation, RenamedObject};
use crate::schema::{
    canonicalize, generated_constraint_name, generated_index_name, has_generated_name,
    index_has_generated_name, Constraint, ConstraintKind, Index, Schema, Table,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Rename detection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOptions {
    #[serde(default = "default_true")]
    pub detect_table_renames: bool,
    #[serde(default = "default_true")]
    pub detect_column_renames: bool,
    /// Maximum number of column signatures (name, type, nullability) that
    /// may differ between a dropped and a created table for them to be
    /// considered a rename. `0` requires identical columns.
    #[serde(default)]
    pub table_rename_tolerance: usize,
}

fn default_true() -> bool {
    true
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            detect_table_renames: true,
            detect_column_renames: true,
            table_rename_tolerance: 0,
        }
    }
}

/// Ordered operations plus anything worth telling the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub operations: Vec<Operation>,
    pub warnings: Vec<DiffWarning>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffWarning {
    /// More than one rename candidate; handled as separate drops and creates.
    AmbiguousRename {
        /// Set for column renames.
        table: Option<String>,
        from: Vec<String>,
        to: Vec<String>,
    },
}

impl fmt::Display for DiffWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffWarning::AmbiguousRename { table, from, to } => {
                let what = match table {
                    Some(table) => format!("columns of table '{table}'"),
                    None => "tables".to_string(),
                };
                write!(
                    f,
                    "ambiguous rename of {what}: [{}] could be any of [{}]; treating as drop and create",
                    from.join(", "),
                    to.join(", ")
                )
            }
        }
    }
}

/// Diff with default options.
pub fn diff(old: &Schema, new: &Schema) -> Diff {
    diff_with_options(old, new, &DiffOptions::default())
}

pub fn diff_with_options(old: &Schema, new: &Schema, options: &DiffOptions) -> Diff {
    let old = canonicalize(old);
    let new = canonicalize(new);
    let mut warnings = Vec::new();

    let mut staged = old.clone();
    let mut renames = Vec::new();

    if options.detect_table_renames {
        for operation in detect_table_renames(&old, &new, options, &mut warnings) {
            if let Operation::RenameTable { from, to, objects } = &operation {
                rename_table(&mut staged, from, to, objects);
            }
            renames.push(operation);
        }
    }
    if options.detect_column_renames {
        renames.extend(detect_column_renames(&mut staged, &new, &mut warnings));
    }
    let staged = canonicalize(&staged);

    for warning in &warnings {
        log::warn!("{warning}");
    }

    let mut operations = renames;
    operations.extend(Changes::collect(&staged, &new).into_operations(&staged, &new));

    log::debug!(
        "diff produced {} operation(s), {} warning(s)",
        operations.len(),
        warnings.len()
    );
    Diff {
        operations,
        warnings,
    }
}

fn detect_table_renames(
    old: &Schema,
    new: &Schema,
    options: &DiffOptions,
    warnings: &mut Vec<DiffWarning>,
) -> Vec<Operation> {
    let dropped: Vec<&Table> = old
        .tables
        .iter()
        .filter(|t| new.find_table(&t.name).is_none())
        .collect();
    let created: Vec<&Table> = new
        .tables
        .iter()
        .filter(|t| old.find_table(&t.name).is_none())
        .collect();

    let matched = rename::match_renames(
        &dropped,
        &created,
        |t| t.name.as_str(),
        |o, n| rename::is_table_candidate(o, n, options.table_rename_tolerance),
    );
    warnings.extend(matched.ambiguous.into_iter().map(|(from, to)| {
        DiffWarning::AmbiguousRename {
            table: None,
            from,
            to,
        }
    }));

    matched
        .pairs
        .into_iter()
        .filter_map(|(from, to)| {
            let table = old.find_table(&from)?;
            let objects = renamed_table_objects(table, &to);
            Some(Operation::RenameTable { from, to, objects })
        })
        .collect()
}

/// Constraints and indexes whose generated names follow the table name.
fn renamed_table_objects(table: &Table, to: &str) -> Vec<RenamedObject> {
    let mut objects = Vec::new();
    for constraint in &table.constraints {
        if !has_generated_name(&table.name, constraint) {
            continue;
        }
        let name = generated_constraint_name(to, &constraint.kind);
        if name != constraint.name() {
            objects.push(RenamedObject::Constraint {
                from: constraint.name().to_string(),
                constraint: Constraint::named(name, constraint.kind.clone()),
            });
        }
    }
    for index in &table.indexes {
        if !index_has_generated_name(&table.name, index) {
            continue;
        }
        let name = generated_index_name(to, index);
        if name != index.name() {
            let mut renamed = index.clone();
            renamed.name = Some(name);
            objects.push(RenamedObject::Index {
                from: index.name().to_string(),
                index: renamed,
            });
        }
    }
    objects
}

/// Detects column renames table by table and applies them to `staged`.
fn detect_column_renames(
    staged: &mut Schema,
    new: &Schema,
    warnings: &mut Vec<DiffWarning>,
) -> Vec<Operation> {
    let mut operations = Vec::new();

    for new_table in &new.tables {
        let Some(old_table) = staged.find_table(&new_table.name) else {
            continue;
        };
        let dropped: Vec<_> = old_table
            .columns
            .iter()
            .filter(|c| !new_table.has_column(&c.name))
            .collect();
        let added: Vec<_> = new_table
            .columns
            .iter()
            .filter(|c| !old_table.has_column(&c.name))
            .collect();
        if dropped.is_empty() || added.is_empty() {
            continue;
        }

        let matched = rename::match_renames(
            &dropped,
            &added,
            |c| c.name.as_str(),
            rename::is_column_candidate,
        );
        warnings.extend(matched.ambiguous.into_iter().map(|(from, to)| {
            DiffWarning::AmbiguousRename {
                table: Some(new_table.name.clone()),
                from,
                to,
            }
        }));

        for (from, to) in matched.pairs {
            let objects = match staged.find_table(&new_table.name) {
                Some(table) => renamed_column_objects(table, &from, &to),
                None => Vec::new(),
            };
            rename_column(staged, &new_table.name, &from, &to, &objects);
            operations.push(Operation::RenameColumn {
                table: new_table.name.clone(),
                from,
                to,
                objects,
            });
        }
    }

    operations
}

/// Objects covering a renamed column whose generated names include it.
fn renamed_column_objects(table: &Table, from: &str, to: &str) -> Vec<RenamedObject> {
    let swap = |columns: &[String]| -> Vec<String> {
        columns
            .iter()
            .map(|c| if c == from { to.to_string() } else { c.clone() })
            .collect()
    };

    let mut objects = Vec::new();
    for constraint in &table.constraints {
        if !constraint.columns().iter().any(|c| c == from)
            || !has_generated_name(&table.name, constraint)
        {
            continue;
        }
        let mut kind = constraint.kind.clone();
        match &mut kind {
            ConstraintKind::PrimaryKey { columns }
            | ConstraintKind::Unique { columns }
            | ConstraintKind::ForeignKey { columns, .. } => *columns = swap(columns),
            ConstraintKind::Check { .. } => continue,
        }
        let name = generated_constraint_name(&table.name, &kind);
        if name != constraint.name() {
            objects.push(RenamedObject::Constraint {
                from: constraint.name().to_string(),
                constraint: Constraint::named(name, kind),
            });
        }
    }
    for index in &table.indexes {
        if !index.columns.iter().any(|c| c == from) || !index_has_generated_name(&table.name, index)
        {
            continue;
        }
        let mut renamed = index.clone();
        renamed.columns = swap(&index.columns);
        let name = generated_index_name(&table.name, &renamed);
        if name != index.name() {
            renamed.name = Some(name);
            objects.push(RenamedObject::Index {
                from: index.name().to_string(),
                index: renamed,
            });
        }
    }
    objects
}

/// Differences between the staged old schema and the new one, grouped by
/// the phase they are emitted in.
#[derive(Default)]
struct Changes<'a> {
    dropped_tables: Vec<&'a Table>,
    created_tables: Vec<&'a Table>,
    drop_foreign_keys: Vec<(String, Constraint)>,
    drop_constraints: Vec<(String, Constraint)>,
    drop_indexes: Vec<(String, Index)>,
    drop_columns: Vec<(String, String)>,
    column_changes: Vec<Operation>,
    add_indexes: Vec<(String, Index)>,
    add_constraints: Vec<(String, Constraint)>,
    add_foreign_keys: Vec<(String, Constraint)>,
}

impl<'a> Changes<'a> {
    fn collect(staged: &'a Schema, new: &'a Schema) -> Self {
        let mut changes = Changes::default();

        for table in &staged.tables {
            if new.find_table(&table.name).is_none() {
                changes.dropped_tables.push(table);
            }
        }
        for table in &new.tables {
            match staged.find_table(&table.name) {
                None => changes.created_tables.push(table),
                Some(old) => changes.compare_table(old, table),
            }
        }
        changes
    }

    fn compare_table(&mut self, old: &Table, new: &Table) {
        let name = &new.name;

        for column in &old.columns {
            if !new.has_column(&column.name) {
                self.drop_columns.push((name.clone(), column.name.clone()));
            }
        }
        for column in &new.columns {
            let Some(before) = old.find_column(&column.name) else {
                self.column_changes.push(Operation::AddColumn {
                    table: name.clone(),
                    column: column.clone(),
                });
                continue;
            };
            if before.column_type != column.column_type {
                self.column_changes.push(Operation::AlterColumnType {
                    table: name.clone(),
                    column: column.clone(),
                    from: before.column_type.clone(),
                });
            }
            if before.nullable != column.nullable {
                self.column_changes.push(Operation::AlterColumnNullability {
                    table: name.clone(),
                    column: column.clone(),
                    from: before.nullable,
                });
            }
            if before.default != column.default {
                self.column_changes.push(Operation::AlterColumnDefault {
                    table: name.clone(),
                    column: column.clone(),
                    from: before.default.clone(),
                });
            }
        }

        for constraint in &old.constraints {
            if new.find_constraint(constraint.name()) != Some(constraint) {
                let entry = (name.clone(), constraint.clone());
                if constraint.is_foreign_key() {
                    self.drop_foreign_keys.push(entry);
                } else {
                    self.drop_constraints.push(entry);
                }
            }
        }
        for constraint in &new.constraints {
            if old.find_constraint(constraint.name()) != Some(constraint) {
                let entry = (name.clone(), constraint.clone());
                if constraint.is_foreign_key() {
                    self.add_foreign_keys.push(entry);
                } else {
                    self.add_constraints.push(entry);
                }
            }
        }

        for index in &old.indexes {
            if new.find_index(index.name()) != Some(index) {
                self.drop_indexes.push((name.clone(), index.clone()));
            }
        }
        for index in &new.indexes {
            if old.find_index(index.name()) != Some(index) {
                self.add_indexes.push((name.clone(), index.clone()));
            }
        }
    }

    fn into_operations(mut self, staged: &Schema, new: &Schema) -> Vec<Operation> {
        let mut operations = Vec::new();

        // Table drops, dependents first. Foreign keys that close a cycle
        // among dropped tables, or that pin a key about to be dropped on a
        // surviving table, are removed up front.
        let drop_graph = dependency_graph(&self.dropped_tables);
        let drop_order = topological_order(&drop_graph);
        for table in &self.dropped_tables {
            for fk in table.foreign_keys() {
                let Some(target) = fk.referenced_table() else {
                    continue;
                };
                let closes_cycle = drop_order.is_deferred(&table.name, target);
                let pins_dropped_key = target != table.name
                    && new.find_table(target).is_some()
                    && self.touches_referenced_key(target, fk);
                if closes_cycle || pins_dropped_key {
                    self.drop_foreign_keys.push((table.name.clone(), fk.clone()));
                }
            }
        }

        for (table, constraint) in self.drop_foreign_keys.drain(..) {
            operations.push(Operation::DropConstraint { table, constraint });
        }
        for (table, constraint) in self.drop_constraints.drain(..) {
            operations.push(Operation::DropConstraint { table, constraint });
        }
        for (table, index) in self.drop_indexes.drain(..) {
            operations.push(Operation::DropIndex { table, index });
        }
        for name in drop_order.order.iter().rev() {
            operations.push(Operation::DropTable { name: name.clone() });
        }
        for (table, column) in self.drop_columns.drain(..) {
            operations.push(Operation::DropColumn { table, column });
        }

        // Table creates, referenced tables first.
        let create_graph = dependency_graph(&self.created_tables);
        let create_order = topological_order(&create_graph);
        let created: BTreeMap<&str, &Table> = self
            .created_tables
            .iter()
            .map(|t| (t.name.as_str(), *t))
            .collect();
        for name in &create_order.order {
            let Some(table) = created.get(name.as_str()) else {
                continue;
            };
            let mut inline = (*table).clone();
            let mut deferred = Vec::new();
            inline.constraints.retain(|constraint| {
                let Some(target) = constraint.referenced_table() else {
                    return true;
                };
                let keep = !create_order.is_deferred(&table.name, target)
                    && !self.key_added_later(staged, target, constraint);
                if !keep {
                    deferred.push((table.name.clone(), constraint.clone()));
                }
                keep
            });
            operations.push(Operation::CreateTable { table: inline });
            self.add_foreign_keys.extend(deferred);
        }

        operations.append(&mut self.column_changes);

        for (table, index) in self.add_indexes.drain(..) {
            operations.push(Operation::AddIndex { table, index });
        }
        for (table, constraint) in self.add_constraints.drain(..) {
            operations.push(Operation::AddConstraint { table, constraint });
        }
        self.add_foreign_keys
            .sort_by(|a, b| (&a.0, a.1.name()).cmp(&(&b.0, b.1.name())));
        for (table, constraint) in self.add_foreign_keys.drain(..) {
            operations.push(Operation::AddConstraint { table, constraint });
        }

        operations
    }

    /// Whether this migration drops a key, index or referenced column of
    /// `target` that the foreign key `fk` relies on.
    fn touches_referenced_key(&self, target: &str, fk: &Constraint) -> bool {
        let ConstraintKind::ForeignKey {
            referenced_columns, ..
        } = &fk.kind
        else {
            return false;
        };
        let covers = |columns: &[String]| columns.iter().any(|c| referenced_columns.contains(c));

        self.drop_columns
            .iter()
            .any(|(t, c)| t == target && referenced_columns.contains(c))
            || self
                .drop_constraints
                .iter()
                .any(|(t, c)| t == target && covers(c.columns()))
            || self
                .drop_indexes
                .iter()
                .any(|(t, i)| t == target && covers(&i.columns))
    }

    /// Whether the columns or key a new foreign key points at on an existing
    /// table are only added by this migration, after table creation.
    fn key_added_later(&self, staged: &Schema, target: &str, fk: &Constraint) -> bool {
        let ConstraintKind::ForeignKey {
            referenced_columns, ..
        } = &fk.kind
        else {
            return false;
        };
        if staged.find_table(target).is_none() {
            return false;
        }
        let wanted: BTreeSet<&String> = referenced_columns.iter().collect();
        let same_columns = |columns: &[String]| columns.iter().collect::<BTreeSet<_>>() == wanted;

        let column_added = self.column_changes.iter().any(|op| {
            matches!(op, Operation::AddColumn { table, column }
                if table == target && wanted.contains(&column.name))
        });
        let key_added = self.add_constraints.iter().any(|(t, c)| {
            t == target
                && matches!(
                    c.kind,
                    ConstraintKind::PrimaryKey { .. } | ConstraintKind::Unique { .. }
                )
                && same_columns(c.columns())
        });
        let index_added = self
            .add_indexes
            .iter()
            .any(|(t, i)| t == target && i.unique && same_columns(&i.columns));

        column_added || key_added || index_added
    }
}

fn dependency_graph(tables: &[&Table]) -> BTreeMap<String, BTreeSet<String>> {
    tables
        .iter()
        .map(|t| {
            let deps = t
                .foreign_keys()
                .filter_map(Constraint::referenced_table)
                .map(str::to_string)
                .collect();
            (t.name.clone(), deps)
        })
        .collect()
}
