//! Canonical ordering and deterministic object names

use super::{Constraint, ConstraintKind, Index, Schema, Table};
use sha2::{Digest, Sha256};

/// Longest identifier accepted by PostgreSQL; generated names never exceed it.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Normalize a schema so that equal logical structures compare equal.
///
/// - tables, constraints and indexes are sorted by name
/// - unnamed constraints and indexes receive generated names
/// - column order is preserved and ordinals are reassigned from it
/// - exact duplicate constraints and indexes collapse into one
///
/// The procedure is idempotent.
pub fn canonicalize(schema: &Schema) -> Schema {
    let mut tables: Vec<Table> = schema.tables.iter().map(canonicalize_table).collect();
    tables.sort_by(|a, b| a.name.cmp(&b.name));
    Schema { tables }
}

fn canonicalize_table(table: &Table) -> Table {
    let mut table = table.clone();

    for (ordinal, column) in table.columns.iter_mut().enumerate() {
        column.ordinal = ordinal as u32;
    }

    for constraint in &mut table.constraints {
        if constraint.name.as_deref().map_or(true, str::is_empty) {
            constraint.name = Some(generated_constraint_name(&table.name, &constraint.kind));
        }
    }
    table.constraints.sort_by(|a, b| a.name().cmp(b.name()));
    table.constraints.dedup();

    for index in &mut table.indexes {
        if index.name.as_deref().map_or(true, str::is_empty) {
            index.name = Some(generated_index_name(&table.name, index));
        }
    }
    table.indexes.sort_by(|a, b| a.name().cmp(b.name()));
    table.indexes.dedup();

    table
}

/// Name given to a constraint that was declared without one.
///
/// Follows PostgreSQL's own conventions: `users_pkey`, `users_email_key`,
/// `posts_author_id_fkey`. Check constraints use a short hash of their
/// expression since they have no column list.
pub fn generated_constraint_name(table: &str, kind: &ConstraintKind) -> String {
    let name = match kind {
        ConstraintKind::PrimaryKey { .. } => format!("{table}_pkey"),
        ConstraintKind::Unique { columns } => format!("{table}_{}_key", columns.join("_")),
        ConstraintKind::ForeignKey { columns, .. } => {
            format!("{table}_{}_fkey", columns.join("_"))
        }
        ConstraintKind::Check { expression } => {
            format!("{table}_{}_check", short_hash(expression))
        }
    };
    fit_identifier(name)
}

/// Name given to an index that was declared without one.
pub fn generated_index_name(table: &str, index: &Index) -> String {
    let suffix = if index.unique { "uidx" } else { "idx" };
    fit_identifier(format!("{table}_{}_{suffix}", index.columns.join("_")))
}

/// Whether `constraint` still carries the name generation would give it.
pub(crate) fn has_generated_name(table: &str, constraint: &Constraint) -> bool {
    constraint.name() == generated_constraint_name(table, &constraint.kind)
}

pub(crate) fn index_has_generated_name(table: &str, index: &Index) -> bool {
    index.name() == generated_index_name(table, index)
}

/// First eight hex digits of the SHA-256 of `input`.
pub(crate) fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    format!("{digest:x}")[..8].to_string()
}

fn fit_identifier(name: String) -> String {
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name;
    }
    let hash = short_hash(&name);
    let mut cut = MAX_IDENTIFIER_LEN - hash.len() - 1;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}_{hash}", &name[..cut])
}
