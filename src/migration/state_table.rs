//! Ledger table management

use crate::executor::LedgerExecutor;
use crate::migration::MigrationError;
use regex::Regex;
use sea_query::{
    Alias, ColumnDef, Index, IndexCreateStatement, PostgresQueryBuilder, Table,
    TableCreateStatement,
};

/// `CREATE TABLE IF NOT EXISTS` for the ledger table.
///
/// The lock row shares the table and uses sequence `-1`.
pub fn create_ledger_table(table: &str) -> TableCreateStatement {
    Table::create()
        .table(Alias::new(table))
        .if_not_exists()
        .col(
            ColumnDef::new(Alias::new("sequence"))
                .big_integer()
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(Alias::new("name"))
                .string_len(255)
                .not_null(),
        )
        .col(
            ColumnDef::new(Alias::new("checksum"))
                .string_len(64)
                .not_null(),
        )
        .col(
            ColumnDef::new(Alias::new("applied_at"))
                .timestamp()
                .not_null(),
        )
        .col(ColumnDef::new(Alias::new("execution_time_ms")).integer().null())
        .to_owned()
}

/// Index on `applied_at` for history queries.
pub fn create_ledger_index(table: &str) -> IndexCreateStatement {
    Index::create()
        .if_not_exists()
        .name(format!("idx_{table}_applied_at"))
        .table(Alias::new(table))
        .col(Alias::new("applied_at"))
        .to_owned()
}

/// Reject table names that would need quoting; the ledger table name is
/// spliced into SQL.
pub fn validate_table_name(table: &str) -> Result<(), MigrationError> {
    let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$")
        .map_err(|e| MigrationError::InvalidFormat(format!("Invalid regex: {e}")))?;
    if re.is_match(table) {
        Ok(())
    } else {
        Err(MigrationError::InvalidFormat(format!(
            "ledger table name '{table}' must be a plain identifier ([A-Za-z_][A-Za-z0-9_]*)"
        )))
    }
}

/// Create the ledger table and its index if missing.
pub fn initialize_ledger_table(
    executor: &dyn LedgerExecutor,
    table: &str,
) -> Result<(), MigrationError> {
    validate_table_name(table)?;
    executor.execute(&create_ledger_table(table).to_string(PostgresQueryBuilder))?;
    executor.execute(&create_ledger_index(table).to_string(PostgresQueryBuilder))?;
    Ok(())
}
