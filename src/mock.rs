//! In-memory [`LedgerExecutor`] for tests
//!
//! Keeps ledger rows in memory, honours `BEGIN`/`COMMIT`/`ROLLBACK` by staging
//! record changes, logs every executed statement and can be told to fail on
//! any statement containing a given substring.

use crate::executor::{ExecutorError, LedgerExecutor};
use crate::migration::MigrationRecord;
use std::cell::RefCell;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct MockState {
    ledger_created: bool,
    records: BTreeMap<i64, MigrationRecord>,
    /// Record view inside an open transaction.
    staged: Option<BTreeMap<i64, MigrationRecord>>,
    executed: Vec<String>,
    fail_on: Option<String>,
}

impl MockState {
    fn visible(&mut self) -> &mut BTreeMap<i64, MigrationRecord> {
        match self.staged.as_mut() {
            Some(staged) => staged,
            None => &mut self.records,
        }
    }

    fn require_ledger(&self, table: &str) -> Result<(), ExecutorError> {
        if self.ledger_created {
            Ok(())
        } else {
            Err(ExecutorError::Query(format!(
                "relation \"{table}\" does not exist"
            )))
        }
    }
}

#[derive(Debug, Default)]
pub struct MockExecutor {
    state: RefCell<MockState>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// An executor whose ledger table already holds `records`.
    pub fn with_records(records: impl IntoIterator<Item = MigrationRecord>) -> Self {
        let executor = Self::new();
        {
            let mut state = executor.state.borrow_mut();
            state.ledger_created = true;
            state.records = records.into_iter().map(|r| (r.sequence, r)).collect();
        }
        executor
    }

    /// Fail every statement containing `needle`.
    pub fn fail_on(self, needle: impl Into<String>) -> Self {
        self.state.borrow_mut().fail_on = Some(needle.into());
        self
    }

    /// Statements passed to `execute`, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.borrow().executed.clone()
    }

    /// Committed records, lock row included.
    pub fn records(&self) -> Vec<MigrationRecord> {
        self.state.borrow().records.values().cloned().collect()
    }

    pub fn ledger_created(&self) -> bool {
        self.state.borrow().ledger_created
    }

    /// Pretend another process holds the migration lock.
    pub fn hold_lock(&self) {
        let mut state = self.state.borrow_mut();
        state.ledger_created = true;
        let lock = MigrationRecord::lock();
        state.records.insert(lock.sequence, lock);
    }

    pub fn lock_held(&self) -> bool {
        self.state
            .borrow()
            .records
            .contains_key(&MigrationRecord::LOCK_SEQUENCE)
    }
}

impl LedgerExecutor for MockExecutor {
    fn execute(&self, sql: &str) -> Result<u64, ExecutorError> {
        let mut state = self.state.borrow_mut();
        state.executed.push(sql.to_string());

        if let Some(needle) = &state.fail_on {
            if sql.contains(needle.as_str()) {
                return Err(ExecutorError::Query(format!(
                    "simulated failure executing: {sql}"
                )));
            }
        }

        let keyword = sql.trim_start().to_ascii_uppercase();
        if keyword.starts_with("BEGIN") {
            let records = state.records.clone();
            state.staged = Some(records);
        } else if keyword.starts_with("COMMIT") {
            if let Some(staged) = state.staged.take() {
                state.records = staged;
            }
        } else if keyword.starts_with("ROLLBACK") {
            state.staged = None;
        } else if keyword.starts_with("CREATE TABLE IF NOT EXISTS") {
            state.ledger_created = true;
        }
        Ok(0)
    }

    fn ledger_exists(&self, _table: &str) -> Result<bool, ExecutorError> {
        Ok(self.state.borrow().ledger_created)
    }

    fn fetch_records(&self, table: &str) -> Result<Vec<MigrationRecord>, ExecutorError> {
        let mut state = self.state.borrow_mut();
        state.require_ledger(table)?;
        Ok(state.visible().values().cloned().collect())
    }

    fn insert_record(&self, table: &str, record: &MigrationRecord) -> Result<u64, ExecutorError> {
        let mut state = self.state.borrow_mut();
        state.require_ledger(table)?;
        let records = state.visible();
        if records.contains_key(&record.sequence) {
            return Ok(0);
        }
        records.insert(record.sequence, record.clone());
        Ok(1)
    }

    fn delete_record(&self, table: &str, sequence: i64) -> Result<u64, ExecutorError> {
        let mut state = self.state.borrow_mut();
        state.require_ledger(table)?;
        Ok(u64::from(state.visible().remove(&sequence).is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(sequence: i64) -> MigrationRecord {
        MigrationRecord::new(sequence, "m", "abc", Utc::now(), None)
    }

    #[test]
    fn test_requires_ledger_table() {
        let executor = MockExecutor::new();
        assert!(executor.fetch_records("ledger").is_err());
        executor
            .execute("CREATE TABLE IF NOT EXISTS ledger (sequence BIGINT)")
            .unwrap();
        assert!(executor.fetch_records("ledger").unwrap().is_empty());
    }

    #[test]
    fn test_rollback_discards_inserts() {
        let executor = MockExecutor::with_records([]);
        executor.execute("BEGIN").unwrap();
        assert_eq!(executor.insert_record("ledger", &record(0)).unwrap(), 1);
        assert_eq!(executor.fetch_records("ledger").unwrap().len(), 1);
        executor.execute("ROLLBACK").unwrap();
        assert!(executor.records().is_empty());
    }

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let executor = MockExecutor::with_records([record(0)]);
        assert_eq!(executor.insert_record("ledger", &record(0)).unwrap(), 0);
    }

    #[test]
    fn test_fail_on() {
        let executor = MockExecutor::new().fail_on("DROP");
        assert!(executor.execute("DROP TABLE x").is_err());
        assert!(executor.execute("SELECT 1").is_ok());
        assert_eq!(executor.executed(), ["DROP TABLE x", "SELECT 1"]);
    }
}
