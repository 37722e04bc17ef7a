//! Ledger-table locking
//!
//! The process that manages to insert the lock row (sequence `-1`) into the
//! ledger table holds the lock. The insert uses `ON CONFLICT DO NOTHING`, so
//! the primary key makes acquisition atomic across processes and machines.

use crate::executor::LedgerExecutor;
use crate::migration::{MigrationError, MigrationRecord};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Holds the migration lock and releases it when dropped.
pub struct MigrationLockGuard<'a> {
    executor: &'a dyn LedgerExecutor,
    table: String,
}

impl<'a> MigrationLockGuard<'a> {
    /// Acquire the lock, waiting up to `timeout`.
    ///
    /// A zero timeout tries once and fails fast.
    pub fn acquire(
        executor: &'a dyn LedgerExecutor,
        table: &str,
        timeout: Duration,
    ) -> Result<Self, MigrationError> {
        acquire_migration_lock(executor, table, timeout)?;
        Ok(Self {
            executor,
            table: table.to_string(),
        })
    }

    pub fn executor(&self) -> &'a dyn LedgerExecutor {
        self.executor
    }
}

impl Drop for MigrationLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = release_migration_lock(self.executor, &self.table) {
            log::warn!("Failed to release migration lock on {}: {e}", self.table);
        }
    }
}

/// Insert the lock row, polling every 100ms until `timeout` elapses.
pub fn acquire_migration_lock(
    executor: &dyn LedgerExecutor,
    table: &str,
    timeout: Duration,
) -> Result<(), MigrationError> {
    let start = Instant::now();

    loop {
        if executor.insert_record(table, &MigrationRecord::lock())? > 0 {
            log::debug!("acquired migration lock on {table}");
            return Ok(());
        }

        if start.elapsed() >= timeout {
            return Err(MigrationError::LockTimeout(format!(
                "failed to acquire migration lock within {} seconds \
                 (DELETE FROM {table} WHERE sequence = {})",
                timeout.as_secs(),
                MigrationRecord::LOCK_SEQUENCE
            )));
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

pub fn release_migration_lock(
    executor: &dyn LedgerExecutor,
    table: &str,
) -> Result<(), MigrationError> {
    executor.delete_record(table, MigrationRecord::LOCK_SEQUENCE)?;
    Ok(())
}

pub fn is_migration_lock_held(
    executor: &dyn LedgerExecutor,
    table: &str,
) -> Result<bool, MigrationError> {
    Ok(executor
        .fetch_records(table)?
        .iter()
        .any(MigrationRecord::is_lock))
}
