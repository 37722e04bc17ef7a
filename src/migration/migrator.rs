//! Migrator - applies pending migrations and keeps the ledger

use crate::config::TidemarkConfig;
use crate::executor::LedgerExecutor;
use crate::migration::file::discover_migrations;
use crate::migration::lock::MigrationLockGuard;
use crate::migration::state_table::{initialize_ledger_table, validate_table_name};
use crate::migration::status::{pending_migrations, reconcile};
use crate::migration::{LocalMigration, MigrationError, MigrationRecord, MigrationStatus};
use crate::snapshot::{FileSnapshotStore, SnapshotStore};
use crate::transaction::Transaction;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Reconciles local migrations with a database's ledger and applies what is
/// missing.
///
/// All of `migrate` runs under the ledger lock. Each migration runs in its
/// own transaction together with its ledger row, so a migration is either
/// fully applied and recorded or not at all.
pub struct Migrator<S> {
    migrations_dir: PathBuf,
    snapshots: S,
    table: String,
    lock_timeout: Duration,
}

impl Migrator<FileSnapshotStore> {
    pub fn from_config(config: &TidemarkConfig) -> Self {
        Migrator::new(
            &config.paths.migrations_dir,
            FileSnapshotStore::new(&config.paths.snapshots_dir),
        )
        .with_table(&config.ledger.table)
        .with_lock_timeout(Duration::from_secs(config.ledger.lock_timeout_seconds))
    }
}

impl<S: SnapshotStore> Migrator<S> {
    pub fn new(migrations_dir: impl AsRef<Path>, snapshots: S) -> Self {
        Self {
            migrations_dir: migrations_dir.as_ref().to_path_buf(),
            snapshots,
            table: "tidemark_migrations".to_string(),
            lock_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Local migrations in sequence order.
    pub fn local_migrations(&self) -> Result<Vec<LocalMigration>, MigrationError> {
        discover_migrations(&self.migrations_dir, &self.snapshots)
    }

    /// Read-only report of every local migration's state.
    ///
    /// A database without a ledger table reports everything as pending.
    pub fn status(&self, executor: &dyn LedgerExecutor) -> Result<MigrationStatus, MigrationError> {
        validate_table_name(&self.table)?;
        let local = self.local_migrations()?;
        let ledger = if executor.ledger_exists(&self.table)? {
            executor.fetch_records(&self.table)?
        } else {
            Vec::new()
        };
        Ok(reconcile(&local, &ledger))
    }

    /// The migrations `migrate` would apply, without applying anything.
    pub fn plan(&self, executor: &dyn LedgerExecutor) -> Result<Vec<LocalMigration>, MigrationError> {
        validate_table_name(&self.table)?;
        let local = self.local_migrations()?;
        let ledger = if executor.ledger_exists(&self.table)? {
            executor.fetch_records(&self.table)?
        } else {
            Vec::new()
        };
        Ok(pending_migrations(&local, &ledger)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Apply every pending migration in order and return their ledger records.
    ///
    /// Nothing is applied when the ledger is corrupt or a recorded migration
    /// has drifted. A failing migration is rolled back; those before it stay
    /// committed and recorded.
    pub fn migrate(
        &self,
        executor: &dyn LedgerExecutor,
    ) -> Result<Vec<MigrationRecord>, MigrationError> {
        initialize_ledger_table(executor, &self.table)?;
        let _lock = MigrationLockGuard::acquire(executor, &self.table, self.lock_timeout)?;

        // Read the ledger only once the lock is held.
        let local = self.local_migrations()?;
        let ledger = executor.fetch_records(&self.table)?;
        let pending = pending_migrations(&local, &ledger)?;

        if pending.is_empty() {
            log::debug!("No pending migrations");
            return Ok(Vec::new());
        }

        let mut applied = Vec::with_capacity(pending.len());
        for migration in pending {
            applied.push(self.apply_migration(executor, migration)?);
        }
        Ok(applied)
    }

    fn apply_migration(
        &self,
        executor: &dyn LedgerExecutor,
        migration: &LocalMigration,
    ) -> Result<MigrationRecord, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!(
            "tidemark.migration",
            sequence = migration.sequence,
            name = %migration.name
        )
        .entered();

        let statements = migration.statements()?;
        let start = Instant::now();
        let failure = |statement: &str, error: String| MigrationError::ExecutionFailure {
            sequence: migration.sequence,
            name: migration.name.clone(),
            statement: statement.to_string(),
            error,
        };

        let tx = Transaction::begin(executor).map_err(|e| failure("BEGIN", e.to_string()))?;

        for statement in &statements {
            if let Err(e) = tx.execute(statement) {
                rollback(tx);
                return Err(failure(statement, e.to_string()));
            }
        }

        let record = MigrationRecord::new(
            migration.sequence,
            migration.name.clone(),
            migration.checksum.clone(),
            Utc::now(),
            Some(i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX)),
        );
        match executor.insert_record(&self.table, &record) {
            Ok(0) => {
                rollback(tx);
                return Err(MigrationError::HistoryCorruption(format!(
                    "migration {} was recorded by another process while it was being applied",
                    migration.name
                )));
            }
            Ok(_) => {}
            Err(e) => {
                rollback(tx);
                return Err(failure("INSERT INTO ledger", e.to_string()));
            }
        }

        tx.commit().map_err(|e| failure("COMMIT", e.to_string()))?;

        log::info!(
            "Applied migration {} ({}) in {}ms",
            migration.sequence,
            migration.name,
            start.elapsed().as_millis()
        );
        Ok(record)
    }
}

fn rollback(tx: Transaction<'_>) {
    if let Err(e) = tx.rollback() {
        log::warn!("Rollback failed: {e}");
    }
}
