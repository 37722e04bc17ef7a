//! Migration generation and the migration ledger
//!
//! Generation is offline: [`MigrationGenerator`] diffs a requested schema
//! against the latest snapshot and writes the next `NNNN_<name>.sql` script.
//! Applying is online: [`Migrator`] compares the local scripts with a
//! database's ledger table, refuses to run on drift or a corrupt history and
//! applies what is pending, one transaction per migration.
//!
//! # Example
//!
//! ```rust,no_run
//! use tidemark::config::TidemarkConfig;
//! use tidemark::migration::Migrator;
//! use tidemark::{connect, MayPostgresExecutor};
//!
//! let config = TidemarkConfig::load()?;
//! let client = connect(config.database_url()?)?;
//! let executor = MayPostgresExecutor::new(client);
//!
//! let applied = Migrator::from_config(&config).migrate(&executor)?;
//! println!("applied {} migration(s)", applied.len());
//! # Ok::<(), tidemark::Error>(())
//! ```

pub mod error;
pub mod file;
pub mod generator;
pub mod lock;
pub mod migrator;
pub mod record;
pub mod state_table;
pub mod status;

pub use error::MigrationError;
pub use file::{discover_migrations, LocalMigration};
pub use generator::{migration_name, GenerateError, GeneratedMigration, MigrationGenerator};
pub use lock::{acquire_migration_lock, is_migration_lock_held, release_migration_lock, MigrationLockGuard};
pub use migrator::Migrator;
pub use record::MigrationRecord;
pub use state_table::{create_ledger_index, create_ledger_table, initialize_ledger_table, validate_table_name};
pub use status::{pending_migrations, reconcile, MigrationEntry, MigrationState, MigrationStatus};
