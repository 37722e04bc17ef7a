//! # Tidemark
//!
//! Snapshot-based schema migrations.
//!
//! Migrations are generated by diffing structural snapshots of a schema, not
//! by inspecting a live database. [`diff()`] computes the ordered operations
//! between two snapshots, [`render()`] turns them into SQL for one dialect and
//! [`migration::MigrationGenerator`] writes the result as the next numbered
//! script next to its snapshot. [`migration::Migrator`] later applies pending
//! scripts to a PostgreSQL database and records them in a ledger table,
//! refusing to run when the ledger and the local history disagree.

pub mod config;
pub mod connection;
pub mod diff;
pub mod error;
pub mod executor;
pub mod migration;
pub mod operation;
pub mod render;
pub mod schema;
pub mod snapshot;
pub mod transaction;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::TidemarkConfig;
pub use connection::{check_connection_health, connect, validate_connection_string, ConnectionError};
pub use diff::{diff, diff_with_options, Diff, DiffOptions, DiffWarning};
pub use error::{Error, Result};
pub use executor::{ExecutorError, LedgerExecutor, MayPostgresExecutor};
pub use migration::{MigrationError, MigrationGenerator, Migrator};
pub use operation::{apply, ApplyError, Operation};
pub use render::{render, Dialect, RenderError};
pub use schema::{canonicalize, validate, Schema, SchemaError};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, Snapshot, SnapshotError, SnapshotStore};
pub use transaction::Transaction;
