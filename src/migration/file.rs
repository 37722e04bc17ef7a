//! Local migration discovery
//!
//! Migrations are SQL files named `NNNN_<name>.sql`. Migration `N` is the step
//! that produced snapshot `N`, and that snapshot's hash is its checksum.

use crate::migration::MigrationError;
use crate::render::split_statements;
use crate::snapshot::{SnapshotError, SnapshotStore};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// A migration known locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMigration {
    pub sequence: i64,
    /// File stem, e.g. `0001_add_age`.
    pub name: String,
    pub path: PathBuf,
    /// Hash of the snapshot at the same sequence.
    pub checksum: String,
}

impl LocalMigration {
    /// Parse `NNNN_<name>.sql` into `(sequence, stem)`.
    ///
    /// # Example
    /// - `0003_add_age.sql` → sequence: 3, name: "0003_add_age"
    pub fn parse_filename(filename: &str) -> Result<(i64, String), MigrationError> {
        let re = Regex::new(r"^(\d{4,})_([A-Za-z0-9_]+)\.sql$")
            .map_err(|e| MigrationError::InvalidFormat(format!("Invalid regex: {e}")))?;

        let invalid = || {
            MigrationError::InvalidFormat(format!(
                "Migration file name '{filename}' does not match expected pattern: NNNN_name.sql"
            ))
        };
        let caps = re.captures(filename).ok_or_else(invalid)?;
        let sequence = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .ok_or_else(invalid)?;
        let stem = filename.trim_end_matches(".sql").to_string();
        Ok((sequence, stem))
    }

    /// The script's statements in execution order.
    pub fn statements(&self) -> Result<Vec<String>, MigrationError> {
        let content = fs::read_to_string(&self.path).map_err(|source| MigrationError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(split_statements(&content))
    }
}

/// Discover migrations in `migrations_dir`, sorted by sequence.
///
/// Each migration must have a snapshot at its sequence, and sequences must
/// run 0, 1, 2, ... without gaps. A missing directory means no migrations.
/// A migration's checksum is the hash of its snapshot's current content.
pub fn discover_migrations(
    migrations_dir: &Path,
    snapshots: &dyn SnapshotStore,
) -> Result<Vec<LocalMigration>, MigrationError> {
    let entries = match fs::read_dir(migrations_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(MigrationError::Io {
                path: migrations_dir.to_path_buf(),
                source,
            })
        }
    };

    let mut migrations = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| MigrationError::Io {
            path: migrations_dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("sql") {
            continue;
        }
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                MigrationError::InvalidFormat(format!("Invalid filename: {}", path.display()))
            })?;

        let (sequence, name) = LocalMigration::parse_filename(filename)?;
        let snapshot = snapshots.load_unverified(sequence).map_err(|e| match e {
            SnapshotError::NotFound(_) => MigrationError::NotFound(format!(
                "migration {name} has no snapshot at sequence {sequence}"
            )),
            other => MigrationError::Snapshot(other),
        })?;
        snapshot.check_format()?;

        // An edited snapshot keeps its old recorded hash; the checksum follows
        // the content so the ledger comparison reports the drift.
        let checksum = snapshot.compute_hash()?;
        if checksum != snapshot.hash {
            log::warn!(
                "snapshot {sequence} was modified after it was written (recorded {}, content {checksum})",
                snapshot.hash
            );
        }

        migrations.push(LocalMigration {
            sequence,
            name,
            path,
            checksum,
        });
    }

    migrations.sort_by_key(|m| m.sequence);

    for (expected, migration) in (0_i64..).zip(&migrations) {
        if migration.sequence != expected {
            let problem = if migration.sequence < expected {
                "is duplicated"
            } else {
                "is missing"
            };
            return Err(MigrationError::HistoryCorruption(format!(
                "local migration {expected} {problem} (found {})",
                migration.name
            )));
        }
    }

    Ok(migrations)
}
