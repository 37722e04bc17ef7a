//! Migration ledger errors

use crate::executor::ExecutorError;
use crate::snapshot::SnapshotError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    /// A migration or the snapshot it refers to is missing.
    #[error("Migration not found: {0}")]
    NotFound(String),

    /// The ledger is not a prefix of the local migration sequence.
    #[error(
        "Migration history is corrupt: {0}\n\
         The ledger must record a contiguous prefix of the local migrations. \
         Nothing was applied."
    )]
    HistoryCorruption(String),

    #[error(
        "Migration '{name}' (sequence {sequence}) has drifted.\n\
         Ledger checksum: {recorded}\n\
         Local checksum:  {local}\n\
         The local snapshot changed after the migration was applied. No further migrations will be applied."
    )]
    Drifted {
        sequence: i64,
        name: String,
        recorded: String,
        local: String,
    },

    #[error(
        "Migration '{name}' (sequence {sequence}) failed and was rolled back.\n\
         Statement: {statement}\n\
         Error: {error}"
    )]
    ExecutionFailure {
        sequence: i64,
        name: String,
        statement: String,
        error: String,
    },

    #[error(
        "Migration lock timeout: {0}\n\
         Another process may be running migrations. If this persists, check for a stuck \
         migration process or remove the lock row (sequence -1) from the ledger table."
    )]
    LockTimeout(String),

    #[error("Database error: {0}")]
    Database(#[from] ExecutorError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("Invalid migration format: {0}")]
    InvalidFormat(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drifted_display() {
        let err = MigrationError::Drifted {
            sequence: 1,
            name: "0001_add_age".to_string(),
            recorded: "aaa".to_string(),
            local: "bbb".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("0001_add_age"));
        assert!(message.contains("Ledger checksum: aaa"));
        assert!(message.contains("Local checksum:  bbb"));
    }

    #[test]
    fn test_execution_failure_display_names_statement() {
        let err = MigrationError::ExecutionFailure {
            sequence: 2,
            name: "0002_drop".to_string(),
            statement: "DROP TABLE \"users\"".to_string(),
            error: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("Statement: DROP TABLE \"users\""));
    }
}
