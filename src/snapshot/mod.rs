//! Snapshot store
//!
//! A snapshot is an immutable, sequenced and content-hashed serialization of
//! a [`Schema`]. Snapshots form a single linear chain: each one records the
//! hash of the snapshot before it. Stores are write-once; there is no update
//! operation.

mod file;
mod memory;

pub use file::FileSnapshotStore;
pub use memory::MemorySnapshotStore;

use crate::schema::{canonicalize, Schema};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use thiserror::Error;

/// Version of the on-disk snapshot format.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot {0} not found")]
    NotFound(i64),

    #[error("snapshot {sequence} already exists; reload the latest snapshot and retry")]
    Conflict { sequence: i64 },

    #[error("snapshot {sequence} is corrupt: {reason}")]
    Corrupt { sequence: i64, reason: String },

    #[error("snapshot I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One immutable point in the schema history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub sequence: i64,
    /// Hash of the previous snapshot, `None` for the first one.
    pub parent: Option<String>,
    pub description: String,
    /// SHA-256 over everything except this field.
    pub hash: String,
    pub schema: Schema,
}

/// The hashed part of a snapshot, in a fixed field order.
#[derive(Serialize)]
struct HashedContent<'a> {
    format_version: u32,
    sequence: i64,
    parent: &'a Option<String>,
    description: &'a str,
    schema: &'a Schema,
}

impl Snapshot {
    /// Build a snapshot of `schema` at `sequence`. The schema is canonicalized
    /// first so equal structures always hash the same.
    pub fn new(
        sequence: i64,
        parent: Option<String>,
        description: impl Into<String>,
        schema: &Schema,
    ) -> Result<Self, SnapshotError> {
        let mut snapshot = Self {
            format_version: FORMAT_VERSION,
            sequence,
            parent,
            description: description.into(),
            hash: String::new(),
            schema: canonicalize(schema),
        };
        snapshot.hash = snapshot.compute_hash()?;
        Ok(snapshot)
    }

    pub fn compute_hash(&self) -> Result<String, SnapshotError> {
        let content = serde_json::to_vec(&HashedContent {
            format_version: self.format_version,
            sequence: self.sequence,
            parent: &self.parent,
            description: &self.description,
            schema: &self.schema,
        })?;
        Ok(format!("{:x}", Sha256::digest(&content)))
    }

    pub fn check_format(&self) -> Result<(), SnapshotError> {
        if self.format_version != FORMAT_VERSION {
            return Err(SnapshotError::Corrupt {
                sequence: self.sequence,
                reason: format!("unsupported format version {}", self.format_version),
            });
        }
        Ok(())
    }

    /// Check the stored hash against the content.
    pub fn verify(&self) -> Result<(), SnapshotError> {
        self.check_format()?;
        let actual = self.compute_hash()?;
        if actual != self.hash {
            return Err(SnapshotError::Corrupt {
                sequence: self.sequence,
                reason: format!("hash mismatch: recorded {}, computed {actual}", self.hash),
            });
        }
        Ok(())
    }
}

/// The newest snapshot in a store, or the empty baseline before the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    Empty,
    Snapshot(Snapshot),
}

impl Head {
    pub fn schema(&self) -> Schema {
        match self {
            Head::Empty => Schema::default(),
            Head::Snapshot(snapshot) => snapshot.schema.clone(),
        }
    }

    pub fn hash(&self) -> Option<&str> {
        match self {
            Head::Empty => None,
            Head::Snapshot(snapshot) => Some(&snapshot.hash),
        }
    }

    /// Sequence number the next snapshot after this head takes.
    pub fn next_sequence(&self) -> i64 {
        match self {
            Head::Empty => 0,
            Head::Snapshot(snapshot) => snapshot.sequence + 1,
        }
    }
}

/// Durable, ordered, write-once storage of snapshots.
pub trait SnapshotStore {
    /// Load the snapshot at `sequence` as stored, without checking its hash.
    fn load_unverified(&self, sequence: i64) -> Result<Snapshot, SnapshotError>;

    /// Load the snapshot at `sequence`, verifying its hash.
    fn load(&self, sequence: i64) -> Result<Snapshot, SnapshotError> {
        let snapshot = self.load_unverified(sequence)?;
        snapshot.verify()?;
        Ok(snapshot)
    }

    /// All snapshots in sequence order.
    fn list(&self) -> Result<Vec<Snapshot>, SnapshotError>;

    /// Append `schema` directly after `head`.
    ///
    /// Fails with [`SnapshotError::Conflict`] when that position is already
    /// taken, which means `head` is stale.
    fn append_after(
        &self,
        head: &Head,
        schema: &Schema,
        description: &str,
    ) -> Result<Snapshot, SnapshotError>;

    fn latest(&self) -> Result<Head, SnapshotError> {
        Ok(self
            .list()?
            .pop()
            .map_or(Head::Empty, Head::Snapshot))
    }

    /// Append `schema` after the current latest snapshot.
    fn append(&self, schema: &Schema, description: &str) -> Result<Snapshot, SnapshotError> {
        let head = self.latest()?;
        self.append_after(&head, schema, description)
    }

    /// Check that sequences run 0, 1, 2, ... and each parent matches the
    /// previous hash.
    fn verify_chain(&self) -> Result<(), SnapshotError> {
        let mut previous: Option<Snapshot> = None;
        for (expected, snapshot) in (0_i64..).zip(self.list()?) {
            if snapshot.sequence != expected {
                return Err(SnapshotError::NotFound(expected));
            }
            let parent = previous.as_ref().map(|p| p.hash.as_str());
            if snapshot.parent.as_deref() != parent {
                return Err(SnapshotError::Corrupt {
                    sequence: snapshot.sequence,
                    reason: format!(
                        "parent {} does not match previous snapshot {}",
                        snapshot.parent.as_deref().unwrap_or("(none)"),
                        parent.unwrap_or("(none)")
                    ),
                });
            }
            previous = Some(snapshot);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType, Table};

    fn users() -> Schema {
        Schema::new().table(
            Table::new("users")
                .column(Column::new("id", ColumnType::Integer).not_null())
                .primary_key(["id"]),
        )
    }

    #[test]
    fn test_hash_is_stable() {
        let a = Snapshot::new(0, None, "init", &users()).unwrap();
        let b = Snapshot::new(0, None, "init", &users()).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);
        assert!(a.verify().is_ok());
    }

    #[test]
    fn test_hash_covers_parent_and_sequence() {
        let a = Snapshot::new(0, None, "init", &users()).unwrap();
        let b = Snapshot::new(1, Some(a.hash.clone()), "init", &users()).unwrap();
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_tampered_snapshot_fails_verification() {
        let mut snapshot = Snapshot::new(0, None, "init", &users()).unwrap();
        snapshot.schema.tables[0].name = "accounts".to_string();
        assert!(matches!(
            snapshot.verify(),
            Err(SnapshotError::Corrupt { sequence: 0, .. })
        ));
    }

    #[test]
    fn test_head() {
        assert_eq!(Head::Empty.next_sequence(), 0);
        assert!(Head::Empty.schema().is_empty());
        assert_eq!(Head::Empty.hash(), None);

        let snapshot = Snapshot::new(3, None, "x", &users()).unwrap();
        let head = Head::Snapshot(snapshot.clone());
        assert_eq!(head.next_sequence(), 4);
        assert_eq!(head.hash(), Some(snapshot.hash.as_str()));
    }
}
