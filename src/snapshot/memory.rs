//! In-memory snapshot store

use super::{Head, Snapshot, SnapshotError, SnapshotStore};
use crate::schema::Schema;
use std::sync::{Mutex, MutexGuard};

/// Snapshot store backed by a vector. Useful for tests and for callers that
/// keep history somewhere else.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<Vec<Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshots(&self) -> MutexGuard<'_, Vec<Snapshot>> {
        // A panic while holding the lock cannot leave a half-written entry.
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load_unverified(&self, sequence: i64) -> Result<Snapshot, SnapshotError> {
        self.snapshots()
            .iter()
            .find(|s| s.sequence == sequence)
            .cloned()
            .ok_or(SnapshotError::NotFound(sequence))
    }

    fn list(&self) -> Result<Vec<Snapshot>, SnapshotError> {
        Ok(self.snapshots().clone())
    }

    fn append_after(
        &self,
        head: &Head,
        schema: &Schema,
        description: &str,
    ) -> Result<Snapshot, SnapshotError> {
        let mut snapshots = self.snapshots();
        let sequence = head.next_sequence();
        if snapshots.iter().any(|s| s.sequence >= sequence) {
            return Err(SnapshotError::Conflict { sequence });
        }
        let snapshot = Snapshot::new(
            sequence,
            head.hash().map(str::to_string),
            description,
            schema,
        )?;
        snapshots.push(snapshot.clone());
        log::debug!("stored snapshot {} in memory", snapshot.sequence);
        Ok(snapshot)
    }
}
