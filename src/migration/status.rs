//! Reconciling local migrations with the ledger

use crate::migration::{LocalMigration, MigrationError, MigrationRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationState {
    Applied { applied_at: DateTime<Utc> },
    Pending,
    /// In the ledger with a checksum that no longer matches the local snapshot.
    Drifted { recorded: String },
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationState::Applied { .. } => f.pad("applied"),
            MigrationState::Pending => f.pad("pending"),
            MigrationState::Drifted { .. } => f.pad("drifted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationEntry {
    pub sequence: i64,
    pub name: String,
    pub checksum: String,
    pub state: MigrationState,
}

/// State of every local migration plus ledger rows with no local counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub entries: Vec<MigrationEntry>,
    /// Ledger records for migrations not known locally.
    pub orphaned: Vec<MigrationRecord>,
    pub applied_count: usize,
    pub pending_count: usize,
    pub drifted_count: usize,
}

impl MigrationStatus {
    #[must_use]
    pub fn new(entries: Vec<MigrationEntry>, orphaned: Vec<MigrationRecord>) -> Self {
        let count = |f: fn(&MigrationState) -> bool| entries.iter().filter(|e| f(&e.state)).count();
        let applied_count = count(|s| matches!(s, MigrationState::Applied { .. }));
        let pending_count = count(|s| matches!(s, MigrationState::Pending));
        let drifted_count = count(|s| matches!(s, MigrationState::Drifted { .. }));

        Self {
            entries,
            orphaned,
            applied_count,
            pending_count,
            drifted_count,
        }
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    /// Nothing pending, drifted or orphaned.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending_count == 0 && self.drifted_count == 0 && self.orphaned.is_empty()
    }

    #[must_use]
    pub fn latest_applied_sequence(&self) -> Option<i64> {
        self.entries
            .iter()
            .filter(|e| !matches!(e.state, MigrationState::Pending))
            .map(|e| e.sequence)
            .max()
    }

    #[must_use]
    pub fn next_pending_sequence(&self) -> Option<i64> {
        self.pending().next().map(|e| e.sequence)
    }

    pub fn pending(&self) -> impl Iterator<Item = &MigrationEntry> {
        self.entries
            .iter()
            .filter(|e| e.state == MigrationState::Pending)
    }
}

/// Classify each local migration against the ledger. Never fails; problems
/// show up as drifted entries and orphans.
pub fn reconcile(local: &[LocalMigration], ledger: &[MigrationRecord]) -> MigrationStatus {
    let recorded: BTreeMap<i64, &MigrationRecord> = ledger
        .iter()
        .filter(|r| !r.is_lock())
        .map(|r| (r.sequence, r))
        .collect();

    let entries = local
        .iter()
        .map(|migration| {
            let state = match recorded.get(&migration.sequence) {
                None => MigrationState::Pending,
                Some(record) if record.checksum != migration.checksum => MigrationState::Drifted {
                    recorded: record.checksum.clone(),
                },
                Some(record) => MigrationState::Applied {
                    applied_at: record.applied_at,
                },
            };
            MigrationEntry {
                sequence: migration.sequence,
                name: migration.name.clone(),
                checksum: migration.checksum.clone(),
                state,
            }
        })
        .collect();

    let orphaned = recorded
        .values()
        .filter(|r| !local.iter().any(|m| m.sequence == r.sequence))
        .map(|r| (*r).clone())
        .collect();

    MigrationStatus::new(entries, orphaned)
}

/// Work out what `migrate` would apply.
///
/// Fails with `HistoryCorruption` unless the ledger records exactly
/// `0..=k` for some `k` with every entry known locally, and with `Drifted`
/// at the first applied migration whose checksum differs.
pub fn pending_migrations<'a>(
    local: &'a [LocalMigration],
    ledger: &[MigrationRecord],
) -> Result<Vec<&'a LocalMigration>, MigrationError> {
    let mut applied: Vec<&MigrationRecord> = ledger.iter().filter(|r| !r.is_lock()).collect();
    applied.sort_by_key(|r| r.sequence);

    for (expected, record) in (0_i64..).zip(&applied) {
        if record.sequence != expected {
            return Err(MigrationError::HistoryCorruption(format!(
                "ledger records migration {} ({}) but not migration {expected}",
                record.sequence, record.name
            )));
        }
        let Some(migration) = local.iter().find(|m| m.sequence == expected) else {
            return Err(MigrationError::HistoryCorruption(format!(
                "ledger records migration {} ({}) which is not known locally",
                record.sequence, record.name
            )));
        };
        if migration.checksum != record.checksum {
            return Err(MigrationError::Drifted {
                sequence: record.sequence,
                name: migration.name.clone(),
                recorded: record.checksum.clone(),
                local: migration.checksum.clone(),
            });
        }
    }

    let applied_through = applied.last().map_or(-1, |r| r.sequence);
    Ok(local
        .iter()
        .filter(|m| m.sequence > applied_through)
        .collect())
}
