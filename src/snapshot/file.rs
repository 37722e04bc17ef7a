//! Directory-backed snapshot store
//!
//! One pretty-printed JSON file per snapshot, named `NNNN.snapshot.json`.
//! New files are written under a temporary name and published with a hard
//! link, which fails if the target exists. Two generators racing for the same
//! sequence therefore cannot both win.

use super::{Head, Snapshot, SnapshotError, SnapshotStore};
use crate::schema::Schema;
use regex::Regex;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot file for `sequence`.
    pub fn path_for(&self, sequence: i64) -> PathBuf {
        self.dir.join(format!("{sequence:04}.snapshot.json"))
    }

    /// Parse `NNNN.snapshot.json` into its sequence number.
    pub fn parse_filename(filename: &str) -> Option<i64> {
        let re = Regex::new(r"^(\d+)\.snapshot\.json$").ok()?;
        re.captures(filename)?.get(1)?.as_str().parse().ok()
    }

    fn io_error(path: &Path, source: std::io::Error) -> SnapshotError {
        SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn read(&self, sequence: i64, path: &Path) -> Result<Snapshot, SnapshotError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SnapshotError::NotFound(sequence))
            }
            Err(e) => return Err(Self::io_error(path, e)),
        };
        let snapshot: Snapshot =
            serde_json::from_str(&content).map_err(|e| SnapshotError::Corrupt {
                sequence,
                reason: format!("invalid JSON in {}: {e}", path.display()),
            })?;
        if snapshot.sequence != sequence {
            return Err(SnapshotError::Corrupt {
                sequence,
                reason: format!(
                    "{} records sequence {}",
                    path.display(),
                    snapshot.sequence
                ),
            });
        }
        Ok(snapshot)
    }

    /// Sequence numbers present on disk, ascending.
    fn sequences(&self) -> Result<Vec<i64>, SnapshotError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_error(&self.dir, e)),
        };

        let mut sequences = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::io_error(&self.dir, e))?;
            if let Some(sequence) = entry
                .file_name()
                .to_str()
                .and_then(Self::parse_filename)
            {
                sequences.push(sequence);
            }
        }
        sequences.sort_unstable();
        Ok(sequences)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load_unverified(&self, sequence: i64) -> Result<Snapshot, SnapshotError> {
        self.read(sequence, &self.path_for(sequence))
    }

    fn list(&self) -> Result<Vec<Snapshot>, SnapshotError> {
        self.sequences()?
            .into_iter()
            .map(|sequence| self.load(sequence))
            .collect()
    }

    fn latest(&self) -> Result<Head, SnapshotError> {
        match self.sequences()?.last() {
            Some(sequence) => Ok(Head::Snapshot(self.load(*sequence)?)),
            None => Ok(Head::Empty),
        }
    }

    fn append_after(
        &self,
        head: &Head,
        schema: &Schema,
        description: &str,
    ) -> Result<Snapshot, SnapshotError> {
        let sequence = head.next_sequence();
        if self.sequences()?.iter().any(|s| *s >= sequence) {
            return Err(SnapshotError::Conflict { sequence });
        }

        let snapshot = Snapshot::new(
            sequence,
            head.hash().map(str::to_string),
            description,
            schema,
        )?;
        let mut content = serde_json::to_string_pretty(&snapshot)?;
        content.push('\n');

        fs::create_dir_all(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;
        let target = self.path_for(sequence);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or_default();
        let temp = self.dir.join(format!(
            ".{sequence:04}.snapshot.json.{}-{nanos}.tmp",
            std::process::id()
        ));

        let written = fs::File::create(&temp)
            .and_then(|mut file| {
                file.write_all(content.as_bytes())?;
                file.sync_all()
            })
            .map_err(|e| Self::io_error(&temp, e));
        let published = written.and_then(|()| match fs::hard_link(&temp, &target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(SnapshotError::Conflict { sequence })
            }
            Err(e) => Err(Self::io_error(&target, e)),
        });
        let _ = fs::remove_file(&temp);
        published?;

        log::info!(
            "Wrote snapshot {} ({}) to {}",
            sequence,
            snapshot.hash.get(..12).unwrap_or(&snapshot.hash),
            target.display()
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType, Table};

    fn schema() -> Schema {
        Schema::new().table(Table::new("users").column(Column::new("id", ColumnType::Integer)))
    }

    #[test]
    fn test_parse_filename() {
        assert_eq!(FileSnapshotStore::parse_filename("0003.snapshot.json"), Some(3));
        assert_eq!(FileSnapshotStore::parse_filename("0003_init.sql"), None);
        assert_eq!(
            FileSnapshotStore::parse_filename(".0003.snapshot.json.1-2.tmp"),
            None
        );
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("nope"));
        assert_eq!(store.latest().unwrap(), Head::Empty);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_append_writes_file_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let snapshot = store.append(&schema(), "init").unwrap();

        assert!(dir.path().join("0000.snapshot.json").exists());
        assert_eq!(store.load(0).unwrap(), snapshot);
        // No temporary files are left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_edited_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        store.append(&schema(), "init").unwrap();

        let path = store.path_for(0);
        let edited = std::fs::read_to_string(&path)
            .unwrap()
            .replace("\"users\"", "\"people\"");
        std::fs::write(&path, edited).unwrap();

        assert!(matches!(
            store.load(0),
            Err(SnapshotError::Corrupt { sequence: 0, .. })
        ));

        let stored = store.load_unverified(0).unwrap();
        assert_eq!(stored.schema.tables[0].name, "people");
        assert_ne!(stored.compute_hash().unwrap(), stored.hash);
    }

    #[test]
    fn test_unparsable_file_is_corrupt_even_unverified() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        store.append(&schema(), "init").unwrap();
        std::fs::write(store.path_for(0), "{ not json").unwrap();

        assert!(matches!(
            store.load_unverified(0),
            Err(SnapshotError::Corrupt { sequence: 0, .. })
        ));
    }
}
