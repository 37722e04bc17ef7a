//! Ledger scenarios on the in-memory executor: generate real migrations, then
//! apply them.

use chrono::Utc;
use std::time::Duration;
use tidemark::migration::{MigrationError, MigrationGenerator, MigrationRecord, MigrationState, Migrator};
use tidemark::mock::MockExecutor;
use tidemark::schema::{Column, ColumnType, Schema, Table};
use tidemark::snapshot::SnapshotStore;
use tidemark::FileSnapshotStore;
use tempfile::TempDir;

/// Three generated migrations: users, users.age, posts.
fn project() -> (TempDir, Vec<MigrationRecord>) {
    let dir = tempfile::tempdir().unwrap();
    let generator = MigrationGenerator::new(dir.path(), FileSnapshotStore::new(dir.path().join("snapshots")));

    let users = Table::new("users")
        .column(Column::new("id", ColumnType::Integer).not_null())
        .primary_key(["id"]);
    let v0 = Schema::new().table(users.clone());
    let v1 = Schema::new().table(users.column(Column::new("age", ColumnType::Integer)));
    let v2 = v1.clone().table(
        Table::new("posts")
            .column(Column::new("id", ColumnType::Integer).not_null())
            .primary_key(["id"]),
    );

    let records = [(v0, "create users"), (v1, "add age"), (v2, "create posts")]
        .iter()
        .map(|(schema, description)| {
            let generated = generator.generate(schema, description).unwrap();
            MigrationRecord::new(
                generated.sequence(),
                generated.name(),
                generated.snapshot.hash.clone(),
                Utc::now(),
                Some(3),
            )
        })
        .collect();
    (dir, records)
}

fn migrator(dir: &TempDir) -> Migrator<FileSnapshotStore> {
    Migrator::new(dir.path(), FileSnapshotStore::new(dir.path().join("snapshots")))
        .with_lock_timeout(Duration::ZERO)
}

#[test]
fn test_fresh_database_gets_everything() {
    let (dir, _) = project();
    let executor = MockExecutor::new();

    let applied = migrator(&dir).migrate(&executor).unwrap();
    let names: Vec<&str> = applied.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["0000_create_users", "0001_add_age", "0002_create_posts"]);

    let executed = executor.executed();
    assert!(executed.iter().any(|sql| sql.starts_with("CREATE TABLE \"users\"")));
    assert!(executed.iter().any(|sql| sql == "ALTER TABLE \"users\" ADD COLUMN \"age\" INTEGER"));

    let status = migrator(&dir).status(&executor).unwrap();
    assert!(status.is_up_to_date());
    assert_eq!(status.latest_applied_sequence(), Some(2));
}

#[test]
fn test_drifted_migration_blocks_pending_ones() {
    let (dir, mut records) = project();
    records[1].checksum = "0".repeat(64);
    records.truncate(2);
    let executor = MockExecutor::with_records(records);

    let err = migrator(&dir).migrate(&executor).unwrap_err();
    assert!(matches!(err, MigrationError::Drifted { sequence: 1, .. }));
    assert!(!executor
        .executed()
        .iter()
        .any(|sql| sql.contains("\"posts\"")));
    assert_eq!(executor.records().len(), 2);

    let status = migrator(&dir).status(&executor).unwrap();
    assert!(matches!(status.entries[1].state, MigrationState::Drifted { .. }));
    assert_eq!(status.pending_count, 1);
}

#[test]
fn test_ledger_gap_is_fatal() {
    let (dir, records) = project();
    let executor = MockExecutor::with_records([records[0].clone(), records[2].clone()]);

    assert!(matches!(
        migrator(&dir).migrate(&executor),
        Err(MigrationError::HistoryCorruption(_))
    ));
    assert!(!executor.executed().iter().any(|sql| sql == "BEGIN"));
}

#[test]
fn test_failure_keeps_earlier_migrations() {
    let (dir, _) = project();
    let executor = MockExecutor::new().fail_on("\"posts\"");

    let err = migrator(&dir).migrate(&executor).unwrap_err();
    assert!(matches!(err, MigrationError::ExecutionFailure { sequence: 2, .. }));

    let recorded: Vec<i64> = executor.records().iter().map(|r| r.sequence).collect();
    assert_eq!(recorded, [0, 1]);

    let status = migrator(&dir).status(&executor).unwrap();
    assert_eq!(status.next_pending_sequence(), Some(2));
}

#[test]
fn test_dry_run_plans_without_executing() {
    let (dir, records) = project();
    let executor = MockExecutor::with_records([records[0].clone()]);

    let plan = migrator(&dir).plan(&executor).unwrap();
    let names: Vec<&str> = plan.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["0001_add_age", "0002_create_posts"]);
    assert!(executor.executed().is_empty());
}

#[test]
fn test_snapshot_edit_is_detected() {
    let (dir, records) = project();
    let executor = MockExecutor::with_records(records.clone());
    assert!(migrator(&dir).status(&executor).unwrap().is_up_to_date());

    // Hand-editing a snapshot breaks its hash; the edited migration drifts.
    let path = dir.path().join("snapshots/0001.snapshot.json");
    let text = std::fs::read_to_string(&path).unwrap().replace("add age", "edited");
    std::fs::write(&path, text).unwrap();
    assert!(FileSnapshotStore::new(dir.path().join("snapshots")).load(1).is_err());

    let status = migrator(&dir).status(&executor).unwrap();
    assert_eq!(status.drifted_count, 1);
    assert!(matches!(status.entries[0].state, MigrationState::Applied { .. }));
    assert!(matches!(
        &status.entries[1].state,
        MigrationState::Drifted { recorded } if *recorded == records[1].checksum
    ));
    assert!(matches!(status.entries[2].state, MigrationState::Applied { .. }));

    let err = migrator(&dir).migrate(&executor).unwrap_err();
    assert!(matches!(err, MigrationError::Drifted { sequence: 1, .. }));
    assert_eq!(executor.records().len(), 3);
    assert!(!executor.lock_held());
}

#[test]
fn test_unreadable_snapshot_fails_status() {
    let (dir, records) = project();
    let executor = MockExecutor::with_records(records);

    std::fs::write(dir.path().join("snapshots/0001.snapshot.json"), "not json").unwrap();
    assert!(matches!(
        migrator(&dir).status(&executor),
        Err(MigrationError::Snapshot(_))
    ));
}
