//! `MigrationRecord` - one row of the ledger table

use crate::executor::ExecutorError;
use chrono::{DateTime, NaiveDateTime, Utc};

/// A migration applied to a database, as recorded in the ledger table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub sequence: i64,

    /// File stem of the migration, e.g. `0003_add_age`.
    pub name: String,

    /// Hash of the snapshot the migration produced.
    pub checksum: String,

    pub applied_at: DateTime<Utc>,

    /// Execution time in milliseconds (`None` if not recorded)
    pub execution_time_ms: Option<i64>,
}

impl MigrationRecord {
    /// Sequence reserved for the lock row. Real migrations start at 0.
    pub const LOCK_SEQUENCE: i64 = -1;

    #[must_use]
    pub fn new(
        sequence: i64,
        name: impl Into<String>,
        checksum: impl Into<String>,
        applied_at: DateTime<Utc>,
        execution_time_ms: Option<i64>,
    ) -> Self {
        Self {
            sequence,
            name: name.into(),
            checksum: checksum.into(),
            applied_at,
            execution_time_ms,
        }
    }

    /// The row whose presence means a process holds the migration lock.
    #[must_use]
    pub fn lock() -> Self {
        Self::new(Self::LOCK_SEQUENCE, "LOCK", "lock", Utc::now(), None)
    }

    pub fn is_lock(&self) -> bool {
        self.sequence == Self::LOCK_SEQUENCE
    }

    /// Build a record from a row of
    /// `sequence, name, checksum, applied_at::text, execution_time_ms`.
    pub fn from_row(row: &may_postgres::Row) -> Result<Self, ExecutorError> {
        let parse = |e: may_postgres::Error| ExecutorError::Parse(e.to_string());

        let sequence: i64 = row.try_get(0).map_err(parse)?;
        let name: String = row.try_get(1).map_err(parse)?;
        let checksum: String = row.try_get(2).map_err(parse)?;
        let applied_at: String = row.try_get(3).map_err(parse)?;
        let execution_time_ms: Option<i32> = row.try_get(4).map_err(parse)?;

        Ok(Self {
            sequence,
            name,
            checksum,
            applied_at: parse_timestamp(&applied_at)?,
            execution_time_ms: execution_time_ms.map(i64::from),
        })
    }
}

/// Parse a `TIMESTAMP` rendered as text.
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ExecutorError> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];

    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            ExecutorError::Parse(format!(
                "Failed to parse timestamp '{value}': unrecognized format"
            ))
        })
}
