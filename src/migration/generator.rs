//! Migration generation
//!
//! Turns a requested schema into the next migration: diff against the latest
//! snapshot, prove the operations with [`apply`], render them, claim the next
//! snapshot position and write `NNNN_<name>.sql`. No database is involved.

use crate::config::TidemarkConfig;
use crate::diff::{diff_with_options, DiffOptions, DiffWarning};
use crate::operation::{apply, ApplyError};
use crate::render::{render, Dialect, MigrationScript, RenderError, ScriptHeader};
use crate::schema::{canonicalize, validate, Schema, SchemaError};
use crate::snapshot::{FileSnapshotStore, Snapshot, SnapshotError, SnapshotStore};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAX_NAME_LEN: usize = 50;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no changes: the schema matches the latest snapshot")]
    EmptyDiff,

    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("generated operations do not apply cleanly: {0}")]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("generated operations do not reproduce the requested schema: {0}")]
    Verification(String),

    #[error("failed to write migration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a successful `generate` produced.
#[derive(Debug, Clone)]
pub struct GeneratedMigration {
    pub path: PathBuf,
    pub snapshot: Snapshot,
    pub script: MigrationScript,
    pub warnings: Vec<DiffWarning>,
}

impl GeneratedMigration {
    pub fn sequence(&self) -> i64 {
        self.snapshot.sequence
    }

    pub fn name(&self) -> &str {
        &self.script.header.name
    }
}

pub struct MigrationGenerator<S> {
    migrations_dir: PathBuf,
    snapshots: S,
    dialect: Dialect,
    options: DiffOptions,
}

impl MigrationGenerator<FileSnapshotStore> {
    pub fn from_config(config: &TidemarkConfig) -> Self {
        MigrationGenerator::new(
            &config.paths.migrations_dir,
            FileSnapshotStore::new(&config.paths.snapshots_dir),
        )
        .with_dialect(config.dialect)
        .with_options(config.diff.clone())
    }
}

impl<S: SnapshotStore> MigrationGenerator<S> {
    pub fn new(migrations_dir: impl AsRef<Path>, snapshots: S) -> Self {
        Self {
            migrations_dir: migrations_dir.as_ref().to_path_buf(),
            snapshots,
            dialect: Dialect::default(),
            options: DiffOptions::default(),
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_options(mut self, options: DiffOptions) -> Self {
        self.options = options;
        self
    }

    pub fn snapshots(&self) -> &S {
        &self.snapshots
    }

    /// Generate the migration from the latest snapshot to `schema`.
    ///
    /// The snapshot is appended only after the operations have been verified
    /// and rendered, so a failure before that point leaves the store as it
    /// was. A concurrent generation that claims the same position first makes
    /// this call fail with [`SnapshotError::Conflict`].
    pub fn generate(
        &self,
        schema: &Schema,
        description: &str,
    ) -> Result<GeneratedMigration, GenerateError> {
        let target = canonicalize(schema);
        validate(&target)?;

        let head = self.snapshots.latest()?;
        let base = head.schema();
        let diff = diff_with_options(&base, &target, &self.options);
        if diff.is_empty() {
            return Err(GenerateError::EmptyDiff);
        }

        let result = apply(&base, &diff.operations)?;
        if !result.structurally_eq(&target) {
            return Err(GenerateError::Verification(format!(
                "{} operation(s) applied to snapshot {} leave a different schema",
                diff.operations.len(),
                head.hash().unwrap_or("(empty)")
            )));
        }

        let sections = render(&diff.operations, self.dialect)?;

        let name = format!("{:04}_{}", head.next_sequence(), migration_name(description));
        let path = self.migrations_dir.join(format!("{name}.sql"));
        if path.exists() {
            return Err(GenerateError::Io {
                path,
                source: std::io::ErrorKind::AlreadyExists.into(),
            });
        }

        let snapshot = self.snapshots.append_after(&head, &target, description)?;
        let script = MigrationScript::new(
            ScriptHeader {
                name: name.clone(),
                description: description.to_string(),
                sequence: snapshot.sequence,
                parent: snapshot.parent.clone(),
                snapshot: snapshot.hash.clone(),
                dialect: self.dialect,
            },
            sections,
        );

        write_new(&self.migrations_dir, &path, &script.to_sql())?;

        log::info!(
            "Generated migration {name} with {} operation(s)",
            diff.operations.len()
        );
        Ok(GeneratedMigration {
            path,
            snapshot,
            script,
            warnings: diff.warnings,
        })
    }
}

fn write_new(dir: &Path, path: &Path, content: &str) -> Result<(), GenerateError> {
    let io = |source| GenerateError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(io)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(io)?;
    file.write_all(content.as_bytes()).map_err(io)
}

/// File-name fragment for a migration description.
///
/// # Example
/// - `"Add age to Users!"` → `add_age_to_users`
pub fn migration_name(description: &str) -> String {
    let mut name = String::with_capacity(description.len());
    for c in description.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            c
        } else {
            '_'
        };
        if !(c == '_' && name.ends_with('_')) {
            name.push(c);
        }
    }

    let name = name.trim_matches('_');
    let name = name[..name.len().min(MAX_NAME_LEN)].trim_end_matches('_');
    if name.is_empty() {
        "migration".to_string()
    } else {
        name.to_string()
    }
}
