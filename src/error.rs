//! Crate-level error type

use crate::connection::ConnectionError;
use crate::executor::ExecutorError;
use crate::migration::{GenerateError, MigrationError};
use crate::operation::ApplyError;
use crate::render::RenderError;
use crate::schema::SchemaError;
use crate::snapshot::SnapshotError;
use thiserror::Error;

/// Any error the crate's components return.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
