//! Error type for the simulator and the ingestion harness.

use expedientes_core::schema::SchemaError;
use expedientes_env::EnvError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Row rejected by table schema: {0}")]
    Schema(#[from] SchemaError),

    /// The append target must be provisioned beforehand
    #[error("Table does not exist: {}", .0.display())]
    TableNotFound(PathBuf),

    #[error("Publishing requested but no publisher is configured")]
    NoPublisher,

    #[error("No async runtime available to spawn publish tasks")]
    NoRuntime,
}
