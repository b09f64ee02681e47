use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] drift_core::Error),
    #[error(transparent)]
    LibSql(#[from] libsql::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Table '{0}' does not exist in this database")]
    TableNotFound(String),
    #[error("Table '{0}' has no primary key; it cannot be tracked")]
    NoPrimaryKey(String),
    #[error("Table '{0}' is not provisioned for sync. Run `drift provision` first.")]
    NotProvisioned(String),
}
