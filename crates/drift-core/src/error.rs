//! Error types for drift-core

use thiserror::Error;

/// Result type alias using drift-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in drift-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Object or row not found
    ///
    /// Existence checks never produce this; they return `false` instead.
    /// Updating a keyed row that does not exist does produce it.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Column type or operation the engine cannot represent
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A storage error enriched with provider diagnostics before rethrow
    #[error("Sync error on {data_source}: {source}")]
    Sync {
        /// Underlying error
        source: Box<Error>,
        /// Data source the provider was connected to
        data_source: String,
        /// Engine-native error code, when one was reported
        number: Option<i32>,
    },
}

impl Error {
    /// Extract the engine-native result code, walking through diagnostic wrappers.
    #[must_use]
    pub fn native_code(&self) -> Option<i32> {
        match self {
            Self::LibSql(libsql::Error::SqliteFailure(code, _)) => Some(*code),
            Self::Sync { source, number, .. } => number.or_else(|| source.native_code()),
            _ => None,
        }
    }

    /// Whether this error (or its wrapped source) is a constraint violation.
    ///
    /// Primary result code 19 covers all `SQLITE_CONSTRAINT` extended codes.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        self.native_code().is_some_and(|code| code & 0xff == 19)
    }
}
