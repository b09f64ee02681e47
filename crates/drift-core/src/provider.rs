//! Per-backend providers: capability flags, connection factory, and
//! transient-error classification
//!
//! The external orchestrator uses `should_retry` to decide retry vs.
//! surface-to-user; the core itself never retries internally.

use std::path::{Path, PathBuf};

use libsql::Connection;

use crate::adapter::SyncAdapter;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::TableSchema;
use crate::naming::{Dialect, SQLITE_DIALECT};
use crate::scope_store::ScopeStore;
use crate::table_builder::TableBuilder;

/// Granularity at which the engine can toggle constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintsLevel {
    /// Individual constraints can be disabled per table
    PerTable,
    /// Constraint checking is toggled for the whole database/transaction
    PerDatabase,
}

/// Capability flags of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether the engine supports bulk/table-valued batch operations
    pub supports_bulk_operations: bool,
    /// How constraint toggling works on this engine
    pub constraints_level: ConstraintsLevel,
    /// Whether this backend can act as the server-side provider
    pub can_be_server_provider: bool,
}

/// The per-backend contract: one implementation per engine, selected at
/// provider-construction time.
#[allow(async_fn_in_trait)]
pub trait SyncProvider {
    /// Provider type name, computed once at construction
    fn provider_name(&self) -> &str;

    /// Capability flags of this backend
    fn capabilities(&self) -> &Capabilities;

    /// Quoting rules and identifier limits of this backend
    fn dialect(&self) -> Dialect;

    /// Open a database for this provider's data source
    async fn connect(&self) -> Result<Database>;

    /// Whether the orchestrator should retry the operation that produced
    /// this error
    fn should_retry(&self, error: &Error) -> bool;

    /// Attach engine-specific diagnostic fields before rethrowing
    fn ensure_diagnostics(&self, error: Error) -> Error;
}

/// SQLite result codes considered transient/recoverable.
///
/// Grouped by category: contention, consistency, memory, I/O, and
/// connection-level availability. Everything else is not retryable.
const TRANSIENT_ERROR_CODES: &[i32] = &[
    // Contention
    5,   // SQLITE_BUSY: another connection holds the write lock
    6,   // SQLITE_LOCKED: a table is locked within this connection
    261, // SQLITE_BUSY_RECOVERY: another connection is recovering the WAL
    262, // SQLITE_LOCKED_SHAREDCACHE: lock held via a shared cache
    517, // SQLITE_BUSY_SNAPSHOT: serialization failure in WAL mode
    // Memory
    7, // SQLITE_NOMEM: allocation failed
    // I/O
    10, // SQLITE_IOERR: disk I/O error
    // Protocol
    15, // SQLITE_PROTOCOL: locking protocol gave up
];

/// SQLite-backed provider.
pub struct SqliteSyncProvider {
    name: String,
    data_source: String,
    path: Option<PathBuf>,
    capabilities: Capabilities,
}

impl SqliteSyncProvider {
    /// Provider over a database file path.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: "SqliteSyncProvider".to_string(),
            data_source: path.to_string_lossy().to_string(),
            path: Some(path),
            capabilities: Self::sqlite_capabilities(),
        }
    }

    /// Provider over an in-memory database (useful for testing).
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            name: "SqliteSyncProvider".to_string(),
            data_source: ":memory:".to_string(),
            path: None,
            capabilities: Self::sqlite_capabilities(),
        }
    }

    const fn sqlite_capabilities() -> Capabilities {
        Capabilities {
            // No table-valued parameters; batches apply row by row.
            supports_bulk_operations: false,
            // Foreign keys are deferred per transaction, not per constraint.
            constraints_level: ConstraintsLevel::PerDatabase,
            can_be_server_provider: true,
        }
    }

    /// The path (or `:memory:`) this provider connects to.
    #[must_use]
    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    /// Sync adapter for one table over an open connection.
    #[must_use]
    pub fn sync_adapter<'a>(
        &self,
        conn: &'a Connection,
        schema: &'a TableSchema,
    ) -> SyncAdapter<'a> {
        SyncAdapter::new(conn, schema, self.dialect())
    }

    /// Table builder for one table.
    #[must_use]
    pub fn table_builder<'a>(&self, schema: &'a TableSchema) -> TableBuilder<'a> {
        TableBuilder::new(schema, self.dialect())
    }

    /// Scope store over an open connection.
    pub fn scope_store<'a>(&self, conn: &'a Connection) -> Result<ScopeStore<'a>> {
        ScopeStore::new(conn)
    }
}

impl SyncProvider for SqliteSyncProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn dialect(&self) -> Dialect {
        SQLITE_DIALECT
    }

    async fn connect(&self) -> Result<Database> {
        match &self.path {
            Some(path) => Database::open(path).await,
            None => Database::open_in_memory().await,
        }
    }

    fn should_retry(&self, error: &Error) -> bool {
        match error {
            Error::LibSql(libsql::Error::ConnectionFailed(_)) => true,
            Error::Sync { source, .. } => self.should_retry(source),
            _ => error.native_code().is_some_and(|code| {
                TRANSIENT_ERROR_CODES.contains(&code)
                    || TRANSIENT_ERROR_CODES.contains(&(code & 0xff))
            }),
        }
    }

    fn ensure_diagnostics(&self, error: Error) -> Error {
        let number = error.native_code();
        Error::Sync {
            source: Box::new(error),
            data_source: self.data_source.clone(),
            number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> Error {
        Error::LibSql(libsql::Error::SqliteFailure(code, "failure".to_string()))
    }

    #[test]
    fn test_capabilities() {
        let provider = SqliteSyncProvider::in_memory();
        let caps = provider.capabilities();
        assert!(!caps.supports_bulk_operations);
        assert_eq!(caps.constraints_level, ConstraintsLevel::PerDatabase);
        assert!(caps.can_be_server_provider);
        assert_eq!(provider.provider_name(), "SqliteSyncProvider");
    }

    #[test]
    fn test_transient_classification() {
        let provider = SqliteSyncProvider::in_memory();

        // Busy, locked, and their extended forms are retryable.
        assert!(provider.should_retry(&sqlite_failure(5)));
        assert!(provider.should_retry(&sqlite_failure(6)));
        assert!(provider.should_retry(&sqlite_failure(261)));
        assert!(provider.should_retry(&sqlite_failure(517)));
        assert!(provider.should_retry(&sqlite_failure(7)));

        // Constraint violations and plain errors are not.
        assert!(!provider.should_retry(&sqlite_failure(19)));
        assert!(!provider.should_retry(&sqlite_failure(2067)));
        assert!(!provider.should_retry(&sqlite_failure(1)));
        assert!(!provider.should_retry(&Error::NotFound("x".to_string())));

        // Connection-level failures are always worth retrying.
        let conn_err = Error::LibSql(libsql::Error::ConnectionFailed("refused".to_string()));
        assert!(provider.should_retry(&conn_err));
    }

    #[test]
    fn test_diagnostics_are_attached_and_walked() {
        let provider = SqliteSyncProvider::new("/tmp/orders.db");
        let enriched = provider.ensure_diagnostics(sqlite_failure(5));

        match &enriched {
            Error::Sync {
                data_source,
                number,
                ..
            } => {
                assert_eq!(data_source, "/tmp/orders.db");
                assert_eq!(*number, Some(5));
            }
            other => panic!("expected Sync error, got {other:?}"),
        }

        // Classification still sees through the wrapper.
        assert!(provider.should_retry(&enriched));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connect_in_memory() {
        let provider = SqliteSyncProvider::in_memory();
        let db = provider.connect().await.unwrap();
        assert_eq!(db.data_source(), ":memory:");
    }
}
