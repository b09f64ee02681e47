//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

/// Database wrapper for libSQL connections
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
    data_source: String,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self {
            _db: db,
            conn,
            data_source: path_str,
        };
        database.configure().await?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self {
            _db: db,
            conn,
            data_source: ":memory:".to_string(),
        };
        database.configure().await?;
        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    async fn configure(&self) -> Result<()> {
        // WAL is a file-database concern; in-memory databases reject it
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    /// Get a reference to the underlying connection
    ///
    /// The connection is shared between the caller and core operations;
    /// operations borrow it for their duration and never manage transactions
    /// the caller opened on it.
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// The path (or `:memory:`) this database was opened on
    #[must_use]
    pub fn data_source(&self) -> &str {
        &self.data_source
    }
}
