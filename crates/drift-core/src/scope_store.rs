//! Scope metadata persistence
//!
//! Two dedicated tables persist scope definitions and per-client sync state.
//! All writes are keyed by the composite natural key; updating a row that
//! does not exist is a `NotFound` condition, distinct from execution errors.
//! Creation commands do not guard against duplicates on their own; pair
//! them with the introspector's existence checks.

use libsql::{Connection, Value};
use regex::Regex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::introspect::SchemaIntrospector;
use crate::models::{ScopeInfo, ScopeInfoClient};
use crate::value::{opt_i64, opt_string};

/// Default name of the scope info table
pub const DEFAULT_SCOPE_TABLE: &str = "drift_scope_info";

/// Engine's current logical clock value, used to stamp the upper bound of a
/// selection window. Non-decreasing between calls.
const LOCAL_TIMESTAMP_SQL: &str =
    "SELECT CAST(replace(strftime('%Y%m%d%H%M%f', 'now'), '.', '') AS INTEGER)";

/// Store for `ScopeInfo` and `ScopeInfoClient` rows over a borrowed
/// connection.
pub struct ScopeStore<'a> {
    conn: &'a Connection,
    table_name: String,
    client_table_name: String,
}

impl<'a> ScopeStore<'a> {
    /// Create a store using the default scope table name.
    pub fn new(conn: &'a Connection) -> Result<Self> {
        Self::with_table_name(conn, DEFAULT_SCOPE_TABLE)
    }

    /// Create a store over custom-named scope tables.
    ///
    /// The client table is always `<name>_client`. Names are restricted to
    /// `[A-Za-z0-9_]` so they can be spliced into command text safely.
    pub fn with_table_name(conn: &'a Connection, table_name: &str) -> Result<Self> {
        let valid = Regex::new(r"^[A-Za-z0-9_]+$").expect("Invalid regex");
        if !valid.is_match(table_name) {
            return Err(Error::InvalidInput(format!(
                "Invalid scope info table name format: '{table_name}'"
            )));
        }

        Ok(Self {
            conn,
            table_name: table_name.to_string(),
            client_table_name: format!("{table_name}_client"),
        })
    }

    /// Name of the scope info table.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Name of the scope info client table.
    #[must_use]
    pub fn client_table_name(&self) -> &str {
        &self.client_table_name
    }

    /// Engine's current logical clock value.
    pub async fn local_timestamp(&self) -> Result<i64> {
        let mut rows = self.conn.query(LOCAL_TIMESTAMP_SQL, ()).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Err(Error::Database(
                "Local timestamp query returned no rows".to_string(),
            )),
        }
    }

    /// Whether the scope info table exists.
    pub async fn scope_info_table_exists(&self) -> Result<bool> {
        SchemaIntrospector::new(self.conn)
            .table_exists(&self.table_name)
            .await
    }

    /// Whether the scope info client table exists.
    pub async fn scope_info_client_table_exists(&self) -> Result<bool> {
        SchemaIntrospector::new(self.conn)
            .table_exists(&self.client_table_name)
            .await
    }

    /// Create the scope info table.
    pub async fn create_scope_info_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE \"{}\" (\n\
                 \"sync_scope_id\" VARCHAR(36) NOT NULL,\n\
                 \"sync_scope_name\" VARCHAR(100) NOT NULL,\n\
                 \"sync_scope_schema\" TEXT NULL,\n\
                 \"sync_scope_setup\" TEXT NULL,\n\
                 \"sync_scope_version\" VARCHAR(10) NULL,\n\
                 \"sync_scope_last_server_sync_timestamp\" INTEGER NULL,\n\
                 \"sync_scope_last_sync_timestamp\" INTEGER NULL,\n\
                 \"sync_scope_last_sync_duration\" INTEGER NULL,\n\
                 \"sync_scope_last_sync\" DATETIME NULL,\n\
                 PRIMARY KEY (\"sync_scope_id\", \"sync_scope_name\")\n\
             )",
            self.table_name
        );
        self.conn.execute(&sql, ()).await?;
        tracing::info!("Created scope info table {}", self.table_name);
        Ok(())
    }

    /// Create the scope info client table.
    pub async fn create_scope_info_client_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE \"{}\" (\n\
                 \"sync_scope_id\" VARCHAR(36) NOT NULL,\n\
                 \"sync_scope_name\" VARCHAR(100) NOT NULL,\n\
                 \"sync_scope_client_id\" VARCHAR(36) NOT NULL,\n\
                 \"sync_scope_client_name\" VARCHAR(100) NULL,\n\
                 \"sync_scope_parameters\" TEXT NULL,\n\
                 \"sync_scope_filters\" TEXT NULL,\n\
                 \"sync_scope_properties\" TEXT NULL,\n\
                 \"sync_scope_last_client_sync_timestamp\" INTEGER NULL,\n\
                 \"sync_scope_last_server_sync_timestamp\" INTEGER NULL,\n\
                 \"sync_scope_last_sync_timestamp\" INTEGER NULL,\n\
                 \"sync_scope_last_sync_duration\" INTEGER NULL,\n\
                 \"sync_scope_last_sync\" DATETIME NULL,\n\
                 PRIMARY KEY (\"sync_scope_id\", \"sync_scope_name\", \"sync_scope_client_id\")\n\
             )",
            self.client_table_name
        );
        self.conn.execute(&sql, ()).await?;
        tracing::info!("Created scope info client table {}", self.client_table_name);
        Ok(())
    }

    /// Create both scope tables when missing. Idempotent through the
    /// introspector's existence checks.
    pub async fn ensure_scope_tables(&self) -> Result<()> {
        if !self.scope_info_table_exists().await? {
            self.create_scope_info_table().await?;
        }
        if !self.scope_info_client_table_exists().await? {
            self.create_scope_info_client_table().await?;
        }
        Ok(())
    }

    /// Drop the scope info table.
    pub async fn drop_scope_info_table(&self) -> Result<()> {
        self.conn
            .execute(&format!("DROP TABLE \"{}\"", self.table_name), ())
            .await?;
        Ok(())
    }

    /// Drop the scope info client table.
    pub async fn drop_scope_info_client_table(&self) -> Result<()> {
        self.conn
            .execute(&format!("DROP TABLE \"{}\"", self.client_table_name), ())
            .await?;
        Ok(())
    }

    /// Whether a scope row exists for this (id, name) key.
    pub async fn exists_scope_info(&self, scope_id: Uuid, scope_name: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE \"sync_scope_id\" = ? AND \"sync_scope_name\" = ?",
            self.table_name
        );
        let mut rows = self
            .conn
            .query(&sql, [scope_id.to_string(), scope_name.to_string()])
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(count > 0)
    }

    /// Load one scope row by its composite key.
    pub async fn get_scope_info(
        &self,
        scope_id: Uuid,
        scope_name: &str,
    ) -> Result<Option<ScopeInfo>> {
        let sql = format!(
            "{} WHERE \"sync_scope_id\" = ? AND \"sync_scope_name\" = ?",
            self.select_scope_info_sql()
        );
        let mut rows = self
            .conn
            .query(&sql, [scope_id.to_string(), scope_name.to_string()])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_scope_info(&row)?)),
            None => Ok(None),
        }
    }

    /// Load every scope row.
    pub async fn get_all_scope_infos(&self) -> Result<Vec<ScopeInfo>> {
        let mut rows = self.conn.query(&self.select_scope_info_sql(), ()).await?;
        let mut scopes = Vec::new();
        while let Some(row) = rows.next().await? {
            scopes.push(parse_scope_info(&row)?);
        }
        Ok(scopes)
    }

    /// Insert a new scope row.
    pub async fn insert_scope_info(&self, scope: &ScopeInfo) -> Result<()> {
        let sql = format!(
            "INSERT INTO \"{}\" (\"sync_scope_id\", \"sync_scope_name\", \"sync_scope_schema\", \
             \"sync_scope_setup\", \"sync_scope_version\", \"sync_scope_last_server_sync_timestamp\", \
             \"sync_scope_last_sync_timestamp\", \"sync_scope_last_sync_duration\", \"sync_scope_last_sync\") \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table_name
        );
        self.conn
            .execute(&sql, scope_info_values(scope))
            .await?;
        Ok(())
    }

    /// Update an existing scope row; the write is all-or-nothing.
    ///
    /// Fails with `NotFound` when no row matches the composite key.
    pub async fn update_scope_info(&self, scope: &ScopeInfo) -> Result<()> {
        let sql = format!(
            "UPDATE \"{}\" SET \"sync_scope_schema\" = ?, \"sync_scope_setup\" = ?, \
             \"sync_scope_version\" = ?, \"sync_scope_last_server_sync_timestamp\" = ?, \
             \"sync_scope_last_sync_timestamp\" = ?, \"sync_scope_last_sync_duration\" = ?, \
             \"sync_scope_last_sync\" = ? \
             WHERE \"sync_scope_id\" = ? AND \"sync_scope_name\" = ?",
            self.table_name
        );
        let params = vec![
            text_or_null(scope.schema.clone()),
            text_or_null(scope.setup.clone()),
            text_or_null(scope.version.clone()),
            int_or_null(scope.last_server_sync_timestamp),
            int_or_null(scope.last_sync_timestamp),
            int_or_null(scope.last_sync_duration),
            text_or_null(scope.last_sync.clone()),
            Value::Text(scope.scope_id.to_string()),
            Value::Text(scope.scope_name.clone()),
        ];

        let affected = self.conn.execute(&sql, params).await?;
        if affected == 0 {
            return Err(Error::NotFound(format!(
                "Scope '{}' ({})",
                scope.scope_name, scope.scope_id
            )));
        }
        Ok(())
    }

    /// Insert or update a scope row by its composite key.
    pub async fn put_scope_info(&self, scope: &ScopeInfo) -> Result<()> {
        if self.exists_scope_info(scope.scope_id, &scope.scope_name).await? {
            self.update_scope_info(scope).await
        } else {
            self.insert_scope_info(scope).await
        }
    }

    /// Delete a scope row by its composite key.
    pub async fn delete_scope_info(&self, scope_id: Uuid, scope_name: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM \"{}\" WHERE \"sync_scope_id\" = ? AND \"sync_scope_name\" = ?",
            self.table_name
        );
        self.conn
            .execute(&sql, [scope_id.to_string(), scope_name.to_string()])
            .await?;
        Ok(())
    }

    /// Whether a client row exists for this (id, name, client) key.
    pub async fn exists_scope_info_client(
        &self,
        scope_id: Uuid,
        scope_name: &str,
        client_id: Uuid,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE \"sync_scope_id\" = ? AND \"sync_scope_name\" = ? \
             AND \"sync_scope_client_id\" = ?",
            self.client_table_name
        );
        let mut rows = self
            .conn
            .query(
                &sql,
                [
                    scope_id.to_string(),
                    scope_name.to_string(),
                    client_id.to_string(),
                ],
            )
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(count > 0)
    }

    /// Load one client row by its composite key.
    pub async fn get_scope_info_client(
        &self,
        scope_id: Uuid,
        scope_name: &str,
        client_id: Uuid,
    ) -> Result<Option<ScopeInfoClient>> {
        let sql = format!(
            "{} WHERE \"sync_scope_id\" = ? AND \"sync_scope_name\" = ? AND \"sync_scope_client_id\" = ?",
            self.select_scope_info_client_sql()
        );
        let mut rows = self
            .conn
            .query(
                &sql,
                [
                    scope_id.to_string(),
                    scope_name.to_string(),
                    client_id.to_string(),
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_scope_info_client(&row)?)),
            None => Ok(None),
        }
    }

    /// Load every client row.
    pub async fn get_all_scope_info_clients(&self) -> Result<Vec<ScopeInfoClient>> {
        let mut rows = self
            .conn
            .query(&self.select_scope_info_client_sql(), ())
            .await?;
        let mut clients = Vec::new();
        while let Some(row) = rows.next().await? {
            clients.push(parse_scope_info_client(&row)?);
        }
        Ok(clients)
    }

    /// Insert a new client row (first contact from a client).
    pub async fn insert_scope_info_client(&self, client: &ScopeInfoClient) -> Result<()> {
        let sql = format!(
            "INSERT INTO \"{}\" (\"sync_scope_id\", \"sync_scope_name\", \"sync_scope_client_id\", \
             \"sync_scope_client_name\", \"sync_scope_parameters\", \"sync_scope_filters\", \
             \"sync_scope_properties\", \"sync_scope_last_client_sync_timestamp\", \
             \"sync_scope_last_server_sync_timestamp\", \"sync_scope_last_sync_timestamp\", \
             \"sync_scope_last_sync_duration\", \"sync_scope_last_sync\") \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client_table_name
        );
        self.conn
            .execute(&sql, scope_info_client_values(client))
            .await?;
        Ok(())
    }

    /// Update an existing client row.
    ///
    /// Fails with `NotFound` when no row matches the composite key.
    pub async fn update_scope_info_client(&self, client: &ScopeInfoClient) -> Result<()> {
        let sql = format!(
            "UPDATE \"{}\" SET \"sync_scope_client_name\" = ?, \"sync_scope_parameters\" = ?, \
             \"sync_scope_filters\" = ?, \"sync_scope_properties\" = ?, \
             \"sync_scope_last_client_sync_timestamp\" = ?, \"sync_scope_last_server_sync_timestamp\" = ?, \
             \"sync_scope_last_sync_timestamp\" = ?, \"sync_scope_last_sync_duration\" = ?, \
             \"sync_scope_last_sync\" = ? \
             WHERE \"sync_scope_id\" = ? AND \"sync_scope_name\" = ? AND \"sync_scope_client_id\" = ?",
            self.client_table_name
        );
        let params = vec![
            text_or_null(client.client_name.clone()),
            text_or_null(client.parameters.clone()),
            text_or_null(client.filters.clone()),
            text_or_null(client.properties.clone()),
            int_or_null(client.last_client_sync_timestamp),
            int_or_null(client.last_server_sync_timestamp),
            int_or_null(client.last_sync_timestamp),
            int_or_null(client.last_sync_duration),
            text_or_null(client.last_sync.clone()),
            Value::Text(client.scope_id.to_string()),
            Value::Text(client.scope_name.clone()),
            Value::Text(client.client_id.to_string()),
        ];

        let affected = self.conn.execute(&sql, params).await?;
        if affected == 0 {
            return Err(Error::NotFound(format!(
                "Scope client '{}' of scope '{}'",
                client.client_id, client.scope_name
            )));
        }
        Ok(())
    }

    /// Insert or update a client row by its composite key.
    pub async fn put_scope_info_client(&self, client: &ScopeInfoClient) -> Result<()> {
        let exists = self
            .exists_scope_info_client(client.scope_id, &client.scope_name, client.client_id)
            .await?;
        if exists {
            self.update_scope_info_client(client).await
        } else {
            self.insert_scope_info_client(client).await
        }
    }

    /// Delete a client row by its composite key.
    pub async fn delete_scope_info_client(
        &self,
        scope_id: Uuid,
        scope_name: &str,
        client_id: Uuid,
    ) -> Result<()> {
        let sql = format!(
            "DELETE FROM \"{}\" WHERE \"sync_scope_id\" = ? AND \"sync_scope_name\" = ? \
             AND \"sync_scope_client_id\" = ?",
            self.client_table_name
        );
        self.conn
            .execute(
                &sql,
                [
                    scope_id.to_string(),
                    scope_name.to_string(),
                    client_id.to_string(),
                ],
            )
            .await?;
        Ok(())
    }

    fn select_scope_info_sql(&self) -> String {
        format!(
            "SELECT \"sync_scope_id\", \"sync_scope_name\", \"sync_scope_schema\", \
             \"sync_scope_setup\", \"sync_scope_version\", \"sync_scope_last_server_sync_timestamp\", \
             \"sync_scope_last_sync_timestamp\", \"sync_scope_last_sync_duration\", \"sync_scope_last_sync\" \
             FROM \"{}\"",
            self.table_name
        )
    }

    fn select_scope_info_client_sql(&self) -> String {
        format!(
            "SELECT \"sync_scope_id\", \"sync_scope_name\", \"sync_scope_client_id\", \
             \"sync_scope_client_name\", \"sync_scope_parameters\", \"sync_scope_filters\", \
             \"sync_scope_properties\", \"sync_scope_last_client_sync_timestamp\", \
             \"sync_scope_last_server_sync_timestamp\", \"sync_scope_last_sync_timestamp\", \
             \"sync_scope_last_sync_duration\", \"sync_scope_last_sync\" \
             FROM \"{}\"",
            self.client_table_name
        )
    }
}

fn text_or_null(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::Text)
}

fn int_or_null(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

fn scope_info_values(scope: &ScopeInfo) -> Vec<Value> {
    vec![
        Value::Text(scope.scope_id.to_string()),
        Value::Text(scope.scope_name.clone()),
        text_or_null(scope.schema.clone()),
        text_or_null(scope.setup.clone()),
        text_or_null(scope.version.clone()),
        int_or_null(scope.last_server_sync_timestamp),
        int_or_null(scope.last_sync_timestamp),
        int_or_null(scope.last_sync_duration),
        text_or_null(scope.last_sync.clone()),
    ]
}

fn scope_info_client_values(client: &ScopeInfoClient) -> Vec<Value> {
    vec![
        Value::Text(client.scope_id.to_string()),
        Value::Text(client.scope_name.clone()),
        Value::Text(client.client_id.to_string()),
        text_or_null(client.client_name.clone()),
        text_or_null(client.parameters.clone()),
        text_or_null(client.filters.clone()),
        text_or_null(client.properties.clone()),
        int_or_null(client.last_client_sync_timestamp),
        int_or_null(client.last_server_sync_timestamp),
        int_or_null(client.last_sync_timestamp),
        int_or_null(client.last_sync_duration),
        text_or_null(client.last_sync.clone()),
    ]
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| Error::Database(format!("Malformed scope identifier '{raw}': {e}")))
}

fn parse_scope_info(row: &libsql::Row) -> Result<ScopeInfo> {
    let id: String = row.get(0)?;
    Ok(ScopeInfo {
        scope_id: parse_uuid(&id)?,
        scope_name: row.get(1)?,
        schema: opt_string(row.get_value(2)?),
        setup: opt_string(row.get_value(3)?),
        version: opt_string(row.get_value(4)?),
        last_server_sync_timestamp: opt_i64(row.get_value(5)?),
        last_sync_timestamp: opt_i64(row.get_value(6)?),
        last_sync_duration: opt_i64(row.get_value(7)?),
        last_sync: opt_string(row.get_value(8)?),
    })
}

fn parse_scope_info_client(row: &libsql::Row) -> Result<ScopeInfoClient> {
    let scope_id: String = row.get(0)?;
    let client_id: String = row.get(2)?;
    Ok(ScopeInfoClient {
        scope_id: parse_uuid(&scope_id)?,
        scope_name: row.get(1)?,
        client_id: parse_uuid(&client_id)?,
        client_name: opt_string(row.get_value(3)?),
        parameters: opt_string(row.get_value(4)?),
        filters: opt_string(row.get_value(5)?),
        properties: opt_string(row.get_value(6)?),
        last_client_sync_timestamp: opt_i64(row.get_value(7)?),
        last_server_sync_timestamp: opt_i64(row.get_value(8)?),
        last_sync_timestamp: opt_i64(row.get_value(9)?),
        last_sync_duration: opt_i64(row.get_value(10)?),
        last_sync: opt_string(row.get_value(11)?),
    })
}
