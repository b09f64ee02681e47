//! Schema introspection: existence checks and metadata discovery
//!
//! All operations here are read-only and never mutate state. A missing
//! object is reported as `false` or an empty list, not as an error; only
//! infrastructure failures propagate.

use libsql::Connection;

use crate::error::Result;
use crate::models::{ColumnSchema, RelationColumn, RelationDefinition};
use crate::typemap::parse_declared_type;
use crate::value::opt_string;

/// Read-only schema introspector over a borrowed connection.
///
/// Results are read once per call and never cached.
pub struct SchemaIntrospector<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaIntrospector<'a> {
    /// Create an introspector borrowing the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Whether a table with this name exists
    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        self.object_exists("table", table_name).await
    }

    /// Whether a trigger with this name exists
    pub async fn trigger_exists(&self, trigger_name: &str) -> Result<bool> {
        self.object_exists("trigger", trigger_name).await
    }

    /// Whether a stored procedure with this name exists.
    ///
    /// SQLite has no stored procedures, so this is always false; the adapter
    /// maps every operation to a text command instead.
    pub async fn procedure_exists(&self, _procedure_name: &str) -> Result<bool> {
        Ok(false)
    }

    /// Whether a column exists on a table
    pub async fn column_exists(&self, table_name: &str, column_name: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ? COLLATE NOCASE",
                [table_name, column_name],
            )
            .await?;

        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(count > 0)
    }

    /// Whether a schema (attached database) with this name exists
    pub async fn schema_exists(&self, schema_name: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM pragma_database_list WHERE name = ? COLLATE NOCASE",
                [schema_name],
            )
            .await?;

        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(count > 0)
    }

    /// Column descriptors of a table, in declared order.
    ///
    /// Returns an empty list for a missing table.
    pub async fn get_columns(&self, table_name: &str) -> Result<Vec<ColumnSchema>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, type, \"notnull\" FROM pragma_table_info(?) ORDER BY cid",
                [table_name],
            )
            .await?;

        let mut columns = Vec::new();
        while let Some(row) = rows.next().await? {
            let name: String = row.get(0)?;
            let declared: String = row.get(1)?;
            let not_null: i64 = row.get(2)?;

            let (type_name, max_length, precision, scale) = parse_declared_type(&declared);
            columns.push(ColumnSchema {
                name,
                type_name,
                max_length,
                precision,
                scale,
                nullable: not_null == 0,
            });
        }
        Ok(columns)
    }

    /// Primary-key column names of a table, in key ordinal order
    pub async fn get_primary_keys(&self, table_name: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk",
                [table_name],
            )
            .await?;

        let mut keys = Vec::new();
        while let Some(row) = rows.next().await? {
            keys.push(row.get(0)?);
        }
        Ok(keys)
    }

    /// Foreign-key relations declared on a table.
    ///
    /// SQLite keys are unnamed; names are synthesized as `FK_<table>_<id>`.
    pub async fn get_relations(&self, table_name: &str) -> Result<Vec<RelationDefinition>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, \"table\", \"from\", \"to\" \
                 FROM pragma_foreign_key_list(?) ORDER BY id, seq",
                [table_name],
            )
            .await?;

        let mut relations: Vec<RelationDefinition> = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: i64 = row.get(0)?;
            let reference_table: String = row.get(1)?;
            let from: String = row.get(2)?;
            // "to" is NULL when the key references the implicit primary key
            let to = opt_string(row.get_value(3)?).unwrap_or_default();

            let name = format!("FK_{table_name}_{id}");
            let column = RelationColumn {
                column_name: from,
                reference_column_name: to,
            };

            match relations.last_mut() {
                Some(last) if last.name == name => last.columns.push(column),
                _ => relations.push(RelationDefinition {
                    name,
                    table_name: table_name.to_string(),
                    reference_table_name: reference_table,
                    columns: vec![column],
                }),
            }
        }
        Ok(relations)
    }

    /// Create a schema/catalog.
    ///
    /// SQLite schemas are attached databases whose lifecycle belongs to the
    /// caller's connection; there is nothing to create here.
    pub async fn create_schema(&self, schema_name: &str) -> Result<()> {
        tracing::debug!("Schema '{schema_name}' requires no creation on SQLite");
        Ok(())
    }

    async fn object_exists(&self, object_type: &str, name: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = ? AND name = ?)",
                [object_type, name],
            )
            .await?;

        let exists = match rows.next().await? {
            Some(row) => row.get::<i32>(0)? != 0,
            None => false,
        };
        Ok(exists)
    }
}
