//! Tracking-table DDL and trigger generation
//!
//! Each synchronized table gets a shadow tracking table and three AFTER
//! triggers that maintain it inside the mutating transaction. The trigger
//! body is a single atomic upsert keyed on the primary key, so the
//! read-increment-write of `update_timestamp` is serialized by the engine's
//! writer lock and the stored values stay unique and strictly increasing.

use libsql::Connection;

use crate::error::Result;
use crate::introspect::SchemaIntrospector;
use crate::models::TableSchema;
use crate::naming::{Dialect, TableNames, TriggerKind};
use crate::typemap::TypeMapper;

/// Column name holding the scope that produced the last change
pub const UPDATE_SCOPE_ID: &str = "update_scope_id";
/// Column name of the tombstone flag
pub const SYNC_ROW_IS_TOMBSTONE: &str = "sync_row_is_tombstone";
/// Column name of the logical row version
pub const UPDATE_TIMESTAMP: &str = "update_timestamp";
/// Column name of the wall-clock diagnostic timestamp
pub const LAST_CHANGE_DATETIME: &str = "last_change_datetime";

/// Generates and executes tracking-table and trigger DDL for one table.
pub struct TableBuilder<'a> {
    schema: &'a TableSchema,
    names: TableNames,
    mapper: TypeMapper,
}

impl<'a> TableBuilder<'a> {
    /// Create a builder for a table description.
    #[must_use]
    pub fn new(schema: &'a TableSchema, dialect: Dialect) -> Self {
        Self {
            schema,
            names: TableNames::parse(dialect, schema),
            mapper: TypeMapper::new(),
        }
    }

    /// Derived object names for this table.
    #[must_use]
    pub const fn names(&self) -> &TableNames {
        &self.names
    }

    /// DDL for the live table itself, used by `ensure_table_exists`.
    pub fn create_table_script(&self) -> Result<String> {
        let mut lines = Vec::new();
        for column in &self.schema.columns {
            let native = self.mapper.map(column)?;
            let nullable = if column.nullable { "NULL" } else { "NOT NULL" };
            lines.push(format!(
                "    {} {} {nullable}",
                self.names.quote_column(&column.name),
                native.type_name
            ));
        }
        lines.push(format!("    PRIMARY KEY ({})", self.quoted_pk_list()));

        Ok(format!(
            "CREATE TABLE {} (\n{}\n)",
            self.names.quoted_full_name,
            lines.join(",\n")
        ))
    }

    /// DDL for the tracking table: primary-key columns in their native
    /// types, always NOT NULL, plus the four fixed tracking columns.
    pub fn create_tracking_table_script(&self) -> Result<String> {
        let mut lines = Vec::new();
        for column in self.schema.primary_key_columns() {
            let native = self.mapper.map(column)?;
            lines.push(format!(
                "    {} {} NOT NULL",
                self.names.quote_column(&column.name),
                native.type_name
            ));
        }
        lines.push(format!("    \"{UPDATE_SCOPE_ID}\" VARCHAR(36) NULL"));
        lines.push(format!(
            "    \"{SYNC_ROW_IS_TOMBSTONE}\" INTEGER NOT NULL DEFAULT 0"
        ));
        lines.push(format!("    \"{UPDATE_TIMESTAMP}\" INTEGER NOT NULL"));
        lines.push(format!("    \"{LAST_CHANGE_DATETIME}\" DATETIME NOT NULL"));
        lines.push(format!("    PRIMARY KEY ({})", self.quoted_pk_list()));

        Ok(format!(
            "CREATE TABLE {} (\n{}\n)",
            self.names.quoted_tracking_full_name,
            lines.join(",\n")
        ))
    }

    /// DDL for one of the three row-level triggers.
    ///
    /// Insert and update mark the tracking row live again and reset the
    /// scope attribution; delete tombstones it. None of them ever removes a
    /// tracking row, and each assigns `MAX(update_timestamp) + 1` inside the
    /// same upsert statement.
    #[must_use]
    pub fn create_trigger_script(&self, kind: TriggerKind) -> String {
        let trigger = self.names.dialect().quote(&self.names.trigger_name(kind));
        let table = &self.names.quoted_full_name;
        let tracking = &self.names.quoted_tracking_full_name;

        let (event, row_alias, tombstone) = match kind {
            TriggerKind::Insert => ("INSERT", "NEW", 0),
            TriggerKind::Update => ("UPDATE", "NEW", 0),
            TriggerKind::Delete => ("DELETE", "OLD", 1),
        };

        let pk_list = self.quoted_pk_list();
        let pk_values = self
            .schema
            .primary_keys
            .iter()
            .map(|pk| format!("{row_alias}.{}", self.names.quote_column(pk)))
            .collect::<Vec<_>>()
            .join(", ");
        let next_timestamp = format!(
            "COALESCE((SELECT MAX(\"{UPDATE_TIMESTAMP}\") FROM {tracking}), 0) + 1"
        );

        let lines = [
            format!("CREATE TRIGGER {trigger}"),
            format!("AFTER {event} ON {table}"),
            "FOR EACH ROW".to_string(),
            "BEGIN".to_string(),
            format!(
                "    INSERT INTO {tracking} ({pk_list}, \"{UPDATE_SCOPE_ID}\", \"{SYNC_ROW_IS_TOMBSTONE}\", \"{UPDATE_TIMESTAMP}\", \"{LAST_CHANGE_DATETIME}\")"
            ),
            format!("    VALUES ({pk_values}, NULL, {tombstone}, {next_timestamp}, datetime('now'))"),
            format!("    ON CONFLICT({pk_list}) DO UPDATE SET"),
            format!("        \"{UPDATE_SCOPE_ID}\" = NULL,"),
            format!("        \"{SYNC_ROW_IS_TOMBSTONE}\" = {tombstone},"),
            format!("        \"{UPDATE_TIMESTAMP}\" = {next_timestamp},"),
            format!("        \"{LAST_CHANGE_DATETIME}\" = datetime('now');"),
            "END".to_string(),
        ];
        lines.join("\n")
    }

    /// Point lookup of one row joined with its tracking state.
    ///
    /// Primary keys come from the tracking side so tombstoned rows are still
    /// returned, with NULL live columns.
    #[must_use]
    pub fn select_row_script(&self) -> String {
        format!(
            "SELECT {columns}, side.\"{SYNC_ROW_IS_TOMBSTONE}\", side.\"{UPDATE_TIMESTAMP}\"\n\
             FROM {tracking} side\n\
             LEFT JOIN {table} p ON {join}\n\
             WHERE {filter}",
            columns = self.sided_column_list(),
            tracking = self.names.quoted_tracking_full_name,
            table = self.names.quoted_full_name,
            join = self.pk_join("p", "side"),
            filter = self.pk_parameter_filter("side"),
        )
    }

    /// Suspend referential-integrity checking for the current transaction.
    ///
    /// SQLite cannot disable individual constraints; deferring foreign keys
    /// until commit is the engine's native mechanism, which is why the
    /// provider reports per-database constraint granularity.
    #[must_use]
    pub const fn disable_constraints_script(&self) -> &'static str {
        "PRAGMA defer_foreign_keys = ON"
    }

    /// Re-enable immediate referential-integrity checking.
    #[must_use]
    pub const fn enable_constraints_script(&self) -> &'static str {
        "PRAGMA defer_foreign_keys = OFF"
    }

    /// Purge tombstones older than a retention threshold
    /// (`:sync_row_timestamp`).
    #[must_use]
    pub fn delete_metadata_script(&self) -> String {
        format!(
            "DELETE FROM {} WHERE \"{SYNC_ROW_IS_TOMBSTONE}\" = 1 AND \"{UPDATE_TIMESTAMP}\" < :sync_row_timestamp",
            self.names.quoted_tracking_full_name
        )
    }

    /// Back-fill tracking rows for pre-existing data with a caller-supplied
    /// minimum timestamp (`:sync_min_timestamp`), inserting only rows absent
    /// from the tracking table.
    #[must_use]
    pub fn update_untracked_rows_script(&self) -> String {
        let pk_select = self
            .schema
            .primary_keys
            .iter()
            .map(|pk| format!("p.{}", self.names.quote_column(pk)))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "INSERT INTO {tracking} ({pk_list}, \"{UPDATE_SCOPE_ID}\", \"{SYNC_ROW_IS_TOMBSTONE}\", \"{UPDATE_TIMESTAMP}\", \"{LAST_CHANGE_DATETIME}\")\n\
             SELECT {pk_select}, NULL, 0, :sync_min_timestamp, datetime('now')\n\
             FROM {table} p\n\
             WHERE NOT EXISTS (SELECT 1 FROM {tracking} t WHERE {join})",
            tracking = self.names.quoted_tracking_full_name,
            table = self.names.quoted_full_name,
            pk_list = self.quoted_pk_list(),
            join = self.pk_join("t", "p"),
        )
    }

    /// Truncate the tracking table, used when re-initializing a scope.
    #[must_use]
    pub fn reset_script(&self) -> String {
        format!("DELETE FROM {}", self.names.quoted_tracking_full_name)
    }

    /// Create the live table when it does not exist yet.
    pub async fn ensure_table_exists(&self, conn: &Connection) -> Result<()> {
        let introspector = SchemaIntrospector::new(conn);
        if introspector.table_exists(&self.names.name).await? {
            return Ok(());
        }
        conn.execute(&self.create_table_script()?, ()).await?;
        tracing::info!("Created table {}", self.names.name);
        Ok(())
    }

    /// Whether the tracking table exists.
    pub async fn tracking_table_exists(&self, conn: &Connection) -> Result<bool> {
        SchemaIntrospector::new(conn)
            .table_exists(&self.names.tracking_name)
            .await
    }

    /// Create the tracking table.
    pub async fn create_tracking_table(&self, conn: &Connection) -> Result<()> {
        conn.execute(&self.create_tracking_table_script()?, ())
            .await?;
        tracing::info!("Created tracking table {}", self.names.tracking_name);
        Ok(())
    }

    /// Drop the tracking table.
    pub async fn drop_tracking_table(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            &format!("DROP TABLE {}", self.names.quoted_tracking_full_name),
            (),
        )
        .await?;
        Ok(())
    }

    /// Whether the trigger of the given kind exists.
    pub async fn trigger_exists(&self, conn: &Connection, kind: TriggerKind) -> Result<bool> {
        SchemaIntrospector::new(conn)
            .trigger_exists(&self.names.trigger_name(kind))
            .await
    }

    /// Create the trigger of the given kind.
    pub async fn create_trigger(&self, conn: &Connection, kind: TriggerKind) -> Result<()> {
        conn.execute(&self.create_trigger_script(kind), ()).await?;
        tracing::info!("Created trigger {}", self.names.trigger_name(kind));
        Ok(())
    }

    /// Drop the trigger of the given kind.
    pub async fn drop_trigger(&self, conn: &Connection, kind: TriggerKind) -> Result<()> {
        let trigger = self.names.dialect().quote(&self.names.trigger_name(kind));
        conn.execute(&format!("DROP TRIGGER {trigger}"), ()).await?;
        Ok(())
    }

    /// Quoted primary-key column list.
    pub(crate) fn quoted_pk_list(&self) -> String {
        self.schema
            .primary_keys
            .iter()
            .map(|pk| self.names.quote_column(pk))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Join clause equating primary keys between two aliases.
    pub(crate) fn pk_join(&self, left: &str, right: &str) -> String {
        self.schema
            .primary_keys
            .iter()
            .map(|pk| {
                let quoted = self.names.quote_column(pk);
                format!("{left}.{quoted} = {right}.{quoted}")
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Filter equating an alias's primary keys with named parameters.
    pub(crate) fn pk_parameter_filter(&self, alias: &str) -> String {
        self.schema
            .primary_keys
            .iter()
            .map(|pk| format!("{alias}.{} = :{pk}", self.names.quote_column(pk)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Column list with primary keys drawn from the tracking side and the
    /// remaining columns from the live side.
    pub(crate) fn sided_column_list(&self) -> String {
        self.schema
            .columns
            .iter()
            .map(|c| {
                let alias = if self.schema.is_primary_key(&c.name) {
                    "side"
                } else {
                    "p"
                };
                format!("{alias}.{}", self.names.quote_column(&c.name))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::naming::SQLITE_DIALECT;
    use crate::models::ColumnSchema;

    fn orders_schema() -> TableSchema {
        TableSchema::new(
            "Orders",
            None,
            vec![
                ColumnSchema::new("OrderId", "INTEGER").not_null(),
                ColumnSchema::new("Label", "VARCHAR").with_max_length(100),
                ColumnSchema::new("Total", "DECIMAL").with_precision_scale(10, 2),
            ],
            vec!["OrderId".to_string()],
        )
        .unwrap()
    }

    async fn provision(db: &Database, schema: &TableSchema) {
        let builder = TableBuilder::new(schema, SQLITE_DIALECT);
        let conn = db.connection();
        builder.ensure_table_exists(conn).await.unwrap();
        builder.create_tracking_table(conn).await.unwrap();
        for kind in [TriggerKind::Insert, TriggerKind::Update, TriggerKind::Delete] {
            builder.create_trigger(conn, kind).await.unwrap();
        }
    }

    async fn tracking_row(db: &Database, order_id: i64) -> Option<(i64, i64)> {
        let mut rows = db
            .connection()
            .query(
                "SELECT \"sync_row_is_tombstone\", \"update_timestamp\" \
                 FROM \"Orders_TRACK\" WHERE \"OrderId\" = ?",
                libsql::params![order_id],
            )
            .await
            .unwrap();
        rows.next()
            .await
            .unwrap()
            .map(|row| (row.get(0).unwrap(), row.get(1).unwrap()))
    }

    async fn tracking_count(db: &Database) -> i64 {
        let mut rows = db
            .connection()
            .query("SELECT COUNT(*) FROM \"Orders_TRACK\"", ())
            .await
            .unwrap();
        rows.next().await.unwrap().unwrap().get(0).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_update_delete_advance_the_row_clock() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();

        conn.execute(
            "INSERT INTO \"Orders\" (\"OrderId\", \"Label\", \"Total\") VALUES (1, 'first', 10.50)",
            (),
        )
        .await
        .unwrap();
        assert_eq!(tracking_row(&db, 1).await, Some((0, 1)));
        assert_eq!(tracking_count(&db).await, 1);

        conn.execute(
            "UPDATE \"Orders\" SET \"Label\" = 'renamed' WHERE \"OrderId\" = 1",
            (),
        )
        .await
        .unwrap();
        assert_eq!(tracking_row(&db, 1).await, Some((0, 2)));
        assert_eq!(tracking_count(&db).await, 1);

        conn.execute("DELETE FROM \"Orders\" WHERE \"OrderId\" = 1", ())
            .await
            .unwrap();
        // Delete never removes the tracking row; it tombstones it.
        assert_eq!(tracking_row(&db, 1).await, Some((1, 3)));
        assert_eq!(tracking_count(&db).await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timestamps_are_unique_across_interleaved_keys() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();

        for i in 1..=4 {
            conn.execute(
                &format!(
                    "INSERT INTO \"Orders\" (\"OrderId\", \"Label\", \"Total\") VALUES ({i}, 'x', 1)"
                ),
                (),
            )
            .await
            .unwrap();
        }
        conn.execute("UPDATE \"Orders\" SET \"Label\" = 'y' WHERE \"OrderId\" = 2", ())
            .await
            .unwrap();
        conn.execute("DELETE FROM \"Orders\" WHERE \"OrderId\" = 3", ())
            .await
            .unwrap();

        let mut rows = conn
            .query(
                "SELECT \"update_timestamp\" FROM \"Orders_TRACK\" ORDER BY \"update_timestamp\"",
                (),
            )
            .await
            .unwrap();
        let mut timestamps = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            timestamps.push(row.get::<i64>(0).unwrap());
        }

        assert_eq!(timestamps.len(), 4);
        let mut deduped = timestamps.clone();
        deduped.dedup();
        assert_eq!(deduped, timestamps, "row-clock values must never repeat");
        assert_eq!(*timestamps.last().unwrap(), 6);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reinsert_after_delete_reuses_the_tracking_row() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();

        conn.execute(
            "INSERT INTO \"Orders\" (\"OrderId\", \"Label\", \"Total\") VALUES (1, 'a', 1)",
            (),
        )
        .await
        .unwrap();
        conn.execute("DELETE FROM \"Orders\" WHERE \"OrderId\" = 1", ())
            .await
            .unwrap();
        conn.execute(
            "INSERT INTO \"Orders\" (\"OrderId\", \"Label\", \"Total\") VALUES (1, 'b', 2)",
            (),
        )
        .await
        .unwrap();

        // Tombstone cleared, fresh timestamp, still one row for the key.
        assert_eq!(tracking_row(&db, 1).await, Some((0, 3)));
        assert_eq!(tracking_count(&db).await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_metadata_purges_only_old_tombstones() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();

        for i in 1..=2 {
            conn.execute(
                &format!(
                    "INSERT INTO \"Orders\" (\"OrderId\", \"Label\", \"Total\") VALUES ({i}, 'x', 1)"
                ),
                (),
            )
            .await
            .unwrap();
        }
        conn.execute("DELETE FROM \"Orders\" WHERE \"OrderId\" = 1", ())
            .await
            .unwrap();
        conn.execute("DELETE FROM \"Orders\" WHERE \"OrderId\" = 2", ())
            .await
            .unwrap();

        let builder = TableBuilder::new(&schema, SQLITE_DIALECT);
        conn.execute(
            &builder.delete_metadata_script(),
            libsql::named_params! { ":sync_row_timestamp": 4i64 },
        )
        .await
        .unwrap();

        // Tombstone at timestamp 3 purged, the one at 4 retained.
        assert_eq!(tracking_count(&db).await, 1);
        assert_eq!(tracking_row(&db, 2).await, Some((1, 4)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_untracked_rows_backfills_existing_data() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        let builder = TableBuilder::new(&schema, SQLITE_DIALECT);
        let conn = db.connection();

        // Data exists before provisioning.
        builder.ensure_table_exists(conn).await.unwrap();
        conn.execute(
            "INSERT INTO \"Orders\" (\"OrderId\", \"Label\", \"Total\") VALUES (1, 'old', 1)",
            (),
        )
        .await
        .unwrap();

        builder.create_tracking_table(conn).await.unwrap();
        conn.execute(
            &builder.update_untracked_rows_script(),
            libsql::named_params! { ":sync_min_timestamp": 10i64 },
        )
        .await
        .unwrap();

        assert_eq!(tracking_row(&db, 1).await, Some((0, 10)));

        // Running it again inserts nothing new.
        conn.execute(
            &builder.update_untracked_rows_script(),
            libsql::named_params! { ":sync_min_timestamp": 99i64 },
        )
        .await
        .unwrap();
        assert_eq!(tracking_row(&db, 1).await, Some((0, 10)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reset_truncates_tracking() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();

        conn.execute(
            "INSERT INTO \"Orders\" (\"OrderId\", \"Label\", \"Total\") VALUES (1, 'a', 1)",
            (),
        )
        .await
        .unwrap();
        assert_eq!(tracking_count(&db).await, 1);

        let builder = TableBuilder::new(&schema, SQLITE_DIALECT);
        conn.execute(&builder.reset_script(), ()).await.unwrap();
        assert_eq!(tracking_count(&db).await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_trigger_lifecycle() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        let builder = TableBuilder::new(&schema, SQLITE_DIALECT);
        let conn = db.connection();

        builder.ensure_table_exists(conn).await.unwrap();
        builder.create_tracking_table(conn).await.unwrap();
        assert!(!builder.trigger_exists(conn, TriggerKind::Insert).await.unwrap());

        builder.create_trigger(conn, TriggerKind::Insert).await.unwrap();
        assert!(builder.trigger_exists(conn, TriggerKind::Insert).await.unwrap());

        builder.drop_trigger(conn, TriggerKind::Insert).await.unwrap();
        assert!(!builder.trigger_exists(conn, TriggerKind::Insert).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_composite_key_scripts() {
        let schema = TableSchema::new(
            "OrderLines",
            None,
            vec![
                ColumnSchema::new("OrderId", "INTEGER").not_null(),
                ColumnSchema::new("Line", "INTEGER").not_null(),
                ColumnSchema::new("Qty", "INTEGER"),
            ],
            vec!["OrderId".to_string(), "Line".to_string()],
        )
        .unwrap();
        let builder = TableBuilder::new(&schema, SQLITE_DIALECT);

        let ddl = builder.create_tracking_table_script().unwrap();
        assert!(ddl.contains("PRIMARY KEY (\"OrderId\", \"Line\")"));

        let trigger = builder.create_trigger_script(TriggerKind::Delete);
        assert!(trigger.contains("AFTER DELETE"));
        assert!(trigger.contains("OLD.\"OrderId\""));
        assert!(trigger.contains("ON CONFLICT(\"OrderId\", \"Line\")"));
    }
}
