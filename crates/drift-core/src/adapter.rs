//! Sync adapter: operation-kind to command mapping and batched change apply
//!
//! SQLite has no table-valued parameters, so every operation maps to a text
//! command and batches are applied row by row: per-row parameters are
//! rebound from the row's values while the shared scope/timestamp/force
//! parameters persist across iterations. Rows that cannot be applied are
//! collected, never thrown; only infrastructure failures abort a batch.

use libsql::{Connection, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ChangeRow, FailedRow, RowState, TableSchema};
use crate::naming::Dialect;
use crate::table_builder::{
    TableBuilder, SYNC_ROW_IS_TOMBSTONE, UPDATE_SCOPE_ID, UPDATE_TIMESTAMP,
};
use crate::typemap::TypeMapper;
use crate::value::convert_for_binding;

/// Abstract operation kinds the adapter maps to concrete commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Incremental change selection
    SelectChanges,
    /// Incremental change selection with a named filter
    SelectChangesWithFilters,
    /// Initial-sync selection (no tombstones)
    SelectInitializedChanges,
    /// Initial-sync selection with a named filter
    SelectInitializedChangesWithFilters,
    /// Point lookup by primary key
    SelectRow,
    /// Apply one modified row
    UpdateRow,
    /// Apply one deleted row
    DeleteRow,
    /// Apply many modified rows
    UpdateRows,
    /// Apply many deleted rows
    DeleteRows,
    /// Suspend referential-integrity checking
    DisableConstraints,
    /// Restore referential-integrity checking
    EnableConstraints,
    /// Purge old tombstones from the tracking table
    DeleteMetadata,
    /// Back-fill tracking rows for pre-existing data
    UpdateUntrackedRows,
    /// Truncate the tracking table
    Reset,
    /// Declare a bulk table type (table-valued parameter engines only)
    BulkTableType,
}

impl CommandKind {
    /// Operation fragment used in derived command names.
    #[must_use]
    pub const fn operation_name(self) -> &'static str {
        match self {
            Self::SelectChanges | Self::SelectChangesWithFilters => "SELECTCHANGES",
            Self::SelectInitializedChanges | Self::SelectInitializedChangesWithFilters => {
                "SELECTINITCHANGES"
            }
            Self::SelectRow => "SELECTROW",
            Self::UpdateRow | Self::UpdateRows => "UPDATE",
            Self::DeleteRow | Self::DeleteRows => "DELETE",
            Self::DisableConstraints => "DISABLECONSTRAINTS",
            Self::EnableConstraints => "ENABLECONSTRAINTS",
            Self::DeleteMetadata => "DELETEMETADATA",
            Self::UpdateUntrackedRows => "UPDATEUNTRACKEDROWS",
            Self::Reset => "RESET",
            Self::BulkTableType => "BULKTABLETYPE",
        }
    }
}

/// How a command is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStyle {
    /// Plain command text
    Text,
    /// Stored procedure name (engines that have them)
    StoredProcedure,
}

/// A concrete command resolved from an abstract operation kind
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    /// Derived command name, for diagnostics and procedure-based engines
    pub name: String,
    /// Command text to execute
    pub text: String,
    /// Invocation style; always text on SQLite
    pub style: CommandStyle,
    /// Whether the command needs a bulk/table-valued invocation
    pub is_batch: bool,
}

/// A named filter appended to change selection.
///
/// The predicate references the live table under alias `p` and may use
/// named parameters supplied alongside it.
#[derive(Debug, Clone)]
pub struct SyncFilter {
    /// Filter name, folded into derived command names
    pub name: String,
    /// SQL predicate over alias `p`
    pub predicate: String,
    /// Named parameter values the predicate references
    pub parameters: Vec<(String, Value)>,
}

/// Per-table sync adapter over a borrowed connection.
pub struct SyncAdapter<'a> {
    conn: &'a Connection,
    schema: &'a TableSchema,
    builder: TableBuilder<'a>,
    mapper: TypeMapper,
}

impl<'a> SyncAdapter<'a> {
    /// Create an adapter for one synchronized table.
    #[must_use]
    pub fn new(conn: &'a Connection, schema: &'a TableSchema, dialect: Dialect) -> Self {
        Self {
            conn,
            schema,
            builder: TableBuilder::new(schema, dialect),
            mapper: TypeMapper::new(),
        }
    }

    /// Map an abstract operation kind to a concrete command descriptor.
    ///
    /// Returns `None` for kinds this engine has no use for (bulk table
    /// types); batch kinds degrade to their single-row commands since the
    /// engine lacks table-valued parameters.
    #[must_use]
    pub fn command(&self, kind: CommandKind, filter: Option<&SyncFilter>) -> Option<CommandDescriptor> {
        let text = match kind {
            CommandKind::SelectChanges | CommandKind::SelectChangesWithFilters => {
                self.select_changes_sql(filter.map(|f| f.predicate.as_str()), true)
            }
            CommandKind::SelectInitializedChanges
            | CommandKind::SelectInitializedChangesWithFilters => {
                self.select_initialized_changes_sql(filter.map(|f| f.predicate.as_str()))
            }
            CommandKind::SelectRow => self.builder.select_row_script(),
            CommandKind::UpdateRow | CommandKind::UpdateRows => self.update_row_sql(),
            CommandKind::DeleteRow | CommandKind::DeleteRows => self.delete_row_sql(),
            CommandKind::DisableConstraints => self.builder.disable_constraints_script().to_string(),
            CommandKind::EnableConstraints => self.builder.enable_constraints_script().to_string(),
            CommandKind::DeleteMetadata => self.builder.delete_metadata_script(),
            CommandKind::UpdateUntrackedRows => self.builder.update_untracked_rows_script(),
            CommandKind::Reset => self.builder.reset_script(),
            CommandKind::BulkTableType => return None,
        };

        Some(CommandDescriptor {
            name: self
                .builder
                .names()
                .command_name(kind.operation_name(), filter.map(|f| f.name.as_str())),
            text,
            style: CommandStyle::Text,
            is_batch: false,
        })
    }

    /// Select rows changed after `since`, tombstones included, ordered by
    /// their logical version.
    ///
    /// Rows last attributed to `excluded_scope` are skipped so a client's
    /// own changes are not echoed back to it.
    pub async fn select_changes(
        &self,
        since: i64,
        excluded_scope: Option<Uuid>,
        filter: Option<&SyncFilter>,
    ) -> Result<Vec<ChangeRow>> {
        let sql = self.select_changes_sql(
            filter.map(|f| f.predicate.as_str()),
            excluded_scope.is_some(),
        );

        let mut params: Vec<(String, Value)> =
            vec![(":sync_min_timestamp".to_string(), Value::Integer(since))];
        if let Some(scope) = excluded_scope {
            params.push((
                ":sync_excluded_scope_id".to_string(),
                Value::Text(scope.to_string()),
            ));
        }
        if let Some(filter) = filter {
            params.extend(filter.parameters.iter().cloned());
        }

        let mut rows = self.conn.query(&sql, params).await?;
        let width = self.schema.columns.len();
        let mut changes = Vec::new();
        while let Some(row) = rows.next().await? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(row.get_value(i32::try_from(i).unwrap_or(i32::MAX))?);
            }
            let tombstone: i64 = row.get(i32::try_from(width).unwrap_or(i32::MAX))?;
            let timestamp: i64 = row.get(i32::try_from(width + 1).unwrap_or(i32::MAX))?;

            changes.push(ChangeRow {
                state: if tombstone == 0 {
                    RowState::Modified
                } else {
                    RowState::Deleted
                },
                update_timestamp: timestamp,
                values,
            });
        }
        Ok(changes)
    }

    /// Select every live row for an initial sync; no tombstones.
    pub async fn select_initialized_changes(
        &self,
        filter: Option<&SyncFilter>,
    ) -> Result<Vec<ChangeRow>> {
        let sql = self.select_initialized_changes_sql(filter.map(|f| f.predicate.as_str()));
        let params: Vec<(String, Value)> = filter
            .map(|f| f.parameters.clone())
            .unwrap_or_default();

        let mut rows = self.conn.query(&sql, params).await?;
        let width = self.schema.columns.len();
        let mut changes = Vec::new();
        while let Some(row) = rows.next().await? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(row.get_value(i32::try_from(i).unwrap_or(i32::MAX))?);
            }
            let timestamp: i64 = row.get(i32::try_from(width).unwrap_or(i32::MAX))?;
            changes.push(ChangeRow {
                state: RowState::Modified,
                update_timestamp: timestamp,
                values,
            });
        }
        Ok(changes)
    }

    /// Point lookup of the current local row joined with its tracking state.
    pub async fn select_row(&self, pk_values: &[Value]) -> Result<Option<ChangeRow>> {
        if pk_values.len() != self.schema.primary_keys.len() {
            return Err(Error::InvalidInput(format!(
                "Expected {} primary-key values, got {}",
                self.schema.primary_keys.len(),
                pk_values.len()
            )));
        }

        let params: Vec<(String, Value)> = self
            .schema
            .primary_keys
            .iter()
            .zip(pk_values.iter())
            .map(|(pk, value)| (format!(":{pk}"), value.clone()))
            .collect();

        let mut rows = self
            .conn
            .query(&self.builder.select_row_script(), params)
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let width = self.schema.columns.len();
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(row.get_value(i32::try_from(i).unwrap_or(i32::MAX))?);
        }
        let tombstone: i64 = row.get(i32::try_from(width).unwrap_or(i32::MAX))?;
        let timestamp: i64 = row.get(i32::try_from(width + 1).unwrap_or(i32::MAX))?;

        Ok(Some(ChangeRow {
            state: if tombstone == 0 {
                RowState::Modified
            } else {
                RowState::Deleted
            },
            update_timestamp: timestamp,
            values,
        }))
    }

    /// Apply a batch of incoming changes row by row, in the given order.
    ///
    /// A row is applied when no concurrent local change conflicts with it:
    /// its tracking row is unchanged since `min_timestamp`, or was last
    /// written by the sending scope, or `force_write` is set. Rows that lose
    /// this check, and rows rejected by a constraint, are appended to
    /// `failed_rows` with the state they were attempted under, and the batch
    /// continues. Only infrastructure failures propagate, leaving
    /// `failed_rows` in its accumulated state.
    pub async fn apply_batch(
        &self,
        rows: &[ChangeRow],
        sender_scope_id: Uuid,
        min_timestamp: i64,
        force_write: bool,
        failed_rows: &mut Vec<FailedRow>,
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let shared: Vec<(String, Value)> = vec![
            (
                ":sync_scope_id".to_string(),
                Value::Text(sender_scope_id.to_string()),
            ),
            (
                ":sync_min_timestamp".to_string(),
                Value::Integer(min_timestamp),
            ),
            (
                ":sync_force_write".to_string(),
                Value::Integer(i64::from(force_write)),
            ),
        ];

        let update_sql = self.update_row_sql();
        let delete_sql = self.delete_row_sql();

        for row in rows {
            let (sql, mut params) = match row.state {
                RowState::Modified => (&update_sql, self.row_parameters(row)?),
                RowState::Deleted => (&delete_sql, self.pk_parameters(row)?),
            };
            params.extend(shared.iter().cloned());

            let applied = match self.conn.execute(sql, params).await {
                Ok(affected) if affected > 0 => true,
                Ok(_) => self.resolve_unapplied_row(row, failed_rows).await?,
                Err(e) => {
                    let err = Error::from(e);
                    if err.is_constraint_violation() {
                        tracing::debug!(
                            "Row rejected by constraint on {}: {err}",
                            self.schema.table_name
                        );
                        failed_rows.push(FailedRow::new(row.state, row.values.clone()));
                        continue;
                    }
                    return Err(err);
                }
            };

            if applied {
                self.write_apply_metadata(row, sender_scope_id).await?;
            }
        }
        Ok(())
    }

    /// Truncate the tracking table.
    pub async fn reset(&self) -> Result<()> {
        self.conn.execute(&self.builder.reset_script(), ()).await?;
        Ok(())
    }

    /// Purge tombstones with a version below the retention threshold.
    pub async fn delete_metadata(&self, below_timestamp: i64) -> Result<u64> {
        let deleted = self
            .conn
            .execute(
                &self.builder.delete_metadata_script(),
                vec![(
                    ":sync_row_timestamp".to_string(),
                    Value::Integer(below_timestamp),
                )],
            )
            .await?;
        Ok(deleted)
    }

    /// Back-fill tracking rows for pre-existing data.
    pub async fn update_untracked_rows(&self, min_timestamp: i64) -> Result<u64> {
        let inserted = self
            .conn
            .execute(
                &self.builder.update_untracked_rows_script(),
                vec![(
                    ":sync_min_timestamp".to_string(),
                    Value::Integer(min_timestamp),
                )],
            )
            .await?;
        Ok(inserted)
    }

    /// Suspend referential-integrity checking for the current transaction.
    pub async fn disable_constraints(&self) -> Result<()> {
        self.conn
            .execute(self.builder.disable_constraints_script(), ())
            .await?;
        Ok(())
    }

    /// Restore immediate referential-integrity checking.
    pub async fn enable_constraints(&self) -> Result<()> {
        self.conn
            .execute(self.builder.enable_constraints_script(), ())
            .await?;
        Ok(())
    }

    /// Decide what a zero-affected apply means: an already-deleted target
    /// (applied) or a concurrent local change (failed row, reported with the
    /// local side's values).
    async fn resolve_unapplied_row(
        &self,
        row: &ChangeRow,
        failed_rows: &mut Vec<FailedRow>,
    ) -> Result<bool> {
        let pk_values: Vec<Value> = self
            .pk_parameters(row)?
            .into_iter()
            .map(|(_, value)| value)
            .collect();

        match self.select_row(&pk_values).await? {
            None => {
                if row.state == RowState::Deleted {
                    // Deleting a row that never existed locally is a no-op
                    // apply, not a conflict.
                    Ok(true)
                } else {
                    failed_rows.push(FailedRow::new(row.state, row.values.clone()));
                    Ok(false)
                }
            }
            Some(local) => {
                if row.state == RowState::Deleted && local.state == RowState::Deleted {
                    // Both sides deleted the row.
                    Ok(true)
                } else {
                    failed_rows.push(FailedRow::new(row.state, local.values));
                    Ok(false)
                }
            }
        }
    }

    /// Re-attribute the tracking row to the sending scope after an apply.
    ///
    /// The tracking trigger already fired for the DML and assigned a fresh
    /// timestamp with a NULL scope; this fixes the attribution so the change
    /// is not selected back for the sender. Deletes of rows unknown locally
    /// insert the tombstone directly.
    async fn write_apply_metadata(&self, row: &ChangeRow, sender_scope_id: Uuid) -> Result<()> {
        let names = self.builder.names();
        let tracking = &names.quoted_tracking_full_name;
        let pk_list = self.builder.quoted_pk_list();
        let pk_params = self
            .schema
            .primary_keys
            .iter()
            .map(|pk| format!(":{pk}"))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "INSERT INTO {tracking} ({pk_list}, \"{UPDATE_SCOPE_ID}\", \"{SYNC_ROW_IS_TOMBSTONE}\", \"{UPDATE_TIMESTAMP}\", \"{LAST_CHANGE}\")\n\
             VALUES ({pk_params}, :sync_scope_id, :sync_row_is_tombstone, \
             COALESCE((SELECT MAX(\"{UPDATE_TIMESTAMP}\") FROM {tracking}), 0) + 1, datetime('now'))\n\
             ON CONFLICT({pk_list}) DO UPDATE SET \"{UPDATE_SCOPE_ID}\" = :sync_scope_id",
            LAST_CHANGE = crate::table_builder::LAST_CHANGE_DATETIME,
        );

        let mut params = self.pk_parameters(row)?;
        params.push((
            ":sync_scope_id".to_string(),
            Value::Text(sender_scope_id.to_string()),
        ));
        params.push((
            ":sync_row_is_tombstone".to_string(),
            Value::Integer(i64::from(row.state == RowState::Deleted)),
        ));

        self.conn.execute(&sql, params).await?;
        Ok(())
    }

    /// Bind every column of a row as a named parameter, applying the
    /// uniform value conversion rules.
    fn row_parameters(&self, row: &ChangeRow) -> Result<Vec<(String, Value)>> {
        if row.values.len() != self.schema.columns.len() {
            return Err(Error::InvalidInput(format!(
                "Row has {} values but table '{}' has {} columns",
                row.values.len(),
                self.schema.table_name,
                self.schema.columns.len()
            )));
        }

        Ok(self
            .schema
            .columns
            .iter()
            .zip(row.values.iter())
            .map(|(column, value)| {
                let binding = self.mapper.binding(column);
                (
                    format!(":{}", column.name),
                    convert_for_binding(value.clone(), binding),
                )
            })
            .collect())
    }

    /// Bind only the primary-key columns of a row as named parameters.
    ///
    /// Deleted rows may carry either the full column width or just the
    /// primary-key values.
    fn pk_parameters(&self, row: &ChangeRow) -> Result<Vec<(String, Value)>> {
        let pk_count = self.schema.primary_keys.len();

        if row.values.len() == pk_count {
            return Ok(self
                .schema
                .primary_keys
                .iter()
                .zip(row.values.iter())
                .map(|(pk, value)| (format!(":{pk}"), value.clone()))
                .collect());
        }

        if row.values.len() == self.schema.columns.len() {
            return self
                .schema
                .primary_keys
                .iter()
                .map(|pk| {
                    let index = self.schema.column_index(pk).ok_or_else(|| {
                        Error::InvalidInput(format!("Unknown primary-key column '{pk}'"))
                    })?;
                    Ok((format!(":{pk}"), row.values[index].clone()))
                })
                .collect();
        }

        Err(Error::InvalidInput(format!(
            "Row has {} values; expected {} (all columns) or {} (primary keys)",
            row.values.len(),
            self.schema.columns.len(),
            pk_count
        )))
    }

    fn update_row_sql(&self) -> String {
        let names = self.builder.names();
        let table = &names.quoted_full_name;
        let tracking = &names.quoted_tracking_full_name;
        let columns = self
            .schema
            .columns
            .iter()
            .map(|c| names.quote_column(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let value_params = self
            .schema
            .columns
            .iter()
            .map(|c| format!(":{}", c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let pk_filter = self.builder.pk_parameter_filter("side");

        format!(
            "INSERT OR REPLACE INTO {table} ({columns})\n\
             SELECT {value_params}\n\
             WHERE EXISTS (\n\
                 SELECT 1 FROM {tracking} side\n\
                 WHERE {pk_filter}\n\
                   AND (side.\"{UPDATE_TIMESTAMP}\" <= :sync_min_timestamp\n\
                        OR side.\"{UPDATE_SCOPE_ID}\" = :sync_scope_id\n\
                        OR :sync_force_write = 1)\n\
             )\n\
             OR NOT EXISTS (SELECT 1 FROM {tracking} side WHERE {pk_filter})"
        )
    }

    fn delete_row_sql(&self) -> String {
        let names = self.builder.names();
        let table = &names.quoted_full_name;
        let tracking = &names.quoted_tracking_full_name;
        let pk_filter = self
            .schema
            .primary_keys
            .iter()
            .map(|pk| format!("{} = :{pk}", names.quote_column(pk)))
            .collect::<Vec<_>>()
            .join(" AND ");
        let side_filter = self.builder.pk_parameter_filter("side");

        format!(
            "DELETE FROM {table}\n\
             WHERE {pk_filter}\n\
               AND (EXISTS (\n\
                    SELECT 1 FROM {tracking} side\n\
                    WHERE {side_filter}\n\
                      AND (side.\"{UPDATE_TIMESTAMP}\" <= :sync_min_timestamp\n\
                           OR side.\"{UPDATE_SCOPE_ID}\" = :sync_scope_id\n\
                           OR :sync_force_write = 1)\n\
                )\n\
                OR NOT EXISTS (SELECT 1 FROM {tracking} side WHERE {side_filter}))"
        )
    }

    fn select_changes_sql(&self, predicate: Option<&str>, with_scope_exclusion: bool) -> String {
        let names = self.builder.names();
        let mut sql = format!(
            "SELECT {columns}, side.\"{SYNC_ROW_IS_TOMBSTONE}\", side.\"{UPDATE_TIMESTAMP}\"\n\
             FROM {tracking} side\n\
             LEFT JOIN {table} p ON {join}\n\
             WHERE side.\"{UPDATE_TIMESTAMP}\" > :sync_min_timestamp",
            columns = self.builder.sided_column_list(),
            tracking = names.quoted_tracking_full_name,
            table = names.quoted_full_name,
            join = self.builder.pk_join("p", "side"),
        );
        if with_scope_exclusion {
            sql.push_str(&format!(
                "\n  AND (side.\"{UPDATE_SCOPE_ID}\" IS NULL OR side.\"{UPDATE_SCOPE_ID}\" <> :sync_excluded_scope_id)"
            ));
        }
        if let Some(predicate) = predicate {
            sql.push_str(&format!("\n  AND ({predicate})"));
        }
        sql.push_str(&format!("\nORDER BY side.\"{UPDATE_TIMESTAMP}\""));
        sql
    }

    fn select_initialized_changes_sql(&self, predicate: Option<&str>) -> String {
        let names = self.builder.names();
        let columns = self
            .schema
            .columns
            .iter()
            .map(|c| format!("p.{}", names.quote_column(&c.name)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "SELECT {columns}, COALESCE(side.\"{UPDATE_TIMESTAMP}\", 0)\n\
             FROM {table} p\n\
             LEFT JOIN {tracking} side ON {join}",
            table = names.quoted_full_name,
            tracking = names.quoted_tracking_full_name,
            join = self.builder.pk_join("p", "side"),
        );
        if let Some(predicate) = predicate {
            sql.push_str(&format!("\nWHERE ({predicate})"));
        }
        sql.push_str(&format!(
            "\nORDER BY COALESCE(side.\"{UPDATE_TIMESTAMP}\", 0)"
        ));
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::ColumnSchema;
    use crate::naming::{TriggerKind, SQLITE_DIALECT};

    fn orders_schema() -> TableSchema {
        TableSchema::new(
            "Orders",
            None,
            vec![
                ColumnSchema::new("OrderId", "INTEGER").not_null(),
                ColumnSchema::new("Label", "VARCHAR").with_max_length(100).not_null(),
                ColumnSchema::new("Paid", "BOOLEAN").not_null(),
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

    fn incoming(order_id: i64, label: &str, paid: i64) -> ChangeRow {
        ChangeRow::modified(vec![
            Value::Integer(order_id),
            Value::Text(label.to_string()),
            Value::Integer(paid),
        ])
    }

    async fn label_of(db: &Database, order_id: i64) -> Option<String> {
        let mut rows = db
            .connection()
            .query(
                "SELECT \"Label\" FROM \"Orders\" WHERE \"OrderId\" = ?",
                libsql::params![order_id],
            )
            .await
            .unwrap();
        rows.next().await.unwrap().map(|row| row.get(0).unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_command_mapping_is_all_text_without_bulk() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        let adapter = SyncAdapter::new(db.connection(), &schema, SQLITE_DIALECT);

        let command = adapter.command(CommandKind::SelectChanges, None).unwrap();
        assert_eq!(command.style, CommandStyle::Text);
        assert_eq!(command.name, "Orders_SELECTCHANGES");
        assert!(!command.is_batch);

        // Batch kinds degrade to single-row commands.
        let rows_command = adapter.command(CommandKind::UpdateRows, None).unwrap();
        let row_command = adapter.command(CommandKind::UpdateRow, None).unwrap();
        assert_eq!(rows_command.text, row_command.text);

        assert!(adapter.command(CommandKind::BulkTableType, None).is_none());

        let filter = SyncFilter {
            name: "ByLabel".to_string(),
            predicate: "p.\"Label\" = :label".to_string(),
            parameters: vec![(":label".to_string(), Value::Text("x".to_string()))],
        };
        let filtered = adapter
            .command(CommandKind::SelectChangesWithFilters, Some(&filter))
            .unwrap();
        assert_eq!(filtered.name, "Orders_SELECTCHANGES_ByLabel");
        assert!(filtered.text.contains("p.\"Label\" = :label"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_select_changes_returns_exactly_rows_after_since() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();
        let adapter = SyncAdapter::new(conn, &schema, SQLITE_DIALECT);

        conn.execute(
            "INSERT INTO \"Orders\" VALUES (1, 'one', 0), (2, 'two', 1)",
            (),
        )
        .await
        .unwrap();
        conn.execute("DELETE FROM \"Orders\" WHERE \"OrderId\" = 1", ())
            .await
            .unwrap();

        // Timestamps now: row 2 -> 2, row 1 tombstone -> 3.
        let all = adapter.select_changes(0, None, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].update_timestamp, 2);
        assert_eq!(all[0].state, RowState::Modified);
        assert_eq!(all[1].update_timestamp, 3);
        assert_eq!(all[1].state, RowState::Deleted);
        assert_eq!(all[1].values[0], Value::Integer(1));

        let after_two = adapter.select_changes(2, None, None).await.unwrap();
        assert_eq!(after_two.len(), 1);
        assert_eq!(after_two[0].state, RowState::Deleted);

        let none = adapter.select_changes(3, None, None).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_select_initialized_changes_skips_tombstones() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();
        let adapter = SyncAdapter::new(conn, &schema, SQLITE_DIALECT);

        conn.execute(
            "INSERT INTO \"Orders\" VALUES (1, 'one', 0), (2, 'two', 1)",
            (),
        )
        .await
        .unwrap();
        conn.execute("DELETE FROM \"Orders\" WHERE \"OrderId\" = 1", ())
            .await
            .unwrap();

        let initial = adapter.select_initialized_changes(None).await.unwrap();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].values[0], Value::Integer(2));
        assert_eq!(initial[0].state, RowState::Modified);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_batch_inserts_new_rows_and_attributes_them() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();
        let adapter = SyncAdapter::new(conn, &schema, SQLITE_DIALECT);
        let sender = Uuid::now_v7();

        let mut failed = Vec::new();
        adapter
            .apply_batch(
                &[incoming(1, "remote", 1), incoming(2, "other", 0)],
                sender,
                0,
                false,
                &mut failed,
            )
            .await
            .unwrap();

        assert!(failed.is_empty());
        assert_eq!(label_of(&db, 1).await.as_deref(), Some("remote"));

        // Applied rows are attributed to the sender, so selecting changes
        // for that same sender returns nothing.
        let echo = adapter.select_changes(0, Some(sender), None).await.unwrap();
        assert!(echo.is_empty());

        // A different client still sees them.
        let other = adapter.select_changes(0, Some(Uuid::now_v7()), None).await.unwrap();
        assert_eq!(other.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_batch_detects_concurrent_local_change() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();
        let adapter = SyncAdapter::new(conn, &schema, SQLITE_DIALECT);

        // Local change at timestamp 1, newer than the sender's window.
        conn.execute("INSERT INTO \"Orders\" VALUES (1, 'local', 0)", ())
            .await
            .unwrap();

        let mut failed = Vec::new();
        adapter
            .apply_batch(&[incoming(1, "remote", 1)], Uuid::now_v7(), 0, false, &mut failed)
            .await
            .unwrap();

        // The conflicting row is reported back with the local side's values.
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].state, RowState::Modified);
        assert_eq!(failed[0].values[1], Value::Text("local".to_string()));
        assert_eq!(label_of(&db, 1).await.as_deref(), Some("local"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_force_write_overrides_conflicts() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();
        let adapter = SyncAdapter::new(conn, &schema, SQLITE_DIALECT);

        conn.execute("INSERT INTO \"Orders\" VALUES (1, 'local', 0)", ())
            .await
            .unwrap();

        let mut failed = Vec::new();
        adapter
            .apply_batch(&[incoming(1, "remote", 1)], Uuid::now_v7(), 0, true, &mut failed)
            .await
            .unwrap();

        assert!(failed.is_empty());
        assert_eq!(label_of(&db, 1).await.as_deref(), Some("remote"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_constraint_violation_isolates_the_row() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();
        let adapter = SyncAdapter::new(conn, &schema, SQLITE_DIALECT);

        // Row 2 violates the NOT NULL constraint on Label; the others apply.
        let bad = ChangeRow::modified(vec![
            Value::Integer(2),
            Value::Null,
            Value::Integer(0),
        ]);
        let batch = vec![incoming(1, "first", 0), bad, incoming(3, "third", 1)];

        let mut failed = Vec::new();
        adapter
            .apply_batch(&batch, Uuid::now_v7(), 0, false, &mut failed)
            .await
            .unwrap();

        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].state, RowState::Modified);
        assert_eq!(failed[0].values[0], Value::Integer(2));
        assert_eq!(label_of(&db, 1).await.as_deref(), Some("first"));
        assert_eq!(label_of(&db, 2).await, None);
        assert_eq!(label_of(&db, 3).await.as_deref(), Some("third"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_rows_preserve_input_order() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();
        let adapter = SyncAdapter::new(conn, &schema, SQLITE_DIALECT);

        conn.execute(
            "INSERT INTO \"Orders\" VALUES (5, 'a', 0), (6, 'b', 0), (7, 'c', 0)",
            (),
        )
        .await
        .unwrap();

        // All three conflict; their report order must match the input order.
        let batch = vec![
            incoming(7, "x", 0),
            incoming(5, "y", 0),
            incoming(6, "z", 0),
        ];
        let mut failed = Vec::new();
        adapter
            .apply_batch(&batch, Uuid::now_v7(), 0, false, &mut failed)
            .await
            .unwrap();

        let ids: Vec<_> = failed.iter().map(|f| f.values[0].clone()).collect();
        assert_eq!(
            ids,
            vec![Value::Integer(7), Value::Integer(5), Value::Integer(6)]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_deletes_and_idempotent_deletes() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();
        let adapter = SyncAdapter::new(conn, &schema, SQLITE_DIALECT);

        conn.execute("INSERT INTO \"Orders\" VALUES (1, 'kept', 0)", ())
            .await
            .unwrap();

        // Delete of row 1 (exists, unchanged since min_timestamp 1) and of
        // row 9 (never seen locally).
        let batch = vec![
            ChangeRow::deleted(vec![Value::Integer(1)]),
            ChangeRow::deleted(vec![Value::Integer(9)]),
        ];
        let mut failed = Vec::new();
        adapter
            .apply_batch(&batch, Uuid::now_v7(), 1, false, &mut failed)
            .await
            .unwrap();

        assert!(failed.is_empty());
        assert_eq!(label_of(&db, 1).await, None);

        // Both tombstones are recorded in the tracking table.
        let changes = adapter.select_changes(0, None, None).await.unwrap();
        let tombstones = changes
            .iter()
            .filter(|c| c.state == RowState::Deleted)
            .count();
        assert_eq!(tombstones, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_of_locally_modified_row_is_a_conflict() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();
        let adapter = SyncAdapter::new(conn, &schema, SQLITE_DIALECT);

        conn.execute("INSERT INTO \"Orders\" VALUES (1, 'local', 0)", ())
            .await
            .unwrap();

        let mut failed = Vec::new();
        adapter
            .apply_batch(
                &[ChangeRow::deleted(vec![Value::Integer(1)])],
                Uuid::now_v7(),
                0,
                false,
                &mut failed,
            )
            .await
            .unwrap();

        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].state, RowState::Deleted);
        assert_eq!(label_of(&db, 1).await.as_deref(), Some("local"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_boolean_values_bind_as_integers() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();
        let adapter = SyncAdapter::new(conn, &schema, SQLITE_DIALECT);

        let row = ChangeRow::modified(vec![
            Value::Integer(1),
            Value::Text("paid".to_string()),
            Value::Text("true".to_string()),
        ]);
        let mut failed = Vec::new();
        adapter
            .apply_batch(&[row], Uuid::now_v7(), 0, false, &mut failed)
            .await
            .unwrap();
        assert!(failed.is_empty());

        let mut rows = conn
            .query("SELECT \"Paid\" FROM \"Orders\" WHERE \"OrderId\" = 1", ())
            .await
            .unwrap();
        let paid: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(paid, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_two_databases_exchange_changes() {
        let server = Database::open_in_memory().await.unwrap();
        let client = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&server, &schema).await;
        provision(&client, &schema).await;

        let server_adapter = SyncAdapter::new(server.connection(), &schema, SQLITE_DIALECT);
        let client_adapter = SyncAdapter::new(client.connection(), &schema, SQLITE_DIALECT);
        let server_scope = Uuid::now_v7();

        server
            .connection()
            .execute(
                "INSERT INTO \"Orders\" VALUES (1, 'one', 0), (2, 'two', 1)",
                (),
            )
            .await
            .unwrap();
        server
            .connection()
            .execute("DELETE FROM \"Orders\" WHERE \"OrderId\" = 2", ())
            .await
            .unwrap();

        // Ship everything the server saw to the client.
        let outgoing = server_adapter.select_changes(0, None, None).await.unwrap();
        assert_eq!(outgoing.len(), 2);

        let mut failed = Vec::new();
        client_adapter
            .apply_batch(&outgoing, server_scope, 0, false, &mut failed)
            .await
            .unwrap();
        assert!(failed.is_empty());

        assert_eq!(label_of(&client, 1).await.as_deref(), Some("one"));
        assert_eq!(label_of(&client, 2).await, None);

        // The client does not select the server's changes back to it.
        let echo = client_adapter
            .select_changes(0, Some(server_scope), None)
            .await
            .unwrap();
        assert!(echo.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_select_row_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let schema = orders_schema();
        provision(&db, &schema).await;
        let conn = db.connection();
        let adapter = SyncAdapter::new(conn, &schema, SQLITE_DIALECT);

        conn.execute("INSERT INTO \"Orders\" VALUES (1, 'one', 0)", ())
            .await
            .unwrap();

        let row = adapter
            .select_row(&[Value::Integer(1)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.state, RowState::Modified);
        assert_eq!(row.update_timestamp, 1);
        assert_eq!(row.values[1], Value::Text("one".to_string()));

        assert!(adapter.select_row(&[Value::Integer(2)]).await.unwrap().is_none());

        let wrong_arity = adapter.select_row(&[]).await;
        assert!(matches!(wrong_arity, Err(Error::InvalidInput(_))));
    }
}
