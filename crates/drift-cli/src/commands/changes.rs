use std::path::Path;

use drift_core::{RowState, ScopeStore, SqliteSyncProvider};
use serde::Serialize;

use crate::commands::common::{
    format_value, introspect_table_schema, open_database, value_to_json,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct ChangeItem {
    state: &'static str,
    update_timestamp: i64,
    row: serde_json::Map<String, serde_json::Value>,
}

/// List pending changes of a table since a given timestamp.
pub async fn run_changes(
    table_name: &str,
    since: i64,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let schema = introspect_table_schema(&db, table_name).await?;
    let provider = SqliteSyncProvider::new(db_path);
    let conn = db.connection();

    let builder = provider.table_builder(&schema);
    if !builder.tracking_table_exists(conn).await? {
        return Err(CliError::NotProvisioned(table_name.to_string()));
    }

    let adapter = provider.sync_adapter(conn, &schema);
    let changes = adapter.select_changes(since, None, None).await?;

    if as_json {
        let items = changes
            .iter()
            .map(|change| {
                let mut row = serde_json::Map::new();
                for (column, value) in schema.columns.iter().zip(change.values.iter()) {
                    row.insert(column.name.clone(), value_to_json(value));
                }
                ChangeItem {
                    state: match change.state {
                        RowState::Modified => "modified",
                        RowState::Deleted => "deleted",
                    },
                    update_timestamp: change.update_timestamp,
                    row,
                }
            })
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if changes.is_empty() {
        println!("No changes since timestamp {since}.");
        return Ok(());
    }

    for change in &changes {
        let state = match change.state {
            RowState::Modified => "modified",
            RowState::Deleted => "deleted ",
        };
        let cells = change
            .values
            .iter()
            .map(format_value)
            .collect::<Vec<_>>()
            .join(" | ");
        println!("[{:>6}] {state}  {cells}", change.update_timestamp);
    }
    Ok(())
}

/// Print the engine's current logical clock value.
pub async fn run_timestamp(db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let store = ScopeStore::new(db.connection())?;
    println!("{}", store.local_timestamp().await?);
    Ok(())
}
