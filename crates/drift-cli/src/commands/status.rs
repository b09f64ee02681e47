use std::path::Path;

use drift_core::{SqliteSyncProvider, TriggerKind};

use crate::commands::common::{introspect_table_schema, open_database};
use crate::error::CliError;

/// Report sync provisioning state for a table.
pub async fn run_status(table_name: &str, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let schema = introspect_table_schema(&db, table_name).await?;
    let provider = SqliteSyncProvider::new(db_path);
    let builder = provider.table_builder(&schema);
    let conn = db.connection();

    println!("Table: {table_name}");
    println!(
        "  columns: {} ({} primary key)",
        schema.columns.len(),
        schema.primary_keys.len()
    );

    let tracked = builder.tracking_table_exists(conn).await?;
    println!(
        "  tracking table {}: {}",
        builder.names().tracking_name,
        if tracked { "present" } else { "missing" }
    );

    for kind in [TriggerKind::Insert, TriggerKind::Update, TriggerKind::Delete] {
        let present = builder.trigger_exists(conn, kind).await?;
        println!(
            "  trigger {}: {}",
            builder.names().trigger_name(kind),
            if present { "present" } else { "missing" }
        );
    }

    if tracked {
        let mut rows = conn
            .query(
                &format!(
                    "SELECT COUNT(*), COALESCE(SUM(\"sync_row_is_tombstone\"), 0), \
                     COALESCE(MAX(\"update_timestamp\"), 0) FROM {}",
                    builder.names().quoted_tracking_full_name
                ),
                (),
            )
            .await?;
        if let Some(row) = rows.next().await? {
            let total: i64 = row.get(0)?;
            let tombstones: i64 = row.get(1)?;
            let max_timestamp: i64 = row.get(2)?;
            println!("  tracked rows: {total} ({tombstones} tombstoned)");
            println!("  row clock: {max_timestamp}");
        }
    }

    Ok(())
}
