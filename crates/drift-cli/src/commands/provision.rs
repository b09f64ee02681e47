use std::path::Path;

use drift_core::{ScopeInfo, ScopeStore, SqliteSyncProvider, TriggerKind};

use crate::commands::common::{introspect_table_schema, open_database};
use crate::error::CliError;

const TRIGGER_KINDS: [TriggerKind; 3] =
    [TriggerKind::Insert, TriggerKind::Update, TriggerKind::Delete];

/// Provision a table for sync: tracking table, triggers, back-filled
/// tracking rows, and scope registration.
pub async fn run_provision(
    table_name: &str,
    scope_name: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let schema = introspect_table_schema(&db, table_name).await?;
    let provider = SqliteSyncProvider::new(db_path);
    let builder = provider.table_builder(&schema);
    let conn = db.connection();

    if builder.tracking_table_exists(conn).await? {
        println!("Tracking table {} already exists", builder.names().tracking_name);
    } else {
        builder.create_tracking_table(conn).await?;
        println!("Created tracking table {}", builder.names().tracking_name);
    }

    for kind in TRIGGER_KINDS {
        if !builder.trigger_exists(conn, kind).await? {
            builder.create_trigger(conn, kind).await?;
            println!("Created trigger {}", builder.names().trigger_name(kind));
        }
    }

    let store = ScopeStore::new(conn)?;
    store.ensure_scope_tables().await?;

    // Pre-existing rows enter tracking at the current clock value.
    let timestamp = store.local_timestamp().await?;
    let adapter = provider.sync_adapter(conn, &schema);
    let backfilled = adapter.update_untracked_rows(timestamp).await?;
    if backfilled > 0 {
        println!("Back-filled {backfilled} untracked row(s)");
    }

    let existing = store
        .get_all_scope_infos()
        .await?
        .into_iter()
        .find(|s| s.scope_name == scope_name);
    let mut scope = existing.unwrap_or_else(|| ScopeInfo::new(scope_name));
    scope.setup = Some(serde_json::to_string(&serde_json::json!({
        "tables": [table_name],
    }))?);
    scope.schema = Some(serde_json::to_string(&schema)?);
    store.put_scope_info(&scope).await?;

    println!("Table '{table_name}' is provisioned under scope '{scope_name}'");
    Ok(())
}

/// Remove sync objects for a table: triggers first, then the tracking table.
pub async fn run_deprovision(table_name: &str, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let schema = introspect_table_schema(&db, table_name).await?;
    let provider = SqliteSyncProvider::new(db_path);
    let builder = provider.table_builder(&schema);
    let conn = db.connection();

    for kind in TRIGGER_KINDS {
        if builder.trigger_exists(conn, kind).await? {
            builder.drop_trigger(conn, kind).await?;
            println!("Dropped trigger {}", builder.names().trigger_name(kind));
        }
    }

    if builder.tracking_table_exists(conn).await? {
        builder.drop_tracking_table(conn).await?;
        println!("Dropped tracking table {}", builder.names().tracking_name);
    } else {
        println!("Table '{table_name}' had no tracking table");
    }

    Ok(())
}
