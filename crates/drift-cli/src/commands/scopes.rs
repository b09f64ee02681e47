use std::path::Path;

use drift_core::ScopeStore;
use serde::Serialize;

use crate::commands::common::open_database;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct ScopeItem {
    scope_id: String,
    scope_name: String,
    version: Option<String>,
    last_sync_timestamp: Option<i64>,
    last_sync: Option<String>,
    clients: Vec<ScopeClientItem>,
}

#[derive(Debug, Serialize)]
struct ScopeClientItem {
    client_id: String,
    client_name: Option<String>,
    last_client_sync_timestamp: Option<i64>,
    last_sync: Option<String>,
}

/// List registered scopes and their known clients.
pub async fn run_scopes(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let store = ScopeStore::new(db.connection())?;

    if !store.scope_info_table_exists().await? {
        println!("No scopes registered in this database.");
        return Ok(());
    }

    let scopes = store.get_all_scope_infos().await?;
    let clients = if store.scope_info_client_table_exists().await? {
        store.get_all_scope_info_clients().await?
    } else {
        Vec::new()
    };

    let items = scopes
        .iter()
        .map(|scope| ScopeItem {
            scope_id: scope.scope_id.to_string(),
            scope_name: scope.scope_name.clone(),
            version: scope.version.clone(),
            last_sync_timestamp: scope.last_sync_timestamp,
            last_sync: scope.last_sync.clone(),
            clients: clients
                .iter()
                .filter(|c| c.scope_id == scope.scope_id && c.scope_name == scope.scope_name)
                .map(|c| ScopeClientItem {
                    client_id: c.client_id.to_string(),
                    client_name: c.client_name.clone(),
                    last_client_sync_timestamp: c.last_client_sync_timestamp,
                    last_sync: c.last_sync.clone(),
                })
                .collect(),
        })
        .collect::<Vec<_>>();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No scopes registered in this database.");
        return Ok(());
    }

    for item in &items {
        println!(
            "{}  [{}]  version {}  last sync: {}",
            item.scope_name,
            item.scope_id,
            item.version.as_deref().unwrap_or("-"),
            item.last_sync.as_deref().unwrap_or("never"),
        );
        for client in &item.clients {
            println!(
                "    client {}  [{}]  last sync timestamp: {}",
                client.client_name.as_deref().unwrap_or("-"),
                client.client_id,
                client
                    .last_client_sync_timestamp
                    .map_or_else(|| "-".to_string(), |t| t.to_string()),
            );
        }
    }
    Ok(())
}
