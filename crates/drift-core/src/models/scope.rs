//! Synchronization scope metadata

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol version stamped into newly created scopes
pub const SCOPE_VERSION: &str = "1.0";

/// One synchronization scope: a named, versioned definition of which tables
/// and filters are synchronized together, plus server-side sync bookkeeping.
///
/// Created once per scope at provisioning time, updated after every
/// successful sync, never partially written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeInfo {
    /// Scope identifier (unique key part 1)
    pub scope_id: Uuid,
    /// Scope name (unique key part 2)
    pub scope_name: String,
    /// Serialized schema of the synchronized tables (JSON)
    pub schema: Option<String>,
    /// Serialized setup: table list and filters (JSON)
    pub setup: Option<String>,
    /// Protocol version the scope was provisioned with
    pub version: Option<String>,
    /// Upper bound of the last server-side selection window
    pub last_server_sync_timestamp: Option<i64>,
    /// Upper bound of the last local selection window
    pub last_sync_timestamp: Option<i64>,
    /// Duration of the last sync cycle, in milliseconds
    pub last_sync_duration: Option<i64>,
    /// Wall-clock time of the last sync (RFC 3339), diagnostic only
    pub last_sync: Option<String>,
}

impl ScopeInfo {
    /// Create a fresh scope with a time-sortable id and the current
    /// protocol version.
    #[must_use]
    pub fn new(scope_name: impl Into<String>) -> Self {
        Self {
            scope_id: Uuid::now_v7(),
            scope_name: scope_name.into(),
            schema: None,
            setup: None,
            version: Some(SCOPE_VERSION.to_string()),
            last_server_sync_timestamp: None,
            last_sync_timestamp: None,
            last_sync_duration: None,
            last_sync: None,
        }
    }
}

/// Per-client state of a scope: one row per (scope, remote client) pair.
///
/// Created on first contact from a client, updated after each sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeInfoClient {
    /// Scope identifier (composite key part 1)
    pub scope_id: Uuid,
    /// Scope name (composite key part 2)
    pub scope_name: String,
    /// Remote client identifier (composite key part 3)
    pub client_id: Uuid,
    /// Human-readable client name
    pub client_name: Option<String>,
    /// Serialized filter parameter values for this client (JSON)
    pub parameters: Option<String>,
    /// Serialized filters in effect for this client (JSON)
    pub filters: Option<String>,
    /// Serialized free-form client properties (JSON)
    pub properties: Option<String>,
    /// Upper bound of the client's last selection window
    pub last_client_sync_timestamp: Option<i64>,
    /// Upper bound of the server's last selection window for this client
    pub last_server_sync_timestamp: Option<i64>,
    /// Upper bound of the last sync the pair completed
    pub last_sync_timestamp: Option<i64>,
    /// Duration of the last sync cycle, in milliseconds
    pub last_sync_duration: Option<i64>,
    /// Wall-clock time of the last sync (RFC 3339), diagnostic only
    pub last_sync: Option<String>,
}

impl ScopeInfoClient {
    /// Create the first-contact row for a client of an existing scope.
    #[must_use]
    pub fn new(scope_id: Uuid, scope_name: impl Into<String>, client_id: Uuid) -> Self {
        Self {
            scope_id,
            scope_name: scope_name.into(),
            client_id,
            client_name: None,
            parameters: None,
            filters: None,
            properties: None,
            last_client_sync_timestamp: None,
            last_server_sync_timestamp: None,
            last_sync_timestamp: None,
            last_sync_duration: None,
            last_sync: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_scope_has_version_and_unique_id() {
        let a = ScopeInfo::new("default");
        let b = ScopeInfo::new("default");
        assert_eq!(a.version.as_deref(), Some(SCOPE_VERSION));
        assert_ne!(a.scope_id, b.scope_id);
        assert!(a.last_sync.is_none());
    }

    #[test]
    fn test_client_row_keys_follow_scope() {
        let scope = ScopeInfo::new("default");
        let client = ScopeInfoClient::new(scope.scope_id, &scope.scope_name, Uuid::now_v7());
        assert_eq!(client.scope_id, scope.scope_id);
        assert_eq!(client.scope_name, scope.scope_name);
    }
}
