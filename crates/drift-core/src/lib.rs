//! drift-core - Core library for drift
//!
//! Change tracking and synchronization building blocks for relational
//! databases: per-table tracking tables maintained by triggers, a logical
//! row clock, scope metadata persistence, and a conflict-detecting sync
//! adapter. The abstract contract is provider-agnostic; the SQLite backend
//! (via libSQL) is the complete implementation shipped here.
//!
//! Connection and transaction lifecycle belong to the caller: every
//! operation borrows a connection for its duration and never commits or
//! rolls back transactions the caller opened.

pub mod adapter;
pub mod db;
pub mod error;
pub mod introspect;
pub mod models;
pub mod naming;
pub mod provider;
pub mod scope_store;
pub mod table_builder;
pub mod typemap;
pub mod value;

pub use adapter::{CommandDescriptor, CommandKind, CommandStyle, SyncAdapter, SyncFilter};
pub use error::{Error, Result};
pub use introspect::SchemaIntrospector;
pub use models::{ChangeRow, ColumnSchema, FailedRow, RowState, ScopeInfo, ScopeInfoClient, TableSchema};
pub use naming::{Dialect, TableNames, TriggerKind, SQLITE_DIALECT};
pub use provider::{Capabilities, ConstraintsLevel, SqliteSyncProvider, SyncProvider};
pub use scope_store::ScopeStore;
pub use table_builder::TableBuilder;
pub use typemap::{BindType, NativeType, TypeMapper};
