//! Data models for drift

mod row;
mod schema;
mod scope;

pub use row::{ChangeRow, FailedRow, RowState};
pub use schema::{ColumnSchema, RelationColumn, RelationDefinition, TableSchema};
pub use scope::{ScopeInfo, ScopeInfoClient, SCOPE_VERSION};
