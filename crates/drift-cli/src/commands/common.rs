use std::path::Path;

use drift_core::db::Database;
use drift_core::{SchemaIntrospector, TableSchema, TypeMapper};
use libsql::Value;

use crate::error::CliError;

/// Open the database the command operates on.
pub async fn open_database(db_path: &Path) -> Result<Database, CliError> {
    Ok(Database::open(db_path).await?)
}

/// Build a `TableSchema` for an existing table by introspection.
///
/// Columns without a native representation are excluded from sync rather
/// than failing the whole table.
pub async fn introspect_table_schema(
    db: &Database,
    table_name: &str,
) -> Result<TableSchema, CliError> {
    let introspector = SchemaIntrospector::new(db.connection());
    if !introspector.table_exists(table_name).await? {
        return Err(CliError::TableNotFound(table_name.to_string()));
    }

    let mapper = TypeMapper::new();
    let mut columns = introspector.get_columns(table_name).await?;
    columns.retain(|column| {
        let valid = mapper.is_valid(column);
        if !valid {
            tracing::warn!(
                "Excluding column '{}' of table '{table_name}': type {} is not representable",
                column.name,
                column.type_name
            );
        }
        valid
    });

    let primary_keys = introspector.get_primary_keys(table_name).await?;
    if primary_keys.is_empty() {
        return Err(CliError::NoPrimaryKey(table_name.to_string()));
    }

    Ok(TableSchema::new(table_name, None, columns, primary_keys)?)
}

/// Render one cell value for terminal output.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(t) => t.clone(),
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

/// Render one cell value for JSON output.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(r) => serde_json::Value::from(*r),
        Value::Text(t) => serde_json::Value::from(t.clone()),
        Value::Blob(b) => serde_json::Value::from(format!("<{} bytes>", b.len())),
    }
}
