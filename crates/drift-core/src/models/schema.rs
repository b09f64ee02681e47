//! Table and column descriptions for synchronized tables

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Description of a single column of a synchronized table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name as declared in the source table
    pub name: String,
    /// Original native type name (e.g. `VARCHAR`, `DECIMAL`, `BIGINT`)
    pub type_name: String,
    /// Maximum length for string/binary columns, 0 when not applicable
    pub max_length: i64,
    /// Numeric precision, 0 when not applicable
    pub precision: u8,
    /// Numeric scale, 0 when not applicable
    pub scale: u8,
    /// Whether the column accepts NULL
    pub nullable: bool,
}

impl ColumnSchema {
    /// Create a column description with no length/precision/scale.
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            max_length: 0,
            precision: 0,
            scale: 0,
            nullable: true,
        }
    }

    /// Set the maximum length.
    #[must_use]
    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }

    /// Set precision and scale.
    #[must_use]
    pub const fn with_precision_scale(mut self, precision: u8, scale: u8) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    /// Mark the column NOT NULL.
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Immutable description of a synchronized table.
///
/// Owned by the caller and passed by reference into every operation; the
/// core never mutates it and holds no long-lived references to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name, unquoted
    pub table_name: String,
    /// Optional schema/namespace the table lives in
    pub schema_name: Option<String>,
    /// Ordered column list
    pub columns: Vec<ColumnSchema>,
    /// Ordered primary-key column names
    pub primary_keys: Vec<String>,
}

impl TableSchema {
    /// Build a validated table description.
    ///
    /// Fails with `InvalidInput` when the table name is empty, no primary key
    /// is given, or a primary-key name does not match any column.
    pub fn new(
        table_name: impl Into<String>,
        schema_name: Option<String>,
        columns: Vec<ColumnSchema>,
        primary_keys: Vec<String>,
    ) -> Result<Self> {
        let table_name = table_name.into();
        if table_name.trim().is_empty() {
            return Err(Error::InvalidInput("Table name must not be empty".into()));
        }
        if primary_keys.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Table '{table_name}' must declare at least one primary-key column"
            )));
        }
        for pk in &primary_keys {
            if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(pk)) {
                return Err(Error::InvalidInput(format!(
                    "Primary-key column '{pk}' is not a column of table '{table_name}'"
                )));
            }
        }

        Ok(Self {
            table_name,
            schema_name,
            columns,
            primary_keys,
        })
    }

    /// Columns making up the primary key, in declared key order.
    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.primary_keys.iter().filter_map(|pk| {
            self.columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(pk))
        })
    }

    /// Columns that are not part of the primary key, in declared order.
    pub fn non_primary_key_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.iter().filter(|c| !self.is_primary_key(&c.name))
    }

    /// Whether the named column belongs to the primary key.
    #[must_use]
    pub fn is_primary_key(&self, column_name: &str) -> bool {
        self.primary_keys
            .iter()
            .any(|pk| pk.eq_ignore_ascii_case(column_name))
    }

    /// Position of a column in the ordered column list.
    #[must_use]
    pub fn column_index(&self, column_name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(column_name))
    }
}

/// Foreign-key relation discovered by the introspector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    /// Constraint name, or a synthesized one for engines with unnamed keys
    pub name: String,
    /// Owning table
    pub table_name: String,
    /// Referenced table
    pub reference_table_name: String,
    /// Column pairs, in key ordinal order
    pub columns: Vec<RelationColumn>,
}

/// One column pair of a foreign-key relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationColumn {
    /// Column in the owning table
    pub column_name: String,
    /// Column in the referenced table
    pub reference_column_name: String,
}
