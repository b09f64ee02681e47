//! Identifier normalization and derived object names
//!
//! All identifier interpolation into generated SQL goes through this module;
//! raw caller-supplied names are never spliced into command text directly.

use crate::models::TableSchema;

/// Quoting rules and identifier limits of a target engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    /// Opening quote character
    pub left_quote: char,
    /// Closing quote character
    pub right_quote: char,
    /// Maximum identifier length; generated compound names are
    /// right-truncated to this limit
    pub max_identifier_len: usize,
}

/// SQLite quoting: double quotes, generous identifier limit
pub const SQLITE_DIALECT: Dialect = Dialect {
    left_quote: '"',
    right_quote: '"',
    max_identifier_len: 128,
};

/// Trigger kinds maintained per synchronized table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Fires after INSERT on the live table
    Insert,
    /// Fires after UPDATE on the live table
    Update,
    /// Fires after DELETE on the live table
    Delete,
}

impl TriggerKind {
    /// Name fragment used in derived trigger names.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl Dialect {
    /// Quote an identifier, escaping embedded quote characters by doubling.
    #[must_use]
    pub fn quote(&self, identifier: &str) -> String {
        let escaped = identifier.replace(
            self.right_quote,
            &format!("{}{}", self.right_quote, self.right_quote),
        );
        format!("{}{escaped}{}", self.left_quote, self.right_quote)
    }

    /// Normalized short form: unquoted, trimmed, truncated to the limit.
    ///
    /// Normalizing an already-normalized name produces the same name.
    #[must_use]
    pub fn normalize(&self, identifier: &str) -> String {
        let trimmed = identifier.trim();
        let unquoted = trimmed
            .strip_prefix(self.left_quote)
            .and_then(|rest| rest.strip_suffix(self.right_quote))
            .unwrap_or(trimmed);
        self.truncate(unquoted)
    }

    /// Right-truncate a generated name to the engine's identifier limit.
    ///
    /// Truncation is by cropping, not hashing, so long table names can make
    /// differently-derived names collide; callers are responsible for
    /// keeping generated names under the limit.
    #[must_use]
    pub fn truncate(&self, name: &str) -> String {
        name.chars().take(self.max_identifier_len).collect()
    }

    /// Deterministic tracking-table name for a table: `<TABLE>_TRACK`.
    #[must_use]
    pub fn tracking_table_name(&self, table_name: &str) -> String {
        self.truncate(&format!("{table_name}_TRACK"))
    }

    /// Derived trigger name: `<TABLE>_TRIG_<OPERATION>`.
    #[must_use]
    pub fn trigger_name(&self, table_name: &str, kind: TriggerKind) -> String {
        self.truncate(&format!("{table_name}_TRIG_{}", kind.suffix()))
    }

    /// Derived command name: `<TABLE>_<OPERATION>[_<FILTERNAME>]`.
    #[must_use]
    pub fn command_name(
        &self,
        table_name: &str,
        operation: &str,
        filter_name: Option<&str>,
    ) -> String {
        let name = match filter_name {
            Some(filter) => format!("{table_name}_{operation}_{filter}"),
            None => format!("{table_name}_{operation}"),
        };
        self.truncate(&name)
    }
}

/// Pre-computed names for one synchronized table and its tracking table
#[derive(Debug, Clone)]
pub struct TableNames {
    dialect: Dialect,
    /// Unquoted table name
    pub name: String,
    /// Quoted table name, schema-qualified when a schema is set
    pub quoted_full_name: String,
    /// Unquoted tracking-table name
    pub tracking_name: String,
    /// Quoted tracking-table name, schema-qualified when a schema is set
    pub quoted_tracking_full_name: String,
    /// Schema name, empty when the table is unqualified
    pub schema_name: String,
}

impl TableNames {
    /// Derive all object names for a table description.
    #[must_use]
    pub fn parse(dialect: Dialect, schema: &TableSchema) -> Self {
        let name = dialect.normalize(&schema.table_name);
        let tracking_name = dialect.tracking_table_name(&name);
        let schema_name = schema
            .schema_name
            .as_deref()
            .map(|s| dialect.normalize(s))
            .unwrap_or_default();

        let qualify = |object: &str| {
            if schema_name.is_empty() {
                dialect.quote(object)
            } else {
                format!("{}.{}", dialect.quote(&schema_name), dialect.quote(object))
            }
        };
        let quoted_full_name = qualify(&name);
        let quoted_tracking_full_name = qualify(&tracking_name);

        Self {
            dialect,
            quoted_full_name,
            quoted_tracking_full_name,
            name,
            tracking_name,
            schema_name,
        }
    }

    /// Quote a column name with this table's dialect.
    #[must_use]
    pub fn quote_column(&self, column_name: &str) -> String {
        self.dialect.quote(self.dialect.normalize(column_name).as_str())
    }

    /// Trigger name for this table.
    #[must_use]
    pub fn trigger_name(&self, kind: TriggerKind) -> String {
        self.dialect.trigger_name(&self.name, kind)
    }

    /// Command name for this table.
    #[must_use]
    pub fn command_name(&self, operation: &str, filter_name: Option<&str>) -> String {
        self.dialect.command_name(&self.name, operation, filter_name)
    }

    /// The dialect these names were derived with.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }
}
