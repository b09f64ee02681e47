//! Abstract column descriptors to native SQLite types and binding types

use crate::error::{Error, Result};
use crate::models::ColumnSchema;

/// Fixed-size limit for string columns; longer columns map to the engine's
/// large-object type instead of truncating data
pub const MAX_STRING_LENGTH: i64 = 4000;
/// Fixed-size limit for binary columns
pub const MAX_BINARY_LENGTH: i64 = 2000;
/// Largest numeric precision the mapper preserves
pub const MAX_PRECISION: u8 = 38;

/// Parameter binding type a column's values are bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindType {
    /// Boolean bound as 0/1 integer
    Boolean,
    /// 16-bit integer
    Int16,
    /// 32-bit integer
    Int32,
    /// 64-bit integer
    Int64,
    /// 32-bit float
    Single,
    /// 64-bit float
    Double,
    /// Exact decimal
    Decimal,
    /// Unicode text
    Text,
    /// Raw bytes
    Blob,
    /// Date/time without offset
    DateTime,
    /// Date/time with offset
    DateTimeOffset,
    /// 36-character identifier
    Guid,
}

/// A column mapped into the target engine's terms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeType {
    /// Declared type string for DDL (e.g. `NUMERIC(10,2)`, `VARCHAR(100)`)
    pub type_name: String,
    /// Parameter binding type
    pub binding: BindType,
    /// Adjusted maximum length, 0 when not applicable
    pub max_length: i64,
    /// Adjusted precision, 0 when not applicable
    pub precision: u8,
    /// Adjusted scale, 0 when not applicable
    pub scale: u8,
}

/// Translates abstract column descriptors into SQLite's native types.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeMapper;

impl TypeMapper {
    /// Create a mapper.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Whether the column has a native representation at all.
    ///
    /// Callers exclude unsupported columns from synchronization rather than
    /// failing the whole table.
    #[must_use]
    pub fn is_valid(&self, column: &ColumnSchema) -> bool {
        !matches!(
            normalized(column).as_str(),
            "GEOMETRY" | "GEOGRAPHY" | "HIERARCHYID" | "XML"
        )
    }

    /// Binding type for a column's parameter values.
    ///
    /// Numeric columns with scale map to a decimal binding; scale 0 maps to
    /// the smallest sufficient integer tier by precision.
    #[must_use]
    pub fn binding(&self, column: &ColumnSchema) -> BindType {
        match normalized(column).as_str() {
            "BIT" | "BOOLEAN" | "BOOL" => BindType::Boolean,
            "TINYINT" | "SMALLINT" => BindType::Int16,
            "INT" | "INTEGER" | "MEDIUMINT" => BindType::Int32,
            "BIGINT" => BindType::Int64,
            "NUMBER" | "NUMERIC" | "DECIMAL" => {
                if column.scale > 0 {
                    BindType::Decimal
                } else if column.precision == 1 {
                    BindType::Boolean
                } else if column.precision <= 4 {
                    BindType::Int16
                } else if column.precision <= 9 {
                    BindType::Int32
                } else if column.precision <= 19 {
                    BindType::Int64
                } else {
                    BindType::Decimal
                }
            }
            "REAL" | "BINARY_FLOAT" => BindType::Single,
            "FLOAT" | "DOUBLE" | "BINARY_DOUBLE" => BindType::Double,
            "DATE" | "DATETIME" | "DATETIME2" | "SMALLDATETIME" | "TIMESTAMP" | "TIME" => {
                BindType::DateTime
            }
            "DATETIMEOFFSET" | "TIMESTAMP WITH TIME ZONE" => BindType::DateTimeOffset,
            "UNIQUEIDENTIFIER" | "GUID" | "UUID" => BindType::Guid,
            "BINARY" | "VARBINARY" | "RAW" | "LONG RAW" | "BLOB" | "IMAGE" => BindType::Blob,
            _ => BindType::Text,
        }
    }

    /// Adjusted maximum length for string/binary columns.
    ///
    /// Unset lengths get the engine default, oversizes are capped at the
    /// fixed-size limit; rendering then promotes capped-out columns to the
    /// large-object type.
    #[must_use]
    pub fn adjusted_max_length(&self, column: &ColumnSchema) -> i64 {
        match normalized(column).as_str() {
            "VARCHAR" | "NVARCHAR" | "VARCHAR2" | "NVARCHAR2" => {
                if column.max_length <= 0 {
                    MAX_STRING_LENGTH
                } else {
                    column.max_length.min(MAX_STRING_LENGTH)
                }
            }
            "CHAR" | "NCHAR" => {
                if column.max_length <= 0 {
                    1
                } else {
                    column.max_length.min(MAX_BINARY_LENGTH)
                }
            }
            "BINARY" | "VARBINARY" | "RAW" => {
                if column.max_length <= 0 {
                    MAX_BINARY_LENGTH
                } else {
                    column.max_length.min(MAX_BINARY_LENGTH)
                }
            }
            _ => column.max_length,
        }
    }

    /// Adjusted precision and scale for numeric columns.
    #[must_use]
    pub fn precision_and_scale(&self, column: &ColumnSchema) -> (u8, u8) {
        match normalized(column).as_str() {
            "NUMBER" | "NUMERIC" | "DECIMAL" => {
                let precision = if column.precision == 0 || column.precision > MAX_PRECISION {
                    MAX_PRECISION
                } else {
                    column.precision
                };
                (precision, column.scale)
            }
            _ => (0, 0),
        }
    }

    /// Map a column into the engine's native type and binding type.
    ///
    /// Fails with `Unsupported` when the column has no native representation.
    pub fn map(&self, column: &ColumnSchema) -> Result<NativeType> {
        if !self.is_valid(column) {
            return Err(Error::Unsupported(format!(
                "Column '{}' of type {} has no native representation",
                column.name, column.type_name
            )));
        }

        let binding = self.binding(column);
        let max_length = self.adjusted_max_length(column);
        let (precision, scale) = self.precision_and_scale(column);
        let type_name = self.native_type_string(column, max_length, precision, scale);

        Ok(NativeType {
            type_name,
            binding,
            max_length,
            precision,
            scale,
        })
    }

    /// Recover the abstract descriptor from a declared native type.
    ///
    /// Round-trip fidelity: `map` then `unmap` of decimal(10,2) yields
    /// precision 10 and scale 2 unchanged.
    #[must_use]
    pub fn unmap(&self, native: &NativeType) -> ColumnSchema {
        let (base, len, precision, scale) = parse_declared_type(&native.type_name);
        ColumnSchema {
            name: String::new(),
            type_name: base,
            max_length: len,
            precision,
            scale,
            nullable: true,
        }
    }

    fn native_type_string(
        &self,
        column: &ColumnSchema,
        max_length: i64,
        precision: u8,
        scale: u8,
    ) -> String {
        match normalized(column).as_str() {
            "BIT" | "BOOLEAN" | "BOOL" | "TINYINT" | "SMALLINT" | "INT" | "INTEGER"
            | "MEDIUMINT" | "BIGINT" => "INTEGER".to_string(),
            "NUMBER" | "NUMERIC" | "DECIMAL" => {
                if precision > 0 {
                    format!("NUMERIC({precision},{scale})")
                } else {
                    "NUMERIC".to_string()
                }
            }
            "FLOAT" | "REAL" | "DOUBLE" | "BINARY_FLOAT" | "BINARY_DOUBLE" => "REAL".to_string(),
            "DATE" | "DATETIME" | "DATETIME2" | "SMALLDATETIME" | "TIMESTAMP" | "TIME"
            | "DATETIMEOFFSET" | "TIMESTAMP WITH TIME ZONE" => "DATETIME".to_string(),
            "CHAR" | "NCHAR" => format!("CHAR({max_length})"),
            "VARCHAR" | "NVARCHAR" | "VARCHAR2" | "NVARCHAR2" => {
                // A column capped out at the fixed-size limit that asked for
                // more becomes a large object instead of losing data.
                if column.max_length > MAX_STRING_LENGTH {
                    "TEXT".to_string()
                } else {
                    format!("VARCHAR({max_length})")
                }
            }
            "TEXT" | "NTEXT" | "CLOB" | "NCLOB" => "TEXT".to_string(),
            "BINARY" | "VARBINARY" | "RAW" | "LONG RAW" | "BLOB" | "IMAGE" => "BLOB".to_string(),
            "UNIQUEIDENTIFIER" | "GUID" | "UUID" => "VARCHAR(36)".to_string(),
            _ => "TEXT".to_string(),
        }
    }
}

fn normalized(column: &ColumnSchema) -> String {
    column.type_name.trim().to_uppercase()
}

/// Split a declared type like `NUMERIC(10,2)` or `VARCHAR(30)` into its base
/// name and size arguments.
#[must_use]
pub fn parse_declared_type(declared: &str) -> (String, i64, u8, u8) {
    let declared = declared.trim();
    let Some(open) = declared.find('(') else {
        return (declared.to_uppercase(), 0, 0, 0);
    };
    let base = declared[..open].trim().to_uppercase();
    let args = declared[open + 1..].trim_end_matches(')');
    let mut parts = args.split(',').map(str::trim);

    let first: i64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let second: u8 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

    if second > 0 || base == "NUMERIC" || base == "DECIMAL" || base == "NUMBER" {
        let precision = u8::try_from(first).unwrap_or(MAX_PRECISION);
        (base, 0, precision, second)
    } else {
        (base, first, 0, 0)
    }
}
