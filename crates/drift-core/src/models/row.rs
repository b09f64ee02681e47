//! Change rows materialized during selection and batch apply

use libsql::Value;

/// State a changed row is shipped under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    /// Row was inserted or updated on the source side
    Modified,
    /// Row was deleted on the source side (tombstone)
    Deleted,
}

/// A row materialized from the live table or the tracking table during
/// change selection, tagged with its state and logical version.
#[derive(Debug, Clone)]
pub struct ChangeRow {
    /// Row state at selection time
    pub state: RowState,
    /// Logical version assigned by the tracking trigger
    pub update_timestamp: i64,
    /// Cell values, aligned to the `TableSchema` column order
    pub values: Vec<Value>,
}

impl ChangeRow {
    /// Create a modified-state row with no version yet (incoming rows).
    #[must_use]
    pub const fn modified(values: Vec<Value>) -> Self {
        Self {
            state: RowState::Modified,
            update_timestamp: 0,
            values,
        }
    }

    /// Create a deleted-state row carrying primary-key values.
    #[must_use]
    pub const fn deleted(values: Vec<Value>) -> Self {
        Self {
            state: RowState::Deleted,
            update_timestamp: 0,
            values,
        }
    }
}

/// A row that could not be applied during batch apply.
///
/// Returned to the caller for conflict resolution, never silently dropped.
#[derive(Debug, Clone)]
pub struct FailedRow {
    /// State the row was attempted under
    pub state: RowState,
    /// Cell values of the conflicting side, aligned to the schema column
    /// order; non-key values may be NULL when the local row is tombstoned
    pub values: Vec<Value>,
}

impl FailedRow {
    /// Capture a failed row from the attempted state and the reported values.
    #[must_use]
    pub const fn new(state: RowState, values: Vec<Value>) -> Self {
        Self { state, values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incoming_rows_carry_no_version() {
        let row = ChangeRow::modified(vec![Value::Integer(1), Value::Text("a".into())]);
        assert_eq!(row.state, RowState::Modified);
        assert_eq!(row.update_timestamp, 0);

        let tombstone = ChangeRow::deleted(vec![Value::Integer(1)]);
        assert_eq!(tombstone.state, RowState::Deleted);
    }
}
