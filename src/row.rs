//! Decoded result rows.
use std::sync::Arc;

use crate::{
    statement::ColumnInfo,
    types::PgValue,
};

/// One decoded row: an ordered mapping from column name to value.
///
/// Order is the column order declared in `RowDescription`. NULL is the
/// distinguished [`PgValue::Null`], not an absent column.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[ColumnInfo]>,
    values: Vec<PgValue>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[ColumnInfo]>, values: Vec<PgValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Returns the number of columns in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The column descriptors, in wire order.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Value of the first column named `name`.
    pub fn get(&self, name: &str) -> Option<&PgValue> {
        let nth = self.columns.iter().position(|c| c.name == name)?;
        self.values.get(nth)
    }

    /// Value at column position `index`.
    pub fn index(&self, index: usize) -> Option<&PgValue> {
        self.values.get(index)
    }

    /// Iterate `(column, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&ColumnInfo, &PgValue)> {
        self.columns.iter().zip(&self.values)
    }

    /// Consume the row into its values, in wire order.
    pub fn into_values(self) -> Vec<PgValue> {
        self.values
    }
}

/// The collected outcome of one executed query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Decoded rows in arrival order.
    pub rows: Vec<Row>,
    /// Rows affected per the `CommandComplete` tag; zero for commands
    /// that do not report a count.
    pub rows_affected: u64,
}

/// Extract the affected-row count from a `CommandComplete` tag.
///
/// The count is the last space-separated number of the tag for the
/// commands that carry one (`INSERT 0 5`, `SELECT 14`, ...); every other
/// command reports zero.
pub(crate) fn rows_affected(tag: &str) -> u64 {
    let mut words = tag.split_whitespace();
    match words.next() {
        Some("INSERT" | "UPDATE" | "DELETE" | "SELECT" | "MOVE" | "FETCH" | "COPY") => words
            .next_back()
            .and_then(|w| w.parse().ok())
            .unwrap_or_default(),
        _ => 0,
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{Row, rows_affected};
    use crate::{statement::ColumnInfo, types::PgValue};

    fn column(name: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.into(),
            type_oid: 23,
            table_oid: None,
            position_in_table: None,
        }
    }

    #[test]
    fn command_tags() {
        assert_eq!(rows_affected("INSERT 0 5"), 5);
        assert_eq!(rows_affected("UPDATE 10"), 10);
        assert_eq!(rows_affected("DELETE 0"), 0);
        assert_eq!(rows_affected("SELECT 14"), 14);
        assert_eq!(rows_affected("FETCH 2"), 2);
        assert_eq!(rows_affected("MOVE 1"), 1);
        assert_eq!(rows_affected("COPY 99"), 99);
        assert_eq!(rows_affected("CREATE TABLE"), 0);
        assert_eq!(rows_affected("BEGIN"), 0);
        assert_eq!(rows_affected(""), 0);
    }

    #[test]
    fn lookup_by_name_and_position() {
        let columns: Arc<[ColumnInfo]> = vec![column("a"), column("b")].into();
        let row = Row::new(columns, vec![PgValue::Int4(1), PgValue::Null]);

        assert_eq!(row.get("a"), Some(&PgValue::Int4(1)));
        // null is a value, not an absent key
        assert_eq!(row.get("b"), Some(&PgValue::Null));
        assert_eq!(row.get("c"), None);
        assert_eq!(row.index(0), Some(&PgValue::Int4(1)));
        assert_eq!(row.index(2), None);
        assert_eq!(row.len(), 2);
    }
}
