//! Prepared statement naming and metadata.
use std::sync::Arc;

use crate::postgres::Oid;

/// Server-side prepared statement name.
///
/// The name is derived from the query id, which is a deterministic
/// digest of the SQL text, so two renderings of the same query share one
/// prepared statement per connection.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct StatementName {
    // b's' + up to 20 decimal digits of a u64
    buf: [u8; 21],
    len: u8,
}

impl StatementName {
    pub fn from_query_id(id: u64) -> Self {
        let mut buf = [0u8; 21];
        buf[0] = b's';
        let mut b = itoa::Buffer::new();
        let digits = b.format(id).as_bytes();
        buf[1..1 + digits.len()].copy_from_slice(digits);
        Self { buf, len: 1 + digits.len() as u8 }
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: ascii only construction and is immutable
        unsafe { std::str::from_utf8_unchecked(&self.buf[..self.len as usize]) }
    }
}

impl std::fmt::Display for StatementName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for StatementName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("StatementName").field(&self.as_str()).finish()
    }
}

/// One column of a statement's result shape, from `RowDescription`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Oid of the column data type.
    pub type_oid: Oid,
    /// The originating table, when the column is a simple table
    /// reference.
    pub table_oid: Option<u32>,
    /// The attribute number within that table.
    pub position_in_table: Option<i16>,
}

/// Inferred parameter and column types of a prepared statement.
///
/// Immutable once obtained from Describe; cached per connection keyed by
/// the query id and evicted only with its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementMetadata {
    /// Declared parameter type oids, in `$n` order.
    pub param_types: Vec<Oid>,
    /// Result columns in wire order; empty for statements without a
    /// result set (`NoData`).
    pub columns: Arc<[ColumnInfo]>,
}

#[cfg(test)]
mod test {
    use super::StatementName;

    #[test]
    fn names_are_deterministic() {
        assert_eq!(StatementName::from_query_id(0).as_str(), "s0");
        assert_eq!(StatementName::from_query_id(42).as_str(), "s42");
        assert_eq!(
            StatementName::from_query_id(u64::MAX).as_str(),
            "s18446744073709551615",
        );
        assert_eq!(
            StatementName::from_query_id(7),
            StatementName::from_query_id(7),
        );
    }
}
