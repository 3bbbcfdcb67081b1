//! Query descriptors and the parameterised SQL builder.
use std::{
    fmt::Write,
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};

use crate::{statement::StatementMetadata, types::PgValue};

/// One executable query: SQL text, bound parameters, and a stable id.
///
/// The id is a deterministic digest of the SQL text; it keys the
/// per-connection prepared-statement cache, so two renderings of the
/// same text share a prepared statement.
#[derive(Debug, Clone)]
pub struct Query {
    sql: String,
    params: Vec<PgValue>,
    id: u64,
    metadata: Option<Arc<StatementMetadata>>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let id = query_id(&sql);
        Self { sql, params: Vec::new(), id, metadata: None }
    }

    /// Append a positional parameter, bound to the next `$n`.
    ///
    /// Unlike the [`sql()`] builder this never deduplicates; parameters
    /// map to placeholders strictly by position.
    pub fn bind(mut self, value: impl Into<PgValue>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Attach metadata obtained earlier, skipping the prepare round trip
    /// on connections that already hold the statement.
    pub fn with_metadata(mut self, metadata: Arc<StatementMetadata>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[PgValue] {
        &self.params
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn metadata(&self) -> Option<&Arc<StatementMetadata>> {
        self.metadata.as_ref()
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

impl From<SqlBuilder> for Query {
    fn from(builder: SqlBuilder) -> Self {
        builder.build()
    }
}

/// Deterministic digest of a query text.
pub(crate) fn query_id(sql: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    sql.trim().hash(&mut hasher);
    hasher.finish()
}

/// Start building parameterised SQL.
///
/// Interleave [`raw`][SqlBuilder::raw] text with [`bind`][SqlBuilder::bind]
/// values; each bind renders the positional placeholder `$n` in place.
/// Equal values are deduplicated into one parameter, so binding the same
/// value twice renders the same `$n` both times:
///
/// ```
/// use postgate::sql;
///
/// let q = sql()
///     .raw("select * from t where id = ").bind(5)
///     .raw(" or owner = ").bind(5)
///     .build();
///
/// assert_eq!(q.sql(), "select * from t where id = $1 or owner = $1");
/// assert_eq!(q.params().len(), 1);
/// ```
pub fn sql() -> SqlBuilder {
    SqlBuilder { text: String::new(), params: Vec::new() }
}

/// Builder returned from [`sql()`].
#[derive(Debug, Default)]
pub struct SqlBuilder {
    text: String,
    params: Vec<PgValue>,
}

impl SqlBuilder {
    /// Append literal SQL text.
    pub fn raw(mut self, fragment: &str) -> Self {
        self.text.push_str(fragment);
        self
    }

    /// Bind a value, rendering its `$n` placeholder.
    pub fn bind(mut self, value: impl Into<PgValue>) -> Self {
        let value = value.into();
        let n = match self.params.iter().position(|p| *p == value) {
            Some(position) => position + 1,
            None => {
                self.params.push(value);
                self.params.len()
            }
        };
        write!(self.text, "${n}").expect("write to String");
        self
    }

    /// Finish into a [`Query`] with the deduplicated parameter list.
    pub fn build(self) -> Query {
        let id = query_id(&self.text);
        Query { sql: self.text, params: self.params, id, metadata: None }
    }
}

#[cfg(test)]
mod test {
    use super::{Query, query_id, sql};
    use crate::types::PgValue;

    #[test]
    fn duplicate_parameters_deduplicate() {
        let q = sql()
            .raw("select * from t where id = ")
            .bind(5)
            .raw(" or owner = ")
            .bind(5)
            .build();

        assert_eq!(q.sql(), "select * from t where id = $1 or owner = $1");
        assert_eq!(q.params(), &[PgValue::Int4(5)]);
    }

    #[test]
    fn distinct_parameters_stay_positional() {
        let q = sql()
            .raw("select ")
            .bind(1)
            .raw(", ")
            .bind("one")
            .raw(", ")
            .bind(1)
            .build();

        assert_eq!(q.sql(), "select $1, $2, $1");
        assert_eq!(q.params(), &[PgValue::Int4(1), PgValue::Text("one".into())]);
    }

    #[test]
    fn equal_values_of_different_types_do_not_merge() {
        let q = sql().raw("select ").bind(1i32).raw(", ").bind(1i64).build();
        assert_eq!(q.sql(), "select $1, $2");
        assert_eq!(q.params().len(), 2);
    }

    #[test]
    fn ids_are_stable_across_renderings() {
        let a = sql().raw("select * from t where id = ").bind(7).build();
        let b = sql().raw("select * from t where id = ").bind(9).build();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id(), Query::new("select * from t where id = $1").id());
        // whitespace-trimmed digest
        assert_eq!(query_id(" select 1 "), query_id("select 1"));
    }
}
