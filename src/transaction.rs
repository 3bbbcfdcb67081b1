//! The [`Transaction`] type.
use std::time::Duration;

use crate::{
    error::{Error, Result},
    pool::PoolConnection,
    pool::worker::WorkerHandle,
    postgres::frontend,
    query::Run,
    sql::Query,
};

/// An RAII transaction scope over one exclusively leased connection.
///
/// Every statement run through the guard observes the same connection,
/// in program order. To commit, use [`commit`][Transaction::commit]; if
/// not committed, dropping the guard rolls the transaction back on its
/// way back to the pool.
///
/// Nested transactions are not supported; use
/// [`savepoint`][Transaction::savepoint] for partial rollback.
///
/// # Example
///
/// ```no_run
/// use postgate::{Pool, sql};
///
/// # async fn app(pool: Pool) -> postgate::Result<()> {
/// let mut tx = pool.begin().await?;
///
/// tx.run(sql().raw("insert into post(name) values(").bind("foo").raw(")").build())
///     .await?;
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction {
    lease: PoolConnection,
    query_timeout: Duration,
    done: bool,
    rollback_only: bool,
}

impl Transaction {
    pub(crate) async fn begin(
        handle: WorkerHandle,
        conn: crate::connection::Connection,
        query_timeout: Duration,
    ) -> Result<Transaction> {
        let mut lease = PoolConnection::new(handle, conn);
        lease.connection().simple_query("begin").await?;
        Ok(Transaction { lease, query_timeout, done: false, rollback_only: false })
    }

    /// Execute a query on the transaction's connection.
    ///
    /// A statement that fails cancelled marks the transaction
    /// rollback-only.
    pub fn run(&mut self, query: impl Into<Query>) -> Run<'_> {
        let query = query.into();
        let Transaction { lease, rollback_only, query_timeout, .. } = self;
        Run::transactional(lease.connection(), rollback_only, query, *query_timeout)
    }

    /// Whether a cancelled statement forced this transaction to roll
    /// back.
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Commit the transaction.
    ///
    /// On a rollback-only transaction this rolls back instead and
    /// reports the refusal.
    pub async fn commit(mut self) -> Result<()> {
        if self.rollback_only {
            let result = self.lease.connection().simple_query("rollback").await;
            self.done = true;
            result?;
            return Err(Error::cancelled("before commit, transaction is rollback-only", false));
        }
        let tag = self.lease.connection().simple_query("commit").await?;
        self.done = true;
        // a failed transaction block answers `commit` with a rollback
        if *tag == *"ROLLBACK" {
            tracing::warn!("commit of a failed transaction block rolled back");
        }
        Ok(())
    }

    /// Roll the transaction back explicitly.
    pub async fn rollback(mut self) -> Result<()> {
        let result = self.lease.connection().simple_query("rollback").await;
        self.done = true;
        result.map(|_| ())
    }

    /// Establish a savepoint.
    pub async fn savepoint(&mut self, name: &str) -> Result<()> {
        let sql = format!(r#"savepoint "{}""#, quote_ident(name));
        self.lease.connection().simple_query(&sql).await.map(|_| ())
    }

    /// Roll back to a savepoint; the transaction remains open.
    pub async fn rollback_to(&mut self, name: &str) -> Result<()> {
        let sql = format!(r#"rollback to savepoint "{}""#, quote_ident(name));
        self.lease.connection().simple_query(&sql).await.map(|_| ())
    }

    /// Release a savepoint.
    pub async fn release(&mut self, name: &str) -> Result<()> {
        let sql = format!(r#"release savepoint "{}""#, quote_ident(name));
        self.lease.connection().simple_query(&sql).await.map(|_| ())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.done {
            // queued now, flushed and drained when the pool takes the
            // connection back
            let conn = self.lease.connection();
            conn.send(frontend::Query { sql: "rollback" });
            conn.ready_request();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("done", &self.done)
            .field("rollback_only", &self.rollback_only)
            .finish_non_exhaustive()
    }
}

/// Escape `"` for a double-quoted identifier.
fn quote_ident(name: &str) -> String {
    name.replace('"', "\"\"")
}

#[cfg(test)]
mod test {
    use super::quote_ident;

    #[test]
    fn identifiers_cannot_break_out() {
        assert_eq!(quote_ident("plain"), "plain");
        assert_eq!(quote_ident(r#"a"; drop table t; --"#), r#"a""; drop table t; --"#);
    }
}
