//! Database connection pooling.
use std::time::Duration;

use crate::{
    Result,
    connection::Connection,
    query::{Metadata, Run},
    sql::Query,
    transaction::Transaction,
};

mod config;
pub(crate) mod worker;

pub use config::PoolConfig;

/// Bounded pool of server connections.
///
/// The pool multiplexes application tasks onto at most
/// `max_connections` connections, queueing excess demand fairly and
/// recycling idle connections. Handles are cheap to clone; every clone
/// talks to the same pool.
///
/// # Examples
///
/// ```no_run
/// use postgate::{Pool, sql};
///
/// # async fn app() -> postgate::Result<()> {
/// let pool = Pool::connect_env().await?;
///
/// let result = pool
///     .run(sql().raw("select 420 n, ").bind("Foo").raw(" s").build())
///     .await?;
///
/// assert_eq!(result.rows[0].get("n").unwrap().as_int(), Some(420));
///
/// pool.destroy().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Pool {
    handle: worker::WorkerHandle,
    query_timeout: Duration,
}

impl Pool {
    /// Create a [`Pool`] for a `postgres://` url and verify one
    /// connection.
    pub async fn connect(url: &str) -> Result<Pool> {
        let mut config = PoolConfig::from_env();
        config.conn = crate::connection::Config::parse(url)?;
        Self::connect_with(config).await
    }

    /// Create a [`Pool`] from the environment and verify one connection.
    ///
    /// See [`Config::from_env`][crate::Config::from_env] for the
    /// variables read.
    pub async fn connect_env() -> Result<Pool> {
        Self::connect_with(PoolConfig::from_env()).await
    }

    /// Create a [`Pool`] and verify one connection.
    pub async fn connect_with(config: PoolConfig) -> Result<Pool> {
        let pool = Self::connect_lazy_with(config);
        let conn = pool.handle.acquire().await?;
        pool.handle.release(conn);
        Ok(pool)
    }

    /// Create a [`Pool`] without waiting for a connection.
    ///
    /// The worker immediately starts opening the configured minimum in
    /// the background.
    pub fn connect_lazy_with(config: PoolConfig) -> Pool {
        let query_timeout = config.query_timeout;
        let (handle, worker) = worker::WorkerHandle::new(config);
        tokio::spawn(worker);
        Pool { handle, query_timeout }
    }

    /// Execute a query and collect its rows.
    ///
    /// The returned [`Run`] future is cancellable: obtain a handle with
    /// [`Run::cancel_handle`], or rely on the pool query timeout. The
    /// lease is acquired when the future first polls and returned when
    /// it settles, success or not.
    pub fn run(&self, query: impl Into<Query>) -> Run<'static> {
        Run::pooled(self.handle.clone(), query.into(), self.query_timeout)
    }

    /// Infer parameter and column types of `sql` without executing it.
    ///
    /// The metadata is cached on the connection that prepared it; a
    /// later [`run`][Pool::run] of the same text on that connection
    /// skips the prepare round trip.
    pub fn metadata(&self, sql: &str) -> Metadata<'static> {
        Metadata::pooled(self.handle.clone(), sql, self.query_timeout)
    }

    /// Lease one connection and open a transaction on it.
    ///
    /// Every statement run through the returned guard observes the same
    /// connection, in program order. Dropping the guard without
    /// committing rolls the transaction back.
    pub async fn begin(&self) -> Result<Transaction> {
        let conn = self.handle.acquire().await?;
        Transaction::begin(self.handle.clone(), conn, self.query_timeout).await
    }

    /// Run `body` inside a transaction.
    ///
    /// Commits when the body returns `Ok`; rolls back and re-propagates
    /// when it returns `Err`.
    pub async fn transaction<T, F>(&self, body: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Transaction) -> Result<T>,
    {
        let mut tx = self.begin().await?;
        match body(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                // surface the body's error, not a rollback failure
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback after failed transaction body");
                }
                Err(err)
            }
        }
    }

    /// Destroy every pooled connection and fail queued waiters.
    ///
    /// Idempotent. In-flight leases keep their connection until they
    /// settle; those connections are dropped on return.
    pub async fn destroy(&self) {
        if let Some(ack) = self.handle.destroy() {
            let _ = ack.await;
        }
    }
}

/// A leased connection, returned to the pool exactly once on drop.
#[derive(Debug)]
pub struct PoolConnection {
    handle: worker::WorkerHandle,
    conn: Option<Connection>,
}

impl PoolConnection {
    pub(crate) fn new(handle: worker::WorkerHandle, conn: Connection) -> Self {
        Self { handle, conn: Some(conn) }
    }

    pub(crate) fn connection(&mut self) -> &mut Connection {
        // `conn` only `None` after drop
        self.conn.as_mut().unwrap()
    }
}

impl Drop for PoolConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.handle.release(conn);
        }
    }
}
