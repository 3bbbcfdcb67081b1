//! PostgreSQL wire protocol client with a bounded connection pool.
//!
//! `postgate` speaks the frontend/backend protocol v3.0 over TCP or TLS
//! from scratch: binary codecs for the built-in data types, the
//! startup/authentication and query-cycle state machines, server-side
//! prepared statement caching, and cooperative query cancellation over a
//! separate cancel connection. Parameters and results always travel in
//! binary format.
//!
//! # Examples
//!
//! Pooled queries:
//!
//! ```no_run
//! use postgate::{Pool, PoolConfig, sql};
//!
//! # async fn app() -> postgate::Result<()> {
//! let pool = Pool::connect_with(PoolConfig::from_env()).await?;
//!
//! let result = pool
//!     .run(sql().raw("select id, name from users where id = ").bind(7).build())
//!     .await?;
//!
//! for row in &result.rows {
//!     println!("{:?} -> {:?}", row.get("id"), row.get("name"));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Cancelling a running query:
//!
//! ```no_run
//! use postgate::Pool;
//!
//! # async fn app(pool: Pool) -> postgate::Result<()> {
//! let run = pool.run("select pg_sleep(3600)");
//! let cancel = run.cancel_handle();
//!
//! tokio::spawn(async move { cancel.cancel() });
//!
//! // resolves with the cancelled error once the server aborts
//! let err = run.await.unwrap_err();
//! assert!(err.is_cancelled());
//! # Ok(())
//! # }
//! ```
//!
//! Transactions:
//!
//! ```no_run
//! use postgate::{Pool, sql};
//!
//! # async fn app(pool: Pool) -> postgate::Result<()> {
//! pool.transaction(async |tx| {
//!     tx.run(sql().raw("update t set n = n + 1 where id = ").bind(1).build()).await?;
//!     tx.run(sql().raw("update t set n = n - 1 where id = ").bind(2).build()).await?;
//!     Ok(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
mod ext;
mod net;

// Protocol
pub mod postgres;

// Types
pub mod types;

// Component
mod statement;
pub mod row;
pub mod sql;

// Operation
pub mod query;
pub mod transaction;

// Connection
pub mod connection;
pub mod pool;

mod error;

#[doc(inline)]
pub use connection::{Config, Connection, SslMode};
#[doc(inline)]
pub use error::{Error, ErrorKind, Result};
#[doc(inline)]
pub use pool::{Pool, PoolConfig, PoolConnection};
#[doc(inline)]
pub use query::{CancelHandle, Metadata, Run};
#[doc(inline)]
pub use row::{QueryResult, Row};
#[doc(inline)]
pub use sql::{Query, SqlBuilder, sql};
#[doc(inline)]
pub use statement::{ColumnInfo, StatementMetadata};
#[doc(inline)]
pub use transaction::Transaction;
#[doc(inline)]
pub use types::{Json, PgValue};
