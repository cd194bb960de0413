//! Database access layer for PharmaDB.
//!
//! Provides a trait-based interface over a bounded connection pool so the
//! [`QueryExecutor`] runs unchanged against MySQL or the instrumented
//! [`MockPool`] used in tests.

mod executor;
mod mock;
mod mysql;
mod types;

pub use executor::{QueryExecutor, Transaction, DEFAULT_RETRY_DELAY, FETCH_ATTEMPTS};
pub use mock::{MockConnection, MockFailure, MockPool, MockStats, StatementLog};
pub use mysql::{MySqlConnection, MySqlPool};
pub use types::{ResultSet, Row, Value};

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Point-in-time occupancy of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Connections currently open, idle or checked out.
    pub size: u32,
    /// Open connections waiting in the pool.
    pub idle: usize,
    /// Upper bound on open connections.
    pub max_size: u32,
}

/// A bounded set of connections that callers check out one at a time.
///
/// Checkout waits while every connection is in use. The returned connection
/// goes back to the pool when dropped.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// The guard type handed out by [`acquire`](Self::acquire).
    type Connection: PooledConnection + 'static;

    /// Checks out a connection, waiting up to the pool's checkout timeout.
    async fn acquire(&self) -> Result<Self::Connection>;

    /// Reports how many connections are open and idle.
    fn status(&self) -> PoolStatus;

    /// Closes every connection; later checkouts fail with `PoolClosed`.
    async fn close(&self);
}

/// A connection checked out of a [`ConnectionPool`].
#[async_trait]
pub trait PooledConnection: Send {
    /// Runs a statement and returns its first result set.
    ///
    /// Any further result sets (stored procedures produce at least two) stay
    /// pending on the connection until read with
    /// [`next_result_set`](Self::next_result_set).
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet>;

    /// Reads the next pending result set, or `None` once all are consumed.
    async fn next_result_set(&mut self) -> Result<Option<ResultSet>>;

    /// Runs a statement that returns no rows and reports rows affected.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Marks the connection as unusable: dropping it closes the physical
    /// connection instead of returning it to the pool.
    fn discard(&mut self);
}
