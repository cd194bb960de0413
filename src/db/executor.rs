//! Pooled query execution.
//!
//! Every operation checks a connection out of the pool for the duration of
//! one statement sequence and hands it back when the guard drops, on every
//! exit path. Connections that failed with a connectivity error are
//! discarded instead of returned.
//!
//! Only [`QueryExecutor::fetch`] retries. Writes are not idempotent: if the
//! connection drops after the server applied an insert, running it again
//! would insert twice, so `execute` and `execute_and_get_id` surface the first
//! failure to the caller.

use std::time::Duration;

use tracing::{debug, warn};

use super::{ConnectionPool, PooledConnection, Row, Value};
use crate::error::Result;

/// Attempts `fetch` makes before giving up on a transient failure.
pub const FETCH_ATTEMPTS: u32 = 2;

/// Pause between a failed `fetch` attempt and its retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

const LAST_INSERT_ID_SQL: &str = "SELECT LAST_INSERT_ID()";

/// Issues SQL against a shared connection pool.
pub struct QueryExecutor<P> {
    pool: P,
    retry_delay: Duration,
}

impl<P: ConnectionPool> QueryExecutor<P> {
    /// Creates an executor that owns the given pool.
    pub fn new(pool: P) -> Self {
        Self {
            pool,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Overrides the pause before a `fetch` retry.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Closes the pool. In-flight operations keep their connections until
    /// they finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Runs a read or a stored-procedure call and returns the rows of its
    /// first result set.
    ///
    /// Every further result set is read and thrown away so the connection
    /// goes back to the pool clean. A transient failure is retried once on a
    /// fresh connection; a second failure is returned as-is.
    pub async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(sql, params).await {
                Ok(rows) => return Ok(rows),
                Err(e) if e.is_transient() && attempt < FETCH_ATTEMPTS => {
                    warn!(
                        "Fetch attempt {} of {} failed ({}), retrying in {:?}",
                        attempt, FETCH_ATTEMPTS, e, self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut conn = self.pool.acquire().await?;
        fetch_on(&mut conn, sql, params).await
    }

    /// Runs an insert, update or delete and returns the number of rows it
    /// changed.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        execute_on(&mut conn, sql, params).await
    }

    /// Runs an insert and returns the key it generated.
    ///
    /// `LAST_INSERT_ID()` is session state, so it is read on the same
    /// connection before that connection is released. Returns `None` when
    /// the session has no generated key.
    pub async fn execute_and_get_id(&self, sql: &str, params: &[Value]) -> Result<Option<u64>> {
        let mut conn = self.pool.acquire().await?;
        execute_and_get_id_on(&mut conn, sql, params).await
    }

    /// Starts an explicit transaction on one checked-out connection.
    pub async fn begin(&self) -> Result<Transaction<P::Connection>> {
        let mut conn = self.pool.acquire().await?;
        execute_on(&mut conn, "START TRANSACTION", &[]).await?;
        debug!("Transaction started");
        Ok(Transaction {
            conn,
            finished: false,
        })
    }
}

/// A transaction holding one connection until it commits or rolls back.
///
/// Dropping an unfinished transaction discards its connection; the server
/// rolls back whatever the session left open.
pub struct Transaction<C: PooledConnection> {
    conn: C,
    finished: bool,
}

impl<C: PooledConnection> Transaction<C> {
    /// Runs a read inside the transaction. No retry: the transaction is
    /// bound to this connection.
    pub async fn fetch(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        fetch_on(&mut self.conn, sql, params).await
    }

    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        execute_on(&mut self.conn, sql, params).await
    }

    pub async fn execute_and_get_id(&mut self, sql: &str, params: &[Value]) -> Result<Option<u64>> {
        execute_and_get_id_on(&mut self.conn, sql, params).await
    }

    /// Commits and releases the connection.
    pub async fn commit(mut self) -> Result<()> {
        execute_on(&mut self.conn, "COMMIT", &[]).await?;
        self.finished = true;
        debug!("Transaction committed");
        Ok(())
    }

    /// Rolls back and releases the connection.
    pub async fn rollback(mut self) -> Result<()> {
        execute_on(&mut self.conn, "ROLLBACK", &[]).await?;
        self.finished = true;
        debug!("Transaction rolled back");
        Ok(())
    }
}

impl<C: PooledConnection> Drop for Transaction<C> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Transaction dropped before commit or rollback; discarding its connection");
            self.conn.discard();
        }
    }
}

/// Discards the connection if the statement failed because of it.
fn discard_if_broken<C: PooledConnection, T>(conn: &mut C, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        if e.is_transient() {
            debug!("Discarding connection after: {e}");
            conn.discard();
        }
    }
    result
}

async fn fetch_on<C: PooledConnection>(conn: &mut C, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    debug!("fetch: {sql}");
    let result = conn.query(sql, params).await;
    let first = discard_if_broken(conn, result)?;
    drain_pending(conn).await;
    Ok(first.rows)
}

/// Reads and drops every result set still pending on the connection.
///
/// Failures here are not reported: the caller already has its rows. The
/// connection is discarded because its protocol state is unknown.
async fn drain_pending<C: PooledConnection>(conn: &mut C) {
    let mut drained = 0usize;
    loop {
        match conn.next_result_set().await {
            Ok(Some(_)) => drained += 1,
            Ok(None) => break,
            Err(e) => {
                warn!(
                    "Error while draining result set {} ({}); discarding connection",
                    drained + 2,
                    e
                );
                conn.discard();
                break;
            }
        }
    }
    if drained > 0 {
        debug!("Drained {drained} trailing result set(s)");
    }
}

async fn execute_on<C: PooledConnection>(conn: &mut C, sql: &str, params: &[Value]) -> Result<u64> {
    debug!("execute: {sql}");
    let result = conn.execute(sql, params).await;
    let affected = discard_if_broken(conn, result)?;
    debug!("{affected} row(s) affected");
    Ok(affected)
}

async fn execute_and_get_id_on<C: PooledConnection>(
    conn: &mut C,
    sql: &str,
    params: &[Value],
) -> Result<Option<u64>> {
    execute_on(conn, sql, params).await?;
    let rows = fetch_on(conn, LAST_INSERT_ID_SQL, &[]).await?;

    // MySQL reports 0 when the session never generated a key.
    let id = rows
        .first()
        .and_then(|row| row.values().next())
        .and_then(Value::as_u64)
        .filter(|id| *id != 0);

    debug!("Generated id: {id:?}");
    Ok(id)
}
