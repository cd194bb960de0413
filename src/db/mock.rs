//! Mock connection pool for testing.
//!
//! Behaves like a small MySQL pool without a server: checkout is bounded by
//! a semaphore, sessions are reused after release, `LAST_INSERT_ID()` is
//! tracked per session, and a session that still has unread result sets
//! answers the next statement with "commands out of sync". Every checkout,
//! release and statement is counted so tests can check for leaks.

use super::{ConnectionPool, PoolStatus, PooledConnection, ResultSet, Value};
use crate::error::{PharmaError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// A failure injected into the next statement a mock session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum MockFailure {
    /// The connection drops mid-statement. The session stays broken until
    /// it is discarded.
    Connection(String),
    /// The server rejects the statement.
    Statement(String),
    /// The statement succeeds but reading its second result set fails.
    Drain(String),
}

/// One statement as seen by the mock server.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementLog {
    /// Session (physical connection) the statement ran on.
    pub session: u64,
    pub sql: String,
    pub params: Vec<Value>,
}

/// Checkout instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    pub acquired: usize,
    pub released: usize,
    pub discarded: usize,
    pub in_use: usize,
    pub peak_in_use: usize,
}

#[derive(Debug)]
struct Session {
    id: u64,
    last_insert_id: u64,
    broken: bool,
    pending: VecDeque<ResultSet>,
    drain_failure: Option<String>,
}

impl Session {
    fn new(id: u64) -> Self {
        Self {
            id,
            last_insert_id: 0,
            broken: false,
            pending: VecDeque::new(),
            drain_failure: None,
        }
    }
}

#[derive(Debug)]
struct Shared {
    max_size: u32,
    acquire_timeout: Duration,
    latency: Duration,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
    next_session: AtomicU64,
    idle: Mutex<Vec<Session>>,
    responses: Mutex<HashMap<String, Vec<ResultSet>>>,
    affected: Mutex<HashMap<String, u64>>,
    auto_increment: Mutex<HashMap<String, u64>>,
    failures: Mutex<VecDeque<MockFailure>>,
    failures_on: Mutex<HashMap<String, VecDeque<MockFailure>>>,
    log: Mutex<Vec<StatementLog>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    discarded: AtomicUsize,
    in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Collapses runs of whitespace so canned responses match regardless of
/// how the SQL was laid out.
fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns the table an `INSERT INTO <table> ...` statement targets.
fn insert_target(sql: &str) -> Option<String> {
    let mut words = sql.split_whitespace();
    let insert = words.next()?;
    let into = words.next()?;
    if !insert.eq_ignore_ascii_case("INSERT") || !into.eq_ignore_ascii_case("INTO") {
        return None;
    }
    let table = words.next()?.split('(').next()?.trim_matches('`');
    Some(table.to_ascii_lowercase())
}

/// An in-memory stand-in for [`MySqlPool`](super::MySqlPool).
#[derive(Clone)]
pub struct MockPool {
    shared: Arc<Shared>,
}

impl MockPool {
    /// Creates a pool that allows `max_size` simultaneous checkouts.
    pub fn new(max_size: u32) -> Self {
        Self::build(max_size, DEFAULT_ACQUIRE_TIMEOUT, Duration::ZERO)
    }

    fn build(max_size: u32, acquire_timeout: Duration, latency: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                max_size,
                acquire_timeout,
                latency,
                permits: Arc::new(Semaphore::new(max_size as usize)),
                closed: AtomicBool::new(false),
                next_session: AtomicU64::new(1),
                idle: Mutex::new(Vec::new()),
                responses: Mutex::new(HashMap::new()),
                affected: Mutex::new(HashMap::new()),
                auto_increment: Mutex::new(HashMap::new()),
                failures: Mutex::new(VecDeque::new()),
                failures_on: Mutex::new(HashMap::new()),
                log: Mutex::new(Vec::new()),
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                discarded: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
                peak_in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Sets how long checkout waits for a free connection.
    ///
    /// Call before cloning the pool or issuing statements.
    pub fn with_acquire_timeout(self, timeout: Duration) -> Self {
        self.rebuilt(|max, _, latency| (max, timeout, latency))
    }

    /// Makes every statement take at least `latency`.
    ///
    /// Call before cloning the pool or issuing statements.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.rebuilt(|max, timeout, _| (max, timeout, latency))
    }

    fn rebuilt(self, f: impl FnOnce(u32, Duration, Duration) -> (u32, Duration, Duration)) -> Self {
        let s = &self.shared;
        let (max, timeout, latency) = f(s.max_size, s.acquire_timeout, s.latency);
        let pool = Self::build(max, timeout, latency);
        *lock(&pool.shared.responses) = lock(&s.responses).clone();
        *lock(&pool.shared.affected) = lock(&s.affected).clone();
        *lock(&pool.shared.auto_increment) = lock(&s.auto_increment).clone();
        *lock(&pool.shared.failures) = lock(&s.failures).clone();
        *lock(&pool.shared.failures_on) = lock(&s.failures_on).clone();
        pool
    }

    /// Answers `sql` with the given result sets, first set first.
    pub fn with_result_sets(self, sql: &str, sets: Vec<ResultSet>) -> Self {
        lock(&self.shared.responses).insert(normalize(sql), sets);
        self
    }

    /// Reports `rows` affected whenever `sql` is executed.
    pub fn with_rows_affected(self, sql: &str, rows: u64) -> Self {
        lock(&self.shared.affected).insert(normalize(sql), rows);
        self
    }

    /// Gives `table` an auto-increment key starting at `first_id`.
    pub fn with_auto_increment(self, table: &str, first_id: u64) -> Self {
        lock(&self.shared.auto_increment).insert(table.to_ascii_lowercase(), first_id);
        self
    }

    /// Queues a failure for the next statement any session runs.
    pub fn fail_next(&self, failure: MockFailure) {
        lock(&self.shared.failures).push_back(failure);
    }

    /// Queues a failure for the next time `sql` runs on any session.
    pub fn fail_on(&self, sql: &str, failure: MockFailure) {
        lock(&self.shared.failures_on)
            .entry(normalize(sql))
            .or_default()
            .push_back(failure);
    }

    /// Returns every statement run so far, in order.
    pub fn statements(&self) -> Vec<StatementLog> {
        lock(&self.shared.log).clone()
    }

    /// Returns the checkout counters.
    pub fn stats(&self) -> MockStats {
        let s = &self.shared;
        MockStats {
            acquired: s.acquired.load(Ordering::SeqCst),
            released: s.released.load(Ordering::SeqCst),
            discarded: s.discarded.load(Ordering::SeqCst),
            in_use: s.in_use.load(Ordering::SeqCst),
            peak_in_use: s.peak_in_use.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    type Connection = MockConnection;

    async fn acquire(&self) -> Result<MockConnection> {
        let s = &self.shared;
        if s.closed.load(Ordering::SeqCst) {
            return Err(PharmaError::PoolClosed);
        }

        let permit = match tokio::time::timeout(
            s.acquire_timeout,
            Arc::clone(&s.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PharmaError::PoolClosed),
            Err(_) => return Err(PharmaError::PoolTimeout(s.acquire_timeout)),
        };

        let session = lock(&s.idle)
            .pop()
            .unwrap_or_else(|| Session::new(s.next_session.fetch_add(1, Ordering::SeqCst)));

        s.acquired.fetch_add(1, Ordering::SeqCst);
        let in_use = s.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        s.peak_in_use.fetch_max(in_use, Ordering::SeqCst);

        Ok(MockConnection {
            shared: Arc::clone(&self.shared),
            session: Some(session),
            discarded: false,
            _permit: permit,
        })
    }

    fn status(&self) -> PoolStatus {
        let s = &self.shared;
        let idle = lock(&s.idle).len();
        PoolStatus {
            size: (idle + s.in_use.load(Ordering::SeqCst)) as u32,
            idle,
            max_size: s.max_size,
        }
    }

    async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.permits.close();
        lock(&self.shared.idle).clear();
    }
}

/// A session checked out of a [`MockPool`].
#[derive(Debug)]
pub struct MockConnection {
    shared: Arc<Shared>,
    session: Option<Session>,
    discarded: bool,
    _permit: OwnedSemaphorePermit,
}

impl MockConnection {
    /// Identifier of the underlying session.
    pub fn session_id(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.id)
    }

    fn session(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| PharmaError::internal("mock session already released"))
    }

    /// Logs the statement and applies session state and injected failures.
    ///
    /// Returns the normalized SQL when the statement may proceed.
    async fn start_statement(&mut self, sql: &str, params: &[Value]) -> Result<String> {
        if !self.shared.latency.is_zero() {
            tokio::time::sleep(self.shared.latency).await;
        }

        let shared = Arc::clone(&self.shared);
        let session = self.session()?;
        lock(&shared.log).push(StatementLog {
            session: session.id,
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        if session.broken {
            return Err(PharmaError::connection(
                "2006 (HY000): MySQL server has gone away",
            ));
        }
        if !session.pending.is_empty() {
            return Err(PharmaError::query(
                "2014 (HY000): Commands out of sync; you can't run this command now",
            ));
        }

        let normalized = normalize(sql);
        let targeted = lock(&shared.failures_on)
            .get_mut(&normalized)
            .and_then(VecDeque::pop_front);
        let failure = targeted.or_else(|| lock(&shared.failures).pop_front());
        match failure {
            Some(MockFailure::Connection(msg)) => {
                session.broken = true;
                Err(PharmaError::Connection(msg))
            }
            Some(MockFailure::Statement(msg)) => Err(PharmaError::Query(msg)),
            Some(MockFailure::Drain(msg)) => {
                session.drain_failure = Some(msg);
                Ok(normalized)
            }
            None => Ok(normalized),
        }
    }
}

#[async_trait]
impl PooledConnection for MockConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        let sql = self.start_statement(sql, params).await?;
        let shared = Arc::clone(&self.shared);
        let session = self.session()?;

        if sql.eq_ignore_ascii_case("SELECT LAST_INSERT_ID()") {
            return Ok(ResultSet::from_values(
                ["LAST_INSERT_ID()"],
                vec![vec![Value::from(session.last_insert_id)]],
            ));
        }

        let mut sets: VecDeque<ResultSet> = lock(&shared.responses)
            .get(&sql)
            .cloned()
            .unwrap_or_default()
            .into();
        let first = sets.pop_front().unwrap_or_default();
        session.pending = sets;
        Ok(first)
    }

    async fn next_result_set(&mut self) -> Result<Option<ResultSet>> {
        let session = self.session()?;
        if let Some(msg) = session.drain_failure.take() {
            session.pending.pop_front();
            return Err(PharmaError::Query(msg));
        }
        Ok(session.pending.pop_front())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let sql = self.start_statement(sql, params).await?;
        let shared = Arc::clone(&self.shared);
        let session = self.session()?;

        let target = insert_target(&sql);
        if let Some(table) = &target {
            if let Some(next_id) = lock(&shared.auto_increment).get_mut(table) {
                session.last_insert_id = *next_id;
                *next_id += 1;
            }
        }

        let configured = lock(&shared.affected).get(&sql).copied();
        Ok(configured.unwrap_or(if target.is_some() { 1 } else { 0 }))
    }

    fn discard(&mut self) {
        self.discarded = true;
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        let s = &self.shared;
        s.released.fetch_add(1, Ordering::SeqCst);
        s.in_use.fetch_sub(1, Ordering::SeqCst);

        if self.discarded {
            s.discarded.fetch_add(1, Ordering::SeqCst);
            return;
        }
        if let Some(mut session) = self.session.take() {
            // Session reset on return clears LAST_INSERT_ID; unread result
            // sets stay on the wire.
            session.last_insert_id = 0;
            if !s.closed.load(Ordering::SeqCst) {
                lock(&s.idle).push(session);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_insert_target() {
        assert_eq!(
            insert_target("INSERT INTO Sales_Item (SOID, Quantity) VALUES (?, ?)"),
            Some("sales_item".to_string())
        );
        assert_eq!(
            insert_target("insert into `Customer`(Name) values (?)"),
            Some("customer".to_string())
        );
        assert_eq!(insert_target("UPDATE Medicine SET Price=?"), None);
    }

    #[tokio::test]
    async fn test_undrained_session_is_out_of_sync() {
        let sets = vec![ResultSet::new(), ResultSet::new()];
        let pool = MockPool::new(1).with_result_sets("CALL Report()", sets);

        {
            let mut conn = pool.acquire().await.unwrap();
            conn.query("CALL Report()", &[]).await.unwrap();
        }

        let mut conn = pool.acquire().await.unwrap();
        let err = conn.query("SELECT 1", &[]).await.unwrap_err();
        assert!(err.to_string().contains("Commands out of sync"));
    }

    #[tokio::test]
    async fn test_broken_session_returned_to_pool_stays_broken() {
        let pool = MockPool::new(1);
        pool.fail_next(MockFailure::Connection("Lost connection".into()));

        {
            let mut conn = pool.acquire().await.unwrap();
            assert!(conn.query("SELECT 1", &[]).await.is_err());
        }

        let mut conn = pool.acquire().await.unwrap();
        let err = conn.execute("DELETE FROM Stock_Alert", &[]).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_last_insert_id_is_reset_when_session_returns() {
        let pool = MockPool::new(1).with_auto_increment("Customer", 10);

        let first_session = {
            let mut conn = pool.acquire().await.unwrap();
            conn.execute("INSERT INTO Customer (Name) VALUES (?)", &[Value::from("Asha")])
                .await
                .unwrap();
            conn.session_id()
        };

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(conn.session_id(), first_session);
        let set = conn.query("SELECT LAST_INSERT_ID()", &[]).await.unwrap();
        assert_eq!(set.rows[0].get("LAST_INSERT_ID()"), Some(&Value::Int(0)));
    }

    #[tokio::test]
    async fn test_checkout_waits_for_release() {
        let pool = MockPool::new(1);
        let held = pool.acquire().await.unwrap();

        let mut waiting = task::spawn(pool.acquire());
        assert_pending!(waiting.poll());

        drop(held);
        assert!(waiting.is_woken());
        let conn = assert_ready!(waiting.poll());
        assert!(conn.is_ok());
        assert_eq!(pool.stats().peak_in_use, 1);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_checkout() {
        let pool = MockPool::new(2);
        pool.close().await;

        assert!(matches!(pool.acquire().await, Err(PharmaError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_status_counts_idle_and_checked_out() {
        let pool = MockPool::new(3);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        drop(a);

        let status = pool.status();
        assert_eq!(status.size, 2);
        assert_eq!(status.idle, 1);
        assert_eq!(status.max_size, 3);
        drop(b);
    }
}
