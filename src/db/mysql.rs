//! MySQL pool backend.
//!
//! Wraps a `sqlx` MySQL pool. Statements with bind parameters go through the
//! binary (prepared) protocol; statements without parameters use the text
//! protocol, which is what `START TRANSACTION`, `COMMIT` and friends require.

use super::{ConnectionPool, PoolStatus, PooledConnection, ResultSet, Row, Value};
use crate::config::{ConnectionConfig, PoolConfig};
use crate::error::{PharmaError, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use sqlx::mysql::{
    MySql, MySqlArguments, MySqlConnectOptions, MySqlDatabaseError, MySqlPoolOptions, MySqlRow,
};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Column as SqlxColumn, Either, Executor, Row as SqlxRow, TypeInfo};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of attempts when opening the pool.
const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Base delay between connect attempts (doubles each retry).
const CONNECT_BASE_DELAY_MS: u64 = 500;

/// Server and client error numbers meaning the connection itself is gone.
const CONNECTION_LOST_ERRORS: &[u16] = &[
    1053, // ER_SERVER_SHUTDOWN
    1152, // ER_ABORTING_CONNECTION
    1927, // ER_CONNECTION_KILLED
    2006, // CR_SERVER_GONE_ERROR
    2013, // CR_SERVER_LOST
    4031, // ER_CLIENT_INTERACTION_TIMEOUT
];

/// A bounded pool of MySQL connections with autocommit on.
#[derive(Debug, Clone)]
pub struct MySqlPool {
    pool: sqlx::MySqlPool,
    acquire_timeout: Duration,
    max_size: u32,
}

impl MySqlPool {
    /// Opens the pool, retrying dropped or reset connects with backoff.
    pub async fn connect(config: &ConnectionConfig, pool_config: &PoolConfig) -> Result<Self> {
        let options = connect_options(config);
        let acquire_timeout = pool_config.acquire_timeout();

        let mut last_error = None;
        let mut delay = Duration::from_millis(CONNECT_BASE_DELAY_MS);

        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_CONNECT_ATTEMPTS);

            let result = MySqlPoolOptions::new()
                .max_connections(pool_config.max_connections)
                .acquire_timeout(acquire_timeout)
                .connect_with(options.clone())
                .await;

            match result {
                Ok(pool) => {
                    info!(
                        "Connected to {} (pool size {})",
                        config.display_string(),
                        pool_config.max_connections
                    );
                    return Ok(Self {
                        pool,
                        acquire_timeout,
                        max_size: pool_config.max_connections,
                    });
                }
                Err(e) => {
                    let retry = retries_connect(&e);
                    if attempt < MAX_CONNECT_ATTEMPTS && retry {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        last_error = Some(e);
                    } else {
                        return Err(map_connect_error(&e, config));
                    }
                }
            }
        }

        Err(last_error
            .map(|e| map_connect_error(&e, config))
            .unwrap_or_else(|| PharmaError::internal("no connection attempt was made")))
    }

    /// Wraps an existing sqlx pool.
    pub fn from_pool(pool: sqlx::MySqlPool, acquire_timeout: Duration) -> Self {
        let max_size = pool.options().get_max_connections();
        Self {
            pool,
            acquire_timeout,
            max_size,
        }
    }
}

#[async_trait]
impl ConnectionPool for MySqlPool {
    type Connection = MySqlConnection;

    async fn acquire(&self) -> Result<MySqlConnection> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error(&e, self.acquire_timeout))?;
        Ok(MySqlConnection {
            conn,
            pending: PendingSets::default(),
            acquire_timeout: self.acquire_timeout,
        })
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max_size: self.max_size,
        }
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Connection pool closed");
    }
}

/// A MySQL connection checked out of [`MySqlPool`].
///
/// sqlx reads a statement's result sets off the wire as one stream; they are
/// buffered here so callers can consume them one set at a time.
pub struct MySqlConnection {
    conn: PoolConnection<MySql>,
    pending: PendingSets,
    acquire_timeout: Duration,
}

impl MySqlConnection {
    /// Runs a statement and collects every result set it produced.
    ///
    /// An error before the first set completed fails the statement. A later
    /// error belongs to a trailing set and is kept for whoever reads that far.
    #[allow(deprecated)]
    async fn run(&mut self, sql: &str, params: &[Value]) -> Result<SetReader> {
        if !self.pending.is_empty() {
            debug!("Dropping unread result sets");
            self.pending = PendingSets::default();
        }

        let conn = &mut *self.conn;
        let mut stream = if params.is_empty() {
            conn.fetch_many(sql)
        } else {
            conn.fetch_many(bind_all(sqlx::query(sql), params))
        };

        let mut reader = SetReader::default();
        loop {
            match stream.try_next().await {
                Ok(Some(Either::Right(row))) => reader.push_row(
                    || row.columns().iter().map(|c| c.name().to_string()).collect(),
                    convert_row(&row),
                ),
                Ok(Some(Either::Left(done))) => reader.finish_set(done.rows_affected()),
                Ok(None) => break,
                Err(e) => {
                    reader.fail(map_sqlx_error(&e, self.acquire_timeout))?;
                    break;
                }
            }
        }
        Ok(reader)
    }
}

#[async_trait]
impl PooledConnection for MySqlConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        let (first, rest, _) = self.run(sql, params).await?.finish();
        self.pending = rest;
        Ok(first)
    }

    async fn next_result_set(&mut self) -> Result<Option<ResultSet>> {
        self.pending.next()
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let (_, rest, affected) = self.run(sql, params).await?.finish();
        if let Some(e) = rest.error {
            // The session stopped mid-statement.
            self.discard();
            return Err(e);
        }
        Ok(affected)
    }

    fn discard(&mut self) {
        self.conn.close_on_drop();
    }
}

/// Accumulates the result sets of one statement as the stream is read.
#[derive(Debug, Default)]
struct SetReader {
    sets: VecDeque<ResultSet>,
    current: ResultSet,
    affected: u64,
    error: Option<PharmaError>,
}

impl SetReader {
    fn push_row(&mut self, columns: impl FnOnce() -> Vec<String>, row: Row) {
        if self.current.columns.is_empty() {
            self.current.columns = columns();
        }
        self.current.rows.push(row);
    }

    fn finish_set(&mut self, rows_affected: u64) {
        self.affected += rows_affected;
        self.sets.push_back(std::mem::take(&mut self.current));
    }

    /// Records a stream error. Fails when no set had completed yet.
    fn fail(&mut self, error: PharmaError) -> Result<()> {
        if self.sets.is_empty() {
            return Err(error);
        }
        warn!("Error in trailing result set: {error}");
        self.error = Some(error);
        Ok(())
    }

    /// Splits into the first set, the pending rest and the affected count.
    fn finish(mut self) -> (ResultSet, PendingSets, u64) {
        if !self.current.rows.is_empty() {
            self.sets.push_back(self.current);
        }
        let first = self.sets.pop_front().unwrap_or_default();
        let pending = PendingSets {
            sets: self.sets,
            error: self.error,
        };
        (first, pending, self.affected)
    }
}

/// Result sets still unread on a connection, followed by the error that
/// ended the stream, if any.
#[derive(Debug, Default)]
struct PendingSets {
    sets: VecDeque<ResultSet>,
    error: Option<PharmaError>,
}

impl PendingSets {
    fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.error.is_none()
    }

    fn next(&mut self) -> Result<Option<ResultSet>> {
        if let Some(set) = self.sets.pop_front() {
            return Ok(Some(set));
        }
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

/// Whether opening the pool is worth another attempt after `error`.
///
/// sqlx already retries refused connects until the acquire timeout, so a
/// pool timeout is final here.
fn retries_connect(error: &sqlx::Error) -> bool {
    matches!(
        map_sqlx_error(error, Duration::ZERO),
        PharmaError::Connection(_)
    )
}

/// Builds connect options from a resolved connection config.
fn connect_options(config: &ConnectionConfig) -> MySqlConnectOptions {
    MySqlConnectOptions::new()
        .host(config.host_or_default())
        .port(config.port_or_default())
        .username(config.user_or_default())
        .password(config.password.as_deref().unwrap_or_default())
        .database(config.database_or_default())
}

fn bind_all<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &'q [Value],
) -> Query<'q, MySql, MySqlArguments> {
    for value in params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::UInt(u) => query.bind(*u),
            Value::Float(f) => query.bind(*f),
            Value::Decimal(d) => query.bind(*d),
            Value::String(s) => query.bind(s.as_str()),
            Value::Bytes(b) => query.bind(b.as_slice()),
            Value::Date(d) => query.bind(*d),
            Value::DateTime(dt) => query.bind(*dt),
            Value::Time(t) => query.bind(*t),
        };
    }
    query
}

/// Converts a sqlx MySqlRow to our Row type.
fn convert_row(row: &MySqlRow) -> Row {
    Row::new(
        row.columns()
            .iter()
            .enumerate()
            .map(|(i, col)| {
                (
                    col.name().to_string(),
                    convert_value(row, i, col.type_info().name()),
                )
            })
            .collect(),
    )
}

fn decode<'r, T>(row: &'r MySqlRow, index: usize) -> Option<T>
where
    T: sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
{
    row.try_get::<Option<T>, _>(index).ok().flatten()
}

/// Converts a single column value from a MySqlRow to our Value type.
fn convert_value(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    let value = match type_name.to_uppercase().as_str() {
        "NULL" => None,
        "BOOLEAN" => decode::<bool>(row, index).map(Value::Bool),
        "TINYINT" => decode::<i8>(row, index).map(|v| Value::Int(i64::from(v))),
        "SMALLINT" => decode::<i16>(row, index).map(|v| Value::Int(i64::from(v))),
        "MEDIUMINT" | "INT" => decode::<i32>(row, index).map(|v| Value::Int(i64::from(v))),
        "BIGINT" => decode::<i64>(row, index).map(Value::Int),
        "TINYINT UNSIGNED" => decode::<u8>(row, index).map(|v| Value::Int(i64::from(v))),
        "SMALLINT UNSIGNED" | "YEAR" => decode::<u16>(row, index).map(|v| Value::Int(i64::from(v))),
        "MEDIUMINT UNSIGNED" | "INT UNSIGNED" => {
            decode::<u32>(row, index).map(|v| Value::Int(i64::from(v)))
        }
        "BIGINT UNSIGNED" => decode::<u64>(row, index).map(Value::from),
        "FLOAT" => decode::<f32>(row, index).map(|v| Value::Float(f64::from(v))),
        "DOUBLE" => decode::<f64>(row, index).map(Value::Float),
        "DECIMAL" => decode::<Decimal>(row, index).map(Value::Decimal),
        "DATE" => decode::<NaiveDate>(row, index).map(Value::Date),
        "DATETIME" | "TIMESTAMP" => decode::<NaiveDateTime>(row, index).map(Value::DateTime),
        "TIME" => decode::<NaiveTime>(row, index).map(Value::Time),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => {
            decode::<Vec<u8>>(row, index).map(Value::Bytes)
        }
        // Text, enums, JSON and anything unrecognized come back as text.
        _ => decode::<String>(row, index).map(Value::String).or_else(|| {
            decode::<Vec<u8>>(row, index)
                .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        }),
    };
    value.unwrap_or(Value::Null)
}

/// Sorts a sqlx error into connectivity or statement failure, keeping the
/// driver's message text.
fn map_sqlx_error(error: &sqlx::Error, acquire_timeout: Duration) -> PharmaError {
    match error {
        sqlx::Error::PoolTimedOut => PharmaError::PoolTimeout(acquire_timeout),
        sqlx::Error::PoolClosed => PharmaError::PoolClosed,
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::WorkerCrashed => PharmaError::connection(error.to_string()),
        sqlx::Error::Database(db_error) => {
            let lost = db_error
                .try_downcast_ref::<MySqlDatabaseError>()
                .is_some_and(|e| CONNECTION_LOST_ERRORS.contains(&e.number()));
            if lost {
                PharmaError::connection(db_error.to_string())
            } else {
                PharmaError::query(db_error.to_string())
            }
        }
        sqlx::Error::Configuration(_) => PharmaError::config(error.to_string()),
        _ => PharmaError::query(error.to_string()),
    }
}

/// Maps errors from opening the pool to actionable messages.
fn map_connect_error(error: &sqlx::Error, config: &ConnectionConfig) -> PharmaError {
    let host = config.host_or_default();
    let port = config.port_or_default();
    let user = config.user_or_default();
    let database = config.database_or_default();

    let number = error
        .as_database_error()
        .and_then(|e| e.try_downcast_ref::<MySqlDatabaseError>())
        .map(MySqlDatabaseError::number);

    match (error, number) {
        (_, Some(1045)) => PharmaError::connection(format!(
            "Access denied for user '{user}'. Check DB_USER and DB_PASSWORD. ({error})"
        )),
        (_, Some(1049)) => {
            PharmaError::connection(format!("Unknown database '{database}'. ({error})"))
        }
        (sqlx::Error::Io(_), _) => PharmaError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running. ({error})"
        )),
        (sqlx::Error::PoolTimedOut, _) => PharmaError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        )),
        _ => map_sqlx_error(error, Duration::ZERO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_database_url() -> Option<String> {
        std::env::var("DATABASE_URL").ok()
    }

    async fn get_test_pool() -> Option<MySqlPool> {
        let url = get_test_database_url()?;
        let config = ConnectionConfig::from_connection_string(&url).ok()?;
        MySqlPool::connect(&config, &PoolConfig::default()).await.ok()
    }

    #[test]
    fn test_pool_errors_are_classified() {
        let timeout = Duration::from_secs(3);
        assert!(matches!(
            map_sqlx_error(&sqlx::Error::PoolTimedOut, timeout),
            PharmaError::PoolTimeout(t) if t == timeout
        ));
        assert!(matches!(
            map_sqlx_error(&sqlx::Error::PoolClosed, timeout),
            PharmaError::PoolClosed
        ));
        assert!(map_sqlx_error(&sqlx::Error::WorkerCrashed, timeout).is_transient());
        assert!(!map_sqlx_error(&sqlx::Error::RowNotFound, timeout).is_transient());
    }

    #[test]
    fn test_connect_retries_only_connection_errors() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(retries_connect(&sqlx::Error::Io(reset)));
        assert!(!retries_connect(&sqlx::Error::PoolTimedOut));
        assert!(!retries_connect(&sqlx::Error::PoolClosed));
    }

    #[test]
    fn test_io_errors_are_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset by peer");
        let err = map_sqlx_error(&sqlx::Error::Io(io), Duration::ZERO);
        assert!(err.is_transient());
        assert!(err.to_string().contains("connection reset by peer"));
    }

    fn row(n: i64) -> Row {
        Row::new(vec![("n".to_string(), Value::Int(n))])
    }

    fn names() -> Vec<String> {
        vec!["n".to_string()]
    }

    #[test]
    fn test_trailing_set_error_is_kept_for_the_reader() {
        let mut reader = SetReader::default();
        reader.push_row(names, row(1));
        reader.push_row(names, row(2));
        reader.finish_set(0);
        reader.push_row(names, row(3));
        reader.finish_set(0);
        reader
            .fail(PharmaError::query("1054 (42S22): Unknown column 'x'"))
            .unwrap();

        let (first, mut pending, _) = reader.finish();
        assert_eq!(first.rows.len(), 2);
        assert_eq!(first.columns, names());

        assert_eq!(pending.next().unwrap().unwrap().rows.len(), 1);
        let err = pending.next().unwrap_err();
        assert!(err.to_string().contains("Unknown column"));
        assert!(pending.next().unwrap().is_none());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_error_before_first_set_fails_the_statement() {
        let mut reader = SetReader::default();
        reader.push_row(names, row(1));
        let err = reader
            .fail(PharmaError::connection("2013 (HY000): Lost connection"))
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_clean_stream_leaves_nothing_pending() {
        let mut reader = SetReader::default();
        reader.finish_set(3);
        let (first, mut pending, affected) = reader.finish();
        assert!(first.rows.is_empty());
        assert_eq!(affected, 3);
        assert!(pending.is_empty());
        assert!(pending.next().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_and_execute_against_server() {
        let Some(pool) = get_test_pool().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        let mut conn = pool.acquire().await.unwrap();
        let set = conn
            .query("SELECT ? AS num, 'hello' AS greeting", &[Value::Int(1)])
            .await
            .unwrap();
        assert_eq!(set.columns, vec!["num", "greeting"]);
        assert_eq!(set.rows[0].get("greeting"), Some(&Value::from("hello")));
        assert!(conn.next_result_set().await.unwrap().is_none());

        drop(conn);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_connect_with_invalid_port() {
        let config = ConnectionConfig {
            host: Some("127.0.0.1".to_string()),
            port: Some(59999),
            database: Some("PharmaDB".to_string()),
            user: Some("root".to_string()),
            password: None,
        };
        let pool_config = PoolConfig {
            acquire_timeout_secs: 1,
            ..PoolConfig::default()
        };

        let result = MySqlPool::connect(&config, &pool_config).await;
        assert!(matches!(result, Err(PharmaError::Connection(_))));
    }
}
