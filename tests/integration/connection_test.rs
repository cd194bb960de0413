//! Live MySQL tests.
//!
//! Skipped unless DATABASE_URL points at a reachable server.

use pharmadb::config::{ConnectionConfig, PoolConfig};
use pharmadb::db::{ConnectionPool, MySqlPool, QueryExecutor, Value};
use pharmadb::error::PharmaError;
use pharmadb::params;

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Helper to create a test executor over a small pool.
async fn get_test_executor() -> Option<QueryExecutor<MySqlPool>> {
    let url = get_test_database_url()?;
    let config = ConnectionConfig::from_connection_string(&url).ok()?;
    let pool_config = PoolConfig {
        max_connections: 2,
        ..PoolConfig::default()
    };
    let pool = MySqlPool::connect(&config, &pool_config).await.ok()?;
    Some(QueryExecutor::new(pool))
}

#[tokio::test]
async fn test_connect_and_ping() {
    let Some(db) = get_test_executor().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let rows = db.fetch("SELECT 1 AS one", &[]).await.unwrap();
    assert_eq!(rows[0].get("one").and_then(Value::as_i64), Some(1));
    assert_eq!(db.pool().status().max_size, 2);

    db.close().await;
}

#[tokio::test]
async fn test_statement_error_keeps_server_message() {
    let Some(db) = get_test_executor().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let err = db
        .fetch("SELECT NoSuchColumn FROM (SELECT 1 AS x) t", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, PharmaError::Query(_)));
    assert!(err.to_string().contains("NoSuchColumn"));

    // The pool is still usable afterwards.
    db.fetch("SELECT 1", &[]).await.unwrap();
    db.close().await;
}

#[tokio::test]
async fn test_generated_key_in_transaction() {
    let Some(db) = get_test_executor().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let mut tx = db.begin().await.unwrap();
    tx.execute(
        "CREATE TEMPORARY TABLE pharmadb_test_keys (id INT AUTO_INCREMENT PRIMARY KEY, name VARCHAR(32))",
        &[],
    )
    .await
    .unwrap();

    let id = tx
        .execute_and_get_id(
            "INSERT INTO pharmadb_test_keys (name) VALUES (?)",
            &params!["first"],
        )
        .await
        .unwrap();
    assert_eq!(id, Some(1));

    let rows = tx
        .fetch("SELECT name FROM pharmadb_test_keys WHERE id = ?", &params![1])
        .await
        .unwrap();
    assert_eq!(rows[0].get("name"), Some(&Value::from("first")));

    tx.execute("DROP TEMPORARY TABLE pharmadb_test_keys", &[])
        .await
        .unwrap();
    tx.rollback().await.unwrap();
    db.close().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_with_invalid_port() {
    let config = ConnectionConfig {
        host: Some("127.0.0.1".to_string()),
        port: Some(1),
        database: Some("PharmaDB".to_string()),
        user: Some("root".to_string()),
        password: None,
    };
    let pool_config = PoolConfig {
        acquire_timeout_secs: 2,
        ..PoolConfig::default()
    };

    let result = MySqlPool::connect(&config, &pool_config).await;
    let err = result.unwrap_err();
    assert!(matches!(err, PharmaError::Connection(_)), "got: {err}");
}

#[tokio::test]
async fn test_closed_pool_refuses_checkout() {
    let Some(db) = get_test_executor().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    db.close().await;
    let err = db.pool().acquire().await.err().unwrap();
    assert!(matches!(err, PharmaError::PoolClosed));
}
