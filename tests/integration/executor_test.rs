//! Query executor behavior under load and failure.

use pharmadb::db::{ConnectionPool, MockFailure, MockPool, QueryExecutor, ResultSet, Value};
use pharmadb::error::PharmaError;
use pharmadb::params;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn executor(pool: &MockPool) -> Arc<QueryExecutor<MockPool>> {
    Arc::new(QueryExecutor::new(pool.clone()).with_retry_delay(Duration::from_millis(5)))
}

fn stock_set() -> ResultSet {
    ResultSet::from_values(
        ["MedicineID", "StockQty"],
        vec![vec![Value::Int(1), Value::Int(40)]],
    )
}

#[tokio::test]
async fn test_concurrent_callers_share_a_bounded_pool() {
    let pool = MockPool::new(2)
        .with_latency(Duration::from_millis(10))
        .with_result_sets("SELECT MedicineID, StockQty FROM Medicine", vec![stock_set()]);
    let db = executor(&pool);

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let db = Arc::clone(&db);
            tokio::spawn(async move {
                db.fetch("SELECT MedicineID, StockQty FROM Medicine", &[])
                    .await
            })
        })
        .collect();

    for task in tasks {
        let rows = task.await.unwrap().unwrap();
        assert_eq!(rows[0].get("StockQty"), Some(&Value::Int(40)));
    }

    let stats = pool.stats();
    assert_eq!(stats.acquired, 12);
    assert_eq!(stats.released, 12);
    assert_eq!(stats.in_use, 0);
    assert!(stats.peak_in_use <= 2, "peak was {}", stats.peak_in_use);
    assert!(pool.status().size <= 2);
}

#[tokio::test]
async fn test_procedure_calls_interleaved_with_writes_on_one_connection() {
    let pool = MockPool::new(1)
        .with_result_sets(
            "CALL GetMedicineDetailsByCategory(?)",
            vec![stock_set(), ResultSet::new()],
        )
        .with_auto_increment("Customer", 1);
    let db = executor(&pool);

    for n in 0..5 {
        let rows = db
            .fetch("CALL GetMedicineDetailsByCategory(?)", &params!["Analgesic"])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let id = db
            .execute_and_get_id(
                "INSERT INTO Customer (Name, Email, Phone, Address) VALUES (?, ?, ?, ?)",
                &params![format!("Walk-in {n}"), None::<String>, None::<String>, None::<String>],
            )
            .await
            .unwrap();
        assert_eq!(id, Some(n + 1));
    }

    // Every statement ran on the single session without a sync error.
    let log = pool.statements();
    assert!(log.iter().all(|s| s.session == log[0].session));
    assert_eq!(pool.stats().discarded, 0);
}

#[tokio::test]
async fn test_dropped_connection_is_replaced_transparently_for_reads() {
    let pool = MockPool::new(3)
        .with_result_sets("SELECT MedicineID, StockQty FROM Medicine", vec![stock_set()]);
    let db = executor(&pool);

    pool.fail_next(MockFailure::Connection(
        "2013 (HY000): Lost connection to MySQL server during query".into(),
    ));
    let rows = db
        .fetch("SELECT MedicineID, StockQty FROM Medicine", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    let log = pool.statements();
    assert_eq!(log.len(), 2);
    assert_ne!(log[0].session, log[1].session);
    assert_eq!(pool.stats().discarded, 1);
}

#[tokio::test]
async fn test_dropped_connection_fails_writes_without_retry() {
    let pool = MockPool::new(3);
    let db = executor(&pool);

    pool.fail_next(MockFailure::Connection("2006 (HY000): MySQL server has gone away".into()));
    let err = db
        .execute("UPDATE Medicine SET StockQty = ? WHERE MedicineID = ?", &params![5, 1])
        .await
        .unwrap_err();

    assert!(matches!(err, PharmaError::Connection(_)));
    assert_eq!(pool.statements().len(), 1);

    // The next write gets a healthy connection.
    db.execute("UPDATE Medicine SET StockQty = ? WHERE MedicineID = ?", &params![5, 1])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_exhausted_pool_times_out_after_one_retry() {
    let pool = MockPool::new(1).with_acquire_timeout(Duration::from_millis(40));
    let db = executor(&pool);

    let held = {
        use pharmadb::db::ConnectionPool;
        pool.acquire().await.unwrap()
    };

    let started = Instant::now();
    let err = db.fetch("SELECT 1", &[]).await.unwrap_err();

    assert!(matches!(err, PharmaError::PoolTimeout(_)));
    assert!(started.elapsed() >= Duration::from_millis(80));
    assert!(pool.statements().is_empty());
    drop(held);

    db.fetch("SELECT 1", &[]).await.unwrap();
}

#[tokio::test]
async fn test_closed_pool_rejects_work() {
    let pool = MockPool::new(2);
    let db = executor(&pool);

    db.close().await;
    let err = db.fetch("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, PharmaError::PoolClosed));
}
