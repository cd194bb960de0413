//! End-to-end repository scenarios: catalog records flowing into orders.

use pharmadb::db::{MockFailure, MockPool, QueryExecutor, ResultSet, Value};
use pharmadb::error::PharmaError;
use pharmadb::pharmacy::{NewCustomer, OrderDraft, OrderKind, Orders, CUSTOMERS};
use rust_decimal::Decimal;

fn price(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn price_list() -> Vec<ResultSet> {
    vec![ResultSet::from_values(
        ["MedicineID", "Name", "Price"],
        vec![
            vec![Value::Int(1), Value::from("Amoxicillin"), Value::Decimal(price("40.00"))],
            vec![Value::Int(2), Value::from("Paracetamol"), Value::Decimal(price("12.50"))],
        ],
    )]
}

#[tokio::test]
async fn test_new_customer_places_sales_order() {
    let pool = MockPool::new(5)
        .with_auto_increment("Customer", 17)
        .with_auto_increment("Sales_Order", 240)
        .with_result_sets(
            "SELECT MedicineID, Name, Price FROM Medicine ORDER BY Name",
            price_list(),
        );
    let db = QueryExecutor::new(pool.clone());

    let customer_id = CUSTOMERS
        .insert(
            &db,
            &NewCustomer {
                name: "Meera Nair".to_string(),
                email: Some("meera@example.com".to_string()),
                phone: None,
                address: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(customer_id, 17);

    let orders = Orders::new(&db, OrderKind::Sales);
    let draft = orders
        .draft_at_list_price(customer_id, &[(1, 1), (2, 4)])
        .await
        .unwrap();
    assert_eq!(draft.total(), price("90.00"));

    let order_id = orders.create(&draft).await.unwrap();
    assert_eq!(order_id, 240);

    let items: Vec<_> = pool
        .statements()
        .into_iter()
        .filter(|s| s.sql.starts_with("INSERT INTO Sales_Item"))
        .collect();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|s| s.params[0] == Value::Int(240)));

    let header = pool
        .statements()
        .into_iter()
        .find(|s| s.sql.starts_with("INSERT INTO Sales_Order"))
        .unwrap();
    assert_eq!(header.params[1], Value::Int(17));

    let stats = pool.stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.acquired, stats.released);
}

#[tokio::test]
async fn test_generated_ids_do_not_leak_between_callers() {
    let pool = MockPool::new(2)
        .with_latency(std::time::Duration::from_millis(5))
        .with_auto_increment("Purchase_Order", 1);
    let db = QueryExecutor::new(pool.clone());
    let orders = Orders::new(&db, OrderKind::Purchase);

    let first = OrderDraft::new(3).line(1, 10, price("30.00"));
    let second = OrderDraft::new(4).line(2, 20, price("9.00"));
    let (a, b) = tokio::join!(orders.create(&first), orders.create(&second));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a, b);

    // Each order's item row carries that order's own generated key.
    let items: Vec<_> = pool
        .statements()
        .into_iter()
        .filter(|s| s.sql.starts_with("INSERT INTO Purchase_Item"))
        .collect();
    let medicine_for = |order_id: u64| {
        items
            .iter()
            .find(|s| s.params[0] == Value::from(order_id))
            .map(|s| s.params[1].clone())
    };
    assert_eq!(medicine_for(a), Some(Value::Int(1)));
    assert_eq!(medicine_for(b), Some(Value::Int(2)));
}

#[tokio::test]
async fn test_atomic_order_leaves_nothing_on_item_failure() {
    let pool = MockPool::new(2).with_auto_increment("Sales_Order", 60);
    let db = QueryExecutor::new(pool.clone());
    let orders = Orders::new(&db, OrderKind::Sales);
    let draft = OrderDraft::new(8)
        .line(1, 1, price("40.00"))
        .line(99, 1, price("1.00"));

    pool.fail_on(
        "INSERT INTO Sales_Item (SOID, MedicineID, Quantity, SellingPrice) VALUES (?, ?, ?, ?)",
        MockFailure::Statement("1452: foreign key constraint fails".into()),
    );
    let err = orders.create_atomic(&draft).await.unwrap_err();
    assert!(matches!(err, PharmaError::Query(_)));

    let sql: Vec<String> = pool.statements().into_iter().map(|s| s.sql).collect();
    assert_eq!(sql.first().map(String::as_str), Some("START TRANSACTION"));
    assert_eq!(sql.last().map(String::as_str), Some("ROLLBACK"));
    assert_eq!(pool.stats().discarded, 0);
}
