//! Pharmacy data access built on [`QueryExecutor`].
//!
//! Each submodule covers one area of the dashboard: catalog tables, sales
//! and purchase orders, analytics, stored procedures, the stock trigger
//! sandbox and role-scoped views. All user values are bound as statement
//! parameters; only fixed table and column names are spliced into SQL.

pub mod analytics;
pub mod catalog;
pub mod orders;
pub mod procedures;
pub mod roles;
pub mod sandbox;

pub use analytics::{Analytics, Kpis};
pub use catalog::{
    Choice, CrudTable, CustomerUpdate, MedicineUpdate, NewCustomer, NewMedicine, NewRecord,
    NewSupplier, RecordUpdate, SupplierUpdate, CUSTOMERS, MEDICINES, SUPPLIERS,
};
pub use orders::{OrderDraft, OrderKind, OrderLine, Orders};
pub use procedures::Procedures;
pub use roles::{Role, RoleSection, RoleViews};
pub use sandbox::{Sandbox, SaleOutcome};

use crate::db::{ConnectionPool, QueryExecutor, Row};
use crate::error::{PharmaError, Result};
use rust_decimal::Decimal;

/// Checks that the database answers a trivial query.
pub async fn ping<P: ConnectionPool>(db: &QueryExecutor<P>) -> Result<()> {
    db.fetch("SELECT 1", &[]).await.map(|_| ())
}

/// Reads a key column as an unsigned id.
pub(crate) fn id_column(row: &Row, column: &str) -> Result<u64> {
    row.get(column)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| PharmaError::query(format!("Column '{column}' is missing or not an id")))
}

/// Reads a numeric column as a decimal, treating NULL as zero.
pub(crate) fn decimal_column(row: &Row, column: &str) -> Decimal {
    row.get(column)
        .and_then(|v| v.as_decimal())
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MockFailure, MockPool, Value};

    #[tokio::test]
    async fn test_ping() {
        let pool = MockPool::new(1);
        let db = QueryExecutor::new(pool.clone());

        ping(&db).await.unwrap();
        assert_eq!(pool.statements()[0].sql, "SELECT 1");
    }

    #[tokio::test]
    async fn test_ping_reports_statement_errors() {
        let pool = MockPool::new(1);
        let db = QueryExecutor::new(pool.clone());
        pool.fail_next(MockFailure::Statement("1045: Access denied".into()));

        let err = ping(&db).await.unwrap_err();
        assert!(err.to_string().contains("Access denied"));
    }

    #[test]
    fn test_column_helpers() {
        let row = Row::new(vec![
            ("CustomerID".to_string(), Value::Int(7)),
            ("Total".to_string(), Value::Null),
        ]);
        assert_eq!(id_column(&row, "customerid").unwrap(), 7);
        assert!(id_column(&row, "Missing").is_err());
        assert_eq!(decimal_column(&row, "Total"), Decimal::ZERO);
    }
}
