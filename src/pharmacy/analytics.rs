//! Dashboard figures.

use super::decimal_column;
use crate::db::{ConnectionPool, QueryExecutor, Row};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;

const DAILY_REVENUE_SQL: &str = "SELECT SODate AS Day, SUM(TotalAmount) AS Revenue \
     FROM Sales_Order WHERE Status = 'Completed' GROUP BY SODate ORDER BY SODate";

const CATEGORY_REVENUE_SQL: &str = "SELECT c.Name AS Category, SUM(si.LineTotal) AS Revenue \
     FROM Sales_Item si \
     JOIN Medicine m ON si.MedicineID = m.MedicineID \
     JOIN Category c ON m.CategoryID = c.CategoryID \
     GROUP BY c.Name ORDER BY Revenue DESC";

/// Headline counts and totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Kpis {
    pub medicines: u64,
    pub suppliers: u64,
    pub customers: u64,
    /// Sum of every sales order's amount, whatever its status.
    pub total_sales: Decimal,
    /// Inventory value as computed by the `GetStockValue()` function.
    pub stock_value: Decimal,
}

pub struct Analytics<'a, P> {
    db: &'a QueryExecutor<P>,
}

impl<'a, P: ConnectionPool> Analytics<'a, P> {
    pub fn new(db: &'a QueryExecutor<P>) -> Self {
        Self { db }
    }

    pub async fn kpis(&self) -> Result<Kpis> {
        Ok(Kpis {
            medicines: self.count("Medicine").await?,
            suppliers: self.count("Supplier").await?,
            customers: self.count("Customer").await?,
            total_sales: self
                .scalar("SELECT SUM(TotalAmount) AS Total FROM Sales_Order")
                .await?,
            stock_value: self.scalar("SELECT GetStockValue() AS Total").await?,
        })
    }

    /// Revenue of completed sales per order date, oldest first.
    pub async fn daily_revenue(&self) -> Result<Vec<Row>> {
        self.db.fetch(DAILY_REVENUE_SQL, &[]).await
    }

    /// Sold line totals per medicine category, highest first.
    pub async fn revenue_by_category(&self) -> Result<Vec<Row>> {
        self.db.fetch(CATEGORY_REVENUE_SQL, &[]).await
    }

    async fn count(&self, table: &str) -> Result<u64> {
        let rows = self
            .db
            .fetch(&format!("SELECT COUNT(*) AS Total FROM {table}"), &[])
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("Total"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }

    /// Reads a single numeric cell; no rows or NULL count as zero.
    async fn scalar(&self, sql: &str) -> Result<Decimal> {
        let rows = self.db.fetch(sql, &[]).await?;
        Ok(rows
            .first()
            .map(|row| decimal_column(row, "Total"))
            .unwrap_or(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MockPool, ResultSet, Value};
    use pretty_assertions::assert_eq;

    fn total(value: Value) -> Vec<ResultSet> {
        vec![ResultSet::from_values(["Total"], vec![vec![value]])]
    }

    #[tokio::test]
    async fn test_kpis() {
        let pool = MockPool::new(2)
            .with_result_sets("SELECT COUNT(*) AS Total FROM Medicine", total(Value::Int(12)))
            .with_result_sets("SELECT COUNT(*) AS Total FROM Supplier", total(Value::Int(3)))
            .with_result_sets("SELECT COUNT(*) AS Total FROM Customer", total(Value::Int(8)))
            .with_result_sets(
                "SELECT SUM(TotalAmount) AS Total FROM Sales_Order",
                total(Value::Decimal("1520.75".parse().unwrap())),
            )
            .with_result_sets(
                "SELECT GetStockValue() AS Total",
                total(Value::from("40210.00")),
            );
        let db = QueryExecutor::new(pool.clone());

        let kpis = Analytics::new(&db).kpis().await.unwrap();
        assert_eq!(
            kpis,
            Kpis {
                medicines: 12,
                suppliers: 3,
                customers: 8,
                total_sales: "1520.75".parse().unwrap(),
                stock_value: "40210.00".parse().unwrap(),
            }
        );
        assert_eq!(pool.stats().in_use, 0);
    }

    #[tokio::test]
    async fn test_kpis_on_empty_database() {
        let pool = MockPool::new(1).with_result_sets(
            "SELECT SUM(TotalAmount) AS Total FROM Sales_Order",
            total(Value::Null),
        );
        let db = QueryExecutor::new(pool);

        let kpis = Analytics::new(&db).kpis().await.unwrap();
        assert_eq!(kpis.medicines, 0);
        assert_eq!(kpis.total_sales, Decimal::ZERO);
        assert_eq!(kpis.stock_value, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_revenue_queries() {
        let pool = MockPool::new(1).with_result_sets(
            DAILY_REVENUE_SQL,
            vec![ResultSet::from_values(
                ["Day", "Revenue"],
                vec![vec![
                    Value::Date(chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()),
                    Value::Decimal("99.50".parse().unwrap()),
                ]],
            )],
        );
        let db = QueryExecutor::new(pool.clone());
        let analytics = Analytics::new(&db);

        let daily = analytics.daily_revenue().await.unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].get("Day").unwrap().to_string(), "2025-03-01");

        assert!(analytics.revenue_by_category().await.unwrap().is_empty());
        assert!(pool.statements()[1].sql.contains("GROUP BY c.Name"));
    }
}
