//! Stock trigger sandbox.
//!
//! Records a one-line sale so the database triggers can be observed: the
//! sold quantity comes off the medicine's stock, and a stock alert appears
//! once stock drops below the reorder level.

use super::orders::{OrderDraft, OrderKind, Orders};
use super::{decimal_column, id_column};
use crate::db::{ConnectionPool, QueryExecutor, Row};
use crate::error::{PharmaError, Result};
use crate::params;
use rust_decimal::Decimal;
use serde::Serialize;

/// What a simulated sale wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleOutcome {
    pub order_id: u64,
    pub customer_id: u64,
    pub medicine_id: u64,
    pub quantity: u32,
    pub unit_price: Decimal,
}

pub struct Sandbox<'a, P> {
    db: &'a QueryExecutor<P>,
}

impl<'a, P: ConnectionPool> Sandbox<'a, P> {
    pub fn new(db: &'a QueryExecutor<P>) -> Self {
        Self { db }
    }

    /// Sells `quantity` units of a medicine to the first customer on file,
    /// at the medicine's list price.
    pub async fn simulate_sale(&self, medicine_id: u64, quantity: u32) -> Result<SaleOutcome> {
        let medicine = self
            .db
            .fetch(
                "SELECT MedicineID, Name, StockQty, ReorderLevel, Price FROM Medicine WHERE MedicineID = ?",
                &params![medicine_id],
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PharmaError::validation(format!("No medicine with id {medicine_id}")))?;
        let unit_price = decimal_column(&medicine, "Price");

        let customer = self
            .db
            .fetch("SELECT CustomerID FROM Customer LIMIT 1", &[])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                PharmaError::validation("Cannot simulate sale: no customers in the database")
            })?;
        let customer_id = id_column(&customer, "CustomerID")?;

        let draft = OrderDraft::new(customer_id).line(medicine_id, quantity, unit_price);
        let order_id = Orders::new(self.db, OrderKind::Sales).create(&draft).await?;

        Ok(SaleOutcome {
            order_id,
            customer_id,
            medicine_id,
            quantity,
            unit_price,
        })
    }

    /// Current stock and reorder level of one medicine.
    pub async fn stock_level(&self, medicine_id: u64) -> Result<Option<Row>> {
        Ok(self
            .db
            .fetch(
                "SELECT Name, StockQty, ReorderLevel FROM Medicine WHERE MedicineID = ?",
                &params![medicine_id],
            )
            .await?
            .into_iter()
            .next())
    }

    /// Stock alerts raised for one medicine, newest first.
    pub async fn alerts(&self, medicine_id: u64) -> Result<Vec<Row>> {
        self.db
            .fetch(
                "SELECT AlertType, Notes, DateInitiated, Resolved FROM Stock_Alert \
                 WHERE MedicineID = ? ORDER BY AlertID DESC",
                &params![medicine_id],
            )
            .await
    }
}
