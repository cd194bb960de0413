//! Sales and purchase orders.
//!
//! Both order kinds share one shape (a header row plus item rows) and differ
//! only in table and column names. Creating an order inserts the header,
//! reads its generated key, then inserts one item row per line; database
//! triggers keep totals and stock levels in step.

use super::{decimal_column, id_column};
use crate::db::{ConnectionPool, PooledConnection, QueryExecutor, Row, Transaction, Value};
use crate::error::{PharmaError, Result};
use crate::params;
use chrono::{Local, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

/// Status written on every order this crate creates.
pub const COMPLETED: &str = "Completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderKind {
    Sales,
    Purchase,
}

/// Table and column names for one order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderSchema {
    pub order_table: &'static str,
    pub item_table: &'static str,
    pub key: &'static str,
    pub date_column: &'static str,
    pub amount_column: &'static str,
    /// Alias for the counterparty name in listings.
    pub party_label: &'static str,
    pub party_table: &'static str,
    pub party_key: &'static str,
    pub price_column: &'static str,
}

const SALES: OrderSchema = OrderSchema {
    order_table: "Sales_Order",
    item_table: "Sales_Item",
    key: "SOID",
    date_column: "SODate",
    amount_column: "TotalAmount",
    party_label: "Customer",
    party_table: "Customer",
    party_key: "CustomerID",
    price_column: "SellingPrice",
};

const PURCHASE: OrderSchema = OrderSchema {
    order_table: "Purchase_Order",
    item_table: "Purchase_Item",
    key: "POID",
    date_column: "PODate",
    amount_column: "TotalCost",
    party_label: "Supplier",
    party_table: "Supplier",
    party_key: "SupplierID",
    price_column: "CostPrice",
};

impl OrderKind {
    pub fn schema(self) -> &'static OrderSchema {
        match self {
            OrderKind::Sales => &SALES,
            OrderKind::Purchase => &PURCHASE,
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Sales => write!(f, "sales"),
            OrderKind::Purchase => write!(f, "purchase"),
        }
    }
}

impl OrderSchema {
    fn list_sql(&self) -> String {
        format!(
            "SELECT o.{key}, o.{date}, p.Name AS {label}, o.{amount}, o.Status \
             FROM {orders} o JOIN {parties} p ON o.{party_key} = p.{party_key} \
             ORDER BY o.{date} DESC",
            key = self.key,
            date = self.date_column,
            label = self.party_label,
            amount = self.amount_column,
            orders = self.order_table,
            parties = self.party_table,
            party_key = self.party_key,
        )
    }

    fn items_sql(&self) -> String {
        format!(
            "SELECT m.Name, i.Quantity, i.{price}, i.LineTotal FROM {items} i \
             JOIN Medicine m ON i.MedicineID = m.MedicineID WHERE i.{key} = ?",
            price = self.price_column,
            items = self.item_table,
            key = self.key,
        )
    }

    fn header_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}, {}, Status) VALUES (?, ?, ?)",
            self.order_table, self.date_column, self.party_key
        )
    }

    fn item_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}, MedicineID, Quantity, {}) VALUES (?, ?, ?, ?)",
            self.item_table, self.key, self.price_column
        )
    }

    fn delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE {} = ?", self.order_table, self.key)
    }
}

/// One medicine on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLine {
    pub medicine_id: u64,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl OrderLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// An order being assembled before it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDraft {
    /// Customer for sales, supplier for purchases.
    pub party_id: u64,
    pub lines: Vec<OrderLine>,
}

impl OrderDraft {
    pub fn new(party_id: u64) -> Self {
        Self {
            party_id,
            lines: Vec::new(),
        }
    }

    /// Adds a line, builder style.
    pub fn line(mut self, medicine_id: u64, quantity: u32, unit_price: Decimal) -> Self {
        self.push(medicine_id, quantity, unit_price);
        self
    }

    pub fn push(&mut self, medicine_id: u64, quantity: u32, unit_price: Decimal) {
        self.lines.push(OrderLine {
            medicine_id,
            quantity,
            unit_price,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total(&self) -> Decimal {
        self.lines.iter().map(OrderLine::line_total).sum()
    }

    fn validate(&self) -> Result<()> {
        if self.lines.is_empty() {
            return Err(PharmaError::validation("An order needs at least one line"));
        }
        if let Some(line) = self.lines.iter().find(|l| l.quantity == 0) {
            return Err(PharmaError::validation(format!(
                "Quantity for medicine #{} must be at least 1",
                line.medicine_id
            )));
        }
        Ok(())
    }
}

/// Order operations for one order kind.
pub struct Orders<'a, P> {
    db: &'a QueryExecutor<P>,
    kind: OrderKind,
}

impl<'a, P: ConnectionPool> Orders<'a, P> {
    pub fn new(db: &'a QueryExecutor<P>, kind: OrderKind) -> Self {
        Self { db, kind }
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    fn schema(&self) -> &'static OrderSchema {
        self.kind.schema()
    }

    /// Lists orders newest first, with the counterparty's name.
    pub async fn list(&self) -> Result<Vec<Row>> {
        self.db.fetch(&self.schema().list_sql(), &[]).await
    }

    /// Lists the lines of one order.
    pub async fn items(&self, order_id: u64) -> Result<Vec<Row>> {
        self.db
            .fetch(&self.schema().items_sql(), &params![order_id])
            .await
    }

    /// Builds a draft from medicine quantities, pricing each line at the
    /// medicine's current list price.
    pub async fn draft_at_list_price(
        &self,
        party_id: u64,
        quantities: &[(u64, u32)],
    ) -> Result<OrderDraft> {
        let prices: HashMap<u64, Decimal> = self
            .db
            .fetch("SELECT MedicineID, Name, Price FROM Medicine ORDER BY Name", &[])
            .await?
            .iter()
            .map(|row| Ok((id_column(row, "MedicineID")?, decimal_column(row, "Price"))))
            .collect::<Result<_>>()?;

        let mut draft = OrderDraft::new(party_id);
        for &(medicine_id, quantity) in quantities {
            let price = prices.get(&medicine_id).copied().ok_or_else(|| {
                PharmaError::validation(format!("No medicine with id {medicine_id}"))
            })?;
            draft.push(medicine_id, quantity, price);
        }
        Ok(draft)
    }

    /// Writes an order as separate autocommitted statements.
    ///
    /// If an item insert fails, the header and any earlier items stay in the
    /// database. Use [`create_atomic`](Self::create_atomic) to avoid that.
    pub async fn create(&self, draft: &OrderDraft) -> Result<u64> {
        draft.validate()?;
        let schema = self.schema();

        let order_id = self
            .db
            .execute_and_get_id(&schema.header_sql(), &header_params(draft, today()))
            .await?
            .ok_or_else(|| missing_key(self.kind))?;

        let item_sql = schema.item_sql();
        for (n, line) in draft.lines.iter().enumerate() {
            if let Err(e) = self.db.execute(&item_sql, &item_params(order_id, line)).await {
                warn!(
                    "{} order #{} left with {} of {} lines: {}",
                    self.kind,
                    order_id,
                    n,
                    draft.lines.len(),
                    e
                );
                return Err(e);
            }
        }

        info!(
            "Created {} order #{} ({} lines, total {})",
            self.kind,
            order_id,
            draft.lines.len(),
            draft.total()
        );
        Ok(order_id)
    }

    /// Writes an order inside one transaction; on any failure nothing is
    /// kept.
    pub async fn create_atomic(&self, draft: &OrderDraft) -> Result<u64> {
        draft.validate()?;
        let mut tx = self.db.begin().await?;

        match self.write_in(&mut tx, draft).await {
            Ok(order_id) => {
                tx.commit().await?;
                info!(
                    "Created {} order #{} atomically ({} lines, total {})",
                    self.kind,
                    order_id,
                    draft.lines.len(),
                    draft.total()
                );
                Ok(order_id)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback_error);
                }
                Err(e)
            }
        }
    }

    async fn write_in<C: PooledConnection>(
        &self,
        tx: &mut Transaction<C>,
        draft: &OrderDraft,
    ) -> Result<u64> {
        let schema = self.schema();
        let order_id = tx
            .execute_and_get_id(&schema.header_sql(), &header_params(draft, today()))
            .await?
            .ok_or_else(|| missing_key(self.kind))?;

        let item_sql = schema.item_sql();
        for line in &draft.lines {
            tx.execute(&item_sql, &item_params(order_id, line)).await?;
        }
        Ok(order_id)
    }

    /// Deletes an order and returns rows removed.
    pub async fn delete(&self, order_id: u64) -> Result<u64> {
        let removed = self
            .db
            .execute(&self.schema().delete_sql(), &params![order_id])
            .await?;
        info!("Deleted {} order #{} ({} row(s))", self.kind, order_id, removed);
        Ok(removed)
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn header_params(draft: &OrderDraft, date: NaiveDate) -> Vec<Value> {
    params![date, draft.party_id, COMPLETED]
}

fn item_params(order_id: u64, line: &OrderLine) -> Vec<Value> {
    params![order_id, line.medicine_id, line.quantity, line.unit_price]
}

fn missing_key(kind: OrderKind) -> PharmaError {
    PharmaError::internal(format!(
        "Failed to create a {kind} order and retrieve its ID"
    ))
}
