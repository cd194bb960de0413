//! Catalog tables: medicines, suppliers and customers.

use super::id_column;
use crate::db::{ConnectionPool, QueryExecutor, Row, Value};
use crate::error::{PharmaError, Result};
use crate::params;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

/// Describes one editable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrudTable {
    /// Name used in messages ("medicine", "supplier", ...).
    pub label: &'static str,
    pub table: &'static str,
    pub primary_key: &'static str,
    /// Column shown when picking a record.
    pub display_column: &'static str,
    pub list_sql: &'static str,
    pub insert_sql: &'static str,
    /// Update statement; its last parameter is the primary key.
    pub update_sql: &'static str,
}

pub const MEDICINES: CrudTable = CrudTable {
    label: "medicine",
    table: "Medicine",
    primary_key: "MedicineID",
    display_column: "Name",
    list_sql: "SELECT m.MedicineID, m.Name, m.Manufacturer, m.Price, m.StockQty, m.ReorderLevel, \
               c.Name AS Category FROM Medicine m \
               LEFT JOIN Category c ON m.CategoryID = c.CategoryID ORDER BY m.Name",
    insert_sql: "INSERT INTO Medicine (Name, Manufacturer, Price, StockQty, ReorderLevel, CategoryID) \
                 VALUES (?, ?, ?, ?, ?, ?)",
    update_sql: "UPDATE Medicine SET Price = ?, StockQty = ? WHERE MedicineID = ?",
};

pub const SUPPLIERS: CrudTable = CrudTable {
    label: "supplier",
    table: "Supplier",
    primary_key: "SupplierID",
    display_column: "Name",
    list_sql: "SELECT * FROM Supplier ORDER BY Name",
    insert_sql: "INSERT INTO Supplier (Name, Contact, Address, Email, Phone) VALUES (?, ?, ?, ?, ?)",
    update_sql: "UPDATE Supplier SET Contact = ?, Phone = ? WHERE SupplierID = ?",
};

pub const CUSTOMERS: CrudTable = CrudTable {
    label: "customer",
    table: "Customer",
    primary_key: "CustomerID",
    display_column: "Name",
    list_sql: "SELECT * FROM Customer ORDER BY Name",
    insert_sql: "INSERT INTO Customer (Name, Email, Phone, Address) VALUES (?, ?, ?, ?)",
    update_sql: "UPDATE Customer SET Phone = ?, Address = ? WHERE CustomerID = ?",
};

/// A record's key and display name, for pickers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub id: u64,
    pub name: String,
}

impl Choice {
    fn from_row(row: &Row, key: &str, display: &str) -> Result<Self> {
        Ok(Self {
            id: id_column(row, key)?,
            name: row
                .get(display)
                .map(Value::to_display_string)
                .unwrap_or_default(),
        })
    }
}

/// A new row for one of the catalog tables.
pub trait NewRecord {
    const TABLE: &'static CrudTable;

    /// Values in the order of the table's insert statement.
    fn params(&self) -> Vec<Value>;
}

/// An edit to the mutable columns of an existing row.
pub trait RecordUpdate {
    const TABLE: &'static CrudTable;

    /// Values in the order of the table's update statement, key excluded.
    fn params(&self) -> Vec<Value>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMedicine {
    pub name: String,
    pub manufacturer: Option<String>,
    pub price: Decimal,
    pub stock_qty: i64,
    pub reorder_level: i64,
    pub category_id: Option<u64>,
}

impl NewRecord for NewMedicine {
    const TABLE: &'static CrudTable = &MEDICINES;

    fn params(&self) -> Vec<Value> {
        params![
            self.name.as_str(),
            self.manufacturer.clone(),
            self.price,
            self.stock_qty,
            self.reorder_level,
            self.category_id,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MedicineUpdate {
    pub price: Decimal,
    pub stock_qty: i64,
}

impl RecordUpdate for MedicineUpdate {
    const TABLE: &'static CrudTable = &MEDICINES;

    fn params(&self) -> Vec<Value> {
        params![self.price, self.stock_qty]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSupplier {
    pub name: String,
    pub contact: Option<String>,
    pub address: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl NewRecord for NewSupplier {
    const TABLE: &'static CrudTable = &SUPPLIERS;

    fn params(&self) -> Vec<Value> {
        params![
            self.name.as_str(),
            self.contact.clone(),
            self.address.clone(),
            self.email.clone(),
            self.phone.clone(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplierUpdate {
    pub contact: Option<String>,
    pub phone: Option<String>,
}

impl RecordUpdate for SupplierUpdate {
    const TABLE: &'static CrudTable = &SUPPLIERS;

    fn params(&self) -> Vec<Value> {
        params![self.contact.clone(), self.phone.clone()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomer {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

impl NewRecord for NewCustomer {
    const TABLE: &'static CrudTable = &CUSTOMERS;

    fn params(&self) -> Vec<Value> {
        params![
            self.name.as_str(),
            self.email.clone(),
            self.phone.clone(),
            self.address.clone(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerUpdate {
    pub phone: Option<String>,
    pub address: Option<String>,
}

impl RecordUpdate for CustomerUpdate {
    const TABLE: &'static CrudTable = &CUSTOMERS;

    fn params(&self) -> Vec<Value> {
        params![self.phone.clone(), self.address.clone()]
    }
}

impl CrudTable {
    /// Returns every row in the table's listing order.
    pub async fn list<P: ConnectionPool>(&self, db: &QueryExecutor<P>) -> Result<Vec<Row>> {
        db.fetch(self.list_sql, &[]).await
    }

    /// Returns key and display name of every row, ordered by name.
    pub async fn choices<P: ConnectionPool>(&self, db: &QueryExecutor<P>) -> Result<Vec<Choice>> {
        let sql = format!(
            "SELECT {pk}, {display} FROM {table} ORDER BY {display}",
            pk = self.primary_key,
            display = self.display_column,
            table = self.table,
        );
        db.fetch(&sql, &[])
            .await?
            .iter()
            .map(|row| Choice::from_row(row, self.primary_key, self.display_column))
            .collect()
    }

    /// Fetches one full row by key.
    pub async fn get<P: ConnectionPool>(&self, db: &QueryExecutor<P>, id: u64) -> Result<Option<Row>> {
        let sql = format!("SELECT * FROM {} WHERE {} = ?", self.table, self.primary_key);
        Ok(db.fetch(&sql, &params![id]).await?.into_iter().next())
    }

    /// Inserts a record and returns its generated key.
    pub async fn insert<P, R>(&self, db: &QueryExecutor<P>, record: &R) -> Result<u64>
    where
        P: ConnectionPool,
        R: NewRecord,
    {
        self.check_table(R::TABLE)?;
        let id = db
            .execute_and_get_id(self.insert_sql, &record.params())
            .await?
            .ok_or_else(|| {
                PharmaError::internal(format!("No key was generated for the new {}", self.label))
            })?;
        info!("Added {} #{}", self.label, id);
        Ok(id)
    }

    /// Applies an update to the row with key `id` and returns rows changed.
    pub async fn update<P, U>(&self, db: &QueryExecutor<P>, id: u64, update: &U) -> Result<u64>
    where
        P: ConnectionPool,
        U: RecordUpdate,
    {
        self.check_table(U::TABLE)?;
        let mut params = update.params();
        params.push(Value::from(id));
        let changed = db.execute(self.update_sql, &params).await?;
        info!("Updated {} #{} ({} row(s))", self.label, id, changed);
        Ok(changed)
    }

    /// Deletes the row with key `id` and returns rows removed.
    pub async fn delete<P: ConnectionPool>(&self, db: &QueryExecutor<P>, id: u64) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE {} = ?", self.table, self.primary_key);
        let removed = db.execute(&sql, &params![id]).await?;
        info!("Deleted {} #{} ({} row(s))", self.label, id, removed);
        Ok(removed)
    }

    fn check_table(&self, expected: &CrudTable) -> Result<()> {
        if self.table == expected.table {
            Ok(())
        } else {
            Err(PharmaError::internal(format!(
                "{} record used with the {} table",
                expected.table, self.table
            )))
        }
    }
}

/// Lists medicine categories for pickers.
pub async fn categories<P: ConnectionPool>(db: &QueryExecutor<P>) -> Result<Vec<Choice>> {
    db.fetch("SELECT CategoryID, Name FROM Category ORDER BY Name", &[])
        .await?
        .iter()
        .map(|row| Choice::from_row(row, "CategoryID", "Name"))
        .collect()
}
