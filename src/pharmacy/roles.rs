//! Read-only views scoped to a pharmacist, customer or supplier.

use crate::db::{ConnectionPool, QueryExecutor, Row};
use crate::error::{PharmaError, Result};
use crate::params;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Pharmacist,
    Customer,
    Supplier,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Pharmacist => write!(f, "pharmacist"),
            Role::Customer => write!(f, "customer"),
            Role::Supplier => write!(f, "supplier"),
        }
    }
}

/// One titled table in a role's view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleSection {
    pub title: String,
    pub rows: Vec<Row>,
}

impl RoleSection {
    fn new(title: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            title: title.into(),
            rows,
        }
    }
}

pub struct RoleViews<'a, P> {
    db: &'a QueryExecutor<P>,
}

impl<'a, P: ConnectionPool> RoleViews<'a, P> {
    pub fn new(db: &'a QueryExecutor<P>) -> Self {
        Self { db }
    }

    /// Builds everything `role` gets to see. Customers and suppliers only
    /// see their own history, so they need `id`.
    pub async fn view(&self, role: Role, id: Option<u64>) -> Result<Vec<RoleSection>> {
        match role {
            Role::Pharmacist => Ok(vec![
                RoleSection::new("Full Inventory Status", self.inventory().await?),
                RoleSection::new("All Sales Orders", self.all_sales().await?),
            ]),
            Role::Customer => {
                let customer_id = require_id(role, id)?;
                Ok(vec![
                    RoleSection::new(
                        "Available Medicines for Purchase",
                        self.available_medicines().await?,
                    ),
                    RoleSection::new(
                        format!("Order History for customer #{customer_id}"),
                        self.customer_history(customer_id).await?,
                    ),
                ])
            }
            Role::Supplier => {
                let supplier_id = require_id(role, id)?;
                Ok(vec![RoleSection::new(
                    format!("Purchase Order History for supplier #{supplier_id}"),
                    self.supplier_history(supplier_id).await?,
                )])
            }
        }
    }

    pub async fn inventory(&self) -> Result<Vec<Row>> {
        self.db
            .fetch(
                "SELECT Name, Manufacturer, Price, StockQty, ReorderLevel FROM Medicine ORDER BY Name",
                &[],
            )
            .await
    }

    pub async fn all_sales(&self) -> Result<Vec<Row>> {
        self.db
            .fetch(
                "SELECT * FROM Customer_Order_History_View ORDER BY OrderDate DESC",
                &[],
            )
            .await
    }

    pub async fn available_medicines(&self) -> Result<Vec<Row>> {
        self.db
            .fetch("SELECT * FROM Available_Medicines_View", &[])
            .await
    }

    pub async fn customer_history(&self, customer_id: u64) -> Result<Vec<Row>> {
        self.db
            .fetch(
                "SELECT OrderID, OrderDate, MedicineName, Quantity, SellingPrice, LineTotal \
                 FROM Customer_Order_History_View WHERE CustomerID = ? ORDER BY OrderDate DESC",
                &params![customer_id],
            )
            .await
    }

    pub async fn supplier_history(&self, supplier_id: u64) -> Result<Vec<Row>> {
        self.db
            .fetch(
                "SELECT OrderID, OrderDate, MedicineName, Quantity, CostPrice, LineTotal \
                 FROM Supplier_Purchase_History_View WHERE SupplierID = ? ORDER BY OrderDate DESC",
                &params![supplier_id],
            )
            .await
    }
}

fn require_id(role: Role, id: Option<u64>) -> Result<u64> {
    id.ok_or_else(|| PharmaError::validation(format!("The {role} view needs an id")))
}
