//! Stored procedure calls.

use crate::db::{ConnectionPool, QueryExecutor, Row};
use crate::error::Result;
use crate::params;

pub struct Procedures<'a, P> {
    db: &'a QueryExecutor<P>,
}

impl<'a, P: ConnectionPool> Procedures<'a, P> {
    pub fn new(db: &'a QueryExecutor<P>) -> Self {
        Self { db }
    }

    /// Calls `GetMedicineDetailsByCategory` and returns its rows.
    ///
    /// A procedure call answers with the procedure's own result set followed
    /// by a status set; [`QueryExecutor::fetch`] keeps the first and drains
    /// the rest so the connection is reusable.
    pub async fn medicines_by_category(&self, category: &str) -> Result<Vec<Row>> {
        self.db
            .fetch("CALL GetMedicineDetailsByCategory(?)", &params![category])
            .await
    }
}
