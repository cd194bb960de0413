//! Command handlers for PharmaDB.

pub mod catalog;
pub mod orders;
pub mod reports;

use crate::error::{PharmaError, Result};

/// Turns "0 rows changed" for a keyed statement into a not-found error.
fn require_change(changed: u64, what: &str, id: u64) -> Result<u64> {
    if changed == 0 {
        Err(PharmaError::validation(format!("No {what} #{id} was changed")))
    } else {
        Ok(changed)
    }
}
