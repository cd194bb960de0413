//! Integration tests for PharmaDB.

pub mod connection_test;
pub mod executor_test;
pub mod orders_test;
