//! PharmaDB - pharmacy inventory and order management over a pooled MySQL
//! query executor.
//!
//! This library exposes the core modules for the `pharmadb` binary and for
//! integration tests.

pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod output;
pub mod pharmacy;
