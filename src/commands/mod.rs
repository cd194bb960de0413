//! Command dispatch for PharmaDB.
//!
//! Maps parsed subcommands onto the pharmacy repository and prints the
//! results. Handlers are generic over the pool so they run against the mock
//! pool in tests.

pub mod handlers;

use crate::cli::Command;
use crate::db::{ConnectionPool, QueryExecutor};
use crate::error::Result;
use crate::output::OutputFormat;

/// Context provided to command handlers.
pub struct CommandContext<'a, P> {
    pub db: &'a QueryExecutor<P>,
    pub format: OutputFormat,
    /// Display string of the database in use (never includes a password).
    pub target: &'a str,
}

/// Runs one subcommand to completion.
pub async fn dispatch<P: ConnectionPool>(ctx: &CommandContext<'_, P>, command: Command) -> Result<()> {
    match command {
        Command::Status => handlers::reports::status(ctx).await,
        Command::Analytics => handlers::reports::analytics(ctx).await,
        Command::Medicines { action } => handlers::catalog::medicines(ctx, action).await,
        Command::Suppliers { action } => handlers::catalog::suppliers(ctx, action).await,
        Command::Customers { action } => handlers::catalog::customers(ctx, action).await,
        Command::Orders { kind, action } => {
            handlers::orders::orders(ctx, kind.into(), action).await
        }
        Command::Procedure { call } => handlers::reports::procedure(ctx, call).await,
        Command::Sandbox { action } => handlers::reports::sandbox(ctx, action).await,
        Command::Role { role, id } => handlers::reports::role(ctx, role.into(), id).await,
    }
}
