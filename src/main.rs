//! PharmaDB - pharmacy inventory and order management.

use pharmadb::cli::Cli;
use pharmadb::commands::{self, CommandContext};
use pharmadb::config::Config;
use pharmadb::db::{MySqlPool, QueryExecutor};
use pharmadb::error::Result;
use pharmadb::logging;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    // A missing .env file is fine; real environment variables still apply.
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse_args();
    if cli.log_file {
        logging::init_file_logging();
    } else {
        logging::init_stderr_logging();
    }
    if let Ok(path) = dotenv {
        debug!("Loaded environment from {}", path.display());
    }

    let log_file = cli.log_file;
    if let Err(e) = run(cli).await {
        error!("{}: {}", e.category(), e);
        if log_file {
            eprintln!("{}: {}", e.category(), e);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config_path();
    debug!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;
    config.pool.validate()?;

    // Precedence: flags / --url, then config file, then DB_* variables.
    let connection = config.resolve_connection(&cli.connection_overrides()?, |key| {
        std::env::var(key).ok()
    })?;
    let target = connection.display_string();
    info!("Connecting to {}", target);

    let pool = MySqlPool::connect(&connection, &config.pool).await?;
    let db = QueryExecutor::new(pool).with_retry_delay(config.pool.retry_delay());

    let ctx = CommandContext {
        db: &db,
        format: cli.output_format(),
        target: &target,
    };
    let result = commands::dispatch(&ctx, cli.command).await;

    db.close().await;
    result
}
