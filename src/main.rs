//! txstorage - connection check and migration runner.

use clap::Parser;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use txstorage::config::{Command, Config};
use txstorage::db::{Context, connect_with_retry};
use txstorage::migrate::{DirSource, migrate_up};

/// Upper bound for a single migration run.
const MIGRATE_TIMEOUT: Duration = Duration::from_secs(600);

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    info!(
        uri = %config.connection.masked_uri(),
        "Starting txstorage v{}",
        env!("CARGO_PKG_VERSION")
    );

    let ctx = Context::background();
    let pool = match connect_with_retry(&ctx, &config.connection, &config.retry_policy()).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, suggestion = e.suggestion().unwrap_or(""), "Could not connect");
            return Err(e.into());
        }
    };

    let result = match &config.command {
        Command::Ping => {
            info!("Database is reachable");
            Ok(())
        }
        Command::Migrate { dir } => {
            let source = DirSource::new(dir);
            let ctx = ctx.with_timeout(MIGRATE_TIMEOUT);
            migrate_up(&ctx, &pool, &source).await.map(|applied| {
                info!(dir = %dir.display(), applied = applied, "Migration finished");
            })
        }
    };

    pool.close().await;

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        return Err(e.into());
    }

    Ok(())
}
