use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_session_manager::{
    cli::{execute_command, FeedCommands},
    config::{Config, LogFormat, StoreKind},
    request::HttpFeedClient,
    scheduler::TimeBasedScheduler,
    store::{MemoryStore, SqliteStore, Store},
    FeedSessionManager,
};

/// Inspect and refresh the local feed.
#[derive(Parser, Debug)]
#[command(name = "feed-session", version, about)]
struct Cli {
    #[command(subcommand)]
    command: FeedCommands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Feed session manager starting..."
    );

    // Initialize store
    let store: Arc<dyn Store> = match config.database.kind {
        StoreKind::Sqlite => match SqliteStore::new(&config.database).await {
            Ok(s) => {
                info!(path = %config.database.path.display(), "Database initialized");
                Arc::new(s)
            }
            Err(e) => {
                error!(error = %e, "Failed to initialize database");
                return Err(e.into());
            }
        },
        StoreKind::Memory => {
            info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // Initialize feed client
    let client = match HttpFeedClient::new(config.request.clone()) {
        Ok(c) => {
            info!(base_url = %c.base_url(), "Feed client initialized");
            Arc::new(c)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize feed client");
            return Err(e.into());
        }
    };

    let scheduler = Arc::new(TimeBasedScheduler::new(&config.scheduler));
    let manager = FeedSessionManager::new(
        config.session.clone(),
        store,
        scheduler,
        client.clone(),
        client,
    );

    let result = execute_command(cli.command, &manager).await;
    manager.shutdown();

    if result.exit_code == 0 {
        println!("{}", result.message);
    } else {
        eprintln!("{}", result.message);
        std::process::exit(result.exit_code);
    }
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
