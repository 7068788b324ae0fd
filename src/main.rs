use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use window_counter::config::{CounterConfig, LoggingConfig};
use window_counter::ratelimit::{constant_incrementer, parse_period, WindowCounter};
use window_counter::store::{self, Sweeper};

#[derive(Parser, Debug)]
#[command(name = "window-counter")]
#[command(version, about = "Window-bucketed atomic counters for distributed rate limiting")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Increment a counter once and print the result as JSON
    Increment {
        /// Opaque counter key
        #[arg(long)]
        key: String,

        /// Window length, e.g. 1s, 15m, 1h, 1d
        #[arg(long, default_value = "1m")]
        period: String,

        /// Increment amount, overriding the configured rate increment
        #[arg(long)]
        weight: Option<f64>,
    },
    /// Purge expired counters periodically until interrupted
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CounterConfig::from_file(path)?,
        None => CounterConfig::default(),
    };

    init_tracing(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting window counter");

    let store = store::connect(&config.store).await?;

    match cli.command {
        Command::Increment { key, period, weight } => {
            let period = parse_period(&period)?;
            let incrementer = weight
                .map(constant_incrementer)
                .or_else(|| config.rate_incrementer());

            let counter = WindowCounter::new(store);
            let result = counter.increment(&key, period, incrementer.as_deref()).await?;
            println!("{}", serde_json::to_string(&result)?);
        }
        Command::Sweep => {
            let sweeper = Sweeper::from_config(store, &config.sweeper)?;
            sweeper.run_until(shutdown_signal()).await;
        }
    }

    Ok(())
}

/// Initialize the tracing subscriber. `RUST_LOG` takes precedence over the config.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
