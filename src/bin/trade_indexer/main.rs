//! Trade indexer.
//!
//! This binary polls event queues of the configured markets and delivers
//! reconstructed trades to the local table and stream sinks.

mod config;
mod error;
mod indexer;

use std::process::exit;

use clap::Parser;
use tracing::error;

use config::{CliConfig, EnvConfig};
use indexer::Indexer;

#[tokio::main]
async fn main() {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    // Parse environment configuration
    let env_config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to parse environment configuration: {}", e);
            exit(1);
        }
    };

    // Parse CLI arguments
    let cli_config = CliConfig::parse();

    // Set up logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env());
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let indexer = match Indexer::try_new(env_config, cli_config).await {
        Ok(indexer) => indexer,
        Err(e) => {
            error!(%e, "Failed to start trade indexer");
            exit(1);
        }
    };

    if let Err(e) = indexer.run().await {
        error!(%e, "Trade indexer encountered an error, shutting down");
        exit(1);
    }
}
