//! Configuration for the trade indexer.
//!
//! Configuration comes from two sources:
//! - Environment variables (via .env file or shell): connection details, timeouts, credentials
//! - CLI arguments: tracked markets and run mode

use std::{collections::HashSet, path::PathBuf, time::Duration};

use clap::Parser;
use url::Url;
use zeta_trade_indexer::{
    alert::Network,
    coordinator::Timeouts,
    num::Converter,
    rpc::Commitment,
    types::{MarketContext, MarketKey, Pubkey, PubkeyError},
};

/// Environment configuration (connection details, credentials).
#[derive(Debug, serde::Deserialize)]
pub struct EnvConfig {
    /// Solana JSON-RPC endpoint
    pub rpc_url: String,

    /// Exchange program owning the open orders accounts
    pub program_id: String,

    /// Network label of alerts
    #[serde(default)]
    pub network: Network,

    /// Commitment of account reads (default: finalized)
    #[serde(default)]
    pub commitment: Commitment,

    /// Interval between polls of every market (default: 1000ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub fetch_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub resolve_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub deliver_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub checkpoint_timeout_ms: u64,

    /// Directory of the checkpoint file and the local sinks (default: ./data)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Fixed-point decimals of prices (default: 6)
    #[serde(default = "default_price_decimals")]
    pub price_decimals: u8,

    /// Fixed-point decimals of sizes (default: 3)
    #[serde(default = "default_size_decimals")]
    pub size_decimals: u8,

    /// Telegram bot token, alerts are only logged without it
    pub telegram_token: Option<String>,

    pub telegram_chat_id: Option<String>,

    /// Dry run: trades are logged, nothing is delivered or persisted
    #[serde(default)]
    pub debug: bool,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_price_decimals() -> u8 {
    6
}

fn default_size_decimals() -> u8 {
    3
}

impl EnvConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn rpc_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.rpc_url)
    }

    pub fn program_id(&self) -> Result<Pubkey, PubkeyError> {
        self.program_id.parse()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            fetch: Duration::from_millis(self.fetch_timeout_ms),
            resolve: Duration::from_millis(self.resolve_timeout_ms),
            deliver: Duration::from_millis(self.deliver_timeout_ms),
            checkpoint: Duration::from_millis(self.checkpoint_timeout_ms),
        }
    }

    pub fn converters(&self) -> (Converter, Converter) {
        (
            Converter::new(self.price_decimals),
            Converter::new(self.size_decimals),
        )
    }

    /// Telegram token and chat, if both are configured.
    pub fn telegram(&self) -> Option<(&str, &str)> {
        Some((self.telegram_token.as_deref()?, self.telegram_chat_id.as_deref()?))
    }
}

/// CLI arguments.
#[derive(Debug, Parser)]
#[command(name = "trade-indexer")]
#[command(about = "Indexes trades from event queues of the configured markets")]
pub struct CliConfig {
    /// JSON file with the list of markets to index
    #[arg(long)]
    pub markets: PathBuf,

    /// Run a single pass over all markets and exit
    #[arg(long)]
    pub once: bool,

    /// Log reconstructed trades instead of delivering them, overrides DEBUG
    #[arg(long)]
    pub dry_run: bool,
}

/// Parses and validates the markets file.
pub fn parse_markets(bytes: &[u8]) -> Result<Vec<MarketContext>, ConfigError> {
    let markets: Vec<MarketContext> = serde_json::from_slice(bytes)?;
    if markets.is_empty() {
        return Err(ConfigError::NoMarkets);
    }

    let mut seen = HashSet::new();
    for market in &markets {
        if !seen.insert(market.key()) {
            return Err(ConfigError::DuplicateMarket(market.key()));
        }
    }
    Ok(markets)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read markets file: {0}")]
    MarketsFile(#[from] std::io::Error),

    #[error("Invalid markets file: {0}")]
    InvalidMarkets(#[from] serde_json::Error),

    #[error("Markets file lists no markets")]
    NoMarkets,

    #[error("Market {0} is listed more than once")]
    DuplicateMarket(MarketKey),
}
