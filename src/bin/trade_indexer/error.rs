//! Error types for the trade indexer.

use zeta_trade_indexer::{
    alert::TelegramError, checkpoint::CheckpointError, rpc::RpcError, sink::SinkError,
    types::PubkeyError,
};

use crate::config::ConfigError;

/// Main error type for the trade indexer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment configuration error: {0}")]
    EnvConfig(#[from] envy::Error),

    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(#[from] url::ParseError),

    #[error("Invalid program ID: {0}")]
    InvalidProgramId(#[from] PubkeyError),

    #[error("RPC client error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Sink setup error: {0}")]
    Sink(#[from] SinkError),

    #[error("Checkpoint load error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Telegram alerter error: {0}")]
    Telegram(#[from] TelegramError),

    #[error("{0} market cycles failed")]
    FailedCycles(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
