use std::fmt;

use fastnum::UD64;
use serde::{Deserialize, Serialize};

use super::{MarketIndex, Pubkey};
use crate::num;

/// Underlying asset symbol, e.g. `SOL`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asset(String);

impl Asset {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a tracked market: checkpoints and fetch locks are kept per key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarketKey {
    pub asset: Asset,
    pub market_index: MarketIndex,
}

impl MarketKey {
    pub fn new(asset: Asset, market_index: MarketIndex) -> Self {
        Self {
            asset,
            market_index,
        }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.asset, self.market_index)
    }
}

/// Kind of the instrument traded on a market.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Call,
    Put,
    Future,
    Perp,
}

/// Static metadata of a market, resolved outside of the indexer and
/// attached to every trade reconstructed from its event queue.
#[derive(Clone, derive_more::Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub asset: Asset,

    pub market_index: MarketIndex,

    pub kind: Kind,

    /// Strike price, zero for futures and perpetuals.
    #[debug("{strike}")]
    #[serde(default = "zero_strike", with = "num::decimal_str")]
    pub strike: UD64,

    /// Expiry as unix timestamp, zero for perpetuals.
    #[serde(default)]
    pub expiry_timestamp: u64,

    /// Address of the market's event queue account.
    pub event_queue: Pubkey,
}

fn zero_strike() -> UD64 {
    UD64::ZERO
}

impl MarketContext {
    pub fn key(&self) -> MarketKey {
        MarketKey::new(self.asset.clone(), self.market_index)
    }
}
