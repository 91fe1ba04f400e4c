use std::fmt;

use fastnum::{UD64, UD128};
use serde::{Serialize, Serializer};

use super::{Asset, ClientOrderId, Kind, MarketIndex, MarketKey, OrderId, Pubkey, SeqNum};
use crate::num;

/// Trade reconstructed from a single fill event of a market's event queue.
///
/// Field names of the serialized form are shared by all downstream sinks.
#[derive(Clone, derive_more::Debug, PartialEq, Serialize)]
pub struct Trade {
    /// Sequence number of the fill event in the market's event queue.
    pub seq_num: SeqNum,

    #[serde(serialize_with = "as_string")]
    pub order_id: OrderId,

    #[serde(serialize_with = "as_string")]
    pub client_order_id: ClientOrderId,

    /// Unix timestamp the trade was indexed at.
    pub timestamp: i64,

    /// Owner of the open orders account the fill belongs to.
    #[serde(rename = "owner_pub_key")]
    pub owner: Pubkey,

    #[serde(rename = "underlying")]
    pub asset: Asset,

    pub market_index: MarketIndex,

    #[debug("{strike}")]
    #[serde(with = "num::decimal_str")]
    pub strike: UD64,

    pub kind: Kind,

    pub expiry_timestamp: u64,

    pub is_maker: bool,

    pub is_bid: bool,

    #[debug("{price}")]
    #[serde(with = "num::decimal_str")]
    pub price: UD128,

    #[debug("{size}")]
    #[serde(with = "num::decimal_str")]
    pub size: UD128,
}

/// Identity of a trade, unique across all markets and stable across
/// re-deliveries of the same event.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TradeKey {
    pub asset: Asset,
    pub market_index: MarketIndex,
    pub seq_num: SeqNum,
}

impl Trade {
    pub fn key(&self) -> TradeKey {
        TradeKey {
            asset: self.asset.clone(),
            market_index: self.market_index,
            seq_num: self.seq_num,
        }
    }

    pub fn market_key(&self) -> MarketKey {
        MarketKey::new(self.asset.clone(), self.market_index)
    }
}

impl fmt::Display for TradeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.asset, self.market_index, self.seq_num)
    }
}

fn as_string<T: fmt::Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
