mod market;
mod pubkey;
mod trade;

pub use market::{Asset, Kind, MarketContext, MarketKey};
pub use pubkey::{Pubkey, PubkeyError};
pub use trade::{Trade, TradeKey};

/// Index of the market within the exchange program.
pub type MarketIndex = u32;

/// Monotonic event queue sequence number.
pub type SeqNum = u64;

/// Exchange assigned order ID.
pub type OrderId = u128;

/// Client supplied order ID.
pub type ClientOrderId = u64;
