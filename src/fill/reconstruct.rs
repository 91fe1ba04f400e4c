//! Trade reconstruction from raw fill events.

use fastnum::UD128;

use super::types::{Reconstructed, SkipReason};
use crate::{
    num,
    queue::{RawEvent, SequencedEvent},
    types::{MarketContext, Pubkey, Trade},
};

/// Trade builder - pure logic, no async.
#[derive(Clone, Copy, Debug)]
pub struct TradeBuilder {
    price_converter: num::Converter,
    size_converter: num::Converter,
}

impl TradeBuilder {
    pub fn new(price_converter: num::Converter, size_converter: num::Converter) -> Self {
        Self {
            price_converter,
            size_converter,
        }
    }

    /// Returns why the event can not produce a trade, if it can not.
    pub fn skip_reason(&self, event: &RawEvent) -> Option<SkipReason> {
        if !event.flags.fill {
            Some(SkipReason::NotFill)
        } else if event.native_qty_paid == 0 || event.native_qty_released == 0 {
            Some(SkipReason::ZeroQuantity)
        } else {
            None
        }
    }

    /// Derives price and size from the native quantities of a fill.
    ///
    /// Bid side pays quote and receives base lots, ask side the other way around.
    /// Maker flag does not change the derivation. Fixed-point precision is
    /// applied to the ratio, not to the operands.
    pub fn price_and_size(&self, event: &RawEvent) -> Option<(UD128, UD128)> {
        let paid = event.native_qty_paid;
        let released = event.native_qty_released;
        let (price, size) = if event.flags.bid {
            (num::ratio(paid, released)?, released)
        } else {
            (num::ratio(released, paid)?, paid)
        };
        if size == 0 {
            return None;
        }
        Some((
            self.price_converter.scale(price),
            self.size_converter.from_native(size),
        ))
    }

    /// Reconstructs a trade from a fill event of the market and its resolved owner.
    pub fn reconstruct(
        &self,
        event: &SequencedEvent,
        owner: Pubkey,
        market: &MarketContext,
        timestamp: i64,
    ) -> Reconstructed {
        let raw = &event.event;
        if let Some(reason) = self.skip_reason(raw) {
            return Reconstructed::Skip(reason);
        }
        let Some((price, size)) = self.price_and_size(raw) else {
            return Reconstructed::Skip(SkipReason::ZeroQuantity);
        };

        Reconstructed::Trade(Trade {
            seq_num: event.seq_num,
            order_id: raw.order_id,
            client_order_id: raw.client_order_id,
            timestamp,
            owner,
            asset: market.asset.clone(),
            market_index: market.market_index,
            strike: market.strike,
            kind: market.kind,
            expiry_timestamp: market.expiry_timestamp,
            is_maker: raw.flags.maker,
            is_bid: raw.flags.bid,
            price,
            size,
        })
    }
}
