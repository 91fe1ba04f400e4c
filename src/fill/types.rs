//! Reconstruction outcome data structures.

use crate::types::{SeqNum, Trade};

/// Reason an event did not produce a trade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Cancel/out event, carries no trade.
    NotFill,

    /// Fill with zero paid or released quantity, price is undefined.
    ZeroQuantity,
}

/// Outcome of reconstructing a single event.
#[derive(Clone, Debug, PartialEq)]
pub enum Reconstructed {
    Trade(Trade),
    Skip(SkipReason),
}

/// Trades reconstructed from a batch of queue events.
#[derive(Clone, Debug, Default)]
pub struct TradeBatch {
    /// Trades in strictly increasing sequence number order.
    pub trades: Vec<Trade>,

    /// Number of non-fill events in the batch.
    pub non_fills: usize,

    /// Number of fill events skipped as invalid.
    pub invalid: usize,
}

impl TradeBatch {
    /// Returns true if there are no trades in this batch.
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// Returns the number of trades in this batch.
    pub fn len(&self) -> usize {
        self.trades.len()
    }

    /// Sequence numbers of the first and the last trade.
    pub fn seq_range(&self) -> Option<(SeqNum, SeqNum)> {
        Some((self.trades.first()?.seq_num, self.trades.last()?.seq_num))
    }
}
