//! Trade reconstruction from decoded event queue records.
//!
//! Every fill record of the queue describes one side of a match: the owner
//! paid some native quantity and got another one released. Price and size are
//! derived from the two quantities depending on the side, then normalized to
//! decimals and combined with the market context into a [`Trade`].
//!
//! # Architecture
//!
//! The module separates pure processing logic from async I/O:
//!
//! - [`TradeBuilder`] - Pure, synchronous trade construction from a single record
//! - [`reconstruct_batch`] - Async owner resolution and reconstruction of
//!   all records read in one cycle
//!
//! [`Trade`]: crate::types::Trade

mod batch;
mod reconstruct;
mod types;

pub use batch::reconstruct_batch;
pub use reconstruct::TradeBuilder;
pub use types::{Reconstructed, SkipReason, TradeBatch};
