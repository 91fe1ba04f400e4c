//! Zeta trade indexer.
//!
//! # Overview
//!
//! Incremental ingestion of trades from Serum-style event queue accounts.
//!
//! Every tracked market's event queue is polled on a fixed interval. The
//! records appended since the market's checkpoint are decoded with
//! [`queue::decode`], fills are turned into [`types::Trade`]s by
//! [`fill::reconstruct_batch`], delivered to all sinks by [`sink::SinkFanout`]
//! and only then the checkpoint advances. [`coordinator::Coordinator`] drives
//! the cycles and makes sure a market never runs two of them at once.
//!
//! Delivery is at-least-once: a cycle failing after some chunks were accepted
//! is delivered again from the unchanged checkpoint, sinks deduplicate by
//! [`types::TradeKey`].
//!
//! # Limitations/follow-ups
//!
//! * A single indexer instance per deployment is assumed, checkpoints are
//!   not coordinated between processes.
//!
//! * Records overwritten in the ring before being read are lost, the gap is
//!   only reported.
//!
//! # Testing
//!
//! [`testing`] module provides an event queue account builder and in-memory
//! fakes of the account source, owner resolver, sinks, checkpoint store and
//! alerter.
//!
//! See `./tests` for end-to-end cycle scenarios.

pub mod alert;
pub mod checkpoint;
pub mod coordinator;
pub mod error;
pub mod fill;
pub mod num;
mod persist;
pub mod queue;
pub mod resolver;
pub mod retry;
pub mod rpc;
pub mod sink;
pub mod source;
pub mod testing;
pub mod types;
