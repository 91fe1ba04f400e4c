//! Trade delivery to downstream systems.
//!
//! Every [`TradeSink`] accepts batches up to its own maximum size. The
//! [`SinkFanout`] chunks a cycle's trades per sink, delivers to all sinks
//! concurrently and to the chunks of one sink sequentially, in sequence number
//! order. Every chunk is attempted even after an earlier one failed, failures
//! are reported per chunk.

mod stream;
mod table;

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use itertools::Itertools;

use crate::types::{SeqNum, Trade};

pub use stream::StreamSink;
pub use table::{TableRow, TableSink};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("batch of {len} trades exceeds maximum of {max}")]
    BatchTooLarge { len: usize, max: usize },

    #[error("chunk delivery timed out")]
    Timeout,

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Downstream system receiving trades.
///
/// Implementations must be idempotent by [`crate::types::TradeKey`]:
/// the same trade may be delivered again after a partial failure.
#[async_trait]
pub trait TradeSink: Send + Sync {
    /// Name of the sink in logs and errors.
    fn name(&self) -> &str;

    /// Maximum number of trades accepted by a single [`TradeSink::put_batch`] call.
    fn max_batch(&self) -> usize;

    async fn put_batch(&self, trades: &[Trade]) -> Result<(), SinkError>;
}

/// Failed delivery of a single chunk to a single sink.
#[derive(Debug)]
pub struct ChunkFailure {
    pub sink: String,
    pub chunk: usize,
    pub first_seq: SeqNum,
    pub last_seq: SeqNum,
    pub error: SinkError,
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] seq {}..={}: {}",
            self.sink, self.chunk, self.first_seq, self.last_seq, self.error
        )
    }
}

/// Delivery where at least one chunk failed in at least one sink.
#[derive(Debug)]
pub struct DeliveryError {
    /// Total number of chunks attempted across all sinks.
    pub chunks: usize,
    pub failures: Vec<ChunkFailure>,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} chunks failed; {}",
            self.failures.len(),
            self.chunks,
            self.failures.iter().join("; ")
        )
    }
}

impl std::error::Error for DeliveryError {}

/// Successful delivery summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub trades: usize,
    pub chunks: usize,
}

/// Delivers trades to every configured sink.
#[derive(Clone)]
pub struct SinkFanout {
    sinks: Vec<Arc<dyn TradeSink>>,
    chunk_timeout: Duration,
}

impl fmt::Debug for SinkFanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkFanout")
            .field("sinks", &self.names())
            .field("chunk_timeout", &self.chunk_timeout)
            .finish()
    }
}

impl SinkFanout {
    pub fn new(chunk_timeout: Duration) -> Self {
        Self {
            sinks: Vec::new(),
            chunk_timeout,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn TradeSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Delivers sorted trades to all sinks, succeeds only if every chunk of
    /// every sink was accepted.
    pub async fn deliver(&self, trades: &[Trade]) -> Result<DeliveryReport, DeliveryError> {
        if trades.is_empty() {
            return Ok(DeliveryReport::default());
        }

        let results = join_all(
            self.sinks
                .iter()
                .map(|sink| deliver_chunks(sink.as_ref(), trades, self.chunk_timeout)),
        )
        .await;

        let mut chunks = 0;
        let mut failures = Vec::new();
        for (sink_chunks, sink_failures) in results {
            chunks += sink_chunks;
            failures.extend(sink_failures);
        }

        if failures.is_empty() {
            Ok(DeliveryReport {
                trades: trades.len(),
                chunks,
            })
        } else {
            Err(DeliveryError { chunks, failures })
        }
    }
}

async fn deliver_chunks(
    sink: &dyn TradeSink,
    trades: &[Trade],
    timeout: Duration,
) -> (usize, Vec<ChunkFailure>) {
    let mut chunks = 0;
    let mut failures = Vec::new();

    for (chunk, batch) in trades.chunks(sink.max_batch().max(1)).enumerate() {
        chunks += 1;
        let result = match tokio::time::timeout(timeout, sink.put_batch(batch)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout),
        };
        if let Err(error) = result {
            failures.push(ChunkFailure {
                sink: sink.name().to_string(),
                chunk,
                first_seq: batch[0].seq_num,
                last_seq: batch[batch.len() - 1].seq_num,
                error,
            });
        }
    }

    (chunks, failures)
}
