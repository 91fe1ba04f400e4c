use std::fmt;

use crate::{
    queue::DecodeError, resolver::ResolveError, sink::DeliveryError, source::SourceError,
    types::Pubkey,
};

/// External call bounded by a timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Fetch,
    Resolve,
    Deliver,
    Checkpoint,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Fetch => "account fetch",
            Operation::Resolve => "owner resolution",
            Operation::Deliver => "sink delivery",
            Operation::Checkpoint => "checkpoint save",
        })
    }
}

/// Error failing a single market's ingestion cycle.
///
/// None of them is fatal to the process, the next scheduled cycle
/// starts over from the last committed checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("fetch error: {0}")]
    Fetch(#[from] SourceError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("owner resolution error, handle: {handle}: {source}")]
    Resolution {
        handle: Pubkey,
        #[source]
        source: ResolveError,
    },

    #[error("delivery error: {0}")]
    Sink(#[from] DeliveryError),

    #[error("{0} timed out")]
    Timeout(Operation),
}

impl IngestError {
    /// Short machine readable name of the condition for logs and alerts.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Fetch(_) => "fetch_error",
            IngestError::Decode(_) => "decode_error",
            IngestError::Resolution { .. } => "resolution_error",
            IngestError::Sink(_) => "sink_error",
            IngestError::Timeout(_) => "timeout_error",
        }
    }
}
