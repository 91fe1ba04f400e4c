use std::path::PathBuf;

use async_trait::async_trait;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use tracing::debug;

use super::{SinkError, TradeSink};
use crate::types::Trade;

/// Append-only delivery stream of newline delimited JSON trades.
///
/// Consumers must deduplicate by trade identity, a chunk is appended again
/// when the cycle delivering it is retried.
#[derive(Debug)]
pub struct StreamSink {
    path: PathBuf,
    write: Mutex<()>,
}

impl StreamSink {
    pub const MAX_BATCH: usize = 500;

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }
}

#[async_trait]
impl TradeSink for StreamSink {
    fn name(&self) -> &str {
        "stream"
    }

    fn max_batch(&self) -> usize {
        Self::MAX_BATCH
    }

    async fn put_batch(&self, trades: &[Trade]) -> Result<(), SinkError> {
        if trades.len() > Self::MAX_BATCH {
            return Err(SinkError::BatchTooLarge {
                len: trades.len(),
                max: Self::MAX_BATCH,
            });
        }

        let mut buf = Vec::with_capacity(trades.len() * 384);
        for trade in trades {
            serde_json::to_writer(&mut buf, trade)?;
            buf.push(b'\n');
        }

        let _guard = self.write.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;

        debug!(records = trades.len(), bytes = buf.len(), "stream records appended");
        Ok(())
    }
}
