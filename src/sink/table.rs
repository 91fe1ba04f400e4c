use std::{collections::BTreeMap, path::PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{SinkError, TradeSink};
use crate::{
    persist,
    types::{Kind, MarketIndex, SeqNum, Trade},
};

/// Row of the trade table, keyed by the trade identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub key: String,
    pub seq_num: SeqNum,
    pub order_id: String,
    pub client_order_id: String,
    /// ISO-8601 indexing time.
    pub timestamp: String,
    pub owner_pub_key: String,
    pub underlying: String,
    pub market_index: MarketIndex,
    pub strike: String,
    pub kind: Kind,
    /// ISO-8601 expiry time.
    pub expiry_timestamp: String,
    pub is_maker: bool,
    pub is_bid: bool,
    pub price: String,
    pub size: String,
}

impl From<&Trade> for TableRow {
    fn from(trade: &Trade) -> Self {
        Self {
            key: trade.key().to_string(),
            seq_num: trade.seq_num,
            order_id: trade.order_id.to_string(),
            client_order_id: trade.client_order_id.to_string(),
            timestamp: iso8601(trade.timestamp),
            owner_pub_key: trade.owner.to_string(),
            underlying: trade.asset.to_string(),
            market_index: trade.market_index,
            strike: trade.strike.to_string(),
            kind: trade.kind,
            expiry_timestamp: iso8601(i64::try_from(trade.expiry_timestamp).unwrap_or(i64::MAX)),
            is_maker: trade.is_maker,
            is_bid: trade.is_bid,
            price: trade.price.to_string(),
            size: trade.size.to_string(),
        }
    }
}

fn iso8601(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Durable trade table stored as a single JSON file.
///
/// Writes upsert by trade identity, re-delivered trades replace their
/// previous rows instead of duplicating them. Every batch rewrites the whole
/// file, so the table suits local deployments with a bounded trade history.
#[derive(Debug)]
pub struct TableSink {
    path: PathBuf,
    rows: Mutex<BTreeMap<String, TableRow>>,
}

impl TableSink {
    pub const MAX_BATCH: usize = 25;

    /// Opens the table, loading the rows already stored at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let rows = match persist::read_optional(&path).await? {
            Some(bytes) => serde_json::from_slice::<Vec<TableRow>>(&bytes)?
                .into_iter()
                .map(|row| (row.key.clone(), row))
                .collect(),
            None => BTreeMap::new(),
        };

        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn get(&self, key: &str) -> Option<TableRow> {
        self.rows.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl TradeSink for TableSink {
    fn name(&self) -> &str {
        "table"
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

        // Rows are only visible once the file holding them is written.
        let mut rows = self.rows.lock().await;
        let mut updated = rows.clone();
        for trade in trades {
            let row = TableRow::from(trade);
            updated.insert(row.key.clone(), row);
        }
        let contents = serde_json::to_vec(&updated.values().collect::<Vec<_>>())?;
        persist::write_atomic(&self.path, &contents).await?;
        *rows = updated;

        debug!(trades = trades.len(), rows = rows.len(), "table rows written");
        Ok(())
    }
}
