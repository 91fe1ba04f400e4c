//! Last committed sequence number per market.
//!
//! Checkpoints are loaded once at startup, advanced in memory by the
//! coordinator after a successful delivery and persisted asynchronously by
//! [`CheckpointWriter`].

mod writer;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    persist,
    types::{Asset, MarketIndex, MarketKey, SeqNum},
};

pub use writer::{CheckpointWriter, WriterPolicy};

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid checkpoint file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid market index in checkpoint file: {asset}/{index}")]
    InvalidMarketIndex { asset: String, index: String },

    #[error("checkpoint save timed out")]
    Timeout,
}

/// Mapping from market to its last committed sequence number.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Checkpoints(BTreeMap<MarketKey, SeqNum>);

impl Checkpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, market: &MarketKey) -> Option<SeqNum> {
        self.0.get(market).copied()
    }

    pub fn set(&mut self, market: MarketKey, seq_num: SeqNum) {
        self.0.insert(market, seq_num);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MarketKey, SeqNum)> {
        self.0.iter().map(|(k, v)| (k, *v))
    }

    /// Parses the checkpoint file: `{"lastSeqNum": {"<asset>": {"<index>": <seq>}}}`.
    pub fn from_json(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let file: CheckpointFile = serde_json::from_slice(bytes)?;
        let mut checkpoints = Self::new();
        for (asset, markets) in file.last_seq_num {
            for (index, seq_num) in markets {
                let market_index: MarketIndex =
                    index
                        .parse()
                        .map_err(|_| CheckpointError::InvalidMarketIndex {
                            asset: asset.clone(),
                            index: index.clone(),
                        })?;
                checkpoints.set(MarketKey::new(Asset::new(asset.clone()), market_index), seq_num);
            }
        }
        Ok(checkpoints)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, CheckpointError> {
        let mut file = CheckpointFile::default();
        for (market, seq_num) in self.iter() {
            file.last_seq_num
                .entry(market.asset.to_string())
                .or_default()
                .insert(market.market_index.to_string(), seq_num);
        }
        Ok(serde_json::to_vec_pretty(&file)?)
    }
}

#[derive(Default, Serialize, Deserialize)]
struct CheckpointFile {
    #[serde(rename = "lastSeqNum")]
    last_seq_num: BTreeMap<String, BTreeMap<String, SeqNum>>,
}

/// Durable storage of checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads stored checkpoints, empty if nothing was stored yet.
    async fn load(&self) -> Result<Checkpoints, CheckpointError>;

    async fn save(&self, checkpoints: &Checkpoints) -> Result<(), CheckpointError>;
}

/// Checkpoints stored as a JSON file, replaced atomically on every save.
#[derive(Clone, Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Store at the fixed location `<data_dir>/trades/checkpoint.json`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self::at(data_dir.as_ref().join("trades").join("checkpoint.json"))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Checkpoints, CheckpointError> {
        match persist::read_optional(&self.path).await? {
            Some(bytes) => Checkpoints::from_json(&bytes),
            None => Ok(Checkpoints::new()),
        }
    }

    async fn save(&self, checkpoints: &Checkpoints) -> Result<(), CheckpointError> {
        persist::write_atomic(&self.path, &checkpoints.to_json()?).await?;
        Ok(())
    }
}
