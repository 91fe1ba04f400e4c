use async_trait::async_trait;

use crate::{
    rpc::{RpcClient, RpcError},
    types::Pubkey,
};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("account not found: {0}")]
    AccountNotFound(Pubkey),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("{0}")]
    Other(String),
}

/// Source of raw account bytes, called independently per market.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn account_bytes(&self, address: &Pubkey) -> Result<Vec<u8>, SourceError>;
}

#[async_trait]
impl AccountSource for RpcClient {
    async fn account_bytes(&self, address: &Pubkey) -> Result<Vec<u8>, SourceError> {
        self.get_account(address)
            .await?
            .map(|account| account.data)
            .ok_or(SourceError::AccountNotFound(*address))
    }
}
