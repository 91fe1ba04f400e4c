//! Resolution of the account owner behind an event's open orders handle.
//!
//! The exchange program keeps an `OpenOrdersMap` account per open orders
//! account, at the program address derived from
//! `["open-orders-map", open_orders]`. Its `user_key` is the trade owner.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::{
    rpc::{RpcClient, RpcError},
    types::Pubkey,
};

/// Seed prefix of the open orders map program address.
pub const OPEN_ORDERS_MAP_SEED: &[u8] = b"open-orders-map";

/// Account discriminator of `OpenOrdersMap`: first 8 bytes of
/// `sha256("account:OpenOrdersMap")`.
pub const OPEN_ORDERS_MAP_DISCRIMINATOR: [u8; 8] = [250, 126, 172, 10, 118, 30, 3, 168];

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("open orders map account not found: {0}")]
    AccountNotFound(Pubkey),

    #[error("no open orders map address for open orders {0}")]
    NoProgramAddress(Pubkey),

    #[error("account {account} is owned by {owner}, expected {program}")]
    WrongProgram {
        account: Pubkey,
        owner: Pubkey,
        program: Pubkey,
    },

    #[error("account {account} does not match open orders map layout, len: {len}")]
    InvalidLayout { account: Pubkey, len: usize },

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
}

/// Maps an owner handle embedded in an event to the owner's address.
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    async fn resolve_owner(
        &self,
        program_id: &Pubkey,
        owner_handle: &Pubkey,
    ) -> Result<Pubkey, ResolveError>;
}

/// Resolves owners by reading open orders map accounts over RPC.
///
/// The user key of an open orders map never changes, resolved owners are
/// cached for the lifetime of the resolver.
#[derive(Debug)]
pub struct RpcOwnerResolver {
    rpc: RpcClient,
    cache: DashMap<Pubkey, Pubkey>,
}

impl RpcOwnerResolver {
    pub fn new(rpc: RpcClient) -> Self {
        Self {
            rpc,
            cache: DashMap::new(),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl OwnerResolver for RpcOwnerResolver {
    async fn resolve_owner(
        &self,
        program_id: &Pubkey,
        owner_handle: &Pubkey,
    ) -> Result<Pubkey, ResolveError> {
        if let Some(owner) = self.cache.get(owner_handle) {
            return Ok(*owner);
        }

        let map_address = open_orders_map_address(program_id, owner_handle)
            .ok_or(ResolveError::NoProgramAddress(*owner_handle))?;
        let account = self
            .rpc
            .get_account(&map_address)
            .await?
            .ok_or(ResolveError::AccountNotFound(map_address))?;
        if account.owner != *program_id {
            return Err(ResolveError::WrongProgram {
                account: map_address,
                owner: account.owner,
                program: *program_id,
            });
        }
        let owner = open_orders_map_user(&account.data).ok_or(ResolveError::InvalidLayout {
            account: map_address,
            len: account.data.len(),
        })?;

        debug!(%owner_handle, %map_address, %owner, "owner resolved");
        self.cache.insert(*owner_handle, owner);
        Ok(owner)
    }
}

/// Program address of the open orders map of `open_orders`.
pub fn open_orders_map_address(program_id: &Pubkey, open_orders: &Pubkey) -> Option<Pubkey> {
    let program = solana_pubkey::Pubkey::new_from_array(program_id.to_bytes());
    let (address, _bump) = solana_pubkey::Pubkey::try_find_program_address(
        &[OPEN_ORDERS_MAP_SEED, open_orders.as_bytes()],
        &program,
    )?;
    Some(Pubkey::new(address.to_bytes()))
}

/// Reads the user key from open orders map account data.
pub fn open_orders_map_user(data: &[u8]) -> Option<Pubkey> {
    let (discriminator, rest) = data.split_first_chunk::<8>()?;
    if *discriminator != OPEN_ORDERS_MAP_DISCRIMINATOR {
        return None;
    }
    Some(Pubkey::new(*rest.first_chunk::<32>()?))
}
