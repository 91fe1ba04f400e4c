//! Minimal Solana JSON-RPC client.
//!
//! Only `getAccountInfo` is needed: both the event queue and the open orders
//! accounts are read as raw bytes and decoded locally.

use std::{str::FromStr, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

use crate::types::Pubkey;

/// Commitment level account reads are performed at.
///
/// Under `finalized` the event queue sequence number can only go backwards
/// if the request was served by a lagging node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    #[default]
    Finalized,
}

impl FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(format!("unknown commitment: {other}")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc error {code}: {message}")]
    Response { code: i64, message: String },

    #[error("unexpected empty RPC response")]
    NullResp,

    #[error("unsupported account data encoding: {0}")]
    Encoding(String),

    #[error("invalid account data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Account state as returned by the node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// Slot the state was read at.
    pub slot: u64,
    /// Program owning the account.
    pub owner: Pubkey,
    pub lamports: u64,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct RpcClient {
    http: Client,
    url: Url,
    commitment: Commitment,
}

impl RpcClient {
    pub fn new(url: Url, commitment: Commitment, timeout: Duration) -> Result<Self, RpcError> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            url,
            commitment,
        })
    }

    pub fn commitment(&self) -> Commitment {
        self.commitment
    }

    /// Fetches account state, `None` if the account does not exist.
    #[instrument(skip(self), fields(address = %address), level = "debug")]
    pub async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>, RpcError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getAccountInfo",
            "params": [
                address.to_string(),
                { "encoding": "base64", "commitment": self.commitment },
            ],
        });

        let body = self
            .http
            .post(self.url.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let account = parse_account_info(&body)?;
        debug!(
            found = account.is_some(),
            slot = account.as_ref().map(|a| a.slot),
            "account fetched"
        );
        Ok(account)
    }
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct AccountInfoResult {
    context: RpcContext,
    value: Option<UiAccount>,
}

#[derive(Deserialize)]
struct RpcContext {
    slot: u64,
}

#[derive(Deserialize)]
struct UiAccount {
    data: (String, String),
    owner: Pubkey,
    lamports: u64,
}

fn parse_account_info(body: &[u8]) -> Result<Option<Account>, RpcError> {
    let resp: RpcResponse<AccountInfoResult> = serde_json::from_slice(body)?;
    if let Some(err) = resp.error {
        return Err(RpcError::Response {
            code: err.code,
            message: err.message,
        });
    }
    let result = resp.result.ok_or(RpcError::NullResp)?;
    let Some(value) = result.value else {
        return Ok(None);
    };

    let (data, encoding) = value.data;
    if encoding != "base64" {
        return Err(RpcError::Encoding(encoding));
    }

    Ok(Some(Account {
        slot: result.context.slot,
        owner: value.owner,
        lamports: value.lamports,
        data: STANDARD.decode(data)?,
    }))
}
