//! Chain module - the JSON-RPC boundary used by the dispatcher
//!
//! The dispatcher only needs three capabilities from a chain: the pending
//! transaction count of an address, the current gas price, and submission of
//! a filled transaction. Provider-specific failures are translated into
//! [`ChainError`] kinds here so retry logic never inspects raw messages.

pub mod provider;

pub use provider::EthersChainClient;

use crate::error::ChainError;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

/// Transaction to be submitted on behalf of an account.
///
/// `gas_price` and `nonce` are filled in by the dispatcher before submission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TxRequest {
    pub to: Address,
    #[serde(default)]
    pub data: Bytes,
    pub gas_limit: U256,
    #[serde(default)]
    pub gas_price: Option<U256>,
    #[serde(skip)]
    pub nonce: Option<u64>,
}

#[cfg(test)]
impl TxRequest {
    pub fn new(to: Address, data: impl Into<Bytes>, gas_limit: impl Into<U256>) -> Self {
        Self {
            to,
            data: data.into(),
            gas_limit: gas_limit.into(),
            gas_price: None,
            nonce: None,
        }
    }

    pub fn with_gas_price(mut self, gas_price: impl Into<U256>) -> Self {
        self.gas_price = Some(gas_price.into());
        self
    }
}

/// Receipt of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxReceipt {
    pub transaction_hash: H256,
    pub gas_used: Option<U256>,
    pub block_number: Option<u64>,
}

/// Capabilities the dispatcher needs from a chain
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Transaction count of `address` including broadcast but unmined ones
    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError>;

    async fn gas_price(&self) -> Result<U256, ChainError>;

    /// Sign `request` as `from` and submit it, waiting for the receipt
    async fn submit(&self, from: Address, request: TxRequest) -> Result<TxReceipt, ChainError>;
}
