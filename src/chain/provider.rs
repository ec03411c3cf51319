//! ethers JSON-RPC chain client with multi-RPC failover for reads

use super::{ChainClient, TxReceipt, TxRequest};
use crate::config::ChainConfig;
use crate::error::{ChainError, DispatchError, DispatchResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Chain client backed by one or more HTTP JSON-RPC endpoints
pub struct EthersChainClient {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Signing keys by address
    wallets: HashMap<Address, LocalWallet>,
}

impl EthersChainClient {
    /// Create a new chain client
    pub fn new(config: ChainConfig, wallets: Vec<LocalWallet>) -> DispatchResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(DispatchError::Config(format!(
                "No valid RPC providers for chain {}",
                config.chain_id
            )));
        }

        let wallets = wallets
            .into_iter()
            .map(|w| (w.address(), w.with_chain_id(config.chain_id)))
            .collect();

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            wallets,
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }

    /// Run a read against each provider in turn until one answers
    async fn read_with_failover<'a, T, F, Fut>(&'a self, what: &str, call: F) -> Result<T, ChainError>
    where
        F: Fn(&'a Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;

        for _ in 0..self.http_providers.len() {
            match timeout(self.request_timeout(), call(self.http())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    let err = classify_provider_error(e);
                    // Only transport failures justify trying another endpoint
                    if !matches!(err, ChainError::Unavailable(_)) {
                        return Err(err);
                    }
                    warn!("Failed to {} on chain {}: {}", what, self.config.chain_id, err);
                    last_error = Some(err);
                }
                Err(_) => {
                    warn!("Timed out trying to {} on chain {}", what, self.config.chain_id);
                    last_error = Some(ChainError::Unavailable(format!("{} timed out", what)));
                }
            }
            self.failover();
        }

        Err(last_error.unwrap_or_else(|| {
            ChainError::Unavailable(format!("All providers failed to {}", what))
        }))
    }

    fn build_tx(&self, from: Address, request: &TxRequest) -> Result<TypedTransaction, ChainError> {
        let nonce = request
            .nonce
            .ok_or_else(|| ChainError::Rejected("transaction has no nonce".to_string()))?;
        let gas_price = request
            .gas_price
            .ok_or_else(|| ChainError::Rejected("transaction has no gas price".to_string()))?;

        let tx = TransactionRequest::new()
            .from(from)
            .to(request.to)
            .data(request.data.clone())
            .gas(request.gas_limit)
            .gas_price(gas_price)
            .nonce(nonce)
            .chain_id(self.config.chain_id);

        Ok(TypedTransaction::Legacy(tx))
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError> {
        let count = self
            .read_with_failover("get pending nonce", |p| {
                p.get_transaction_count(address, Some(BlockNumber::Pending.into()))
            })
            .await?;

        count_to_nonce(count)
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        self.read_with_failover("get gas price", |p| p.get_gas_price())
            .await
    }

    async fn submit(&self, from: Address, request: TxRequest) -> Result<TxReceipt, ChainError> {
        let wallet = self
            .wallets
            .get(&from)
            .ok_or_else(|| ChainError::Rejected(format!("No signing key for {:?}", from)))?;

        let tx = self.build_tx(from, &request)?;
        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| ChainError::Rejected(format!("Failed to sign transaction: {}", e)))?;
        let raw = tx.rlp_signed(&signature);

        // No failover here: another endpoint may already have the transaction
        let pending = timeout(self.request_timeout(), self.http().send_raw_transaction(raw))
            .await
            .map_err(|_| ChainError::Unavailable("send transaction timed out".to_string()))?
            .map_err(classify_provider_error)?;

        let tx_hash = pending.tx_hash();
        debug!("Transaction {:?} broadcast, waiting for receipt", tx_hash);

        let receipt = timeout(self.request_timeout(), pending)
            .await
            .map_err(|_| {
                ChainError::Unavailable(format!("Timed out waiting for receipt of {:?}", tx_hash))
            })?
            .map_err(classify_provider_error)?
            .ok_or_else(|| {
                ChainError::Unavailable(format!("Transaction {:?} dropped from mempool", tx_hash))
            })?;

        let block_number = receipt.block_number.map(|b| b.as_u64());

        if receipt.status == Some(U64::zero()) {
            return Err(ChainError::Reverted {
                tx_hash: format!("{:?}", tx_hash),
                block_number,
            });
        }

        Ok(TxReceipt {
            transaction_hash: receipt.transaction_hash,
            gas_used: receipt.gas_used,
            block_number,
        })
    }
}

/// Transaction counts above `u64::MAX` can only come from a misbehaving node
fn count_to_nonce(count: U256) -> Result<u64, ChainError> {
    if count > U256::from(u64::MAX) {
        return Err(ChainError::Rejected(format!(
            "Transaction count {} does not fit in a nonce",
            count
        )));
    }
    Ok(count.as_u64())
}

/// Translate a provider failure into a chain error kind.
///
/// JSON-RPC error responses carry the node's message and are classified by
/// it; anything without a response never reached a node.
fn classify_provider_error(err: ProviderError) -> ChainError {
    match RpcError::as_error_response(&err) {
        Some(response) => ChainError::from_rpc_message(response.message.clone()),
        None => ChainError::Unavailable(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::tests::KEY_A;

    fn chain_config(urls: &[&str]) -> ChainConfig {
        ChainConfig {
            chain_id: 31337,
            name: "anvil".to_string(),
            rpc_urls: urls.iter().map(|u| u.to_string()).collect(),
            request_timeout_secs: 5,
        }
    }

    #[test]
    fn requires_a_valid_provider() {
        let err = EthersChainClient::new(chain_config(&["not a url"]), vec![]).err();
        assert!(matches!(err, Some(DispatchError::Config(_))));
    }

    #[test]
    fn failover_rotates_providers() {
        let client = EthersChainClient::new(
            chain_config(&["http://127.0.0.1:8545", "http://127.0.0.1:8546"]),
            vec![],
        )
        .unwrap();

        client.failover();
        assert_eq!(client.current_provider.load(Ordering::Relaxed), 1);
        client.failover();
        assert_eq!(client.current_provider.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn builds_filled_legacy_transaction() {
        let wallet: LocalWallet = KEY_A.parse().unwrap();
        let from = wallet.address();
        let client =
            EthersChainClient::new(chain_config(&["http://127.0.0.1:8545"]), vec![wallet]).unwrap();

        let mut request = TxRequest::new(Address::repeat_byte(0x11), vec![0xde, 0xad], 21_000u64)
            .with_gas_price(7u64);
        assert!(client.build_tx(from, &request).is_err());

        request.nonce = Some(5);
        let tx = client.build_tx(from, &request).unwrap();
        assert_eq!(tx.nonce(), Some(&U256::from(5)));
        assert_eq!(tx.gas_price(), Some(U256::from(7)));
        assert_eq!(tx.chain_id(), Some(U64::from(31337)));
        assert!(client.wallets.contains_key(&from));
    }

    #[test]
    fn oversized_transaction_count_is_rejected() {
        assert_eq!(count_to_nonce(U256::from(42)), Ok(42));
        assert_eq!(count_to_nonce(U256::from(u64::MAX)), Ok(u64::MAX));

        let err = count_to_nonce(U256::from(u64::MAX) + 1).unwrap_err();
        assert!(matches!(err, ChainError::Rejected(_)));
    }
}
