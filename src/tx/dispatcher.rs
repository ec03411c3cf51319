//! Transaction dispatcher with nonce allocation and retry on recoverable
//! chain errors

use super::gas::GasPolicy;
use super::nonce::NonceAllocator;
use crate::accounts::AccountRegistry;
use crate::chain::{ChainClient, TxReceipt, TxRequest};
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, DispatchResult, RetryKind};
use crate::metrics;

use ethers::types::Address;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Lifecycle of a single `send` call.
///
/// `Success` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Pending,
    Submitting { attempt: u32 },
    RetryNonce,
    RetryUnderpriced,
    Success,
    Failed,
}

/// Account entry for the accounts listing
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub id: String,
    pub label: String,
    pub address: Address,
}

/// Local versus chain view of an account's nonce
#[derive(Debug, Clone, Serialize)]
pub struct NonceStatus {
    pub id: String,
    pub label: String,
    pub address: Address,
    pub network_nonce: u64,
    /// `None` until the account has allocated a nonce
    pub local_nonce: Option<u64>,
}

/// Submits transactions for configured accounts
pub struct Dispatcher {
    /// Chain client
    chain: Arc<dyn ChainClient>,
    /// Nonce allocator shared by every send
    allocator: Arc<NonceAllocator>,
    /// Configured accounts
    accounts: Arc<AccountRegistry>,
    /// Gas bump for underpriced replacements
    gas_policy: GasPolicy,
    /// Retry configuration
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        allocator: Arc<NonceAllocator>,
        accounts: Arc<AccountRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            chain,
            allocator,
            accounts,
            gas_policy: GasPolicy::new(config.gas_bump_percent),
            config,
        }
    }

    /// Fill in gas price and nonce, submit, and retry recoverable failures.
    ///
    /// Nonce conflicts and underpriced replacements are retried within the
    /// attempt budget and only surface as `RetriesExhausted`. Every other
    /// chain error is returned unchanged after the attempt that produced it.
    pub async fn send(&self, account_id: &str, request: TxRequest) -> DispatchResult<TxReceipt> {
        let account = self.accounts.resolve(account_id)?;
        let address = account.address();

        let span = info_span!(
            "send",
            account = account_id,
            address = ?address,
            request_id = %Uuid::new_v4()
        );

        let started = Instant::now();
        let result = self
            .send_with_retry(account_id, address, request)
            .instrument(span)
            .await;

        match &result {
            Ok(_) => metrics::record_tx_submitted(account_id),
            Err(e) => metrics::record_tx_failed(account_id, failure_kind(e)),
        }
        metrics::record_tx_latency(account_id, started.elapsed().as_secs_f64());

        result
    }

    async fn send_with_retry(
        &self,
        account_id: &str,
        address: Address,
        mut request: TxRequest,
    ) -> DispatchResult<TxReceipt> {
        let mut state = DispatchState::Pending;

        // Queried once; only underpriced retries change it afterwards
        if request.gas_price.is_none() {
            request.gas_price = Some(self.chain.gas_price().await?);
        }
        request.nonce = Some(self.allocator.next_nonce(address).await?);

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            state = transition(state, DispatchState::Submitting { attempt: attempts });

            let err = match self.chain.submit(address, request.clone()).await {
                Ok(receipt) => {
                    transition(state, DispatchState::Success);
                    info!(
                        "Transaction {:?} mined in block {:?} (nonce {:?}, attempt {}/{})",
                        receipt.transaction_hash,
                        receipt.block_number,
                        request.nonce,
                        attempts,
                        max_attempts
                    );
                    return Ok(receipt);
                }
                Err(e) => e,
            };

            let Some(kind) = err.retry_kind() else {
                transition(state, DispatchState::Failed);
                // The allocated nonce is not returned; a later resync closes the gap
                warn!(
                    "Submission with nonce {:?} failed without retry: {}",
                    request.nonce, err
                );
                return Err(err.into());
            };

            if attempts >= max_attempts {
                transition(state, DispatchState::Failed);
                error!("Giving up after {} attempts: {}", attempts, err);
                return Err(DispatchError::RetriesExhausted {
                    attempts,
                    last: err,
                });
            }

            metrics::record_tx_retry(account_id, kind);

            // Back off before recovering so a fresh nonce is submitted as soon
            // as it is allocated
            tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;

            match kind {
                RetryKind::Nonce => {
                    state = transition(state, DispatchState::RetryNonce);
                    let rejected = request.nonce.unwrap_or_default();
                    self.allocator.resync(address).await?;

                    // Anything at or below a rejected nonce is already used on chain
                    let mut nonce = self.allocator.next_nonce(address).await?;
                    while nonce <= rejected {
                        nonce = self.allocator.next_nonce(address).await?;
                    }
                    request.nonce = Some(nonce);

                    warn!(
                        "Nonce {} too low, retrying with {} (attempt {}/{})",
                        rejected, nonce, attempts, max_attempts
                    );
                }
                RetryKind::Underpriced => {
                    state = transition(state, DispatchState::RetryUnderpriced);
                    let current = request.gas_price.unwrap_or_default();
                    let bumped = self.gas_policy.bump(current);
                    request.gas_price = Some(bumped);

                    warn!(
                        "Replacement underpriced at {}, retrying nonce {:?} at {} (attempt {}/{})",
                        current, request.nonce, bumped, attempts, max_attempts
                    );
                }
            }
        }
    }

    /// Configured accounts in configuration order
    pub fn accounts(&self) -> Vec<AccountSummary> {
        self.accounts
            .iter()
            .map(|a| AccountSummary {
                id: a.id().to_string(),
                label: a.label().to_string(),
                address: a.address(),
            })
            .collect()
    }

    /// Chain and local nonce for every configured account
    pub async fn nonce_status(&self) -> DispatchResult<Vec<NonceStatus>> {
        let lookups = self.accounts.iter().map(|account| async move {
            let address = account.address();
            let network_nonce = self.chain.pending_nonce(address).await?;
            let local_nonce = self.allocator.local_nonce(address).await;

            Ok::<_, DispatchError>(NonceStatus {
                id: account.id().to_string(),
                label: account.label().to_string(),
                address,
                network_nonce,
                local_nonce,
            })
        });

        futures::future::try_join_all(lookups).await
    }

    /// Resync one account's nonce from the chain
    pub async fn resync_account(&self, account_id: &str) -> DispatchResult<u64> {
        let account = self.accounts.resolve(account_id)?;
        self.allocator.resync(account.address()).await
    }

    /// Drop all local nonce state
    pub async fn reset_nonces(&self) {
        self.allocator.reset_all().await;
    }
}

fn transition(from: DispatchState, to: DispatchState) -> DispatchState {
    debug!("Dispatch state {:?} -> {:?}", from, to);
    to
}

fn failure_kind(err: &DispatchError) -> &'static str {
    match err {
        DispatchError::RetriesExhausted { .. } => "retries_exhausted",
        DispatchError::Chain(e) => e.kind(),
        DispatchError::UnknownAccount { .. } => "unknown_account",
        DispatchError::Config(_) | DispatchError::Wallet(_) | DispatchError::Io(_) => "internal",
    }
}
