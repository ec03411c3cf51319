//! Nonce allocation for concurrent transaction submission
//!
//! Handles:
//! - Lazy per-address initialization from the chain's pending count
//! - Serialized local allocation without network round trips
//! - Forced resync after the chain reports a nonce conflict

use super::lock::KeyedMutex;
use crate::chain::ChainClient;
use crate::error::DispatchResult;
use crate::metrics;

use ethers::types::Address;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-address nonce state
#[derive(Debug, Default)]
struct NonceState {
    /// Next nonce to hand out
    next: u64,
    /// Whether `next` has been seeded from the chain
    initialized: bool,
}

/// Hands out strictly increasing nonces per address.
///
/// The only shared mutable state is one `NonceState` per address, each
/// behind its own lock. After an address has been seeded, allocation is a
/// read-increment under that lock and never waits on the network.
pub struct NonceAllocator {
    chain: Arc<dyn ChainClient>,
    state: KeyedMutex<Address, NonceState>,
}

impl NonceAllocator {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            state: KeyedMutex::new(),
        }
    }

    /// Allocate the next nonce for `address`
    pub async fn next_nonce(&self, address: Address) -> DispatchResult<u64> {
        let mut state = self.state.lock(address, NonceState::default).await;

        // Concurrent first callers queue on the lock and find it seeded
        if !state.initialized {
            let pending = self.chain.pending_nonce(address).await?;
            state.next = pending;
            state.initialized = true;
            info!("Initialized nonce for {:?}: {}", address, pending);
        }

        let nonce = state.next;
        state.next += 1;
        drop(state);

        metrics::record_nonce_allocated(&address);
        debug!("Allocated nonce {} for {:?}", nonce, address);
        Ok(nonce)
    }

    /// Overwrite local state with the chain's pending count.
    ///
    /// Allocated but unconfirmed nonces are discarded; the next allocation
    /// returns the returned value.
    pub async fn resync(&self, address: Address) -> DispatchResult<u64> {
        let pending = self.chain.pending_nonce(address).await?;

        let mut state = self.state.lock(address, NonceState::default).await;
        if state.initialized && state.next != pending {
            warn!(
                "Resyncing nonce for {:?}: local {}, chain {}",
                address, state.next, pending
            );
        }
        state.next = pending;
        state.initialized = true;
        drop(state);

        metrics::record_nonce_resync(&address);
        Ok(pending)
    }

    /// Forget local state for `address`; the next allocation re-fetches it
    pub async fn reset(&self, address: Address) {
        if let Some(mut state) = self.state.get(&address).await {
            state.initialized = false;
            debug!("Reset nonce state for {:?}", address);
        }
    }

    /// Forget local state for every address seen so far
    pub async fn reset_all(&self) {
        let addresses = self.state.keys();
        for address in &addresses {
            self.reset(*address).await;
        }
        info!("Reset nonce state for {} addresses", addresses.len());
    }

    /// The nonce the next allocation would return, if seeded
    pub async fn local_nonce(&self, address: Address) -> Option<u64> {
        let state = self.state.get(&address).await?;
        state.initialized.then_some(state.next)
    }
}
