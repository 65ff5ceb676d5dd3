//! Nonce selection for warden accounts
//!
//! The node's pending count is the baseline. A local floor of last used + 1 covers
//! nodes that lag behind our own submissions.

use crate::chain::ChainEndpoint;
use crate::error::RelayerResult;

use dashmap::DashMap;
use ethers::types::Address;
use tracing::debug;

/// Tracks the last nonce used per `(chain_id, account)`
#[derive(Default)]
pub struct NonceTracker {
    last_used: DashMap<(u64, Address), u64>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// max(node pending count, last used + 1)
    pub async fn next_nonce(
        &self,
        endpoint: &dyn ChainEndpoint,
        account: Address,
    ) -> RelayerResult<u64> {
        let pending = endpoint.get_transaction_count(account).await?;
        let floor = self
            .last_used
            .get(&(endpoint.chain_id(), account))
            .map(|n| *n + 1)
            .unwrap_or(0);

        let nonce = pending.max(floor);
        if nonce > pending {
            debug!(
                "Node reports pending nonce {} for {:?}, using {}",
                pending, account, nonce
            );
        }
        Ok(nonce)
    }

    /// Record a nonce accepted by the node; never moves backwards
    pub fn mark_used(&self, chain_id: u64, account: Address, nonce: u64) {
        self.last_used
            .entry((chain_id, account))
            .and_modify(|n| *n = (*n).max(nonce))
            .or_insert(nonce);
    }

    pub fn last_used(&self, chain_id: u64, account: Address) -> Option<u64> {
        self.last_used.get(&(chain_id, account)).map(|n| *n)
    }
}
