//! Gas limit and gas price selection for mirror transactions

use crate::chain::ChainEndpoint;
use crate::config::RelayerConfig;
use crate::error::RelayerResult;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use tracing::{debug, warn};

/// Gas estimator for transactions
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Used when the node cannot estimate the call
    fallback_gas_limit: U256,
    /// Applied to the node's gas price (100 = unchanged)
    gas_price_multiplier_percent: u64,
    max_gas_price: Option<U256>,
}

impl GasEstimator {
    pub fn new(config: &RelayerConfig) -> Self {
        Self {
            gas_limit_buffer_percent: config.gas_limit_buffer_percent,
            fallback_gas_limit: U256::from(config.fallback_gas_limit),
            gas_price_multiplier_percent: config.gas_price_multiplier_percent,
            max_gas_price: config.max_gas_price_gwei.map(gwei),
        }
    }

    /// Estimated gas plus buffer, or the fallback limit when estimation fails
    pub async fn gas_limit(&self, endpoint: &dyn ChainEndpoint, call: &TypedTransaction) -> U256 {
        match endpoint.estimate_gas(call).await {
            Ok(estimate) if !estimate.is_zero() => {
                let buffer = estimate * self.gas_limit_buffer_percent / 100;
                estimate + buffer
            }
            Ok(_) => {
                warn!(
                    "Node estimated zero gas on {} chain, using fallback {}",
                    endpoint.role(),
                    self.fallback_gas_limit
                );
                self.fallback_gas_limit
            }
            Err(e) => {
                warn!(
                    "Gas estimation failed on {} chain, using fallback {}: {}",
                    endpoint.role(),
                    self.fallback_gas_limit,
                    e
                );
                self.fallback_gas_limit
            }
        }
    }

    /// Node gas price scaled by the multiplier and capped by the configured maximum
    pub async fn gas_price(&self, endpoint: &dyn ChainEndpoint) -> RelayerResult<U256> {
        let node_price = endpoint.gas_price().await?;
        let mut price = node_price * self.gas_price_multiplier_percent / 100;

        if let Some(cap) = self.max_gas_price {
            if price > cap {
                debug!("Capping gas price {} at {}", price, cap);
                price = cap;
            }
        }

        debug!(
            "Gas price for {} chain: {} (node {})",
            endpoint.role(),
            price,
            node_price
        );
        Ok(price)
    }
}

fn gwei(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(9)
}
