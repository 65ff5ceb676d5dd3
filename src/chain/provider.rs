//! Chain endpoint with multi-RPC support and automatic failover

use super::{ChainEndpoint, ChainRole, ContractBinding, EventKind};
use crate::config::ChainConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Run a read call against each provider in turn until one answers.
macro_rules! with_failover {
    ($self:ident, $method:literal, |$p:ident| $call:expr) => {{
        let mut last_error = String::from("no providers configured");
        let mut result = None;
        for _ in 0..$self.http_providers.len() {
            let $p = $self.http();
            match timeout($self.request_timeout, $call).await {
                Ok(Ok(value)) => {
                    result = Some(value);
                    break;
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("timed out after {:?}", $self.request_timeout),
            }
            warn!(
                "{} failed on {} chain: {}",
                $method, $self.role, last_error
            );
            $self.failover();
        }
        result.ok_or_else(|| RelayerError::Rpc {
            role: $self.role,
            message: format!("{}: {}", $method, last_error),
        })
    }};
}

/// Multi-provider endpoint for one bridged chain
pub struct EthEndpoint {
    role: ChainRole,
    chain_id: u64,
    contract: ContractBinding,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    request_timeout: Duration,
    receipt_poll_interval: Duration,
}

impl EthEndpoint {
    /// Connect to a chain, verifying that at least one RPC URL answers with the
    /// expected chain id.
    pub async fn connect(
        role: ChainRole,
        config: ChainConfig,
        contract: ContractBinding,
        receipt_poll_interval: Duration,
    ) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(receipt_poll_interval);
                    http_providers.push(provider);
                    debug!("Added HTTP provider for {} chain: {}", role, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::Connectivity {
                role,
                message: "No valid RPC providers".to_string(),
            });
        }

        let mut endpoint = Self {
            role,
            chain_id: 0,
            contract,
            http_providers,
            current_provider: AtomicUsize::new(0),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            receipt_poll_interval,
        };

        let reported = with_failover!(endpoint, "eth_chainId", |p| p.get_chainid())
            .map_err(|e| RelayerError::Connectivity {
                role,
                message: e.to_string(),
            })?
            .as_u64();

        if let Some(expected) = config.chain_id {
            if expected != reported {
                return Err(RelayerError::Connectivity {
                    role,
                    message: format!(
                        "node reports chain id {}, expected {}",
                        reported, expected
                    ),
                });
            }
        }
        endpoint.chain_id = reported;

        info!(
            "Connected to {} chain (ID: {}) with {} provider(s)",
            role,
            reported,
            endpoint.http_providers.len()
        );
        Ok(endpoint)
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        if self.http_providers.len() < 2 {
            return;
        }
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("{} chain failover to provider {}", self.role, next);
    }
}

#[async_trait]
impl ChainEndpoint for EthEndpoint {
    fn role(&self) -> ChainRole {
        self.role
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn contract(&self) -> &ContractBinding {
        &self.contract
    }

    async fn latest_block_number(&self) -> RelayerResult<u64> {
        let block = with_failover!(self, "eth_blockNumber", |p| p.get_block_number())?;
        Ok(block.as_u64())
    }

    async fn get_logs(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> RelayerResult<Vec<Log>> {
        let filter = Filter::new()
            .address(self.contract.address)
            .topic0(self.contract.topic(kind)?)
            .from_block(from_block)
            .to_block(to_block);

        with_failover!(self, "eth_getLogs", |p| p.get_logs(&filter))
    }

    async fn get_transaction_count(&self, address: Address) -> RelayerResult<u64> {
        let pending = Some(BlockId::Number(BlockNumber::Pending));
        let nonce = with_failover!(self, "eth_getTransactionCount", |p| p
            .get_transaction_count(address, pending))?;
        Ok(nonce.as_u64())
    }

    async fn gas_price(&self) -> RelayerResult<U256> {
        with_failover!(self, "eth_gasPrice", |p| p.get_gas_price())
    }

    async fn estimate_gas(&self, call: &TypedTransaction) -> RelayerResult<U256> {
        // A revert here is deterministic, so no failover
        match timeout(self.request_timeout, self.http().estimate_gas(call, None)).await {
            Ok(Ok(gas)) => Ok(gas),
            Ok(Err(e)) => Err(RelayerError::Rpc {
                role: self.role,
                message: format!("eth_estimateGas: {}", e),
            }),
            Err(_) => Err(RelayerError::Rpc {
                role: self.role,
                message: "eth_estimateGas timed out".to_string(),
            }),
        }
    }

    async fn send_raw_transaction(&self, signed: Bytes) -> RelayerResult<H256> {
        let result = timeout(self.request_timeout, self.http().send_raw_transaction(signed)).await;

        match result {
            Ok(Ok(pending_tx)) => Ok(pending_tx.tx_hash()),
            Ok(Err(e)) => {
                self.failover();
                Err(RelayerError::Submission {
                    role: self.role,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                self.failover();
                Err(RelayerError::Submission {
                    role: self.role,
                    message: format!("send timed out after {:?}", self.request_timeout),
                })
            }
        }
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        wait: Duration,
    ) -> RelayerResult<TransactionReceipt> {
        let deadline = Instant::now() + wait;

        loop {
            match timeout(self.request_timeout, self.http().get_transaction_receipt(tx_hash)).await {
                Ok(Ok(Some(receipt))) => return Ok(receipt),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    debug!("Receipt poll for {:?} failed: {}", tx_hash, e);
                    self.failover();
                }
                Err(_) => debug!("Receipt poll for {:?} timed out", tx_hash),
            }

            if Instant::now() + self.receipt_poll_interval > deadline {
                return Err(RelayerError::ReceiptTimeout {
                    tx_hash: format!("{:?}", tx_hash),
                    waited_secs: wait.as_secs(),
                });
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}
