//! Chain module - endpoint abstraction over the two bridged chains
//!
//! This module provides:
//! - Chain roles (`source` / `destination`) and the event kinds they emit
//! - The `ChainEndpoint` capability trait consumed by the scanner and executor
//! - Contract bindings resolving event topics and mirror-call functions from the ABI
//! - An `ethers` HTTP implementation with multi-RPC failover

pub mod provider;
pub mod scanner;

pub use provider::EthEndpoint;
pub use scanner::{BlockRange, EventScanner, ScanReport};

use crate::config::{ContractEntry, ContractInfo, Settings};
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use ethers::abi::{Abi, Event, Function};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Which side of the bridge a chain plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainRole {
    Source,
    Destination,
}

impl ChainRole {
    pub const ALL: [ChainRole; 2] = [ChainRole::Source, ChainRole::Destination];

    /// The chain mirror transactions are sent to
    pub fn counterpart(self) -> ChainRole {
        match self {
            ChainRole::Source => ChainRole::Destination,
            ChainRole::Destination => ChainRole::Source,
        }
    }

    /// Event kind scanned on this chain
    pub fn scanned_event(self) -> EventKind {
        match self {
            ChainRole::Source => EventKind::Deposit,
            ChainRole::Destination => EventKind::Unwrap,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChainRole::Source => "source",
            ChainRole::Destination => "destination",
        }
    }
}

impl fmt::Display for ChainRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainRole {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(ChainRole::Source),
            "destination" => Ok(ChainRole::Destination),
            other => Err(RelayerError::InvalidChainRole(other.to_string())),
        }
    }
}

/// Bridge events the relayer reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Deposit,
    Unwrap,
}

impl EventKind {
    /// Event name as declared in the contract ABI
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Deposit => "Deposit",
            EventKind::Unwrap => "Unwrap",
        }
    }

    /// Function called on the opposite chain for this event
    pub fn mirror_function(self) -> &'static str {
        match self {
            EventKind::Deposit => "wrap",
            EventKind::Unwrap => "withdraw",
        }
    }
}

/// Deployed bridge contract: address plus interface description
#[derive(Debug, Clone)]
pub struct ContractBinding {
    pub address: Address,
    pub abi: Abi,
}

impl ContractBinding {
    pub fn new(address: Address, abi: Abi) -> Self {
        Self { address, abi }
    }

    pub fn from_entry(role: ChainRole, entry: &ContractEntry) -> RelayerResult<Self> {
        let address = Address::from_str(entry.address.trim()).map_err(|e| {
            RelayerError::Config(format!(
                "Invalid {} contract address {:?}: {}",
                role, entry.address, e
            ))
        })?;
        Ok(Self::new(address, entry.abi.clone()))
    }

    pub fn event(&self, kind: EventKind) -> RelayerResult<&Event> {
        self.abi.event(kind.name()).map_err(|e| {
            RelayerError::Contract(format!("ABI has no {} event: {}", kind.name(), e))
        })
    }

    /// topic0 of the event signature
    pub fn topic(&self, kind: EventKind) -> RelayerResult<H256> {
        Ok(self.event(kind)?.signature())
    }

    pub fn function(&self, name: &str) -> RelayerResult<&Function> {
        self.abi
            .function(name)
            .map_err(|e| RelayerError::Contract(format!("ABI has no {} function: {}", name, e)))
    }
}

/// Read/write capability for one chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainEndpoint: Send + Sync {
    fn role(&self) -> ChainRole;

    fn chain_id(&self) -> u64;

    fn contract(&self) -> &ContractBinding;

    async fn latest_block_number(&self) -> RelayerResult<u64>;

    /// Logs of `kind` emitted by the bridge contract within `from_block..=to_block`
    async fn get_logs(&self, kind: EventKind, from_block: u64, to_block: u64)
        -> RelayerResult<Vec<Log>>;

    async fn get_transaction_count(&self, address: Address) -> RelayerResult<u64>;

    async fn gas_price(&self) -> RelayerResult<U256>;

    async fn estimate_gas(&self, call: &TypedTransaction) -> RelayerResult<U256>;

    async fn send_raw_transaction(&self, signed: Bytes) -> RelayerResult<H256>;

    /// Wait until `tx_hash` is mined or `timeout` elapses
    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        timeout: Duration,
    ) -> RelayerResult<TransactionReceipt>;
}

/// Produces a connected endpoint for a chain role
#[async_trait]
pub trait EndpointConnector: Send + Sync {
    async fn connect(&self, role: ChainRole) -> RelayerResult<Arc<dyn ChainEndpoint>>;
}

/// Connects to live chains over JSON-RPC
pub struct RpcConnector {
    settings: Settings,
    contracts: ContractInfo,
}

impl RpcConnector {
    pub fn new(settings: Settings, contracts: ContractInfo) -> Self {
        Self {
            settings,
            contracts,
        }
    }
}

#[async_trait]
impl EndpointConnector for RpcConnector {
    async fn connect(&self, role: ChainRole) -> RelayerResult<Arc<dyn ChainEndpoint>> {
        let binding = ContractBinding::from_entry(role, self.contracts.entry(role))?;
        let endpoint = EthEndpoint::connect(
            role,
            self.settings.chains.for_role(role).clone(),
            binding,
            Duration::from_millis(self.settings.relayer.receipt_poll_interval_ms),
        )
        .await?;
        Ok(Arc::new(endpoint))
    }
}
