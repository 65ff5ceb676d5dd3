//! Shared fixtures: bridge ABI, log builders and an in-memory chain.

use crate::chain::{ChainEndpoint, ChainRole, ContractBinding, EndpointConnector, EventKind};
use crate::error::{RelayerError, RelayerResult};
use crate::retry::Sleeper;

use async_trait::async_trait;
use ethers::abi::{Abi, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Log, Signature, TransactionReceipt, H256, U256, U64};
use ethers::utils::keccak256;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default anvil account 0
pub const TEST_WARDEN_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub fn bridge_abi_json() -> &'static str {
    r#"[
        {"type":"event","name":"Deposit","anonymous":false,"inputs":[
            {"name":"token","type":"address","indexed":true},
            {"name":"recipient","type":"address","indexed":true},
            {"name":"amount","type":"uint256","indexed":false}]},
        {"type":"event","name":"Unwrap","anonymous":false,"inputs":[
            {"name":"underlying_token","type":"address","indexed":true},
            {"name":"wrapped_token","type":"address","indexed":true},
            {"name":"frm","type":"address","indexed":false},
            {"name":"to","type":"address","indexed":true},
            {"name":"amount","type":"uint256","indexed":false}]},
        {"type":"function","name":"wrap","stateMutability":"nonpayable","outputs":[],"inputs":[
            {"name":"_underlying_token","type":"address"},
            {"name":"_recipient","type":"address"},
            {"name":"_amount","type":"uint256"}]},
        {"type":"function","name":"withdraw","stateMutability":"nonpayable","outputs":[],"inputs":[
            {"name":"_token","type":"address"},
            {"name":"_recipient","type":"address"},
            {"name":"_amount","type":"uint256"}]}
    ]"#
}

pub fn test_binding() -> ContractBinding {
    let abi: Abi = serde_json::from_str(bridge_abi_json()).unwrap();
    ContractBinding::new(addr(0xb1d6e), abi)
}

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

fn topic_for(a: Address) -> H256 {
    H256::from_slice(&ethers::abi::encode(&[Token::Address(a)]))
}

fn log_at(
    binding: &ContractBinding,
    tag: &str,
    block: u64,
    log_index: u64,
    topics: Vec<H256>,
    data: Vec<Token>,
) -> Log {
    Log {
        address: binding.address,
        topics,
        data: Bytes::from(ethers::abi::encode(&data)),
        block_number: Some(U64::from(block)),
        transaction_hash: Some(H256::from(keccak256(format!(
            "{}:{}:{}",
            tag, block, log_index
        )))),
        log_index: Some(U256::from(log_index)),
        removed: Some(false),
        ..Default::default()
    }
}

pub fn deposit_log(
    binding: &ContractBinding,
    block: u64,
    log_index: u64,
    token: Address,
    recipient: Address,
    amount: u64,
) -> Log {
    log_at(
        binding,
        "deposit",
        block,
        log_index,
        vec![
            binding.topic(EventKind::Deposit).unwrap(),
            topic_for(token),
            topic_for(recipient),
        ],
        vec![Token::Uint(U256::from(amount))],
    )
}

pub fn unwrap_log(
    binding: &ContractBinding,
    block: u64,
    log_index: u64,
    underlying_token: Address,
    to: Address,
    amount: u64,
) -> Log {
    log_at(
        binding,
        "unwrap",
        block,
        log_index,
        vec![
            binding.topic(EventKind::Unwrap).unwrap(),
            topic_for(underlying_token),
            topic_for(addr(0xfeed)),
            topic_for(to),
        ],
        vec![Token::Address(addr(0xbeef)), Token::Uint(U256::from(amount))],
    )
}

/// How `wait_for_receipt` answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMode {
    Success,
    Reverted,
    Timeout,
}

#[derive(Default)]
struct FakeState {
    logs: Vec<Log>,
    max_log_span: Option<u64>,
    pending_nonce: u64,
    send_failures: u32,
    estimate: Option<U256>,
    sent: Vec<(TypedTransaction, Signature)>,
    calls: Vec<String>,
}

/// In-memory chain with scripted failures
pub struct FakeChain {
    role: ChainRole,
    chain_id: u64,
    binding: ContractBinding,
    latest_block: Mutex<u64>,
    gas_price: U256,
    receipt_mode: Mutex<ReceiptMode>,
    state: Mutex<FakeState>,
}

impl FakeChain {
    pub fn new(role: ChainRole, latest_block: u64) -> Self {
        let chain_id = match role {
            ChainRole::Source => 43113,
            ChainRole::Destination => 97,
        };
        Self {
            role,
            chain_id,
            binding: test_binding(),
            latest_block: Mutex::new(latest_block),
            gas_price: U256::from(25_000_000_000u64),
            receipt_mode: Mutex::new(ReceiptMode::Success),
            state: Mutex::new(FakeState {
                estimate: Some(U256::from(50_000)),
                ..Default::default()
            }),
        }
    }

    pub fn source(latest_block: u64) -> Self {
        Self::new(ChainRole::Source, latest_block)
    }

    pub fn destination(latest_block: u64) -> Self {
        Self::new(ChainRole::Destination, latest_block)
    }

    pub fn push_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn set_latest_block(&self, block: u64) {
        *self.latest_block.lock().unwrap() = block;
    }

    /// `eth_getLogs` fails for ranges longer than `span` blocks
    pub fn set_max_log_span(&self, span: u64) {
        self.state.lock().unwrap().max_log_span = Some(span);
    }

    pub fn set_pending_nonce(&self, nonce: u64) {
        self.state.lock().unwrap().pending_nonce = nonce;
    }

    /// Next `n` raw transaction sends are rejected
    pub fn fail_next_sends(&self, n: u32) {
        self.state.lock().unwrap().send_failures = n;
    }

    /// `None` makes gas estimation fail
    pub fn set_estimate(&self, estimate: Option<u64>) {
        self.state.lock().unwrap().estimate = estimate.map(U256::from);
    }

    pub fn set_receipt_mode(&self, mode: ReceiptMode) {
        *self.receipt_mode.lock().unwrap() = mode;
    }

    /// Decoded transactions accepted by `send_raw_transaction`
    pub fn sent(&self) -> Vec<(TypedTransaction, Signature)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == method)
            .count()
    }

    fn record(&self, method: &str) {
        self.state.lock().unwrap().calls.push(method.to_string());
    }

    fn rpc_error(&self, message: &str) -> RelayerError {
        RelayerError::Rpc {
            role: self.role,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl ChainEndpoint for FakeChain {
    fn role(&self) -> ChainRole {
        self.role
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn contract(&self) -> &ContractBinding {
        &self.binding
    }

    async fn latest_block_number(&self) -> RelayerResult<u64> {
        self.record("eth_blockNumber");
        Ok(*self.latest_block.lock().unwrap())
    }

    async fn get_logs(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> RelayerResult<Vec<Log>> {
        self.record("eth_getLogs");
        let topic = self.binding.topic(kind)?;
        let state = self.state.lock().unwrap();
        if let Some(span) = state.max_log_span {
            if to_block - from_block + 1 > span {
                return Err(self.rpc_error("query returned more than 10000 results"));
            }
        }
        Ok(state
            .logs
            .iter()
            .filter(|l| l.topics.first() == Some(&topic))
            .filter(|l| {
                let block = l.block_number.map(|b| b.as_u64()).unwrap_or_default();
                block >= from_block && block <= to_block
            })
            .cloned()
            .collect())
    }

    async fn get_transaction_count(&self, _address: Address) -> RelayerResult<u64> {
        self.record("eth_getTransactionCount");
        Ok(self.state.lock().unwrap().pending_nonce)
    }

    async fn gas_price(&self) -> RelayerResult<U256> {
        self.record("eth_gasPrice");
        Ok(self.gas_price)
    }

    async fn estimate_gas(&self, _call: &TypedTransaction) -> RelayerResult<U256> {
        self.record("eth_estimateGas");
        let estimate = self.state.lock().unwrap().estimate;
        estimate.ok_or_else(|| self.rpc_error("execution reverted"))
    }

    async fn send_raw_transaction(&self, signed: Bytes) -> RelayerResult<H256> {
        self.record("eth_sendRawTransaction");
        let mut state = self.state.lock().unwrap();
        if state.send_failures > 0 {
            state.send_failures -= 1;
            return Err(RelayerError::Submission {
                role: self.role,
                message: "connection reset".to_string(),
            });
        }
        let rlp = ethers::utils::rlp::Rlp::new(signed.as_ref());
        let decoded = TypedTransaction::decode_signed(&rlp)
            .map_err(|e| RelayerError::Submission {
                role: self.role,
                message: e.to_string(),
            })?;
        state.sent.push(decoded);
        state.pending_nonce += 1;
        Ok(H256::from(keccak256(signed.as_ref())))
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        timeout: Duration,
    ) -> RelayerResult<TransactionReceipt> {
        self.record("eth_getTransactionReceipt");
        let status = match *self.receipt_mode.lock().unwrap() {
            ReceiptMode::Success => 1u64,
            ReceiptMode::Reverted => 0u64,
            ReceiptMode::Timeout => {
                return Err(RelayerError::ReceiptTimeout {
                    tx_hash: format!("{:?}", tx_hash),
                    waited_secs: timeout.as_secs(),
                })
            }
        };
        Ok(TransactionReceipt {
            transaction_hash: tx_hash,
            status: Some(U64::from(status)),
            block_number: Some(U64::from(*self.latest_block.lock().unwrap() + 1)),
            ..Default::default()
        })
    }
}

/// Records requested delays instead of sleeping
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

/// Hands out prepared fake chains; a missing role fails to connect
#[derive(Default)]
pub struct FakeConnector {
    chains: HashMap<ChainRole, Arc<FakeChain>>,
}

impl FakeConnector {
    pub fn new(source: Arc<FakeChain>, destination: Arc<FakeChain>) -> Self {
        let mut chains = HashMap::new();
        chains.insert(ChainRole::Source, source);
        chains.insert(ChainRole::Destination, destination);
        Self { chains }
    }

    pub fn without(mut self, role: ChainRole) -> Self {
        self.chains.remove(&role);
        self
    }
}

#[async_trait]
impl EndpointConnector for FakeConnector {
    async fn connect(&self, role: ChainRole) -> RelayerResult<Arc<dyn ChainEndpoint>> {
        match self.chains.get(&role) {
            Some(chain) => Ok(chain.clone() as Arc<dyn ChainEndpoint>),
            None => Err(RelayerError::Connectivity {
                role,
                message: "connection refused".to_string(),
            }),
        }
    }
}
