//! Bridge event types and log decoding
//!
//! `Deposit` is emitted by the source contract and `Unwrap` by the destination contract.
//! Both are decoded against the ABI from the contract info file.

use crate::chain::{ChainRole, EventKind};
use crate::error::{RelayerError, RelayerResult};

use ethers::abi::{Event, RawLog, Token};
use ethers::types::{Address, Log, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `(tx_hash, log_index)`: unique and stable for one on-chain log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    pub tx_hash: H256,
    pub log_index: u64,
}

impl EventId {
    pub fn new(tx_hash: H256, log_index: u64) -> Self {
        Self { tx_hash, log_index }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.tx_hash, self.log_index)
    }
}

impl FromStr for EventId {
    type Err = RelayerError;

    /// Parse the `0x<tx_hash>:<log_index>` form printed by `Display`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| RelayerError::EventParsing(format!("event id {:?}: {}", s, why));
        let (hash, index) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected <tx_hash>:<log_index>"))?;
        let bytes = hex::decode(hash.trim_start_matches("0x")).map_err(|e| invalid(&e.to_string()))?;
        if bytes.len() != 32 {
            return Err(invalid("tx hash must be 32 bytes"));
        }
        let log_index = index.parse::<u64>().map_err(|e| invalid(&e.to_string()))?;
        Ok(Self::new(H256::from_slice(&bytes), log_index))
    }
}

/// Events emitted by the bridge contracts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeEvent {
    /// Asset locked on the source chain
    Deposit {
        token: Address,
        recipient: Address,
        amount: U256,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
    },

    /// Wrapped asset burned on the destination chain
    Unwrap {
        underlying_token: Address,
        to: Address,
        amount: U256,
        tx_hash: H256,
        log_index: u64,
        block_number: u64,
    },
}

/// Function call mirroring an event on the opposite chain
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorCall {
    pub function: &'static str,
    pub args: Vec<Token>,
}

impl BridgeEvent {
    /// Decode a log of `kind` using the event definition from the contract ABI.
    pub fn from_log(kind: EventKind, event: &Event, log: &Log) -> RelayerResult<Self> {
        let tx_hash = log
            .transaction_hash
            .ok_or_else(|| RelayerError::EventParsing("log has no transaction hash".into()))?;
        let log_index = log
            .log_index
            .ok_or_else(|| RelayerError::EventParsing("log has no log index".into()))?
            .as_u64();
        let block_number = log
            .block_number
            .ok_or_else(|| RelayerError::EventParsing("log has no block number".into()))?
            .as_u64();

        let parsed = event
            .parse_log(RawLog {
                topics: log.topics.clone(),
                data: log.data.to_vec(),
            })
            .map_err(|e| {
                RelayerError::EventParsing(format!("{} log {:?}: {}", kind.name(), tx_hash, e))
            })?;

        let param = |name: &str| {
            parsed
                .params
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.value.clone())
                .ok_or_else(|| {
                    RelayerError::EventParsing(format!("{} log missing `{}`", kind.name(), name))
                })
        };
        let address = |name: &str| match param(name)? {
            Token::Address(a) => Ok(a),
            other => Err(RelayerError::EventParsing(format!(
                "`{}` is not an address: {:?}",
                name, other
            ))),
        };
        let amount = match param("amount")? {
            Token::Uint(v) => v,
            other => {
                return Err(RelayerError::EventParsing(format!(
                    "`amount` is not an unsigned integer: {:?}",
                    other
                )))
            }
        };

        Ok(match kind {
            EventKind::Deposit => BridgeEvent::Deposit {
                token: address("token")?,
                recipient: address("recipient")?,
                amount,
                tx_hash,
                log_index,
                block_number,
            },
            EventKind::Unwrap => BridgeEvent::Unwrap {
                underlying_token: address("underlying_token")?,
                to: address("to")?,
                amount,
                tx_hash,
                log_index,
                block_number,
            },
        })
    }

    pub fn id(&self) -> EventId {
        match self {
            BridgeEvent::Deposit {
                tx_hash, log_index, ..
            }
            | BridgeEvent::Unwrap {
                tx_hash, log_index, ..
            } => EventId::new(*tx_hash, *log_index),
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            BridgeEvent::Deposit { block_number, .. }
            | BridgeEvent::Unwrap { block_number, .. } => *block_number,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            BridgeEvent::Deposit { .. } => EventKind::Deposit,
            BridgeEvent::Unwrap { .. } => EventKind::Unwrap,
        }
    }

    /// Chain the mirror transaction goes to
    pub fn target_role(&self) -> ChainRole {
        match self {
            BridgeEvent::Deposit { .. } => ChainRole::Destination,
            BridgeEvent::Unwrap { .. } => ChainRole::Source,
        }
    }

    /// Sort key fixing processing order
    pub fn position(&self) -> (u64, u64) {
        (self.block_number(), self.id().log_index)
    }

    /// `wrap(token, recipient, amount)` or `withdraw(underlying_token, to, amount)`,
    /// values passed through unchanged
    pub fn mirror_call(&self) -> MirrorCall {
        match self {
            BridgeEvent::Deposit {
                token,
                recipient,
                amount,
                ..
            } => MirrorCall {
                function: EventKind::Deposit.mirror_function(),
                args: vec![
                    Token::Address(*token),
                    Token::Address(*recipient),
                    Token::Uint(*amount),
                ],
            },
            BridgeEvent::Unwrap {
                underlying_token,
                to,
                amount,
                ..
            } => MirrorCall {
                function: EventKind::Unwrap.mirror_function(),
                args: vec![
                    Token::Address(*underlying_token),
                    Token::Address(*to),
                    Token::Uint(*amount),
                ],
            },
        }
    }
}
