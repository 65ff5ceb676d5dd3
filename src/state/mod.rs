//! Dedup ledger persistence
//!
//! Handles:
//! - Atomic admission of events before any transaction is sent
//! - Final outcome of every admitted event
//! - Listing records left in flight by an interrupted pass
//!
//! A record left `submitting` is never resent automatically. Once the operator has
//! checked the target chain, [`resolve_in_flight`] (the binary's `--resolve` flag)
//! records what actually happened.

mod ledger;
mod memory;
mod sqlite;

pub use ledger::{DedupLedger, Outcome, ProcessedRecord, RecordStatus};
pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

#[cfg(test)]
pub use ledger::MockDedupLedger;

use crate::chain::ChainRole;
use crate::config::{LedgerBackend, LedgerConfig};
use crate::error::{RelayerError, RelayerResult};
use crate::events::EventId;

use dashmap::DashMap;
use ethers::types::H256;
use lazy_static::lazy_static;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

lazy_static! {
    /// In-memory ledgers outlive engines: one per configured path for the whole process
    static ref MEMORY_LEDGERS: DashMap<PathBuf, Arc<MemoryLedger>> = DashMap::new();
}

/// Open the configured ledger backend
pub async fn open_ledger(config: &LedgerConfig) -> RelayerResult<Arc<dyn DedupLedger>> {
    match config.backend {
        LedgerBackend::Sqlite => Ok(Arc::new(
            SqliteLedger::open(&config.path, config.max_connections).await?,
        )),
        LedgerBackend::Memory => {
            let ledger = MEMORY_LEDGERS
                .entry(config.path.clone())
                .or_insert_with(|| {
                    warn!("Using in-memory ledger; processed events are forgotten on exit");
                    Arc::new(MemoryLedger::new())
                })
                .clone();
            Ok(ledger as Arc<dyn DedupLedger>)
        }
    }
}

/// Settle a record left `submitting` for `target` after checking the chain by hand.
///
/// `relay_tx` is the mirror transaction found on chain; without one the record
/// becomes `failed` so the event stays unrelayed.
pub async fn resolve_in_flight(
    ledger: &dyn DedupLedger,
    id: &EventId,
    target: ChainRole,
    relay_tx: Option<H256>,
) -> RelayerResult<Outcome> {
    let record = ledger
        .get(id)
        .await?
        .ok_or_else(|| RelayerError::Config(format!("{} is not in the ledger", id)))?;
    if record.target != target {
        return Err(RelayerError::Config(format!(
            "{} targets the {} chain, not {}",
            id, record.target, target
        )));
    }

    let outcome = match relay_tx {
        Some(tx_hash) => Outcome::Relayed {
            tx_hash,
            detail: Some("resolved by operator".to_string()),
        },
        None => Outcome::Failed {
            reason: "resolved by operator: no mirror transaction on chain".to_string(),
        },
    };
    ledger.finalize(id, &outcome).await?;
    info!("Resolved {} as {}", id, outcome.status());
    Ok(outcome)
}
