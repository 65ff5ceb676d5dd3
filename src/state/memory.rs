//! Process-local ledger for dry runs and tests

use super::ledger::{transition_error, DedupLedger, Outcome, ProcessedRecord, RecordStatus};
use crate::chain::ChainRole;
use crate::error::RelayerResult;
use crate::events::EventId;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ledger kept in a `DashMap`; forgets everything on exit.
#[derive(Default)]
pub struct MemoryLedger {
    records: DashMap<EventId, (u64, ProcessedRecord)>,
    sequence: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl DedupLedger for MemoryLedger {
    async fn already_processed(&self, id: &EventId) -> RelayerResult<bool> {
        Ok(self.records.contains_key(id))
    }

    async fn mark_processing(&self, id: &EventId, target: ChainRole) -> RelayerResult<bool> {
        // The entry holds the shard lock, so check and insert are one step
        match self.records.entry(*id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
                slot.insert((
                    seq,
                    ProcessedRecord {
                        id: *id,
                        target,
                        status: RecordStatus::Submitting,
                        tx_hash: None,
                        detail: None,
                        created_at: now,
                        updated_at: now,
                    },
                ));
                Ok(true)
            }
        }
    }

    async fn finalize(&self, id: &EventId, outcome: &Outcome) -> RelayerResult<()> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| transition_error(None, outcome))?;
        let record = &mut entry.value_mut().1;
        if record.status.is_final() {
            return Err(transition_error(Some(record.status), outcome));
        }
        record.status = outcome.status();
        record.tx_hash = outcome.tx_hash();
        record.detail = outcome.detail().map(str::to_string);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, id: &EventId) -> RelayerResult<Option<ProcessedRecord>> {
        Ok(self.records.get(id).map(|r| r.value().1.clone()))
    }

    async fn in_flight(&self, target: ChainRole) -> RelayerResult<Vec<ProcessedRecord>> {
        let mut pending: Vec<(u64, ProcessedRecord)> = self
            .records
            .iter()
            .filter(|r| r.value().1.target == target && !r.value().1.status.is_final())
            .map(|r| r.value().clone())
            .collect();
        pending.sort_by_key(|(seq, _)| *seq);
        Ok(pending.into_iter().map(|(_, record)| record).collect())
    }
}
