//! Dedup ledger contract shared by the storage backends

use crate::chain::ChainRole;
use crate::error::{RelayerError, RelayerResult};
use crate::events::EventId;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a ledger record. Only `Submitting` may change, and only once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Submitting,
    Relayed,
    Failed,
    SkippedNoKey,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Submitting => "submitting",
            RecordStatus::Relayed => "relayed",
            RecordStatus::Failed => "failed",
            RecordStatus::SkippedNoKey => "skipped_no_key",
        }
    }

    pub fn is_final(self) -> bool {
        !matches!(self, RecordStatus::Submitting)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitting" => Ok(RecordStatus::Submitting),
            "relayed" => Ok(RecordStatus::Relayed),
            "failed" => Ok(RecordStatus::Failed),
            "skipped_no_key" => Ok(RecordStatus::SkippedNoKey),
            other => Err(RelayerError::Internal(format!(
                "unknown ledger status {:?}",
                other
            ))),
        }
    }
}

/// Result of handling one admitted event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Mirror transaction accepted by the node. `detail` notes a missing or
    /// reverted receipt.
    Relayed {
        tx_hash: H256,
        detail: Option<String>,
    },
    Failed {
        reason: String,
    },
    SkippedNoKey,
}

impl Outcome {
    pub fn status(&self) -> RecordStatus {
        match self {
            Outcome::Relayed { .. } => RecordStatus::Relayed,
            Outcome::Failed { .. } => RecordStatus::Failed,
            Outcome::SkippedNoKey => RecordStatus::SkippedNoKey,
        }
    }

    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            Outcome::Relayed { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Outcome::Relayed { detail, .. } => detail.as_deref(),
            Outcome::Failed { reason } => Some(reason),
            Outcome::SkippedNoKey => None,
        }
    }
}

/// Stored state of one event
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedRecord {
    pub id: EventId,
    /// Chain the mirror transaction targets
    pub target: ChainRole,
    pub status: RecordStatus,
    pub tx_hash: Option<H256>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable record of handled events, keyed by `(tx_hash, log_index)`.
///
/// `mark_processing` is the single admission point: exactly one caller, across
/// processes sharing the store, gets `true` for a given id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DedupLedger: Send + Sync {
    async fn already_processed(&self, id: &EventId) -> RelayerResult<bool>;

    /// Insert `id` as `Submitting` unless present. Returns whether this call inserted it.
    async fn mark_processing(&self, id: &EventId, target: ChainRole) -> RelayerResult<bool>;

    /// Move a `Submitting` record to its final status.
    async fn finalize(&self, id: &EventId, outcome: &Outcome) -> RelayerResult<()>;

    async fn get(&self, id: &EventId) -> RelayerResult<Option<ProcessedRecord>>;

    /// Records still `Submitting` for `target`, oldest first
    async fn in_flight(&self, target: ChainRole) -> RelayerResult<Vec<ProcessedRecord>>;
}

pub(crate) fn transition_error(from: Option<RecordStatus>, outcome: &Outcome) -> RelayerError {
    RelayerError::InvalidStateTransition {
        from: from.map_or_else(|| "absent".to_string(), |s| s.to_string()),
        to: outcome.status().to_string(),
    }
}

#[cfg(test)]
pub(crate) mod contract_tests {
    //! Behaviour every backend must share

    use super::*;
    use std::sync::Arc;

    pub fn id(n: u64) -> EventId {
        EventId::new(H256::from_low_u64_be(n), n % 3)
    }

    pub async fn admits_once(ledger: &dyn DedupLedger) {
        let e = id(1);
        assert!(!ledger.already_processed(&e).await.unwrap());
        assert!(ledger
            .mark_processing(&e, ChainRole::Destination)
            .await
            .unwrap());
        assert!(!ledger
            .mark_processing(&e, ChainRole::Destination)
            .await
            .unwrap());
        assert!(ledger.already_processed(&e).await.unwrap());

        let record = ledger.get(&e).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Submitting);
        assert_eq!(record.target, ChainRole::Destination);
    }

    pub async fn finalizes_once(ledger: &dyn DedupLedger) {
        let e = id(2);
        ledger.mark_processing(&e, ChainRole::Source).await.unwrap();
        let relayed = Outcome::Relayed {
            tx_hash: H256::repeat_byte(0xab),
            detail: Some("receipt status 0 (reverted)".into()),
        };
        ledger.finalize(&e, &relayed).await.unwrap();

        let record = ledger.get(&e).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Relayed);
        assert_eq!(record.tx_hash, Some(H256::repeat_byte(0xab)));
        assert_eq!(record.detail.as_deref(), Some("receipt status 0 (reverted)"));

        let again = ledger
            .finalize(
                &e,
                &Outcome::Failed {
                    reason: "late".into(),
                },
            )
            .await;
        assert!(matches!(
            again,
            Err(RelayerError::InvalidStateTransition { .. })
        ));
        assert!(ledger
            .finalize(&id(99), &Outcome::SkippedNoKey)
            .await
            .is_err());
    }

    pub async fn lists_in_flight(ledger: &dyn DedupLedger) {
        for n in 10..13 {
            ledger
                .mark_processing(&id(n), ChainRole::Destination)
                .await
                .unwrap();
        }
        ledger
            .mark_processing(&id(20), ChainRole::Source)
            .await
            .unwrap();
        ledger
            .finalize(&id(11), &Outcome::SkippedNoKey)
            .await
            .unwrap();

        let pending: Vec<_> = ledger
            .in_flight(ChainRole::Destination)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(pending, vec![id(10), id(12)]);
    }

    pub async fn concurrent_admission_has_one_winner(ledger: Arc<dyn DedupLedger>) {
        let e = id(7);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .mark_processing(&e, ChainRole::Destination)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
