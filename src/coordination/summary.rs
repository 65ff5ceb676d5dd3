//! Per-pass counters reported by the engine

use crate::chain::ChainRole;
use crate::state::Outcome;

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub chain: ChainRole,
    pub from_block: u64,
    pub to_block: u64,
    /// Events decoded in the window
    pub found: usize,
    pub admitted: usize,
    pub already_processed: usize,
    pub relayed: usize,
    pub failed: usize,
    pub skipped_no_key: usize,
    /// Events left unadmitted because of shutdown or the pass deadline
    pub deferred: usize,
    pub scan_gaps: usize,
    pub missed_blocks: u64,
    /// Ledger records of earlier passes still marked submitting
    pub stale_in_flight: usize,
}

impl PassSummary {
    pub fn new(chain: ChainRole, from_block: u64, to_block: u64) -> Self {
        Self {
            chain,
            from_block,
            to_block,
            found: 0,
            admitted: 0,
            already_processed: 0,
            relayed: 0,
            failed: 0,
            skipped_no_key: 0,
            deferred: 0,
            scan_gaps: 0,
            missed_blocks: 0,
            stale_in_flight: 0,
        }
    }

    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Relayed { .. } => self.relayed += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::SkippedNoKey => self.skipped_no_key += 1,
        }
    }

    /// Every found event was handled and nothing was missed
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.deferred == 0 && self.scan_gaps == 0
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pass over blocks {}..={}: found {}, admitted {}, already processed {}, \
             relayed {}, failed {}, skipped (no key) {}, deferred {}, gaps {} ({} blocks), \
             stale in flight {}",
            self.chain,
            self.from_block,
            self.to_block,
            self.found,
            self.admitted,
            self.already_processed,
            self.relayed,
            self.failed,
            self.skipped_no_key,
            self.deferred,
            self.scan_gaps,
            self.missed_blocks,
            self.stale_in_flight
        )
    }
}
