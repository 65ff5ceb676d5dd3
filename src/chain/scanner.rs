//! Event scanner: fetches bridge logs for a block window with chunking, bisection on
//! failure, a trailing-window last resort and bounded backoff between attempts.

use super::{ChainEndpoint, EventKind};
use crate::config::ScannerConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::events::BridgeEvent;
use crate::metrics;
use crate::retry::{Backoff, Sleeper};

use ethers::types::Log;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inclusive block range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        debug_assert!(from <= to, "empty block range {}..={}", from, to);
        Self { from, to }
    }

    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }

    /// Halves of the range, `None` for a single block
    pub fn split(&self) -> Option<(BlockRange, BlockRange)> {
        if self.len() < 2 {
            return None;
        }
        let mid = self.from + self.len() / 2 - 1;
        Some((
            BlockRange::new(self.from, mid),
            BlockRange::new(mid + 1, self.to),
        ))
    }

    pub fn chunks(&self, max_len: u64) -> Vec<BlockRange> {
        let max_len = max_len.max(1);
        let mut chunks = Vec::new();
        let mut from = self.from;
        loop {
            let to = from.saturating_add(max_len - 1).min(self.to);
            chunks.push(BlockRange::new(from, to));
            if to == self.to {
                break;
            }
            from = to + 1;
        }
        chunks
    }

    pub fn overlaps(&self, other: &BlockRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    /// Parts of `self` not covered by `other`
    pub fn subtract(&self, other: &BlockRange) -> Vec<BlockRange> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let mut rest = Vec::new();
        if self.from < other.from {
            rest.push(BlockRange::new(self.from, other.from - 1));
        }
        if self.to > other.to {
            rest.push(BlockRange::new(other.to + 1, self.to));
        }
        rest
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.from, self.to)
    }
}

/// Result of scanning one window
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Ascending by block number, then log index
    pub events: Vec<BridgeEvent>,
    /// Sub-ranges whose logs could not be fetched
    pub gaps: Vec<BlockRange>,
    /// Removed or undecodable logs
    pub skipped_logs: usize,
    pub rpc_calls: u32,
}

impl ScanReport {
    pub fn missed_blocks(&self) -> u64 {
        self.gaps.iter().map(BlockRange::len).sum()
    }
}

enum Fetch {
    Logs(Vec<Log>),
    Failed(RelayerError),
    BudgetExhausted,
}

struct ScanState {
    logs: Vec<Log>,
    gaps: Vec<BlockRange>,
    backoff: Backoff,
    last_failed: bool,
    rpc_calls: u32,
}

pub struct EventScanner {
    config: ScannerConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl EventScanner {
    pub fn new(config: ScannerConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { config, sleeper }
    }

    /// Scan `from_block..=to_block` for `kind` events.
    ///
    /// RPC failures never fail the scan; blocks that stay unreachable are returned as
    /// gaps. Only a contract ABI lacking the event is an error.
    pub async fn scan(
        &self,
        endpoint: &dyn ChainEndpoint,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> RelayerResult<ScanReport> {
        let event_abi = endpoint.contract().event(kind)?.clone();
        if from_block > to_block {
            return Ok(ScanReport::default());
        }

        let window = BlockRange::new(from_block, to_block);
        let mut state = ScanState {
            logs: Vec::new(),
            gaps: Vec::new(),
            backoff: self.config.backoff.start(),
            last_failed: false,
            rpc_calls: 0,
        };

        for chunk in window.chunks(self.config.max_block_range) {
            self.scan_range(endpoint, kind, chunk, 0, &mut state).await;
        }

        if !state.gaps.is_empty() {
            self.scan_trailing_window(endpoint, kind, window, &mut state)
                .await;
        }

        let role = endpoint.role();
        let gaps = coalesce(state.gaps);
        for gap in &gaps {
            let err = RelayerError::ScanRange {
                from_block: gap.from,
                to_block: gap.to,
                message: "all fallbacks failed".to_string(),
            };
            warn!(
                "{} chain scan gap: {}; {} events in these blocks are missed by this pass",
                role,
                err,
                kind.name()
            );
            metrics::record_scan_gap(role, gap.len());
        }

        let mut events = Vec::with_capacity(state.logs.len());
        let mut skipped_logs = 0;
        for log in &state.logs {
            if log.removed == Some(true) {
                debug!("Skipping removed log {:?}", log.transaction_hash);
                skipped_logs += 1;
                continue;
            }
            match BridgeEvent::from_log(kind, &event_abi, log) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!("Skipping undecodable {} log: {}", kind.name(), e);
                    skipped_logs += 1;
                }
            }
        }

        events.sort_by_key(BridgeEvent::position);
        events.dedup_by_key(|e| e.id());

        debug!(
            "{} chain: {} {} events in {} ({} RPC calls, {} gaps)",
            role,
            events.len(),
            kind.name(),
            window,
            state.rpc_calls,
            gaps.len()
        );

        Ok(ScanReport {
            events,
            gaps,
            skipped_logs,
            rpc_calls: state.rpc_calls,
        })
    }

    fn scan_range<'a>(
        &'a self,
        endpoint: &'a dyn ChainEndpoint,
        kind: EventKind,
        range: BlockRange,
        depth: u32,
        state: &'a mut ScanState,
    ) -> BoxFuture<'a, ()> {
        async move {
            match self.fetch(endpoint, kind, range, state).await {
                Fetch::Logs(logs) => state.logs.extend(logs),
                Fetch::BudgetExhausted => state.gaps.push(range),
                Fetch::Failed(e) => match range.split() {
                    Some((left, right)) if depth < self.config.max_bisect_depth => {
                        debug!("Bisecting {} after failure: {}", range, e);
                        self.scan_range(endpoint, kind, left, depth + 1, state)
                            .await;
                        self.scan_range(endpoint, kind, right, depth + 1, state)
                            .await;
                    }
                    _ => state.gaps.push(range),
                },
            }
        }
        .boxed()
    }

    /// Last resort: the newest blocks matter most, retry them as one small window.
    async fn scan_trailing_window(
        &self,
        endpoint: &dyn ChainEndpoint,
        kind: EventKind,
        window: BlockRange,
        state: &mut ScanState,
    ) {
        let size = self.config.trailing_window.max(1);
        let trailing = BlockRange::new(
            window.to.saturating_sub(size - 1).max(window.from),
            window.to,
        );
        if !state.gaps.iter().any(|g| g.overlaps(&trailing)) {
            return;
        }

        info!(
            "{} chain: falling back to trailing window {}",
            endpoint.role(),
            trailing
        );
        if let Fetch::Logs(logs) = self.fetch(endpoint, kind, trailing, state).await {
            state.logs.extend(logs);
            state.gaps = state
                .gaps
                .iter()
                .flat_map(|g| g.subtract(&trailing))
                .collect();
        }
    }

    async fn fetch(
        &self,
        endpoint: &dyn ChainEndpoint,
        kind: EventKind,
        range: BlockRange,
        state: &mut ScanState,
    ) -> Fetch {
        if state.last_failed {
            match state.backoff.next_delay() {
                Some(delay) => self.sleeper.sleep(delay).await,
                None => return Fetch::BudgetExhausted,
            }
        }

        state.rpc_calls += 1;
        match endpoint.get_logs(kind, range.from, range.to).await {
            Ok(logs) => {
                state.last_failed = false;
                Fetch::Logs(logs)
            }
            Err(e) => {
                warn!(
                    "eth_getLogs {} on {} chain failed: {}",
                    range,
                    endpoint.role(),
                    e
                );
                metrics::record_rpc_failure(endpoint.role(), "eth_getLogs");
                state.last_failed = true;
                Fetch::Failed(e)
            }
        }
    }
}

/// Sort and merge adjacent or overlapping ranges
fn coalesce(mut ranges: Vec<BlockRange>) -> Vec<BlockRange> {
    ranges.sort_by_key(|r| r.from);
    let mut merged: Vec<BlockRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.from <= last.to.saturating_add(1) => {
                last.to = last.to.max(range.to);
            }
            _ => merged.push(range),
        }
    }
    merged
}
