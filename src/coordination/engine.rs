//! Relay engine: one scan-and-relay pass for one chain role

use super::summary::PassSummary;
use crate::chain::{ChainRole, EndpointConnector, EventScanner, RpcConnector};
use crate::config::{ContractInfo, Settings};
use crate::error::{RelayerError, RelayerResult};
use crate::metrics;
use crate::retry::{Sleeper, TokioSleeper};
use crate::state::{open_ledger, DedupLedger};
use crate::tx::RelayExecutor;

use dashmap::DashMap;
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

lazy_static! {
    /// One pass per role at a time, across every engine in the process
    static ref PASS_LOCKS: DashMap<ChainRole, Arc<Mutex<()>>> = DashMap::new();
}

/// Bridge relay engine
pub struct RelayEngine {
    contracts: ContractInfo,
    /// Blocks behind the head included in each window
    window_size: u64,
    pass_deadline: Option<Duration>,
    metrics_textfile: Option<PathBuf>,
    ledger: Arc<dyn DedupLedger>,
    connector: Arc<dyn EndpointConnector>,
    scanner: EventScanner,
    executor: RelayExecutor,
    /// Shutdown flag
    shutdown: Arc<RwLock<bool>>,
}

impl RelayEngine {
    pub fn new(
        settings: &Settings,
        contracts: ContractInfo,
        ledger: Arc<dyn DedupLedger>,
        connector: Arc<dyn EndpointConnector>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            contracts,
            window_size: settings.relayer.window_size,
            pass_deadline: settings.relayer.pass_deadline_secs.map(Duration::from_secs),
            metrics_textfile: settings.metrics.textfile_path.clone(),
            ledger,
            connector,
            scanner: EventScanner::new(settings.scanner.clone(), sleeper.clone()),
            executor: RelayExecutor::new(settings.relayer.clone(), sleeper),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Build the production engine: contract info file, configured ledger, RPC connector.
    pub async fn bootstrap(settings: Settings, contract_info: &Path) -> RelayerResult<Self> {
        let contracts = ContractInfo::load(contract_info)?;
        let ledger = open_ledger(&settings.ledger).await?;
        let connector = Arc::new(RpcConnector::new(settings.clone(), contracts.clone()));
        Ok(Self::new(
            &settings,
            contracts,
            ledger,
            connector,
            Arc::new(TokioSleeper),
        ))
    }

    /// Run one pass for `role` and export metrics, whether or not it completed.
    pub async fn run_pass(&self, role: ChainRole) -> RelayerResult<PassSummary> {
        let started = Instant::now();
        let result = self.pass(role, started).await;
        metrics::record_pass_duration(role, started.elapsed().as_secs_f64());

        if let Some(path) = &self.metrics_textfile {
            if let Err(e) = metrics::write_textfile(path) {
                warn!("Failed to export metrics: {}", e);
            }
        }
        result
    }

    async fn pass(&self, role: ChainRole, started: Instant) -> RelayerResult<PassSummary> {
        let lock = PASS_LOCKS
            .entry(role)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        let deadline = self.pass_deadline.map(|d| started + d);

        let target_role = role.counterpart();
        let scanned = self.connector.connect(role).await?;
        let target = self.connector.connect(target_role).await?;

        let latest = scanned
            .latest_block_number()
            .await
            .map_err(|e| RelayerError::Connectivity {
                role,
                message: e.to_string(),
            })?;
        let from_block = latest.saturating_sub(self.window_size);
        let kind = role.scanned_event();
        info!(
            "Scanning {} chain blocks {}..={} for {} events",
            role,
            from_block,
            latest,
            kind.name()
        );

        let report = self
            .scanner
            .scan(scanned.as_ref(), kind, from_block, latest)
            .await
            .map_err(|e| RelayerError::Config(format!("{} contract: {}", role, e)))?;
        metrics::record_scanned_to(role, latest);
        metrics::record_events_found(role, kind.name(), report.events.len());

        let mut summary = PassSummary::new(role, from_block, latest);
        summary.found = report.events.len();
        summary.scan_gaps = report.gaps.len();
        summary.missed_blocks = report.missed_blocks();

        let stale = self.ledger.in_flight(target_role).await?;
        for record in &stale {
            warn!(
                "{} was left submitting to {} chain at {}; not resending, check the chain and settle it with --resolve",
                record.id, record.target, record.created_at
            );
        }
        summary.stale_in_flight = stale.len();

        let warden = self.contracts.warden_key(target_role);
        let total = report.events.len();

        for (idx, event) in report.events.iter().enumerate() {
            let past_deadline = deadline.map_or(false, |d| Instant::now() >= d);
            if past_deadline || self.is_stopping().await {
                summary.deferred = total - idx;
                info!(
                    "Stopping {} pass early, deferring {} event(s) to the next pass",
                    role, summary.deferred
                );
                break;
            }

            let id = event.id();
            if self.ledger.already_processed(&id).await?
                || !self.ledger.mark_processing(&id, target_role).await?
            {
                debug!("{} already processed", id);
                summary.already_processed += 1;
                continue;
            }
            summary.admitted += 1;
            metrics::record_admitted(role);

            let outcome = self.executor.relay(event, target.as_ref(), warden).await;
            if let Err(e) = self.ledger.finalize(&id, &outcome).await {
                if e.aborts_pass() {
                    return Err(e);
                }
                error!("Could not record outcome of {}: {}", id, e);
            }
            metrics::record_outcome(role, outcome.status().as_str());
            summary.record(&outcome);
        }

        info!("{}", summary);
        Ok(summary)
    }

    /// Ask running passes to stop before their next event
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Relay engine shutdown initiated");
    }

    async fn is_stopping(&self) -> bool {
        *self.shutdown.read().await
    }
}
