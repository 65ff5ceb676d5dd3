//! Warden relayer - mirrors bridge events between a source and a destination chain
//!
//! A pass scans one chain's bridge contract for recent events (`Deposit` on the source
//! chain, `Unwrap` on the destination chain) and submits the matching call (`wrap` or
//! `withdraw`) on the other chain, signed by that chain's warden key. A persistent ledger
//! guarantees each event is relayed at most once.

pub mod chain;
pub mod config;
pub mod coordination;
pub mod error;
pub mod events;
pub mod metrics;
pub mod retry;
pub mod state;
pub mod tx;

#[cfg(test)]
pub mod test_utils;

pub use chain::ChainRole;
pub use config::Settings;
pub use coordination::{PassSummary, RelayEngine};
pub use error::{RelayerError, RelayerResult};

use std::path::Path;
use tracing::{error, info};

/// Run one pass for `chain` (`"source"` or `"destination"`) with settings from the
/// environment. Returns 1 when the pass completed and 0 otherwise.
pub async fn scan_pass(chain: &str, contract_info: &Path) -> i32 {
    let role = match chain.parse::<ChainRole>() {
        Ok(role) => role,
        Err(e) => {
            error!("{}", e);
            return 0;
        }
    };
    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            return 0;
        }
    };
    scan_pass_with(role, contract_info, settings).await
}

/// [`scan_pass`] with explicit settings
pub async fn scan_pass_with(role: ChainRole, contract_info: &Path, settings: Settings) -> i32 {
    let engine = match RelayEngine::bootstrap(settings, contract_info).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("Cannot start {} pass: {}", role, e);
            return 0;
        }
    };
    pass_status(role, engine.run_pass(role).await)
}

/// Map a pass result to the `scan_pass` status code
pub fn pass_status(role: ChainRole, result: RelayerResult<PassSummary>) -> i32 {
    match result {
        Ok(summary) => {
            info!("{} pass complete", role);
            if !summary.is_clean() {
                info!("Pass had failures, gaps or deferred events: {}", summary);
            }
            1
        }
        Err(e) => {
            error!("{} pass aborted: {}", role, e);
            0
        }
    }
}
