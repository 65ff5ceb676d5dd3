//! Warden Relayer - one scan-and-relay pass per invocation
//!
//! Scans the chosen chain's bridge contract for recent events and mirrors them on the
//! counterpart chain. Meant to be run periodically (cron, systemd timer).

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use ethers::types::H256;
use warden_relayer::events::EventId;
use warden_relayer::state::{open_ledger, resolve_in_flight};
use warden_relayer::{pass_status, ChainRole, RelayEngine, Settings};

#[derive(Parser, Debug)]
#[command(name = "warden-relayer")]
#[command(about = "Relay bridge events between the source and destination chains", long_about = None)]
#[command(version)]
struct Args {
    /// Chain to scan: `source` relays Deposits, `destination` relays Unwraps
    chain: String,

    /// Contract addresses, ABIs and warden keys
    #[arg(long, default_value = "contract_info.json")]
    contract_info: PathBuf,

    /// Relayer settings (defaults to $RELAYER_CONFIG, then config/default.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Settle an event left submitting (`<tx_hash>:<log_index>`) instead of running a pass
    #[arg(long, value_name = "EVENT_ID")]
    resolve: Option<String>,

    /// Mirror transaction found on the counterpart chain for `--resolve`; without it the
    /// event is recorded as failed
    #[arg(long, value_name = "TX_HASH", requires = "resolve")]
    relay_tx: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.log_json);

    info!("Starting Warden Relayer v{}", env!("CARGO_PKG_VERSION"));

    // scan_pass semantics: 1 = pass completed; exit 0 in that case
    let status = match run(args).await {
        Ok(status) => status,
        Err(e) => {
            tracing::error!("{:#}", e);
            0
        }
    };
    std::process::exit(if status == 1 { 0 } else { 1 });
}

async fn run(args: Args) -> Result<i32> {
    let role: ChainRole = args.chain.parse()?;

    let settings = match &args.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("Failed to load relayer settings")?;

    if let Some(event) = &args.resolve {
        return resolve(role, event, args.relay_tx.as_deref(), &settings).await;
    }

    let engine = Arc::new(
        RelayEngine::bootstrap(settings, &args.contract_info)
            .await
            .with_context(|| format!("Failed to start {} pass", role))?,
    );

    // Finish the current event, then stop
    let signal_handle = tokio::spawn({
        let engine = engine.clone();
        async move {
            shutdown_signal().await;
            warn!("Shutdown signal received, stopping after the current event");
            engine.stop().await;
        }
    });

    let status = pass_status(role, engine.run_pass(role).await);
    signal_handle.abort();

    info!("Warden Relayer stopped");
    Ok(status)
}

async fn resolve(
    role: ChainRole,
    event: &str,
    relay_tx: Option<&str>,
    settings: &Settings,
) -> Result<i32> {
    let id: EventId = event.parse()?;
    let relay_tx = relay_tx
        .map(|tx| {
            tx.parse::<H256>()
                .map_err(|e| anyhow!("Invalid --relay-tx {:?}: {:?}", tx, e))
        })
        .transpose()?;

    let ledger = open_ledger(&settings.ledger)
        .await
        .context("Failed to open ledger")?;
    let outcome = resolve_in_flight(ledger.as_ref(), &id, role.counterpart(), relay_tx)
        .await
        .with_context(|| format!("Failed to resolve {}", id))?;
    info!("{} recorded as {}", id, outcome.status());
    Ok(1)
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,warden_relayer=debug,sqlx=warn,hyper=warn")
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
