//! Configuration management for the warden relayer
//!
//! Relayer settings come from a TOML file with environment variable substitution.
//! Contract addresses, ABIs and warden keys come from a separate JSON contract info file.

use crate::chain::ChainRole;
use crate::error::{RelayerError, RelayerResult};
use crate::retry::BackoffPolicy;

use ethers::abi::Abi;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub scanner: ScannerConfig,
    pub ledger: LedgerConfig,
    pub metrics: MetricsConfig,
    pub chains: ChainsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayerConfig {
    /// Blocks behind the head included in the scan window
    pub window_size: u64,
    /// Total submission attempts per event, first one included
    pub max_submission_attempts: u32,
    pub submission_backoff: BackoffPolicy,
    pub gas_limit_buffer_percent: u64,
    pub fallback_gas_limit: u64,
    pub gas_price_multiplier_percent: u64,
    pub max_gas_price_gwei: Option<u64>,
    pub wait_for_receipt: bool,
    pub receipt_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
    /// Events not started before this many seconds into a pass are deferred
    pub pass_deadline_secs: Option<u64>,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            window_size: 4,
            max_submission_attempts: 3,
            submission_backoff: BackoffPolicy::default(),
            gas_limit_buffer_percent: 20,
            fallback_gas_limit: 200_000,
            gas_price_multiplier_percent: 100,
            max_gas_price_gwei: None,
            wait_for_receipt: true,
            receipt_timeout_secs: 60,
            receipt_poll_interval_ms: 1_000,
            pass_deadline_secs: None,
        }
    }
}

impl RelayerConfig {
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Max block range per eth_getLogs request
    pub max_block_range: u64,
    pub max_bisect_depth: u32,
    pub trailing_window: u64,
    pub backoff: BackoffPolicy,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_block_range: 2_000,
            max_bisect_depth: 6,
            trailing_window: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub path: PathBuf,
    pub max_connections: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Sqlite,
            path: PathBuf::from("data/relayer-ledger.db"),
            max_connections: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus text file rewritten at the end of every pass
    pub textfile_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainsConfig {
    pub source: ChainConfig,
    pub destination: ChainConfig,
}

impl Default for ChainsConfig {
    fn default() -> Self {
        Self {
            // Avalanche Fuji C-chain
            source: ChainConfig {
                rpc_urls: vec!["https://api.avax-test.network/ext/bc/C/rpc".to_string()],
                chain_id: Some(43113),
                ..ChainConfig::default()
            },
            // BSC testnet
            destination: ChainConfig {
                rpc_urls: vec!["https://data-seed-prebsc-1-s1.binance.org:8545/".to_string()],
                chain_id: Some(97),
                ..ChainConfig::default()
            },
        }
    }
}

impl ChainsConfig {
    pub fn for_role(&self, role: ChainRole) -> &ChainConfig {
        match role {
            ChainRole::Source => &self.source,
            ChainRole::Destination => &self.destination,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_urls: Vec<String>,
    /// Expected chain id; connecting to a node reporting another id fails
    pub chain_id: Option<u64>,
    pub request_timeout_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_urls: Vec::new(),
            chain_id: None,
            request_timeout_secs: 15,
        }
    }
}

impl Settings {
    /// Load settings from `RELAYER_CONFIG`, falling back to `config/default.toml`
    /// and then to built-in defaults when neither exists.
    pub fn load() -> RelayerResult<Self> {
        match env::var("RELAYER_CONFIG") {
            Ok(path) => Self::load_from(Path::new(&path)),
            Err(_) => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::load_from(path)
                } else {
                    tracing::info!("No settings file found, using built-in defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load settings from an explicit TOML file
    pub fn load_from(path: &Path) -> RelayerResult<Self> {
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            RelayerError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(input: &str) -> RelayerResult<Self> {
        let input = substitute_env_vars(input);
        let settings: Settings = toml::from_str(&input)
            .map_err(|e| RelayerError::Config(format!("Failed to parse configuration: {}", e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> RelayerResult<()> {
        for role in ChainRole::ALL {
            if self.chains.for_role(role).rpc_urls.is_empty() {
                return Err(RelayerError::Config(format!(
                    "Chain {} has no RPC URLs configured",
                    role
                )));
            }
        }
        if self.relayer.max_submission_attempts == 0 {
            return Err(RelayerError::Config(
                "max_submission_attempts must be at least 1".to_string(),
            ));
        }
        if self.scanner.max_block_range == 0 {
            return Err(RelayerError::Config(
                "scanner.max_block_range must be at least 1".to_string(),
            ));
        }
        if self.relayer.gas_price_multiplier_percent == 0 {
            return Err(RelayerError::Config(
                "gas_price_multiplier_percent must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Signing credential for the warden account. Never printed.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct WardenKey(String);

impl WardenKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for WardenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WardenKey(<redacted>)")
    }
}

/// One side of the contract info file
#[derive(Debug, Clone, Deserialize)]
pub struct ContractEntry {
    pub address: String,
    pub abi: Abi,
    #[serde(default)]
    pub warden_key: Option<WardenKey>,
}

/// Contract info for both chains
#[derive(Debug, Clone, Deserialize)]
pub struct ContractInfo {
    pub source: ContractEntry,
    pub destination: ContractEntry,
}

impl ContractInfo {
    pub fn load(path: &Path) -> RelayerResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RelayerError::Config(format!("Failed to read contract info {:?}: {}", path, e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> RelayerResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| RelayerError::Config(format!("Invalid contract info: {}", e)))
    }

    pub fn entry(&self, role: ChainRole) -> &ContractEntry {
        match role {
            ChainRole::Source => &self.source,
            ChainRole::Destination => &self.destination,
        }
    }

    /// Key used to sign transactions sent to `role`'s chain
    pub fn warden_key(&self, role: ChainRole) -> Option<&WardenKey> {
        self.entry(role)
            .warden_key
            .as_ref()
            .filter(|k| !k.expose().trim().is_empty())
    }
}
