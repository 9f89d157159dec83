//! Indexer configuration.
//!
//! Everything the pipeline needs is carried by one [`IndexerConfig`] passed
//! into each component at construction. It is usually loaded from TOML:
//!
//! ```toml
//! timeframes = ["1m", "5m", "1h", "1d"]
//!
//! [storage]
//! url = "sqlite:./campaigns.db?mode=rwc"
//!
//! [[chains]]
//! chain_id = 8453
//! name = "base"
//! rpc_url = "env:BASE_RPC_URL"
//! factory_addresses = ["0x…"]
//! vote_treasury_addresses = ["0x…"]
//! start_block = 12_000_000
//!
//! [scan]
//! chunk_ceiling = 2000
//! chunk_floor = 10
//! confirmations = 5
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::candle::Timeframe;
use crate::types::{is_valid_address, normalize_address, ChainId};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required env var: {0}")]
    MissingEnv(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// One indexed chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    /// Human-readable slug used in logs.
    #[serde(default)]
    pub name: String,
    /// JSON-RPC endpoint, or `env:VAR` to read it from the environment.
    pub rpc_url: String,
    #[serde(default)]
    pub factory_addresses: Vec<String>,
    #[serde(default)]
    pub vote_treasury_addresses: Vec<String>,
    /// First block worth scanning (contract deployment). Also the floor for
    /// repair rewinds.
    #[serde(default)]
    pub start_block: Option<u64>,
    /// Without a start block or cursor, begin this many blocks behind head.
    #[serde(default = "default_lookback_from_head")]
    pub lookback_from_head: u64,
    /// Overrides `scan.confirmations` for this chain.
    #[serde(default)]
    pub confirmations: Option<u64>,
}

impl ChainConfig {
    pub fn new(chain_id: ChainId, rpc_url: impl Into<String>) -> Self {
        Self {
            chain_id,
            name: String::new(),
            rpc_url: rpc_url.into(),
            factory_addresses: vec![],
            vote_treasury_addresses: vec![],
            start_block: None,
            lookback_from_head: default_lookback_from_head(),
            confirmations: None,
        }
    }

    /// Name for logs; falls back to the numeric id.
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            self.chain_id.to_string()
        } else {
            self.name.clone()
        }
    }

    pub fn confirmations(&self, scan: &ScanConfig) -> u64 {
        self.confirmations.unwrap_or(scan.confirmations)
    }

    /// Floor for any cursor rewind.
    pub fn start_floor(&self) -> u64 {
        self.start_block.unwrap_or(0)
    }

    /// Resolve `env:VAR` RPC URLs.
    pub fn resolved_rpc_url(&self) -> Result<String, ConfigError> {
        match self.rpc_url.strip_prefix("env:") {
            Some(var) => std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.to_string())),
            None => Ok(self.rpc_url.clone()),
        }
    }
}

/// Chunked log scanning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Widest `eth_getLogs` block range attempted.
    #[serde(default = "default_chunk_ceiling")]
    pub chunk_ceiling: u64,
    /// Narrowest range the window shrinks to.
    #[serde(default = "default_chunk_floor")]
    pub chunk_floor: u64,
    /// Starting window; defaults to the ceiling.
    #[serde(default)]
    pub chunk_initial: Option<u64>,
    /// Window multiplier applied on recovery.
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
    /// Consecutive successful sub-ranges before the window grows.
    #[serde(default = "default_growth_after_successes")]
    pub growth_after_successes: u32,
    /// Blocks behind head treated as safe to index.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Scheduler tick for live scanning.
    #[serde(default = "default_scan_interval_ms")]
    pub interval_ms: u64,
    /// Bound on every RPC call.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn initial_chunk(&self) -> u64 {
        self.chunk_initial
            .unwrap_or(self.chunk_ceiling)
            .max(self.chunk_floor)
            .min(self.chunk_ceiling)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            chunk_ceiling: default_chunk_ceiling(),
            chunk_floor: default_chunk_floor(),
            chunk_initial: None,
            growth_factor: default_growth_factor(),
            growth_after_successes: default_growth_after_successes(),
            confirmations: default_confirmations(),
            interval_ms: default_scan_interval_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

/// Reorg repair job parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_repair_interval_ms")]
    pub interval_ms: u64,
    /// Repair never looks further back than this many blocks from the
    /// confirmed head.
    #[serde(default = "default_repair_lookback")]
    pub lookback_depth: u64,
    /// Maximum number of blocks the cursor is rewound.
    #[serde(default = "default_repair_rewind")]
    pub rewind_depth: u64,
}

impl RepairConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_repair_interval_ms(),
            lookback_depth: default_repair_lookback(),
            rewind_depth: default_repair_rewind(),
        }
    }
}

/// Backoff for transient RPC failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per sub-range, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_token_ttl_secs")]
    pub subscribe_token_ttl_secs: u64,
    /// Per-channel broadcast buffer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl RealtimeConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.subscribe_token_ttl_secs)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            subscribe_token_ttl_secs: default_token_ttl_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `memory`, a SQLite file path, or a `sqlite:` URL.
    #[serde(default = "default_storage_url")]
    pub url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: default_storage_url(),
        }
    }
}

/// Logging setup; `RUST_LOG` overrides it when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// Per-crate levels, e.g. `campaignindex-evm = "debug"`.
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// JSON lines instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

fn default_lookback_from_head() -> u64 { 5_000 }
fn default_chunk_ceiling() -> u64 { 2_000 }
fn default_chunk_floor() -> u64 { 10 }
fn default_growth_factor() -> f64 { 1.5 }
fn default_growth_after_successes() -> u32 { 3 }
fn default_confirmations() -> u64 { 5 }
fn default_scan_interval_ms() -> u64 { 5_000 }
fn default_rpc_timeout_ms() -> u64 { 15_000 }
fn default_repair_interval_ms() -> u64 { 60_000 }
fn default_repair_lookback() -> u64 { 200 }
fn default_repair_rewind() -> u64 { 100 }
fn default_max_attempts() -> u32 { 4 }
fn default_initial_backoff_ms() -> u64 { 250 }
fn default_max_backoff_ms() -> u64 { 5_000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_token_ttl_secs() -> u64 { 3_600 }
fn default_channel_capacity() -> usize { 1_024 }
fn default_storage_url() -> String { "memory".into() }
fn default_level() -> String { "info".into() }
fn bool_true() -> bool { true }

fn default_timeframes() -> Vec<Timeframe> {
    Timeframe::defaults()
}

impl IndexerConfig {
    /// Config for a single chain with every other section defaulted.
    pub fn single_chain(chain: ChainConfig) -> Self {
        Self {
            chains: vec![chain],
            scan: ScanConfig::default(),
            repair: RepairConfig::default(),
            retry: RetryConfig::default(),
            timeframes: default_timeframes(),
            realtime: RealtimeConfig::default(),
            storage: StorageConfig::default(),
            log: LogConfig::default(),
        }
    }

    /// Parse, normalise and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let mut config: IndexerConfig = toml::from_str(s)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn chain(&self, chain_id: ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// Lowercase every address and deduplicate timeframes.
    pub fn normalize(&mut self) {
        for chain in &mut self.chains {
            for addr in chain
                .factory_addresses
                .iter_mut()
                .chain(chain.vote_treasury_addresses.iter_mut())
            {
                *addr = normalize_address(addr);
            }
        }
        self.timeframes.sort();
        self.timeframes.dedup();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.chains.is_empty() {
            return invalid("at least one [[chains]] entry is required".into());
        }
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                return invalid(format!("duplicate chain_id {}", chain.chain_id));
            }
            if chain.rpc_url.trim().is_empty() {
                return invalid(format!("chain {}: rpc_url is empty", chain.chain_id));
            }
            for addr in chain.factory_addresses.iter().chain(&chain.vote_treasury_addresses) {
                if !is_valid_address(addr) {
                    return invalid(format!("chain {}: invalid address '{addr}'", chain.chain_id));
                }
            }
        }

        let scan = &self.scan;
        if scan.chunk_floor == 0 {
            return invalid("scan.chunk_floor must be at least 1".into());
        }
        if scan.chunk_floor > scan.chunk_ceiling {
            return invalid(format!(
                "scan.chunk_floor ({}) exceeds scan.chunk_ceiling ({})",
                scan.chunk_floor, scan.chunk_ceiling
            ));
        }
        if scan.growth_factor < 1.0 {
            return invalid("scan.growth_factor must be >= 1.0".into());
        }
        if scan.interval_ms == 0 {
            return invalid("scan.interval_ms must be positive".into());
        }
        if scan.rpc_timeout_ms == 0 {
            return invalid("scan.rpc_timeout_ms must be positive".into());
        }
        if self.repair.enabled && self.repair.interval_ms == 0 {
            return invalid("repair.interval_ms must be positive".into());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".into());
        }
        if self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier must be >= 1.0".into());
        }
        if self.realtime.subscribe_token_ttl_secs == 0 {
            return invalid("realtime.subscribe_token_ttl_secs must be positive".into());
        }
        if self.timeframes.is_empty() {
            return invalid("at least one timeframe is required".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FACTORY: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

    fn minimal() -> String {
        format!(
            r#"
            [[chains]]
            chain_id = 8453
            name = "base"
            rpc_url = "https://mainnet.base.org"
            factory_addresses = ["{FACTORY}"]
            "#
        )
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg = IndexerConfig::from_toml_str(&minimal()).unwrap();
        assert_eq!(cfg.scan.chunk_ceiling, 2_000);
        assert_eq!(cfg.scan.chunk_floor, 10);
        assert_eq!(cfg.scan.initial_chunk(), 2_000);
        assert_eq!(cfg.retry.max_attempts, 4);
        assert!(cfg.repair.enabled);
        assert_eq!(cfg.timeframes.len(), 6);
        assert_eq!(cfg.storage.url, "memory");
        assert_eq!(cfg.chains[0].lookback_from_head, 5_000);
        // normalised
        assert_eq!(cfg.chains[0].factory_addresses[0], FACTORY.to_ascii_lowercase());
    }

    #[test]
    fn overrides_are_read() {
        let toml = r#"
            timeframes = ["5m", 60, "5m"]

            [[chains]]
            chain_id = 1
            rpc_url = "http://localhost:8545"
            confirmations = 12

            [scan]
            chunk_ceiling = 500
            chunk_floor = 50
            chunk_initial = 5000

            [repair]
            rewind_depth = 30

            [log]
            level = "debug"
            json = true
        "#;

        let cfg = IndexerConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.chains[0].confirmations(&cfg.scan), 12);
        assert_eq!(cfg.timeframes, vec![Timeframe::M1, Timeframe::M5]);
        assert_eq!(cfg.scan.initial_chunk(), 500);
        assert_eq!(cfg.repair.rewind_depth, 30);
        assert!(cfg.log.json);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad_floor = format!("{}\n[scan]\nchunk_floor = 0\n", minimal());
        assert!(matches!(
            IndexerConfig::from_toml_str(&bad_floor),
            Err(ConfigError::Invalid(_))
        ));

        let inverted = format!("{}\n[scan]\nchunk_floor = 100\nchunk_ceiling = 10\n", minimal());
        assert!(IndexerConfig::from_toml_str(&inverted).is_err());

        let bad_addr = minimal().replace(FACTORY, "0x1234");
        assert!(IndexerConfig::from_toml_str(&bad_addr).is_err());

        let dup = format!("{}{}", minimal(), minimal());
        assert!(IndexerConfig::from_toml_str(&dup).is_err());

        assert!(matches!(
            IndexerConfig::from_toml_str("chains = []"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            IndexerConfig::from_toml_str("chains = 5"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn zero_durations_are_rejected() {
        for section in [
            "[scan]\nrpc_timeout_ms = 0\n",
            "[scan]\ninterval_ms = 0\n",
            "[realtime]\nsubscribe_token_ttl_secs = 0\n",
        ] {
            let toml = format!("{}\n{section}", minimal());
            assert!(
                matches!(IndexerConfig::from_toml_str(&toml), Err(ConfigError::Invalid(_))),
                "accepted {section:?}"
            );
        }
    }

    #[test]
    fn env_rpc_url_resolution() {
        let mut chain = ChainConfig::new(1, "env:CAMPAIGNINDEX_TEST_MISSING_RPC");
        assert!(matches!(chain.resolved_rpc_url(), Err(ConfigError::MissingEnv(_))));

        chain.rpc_url = "http://localhost:8545".into();
        assert_eq!(chain.resolved_rpc_url().unwrap(), "http://localhost:8545");
    }
}
