//! Fluent builder for [`ChainPipeline`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use campaignindex_core::config::ChainConfig;
//! use campaignindex_evm::{HttpChainClient, PipelineBuilder};
//! use campaignindex_storage::MemoryStore;
//!
//! let chain = ChainConfig::new(8453, "https://mainnet.base.org");
//! let client = HttpChainClient::new(8453, "https://mainnet.base.org", std::time::Duration::from_secs(15)).unwrap();
//! let pipeline = PipelineBuilder::new(chain)
//!     .client(Arc::new(client))
//!     .store(Arc::new(MemoryStore::new()))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

use campaignindex_core::candle::Timeframe;
use campaignindex_core::config::{ChainConfig, IndexerConfig, RepairConfig, RetryConfig, ScanConfig};
use campaignindex_core::cursor::CursorLocks;
use campaignindex_core::error::IndexerError;
use campaignindex_core::publisher::{BroadcastHub, Publisher, RealtimeHub};
use campaignindex_core::store::IndexStore;

use crate::client::{ChainClient, HttpChainClient};
use crate::pipeline::ChainPipeline;
use crate::retry::RetryPolicy;
use crate::scanner::ChunkedScanner;

pub struct PipelineBuilder {
    chain: ChainConfig,
    scan: ScanConfig,
    repair: RepairConfig,
    retry: RetryConfig,
    timeframes: Vec<Timeframe>,
    client: Option<Arc<dyn ChainClient>>,
    store: Option<Arc<dyn IndexStore>>,
    hub: Option<Arc<dyn RealtimeHub>>,
    locks: Option<Arc<CursorLocks>>,
}

impl PipelineBuilder {
    pub fn new(chain: ChainConfig) -> Self {
        Self {
            chain,
            scan: ScanConfig::default(),
            repair: RepairConfig::default(),
            retry: RetryConfig::default(),
            timeframes: Timeframe::defaults(),
            client: None,
            store: None,
            hub: None,
            locks: None,
        }
    }

    /// Start from the shared settings of a loaded config file.
    pub fn from_config(config: &IndexerConfig, chain: ChainConfig) -> Self {
        Self::new(chain)
            .scan(config.scan.clone())
            .repair(config.repair.clone())
            .retry(config.retry.clone())
            .timeframes(config.timeframes.clone())
    }

    pub fn client(mut self, client: Arc<dyn ChainClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn store(mut self, store: Arc<dyn IndexStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Realtime hub; a private in-process [`BroadcastHub`] if unset.
    pub fn hub(mut self, hub: Arc<dyn RealtimeHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Share cursor locks between pipelines that write the same store.
    pub fn locks(mut self, locks: Arc<CursorLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn scan(mut self, scan: ScanConfig) -> Self {
        self.scan = scan;
        self
    }

    pub fn repair(mut self, repair: RepairConfig) -> Self {
        self.repair = repair;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn timeframes(mut self, timeframes: Vec<Timeframe>) -> Self {
        self.timeframes = timeframes;
        self
    }

    /// Build an [`HttpChainClient`] from the chain's RPC URL.
    pub fn http_client(self) -> Result<Self, IndexerError> {
        let url = self
            .chain
            .resolved_rpc_url()
            .map_err(|e| IndexerError::Config(e.to_string()))?;
        let client = HttpChainClient::new(self.chain.chain_id, url, self.scan.rpc_timeout())?;
        Ok(self.client(Arc::new(client)))
    }

    pub fn build(self) -> Result<ChainPipeline, IndexerError> {
        let chain_id = self.chain.chain_id;
        let client = self
            .client
            .ok_or_else(|| IndexerError::Config(format!("chain {chain_id}: no chain client")))?;
        let store = self
            .store
            .ok_or_else(|| IndexerError::Config(format!("chain {chain_id}: no store")))?;
        if client.chain_id() != chain_id {
            return Err(IndexerError::Config(format!(
                "client is for chain {}, pipeline for chain {chain_id}",
                client.chain_id()
            )));
        }
        if self.timeframes.is_empty() {
            return Err(IndexerError::Config("at least one timeframe is required".into()));
        }

        let hub = self
            .hub
            .unwrap_or_else(|| Arc::new(BroadcastHub::default()) as Arc<dyn RealtimeHub>);
        let scanner = ChunkedScanner::new(
            client,
            store.clone(),
            Publisher::new(hub),
            self.timeframes,
            &self.scan,
            RetryPolicy::new(&self.retry),
        );

        Ok(ChainPipeline {
            chain: self.chain,
            scan: self.scan,
            repair: self.repair,
            store,
            scanner,
            locks: self.locks.unwrap_or_default(),
        })
    }
}
