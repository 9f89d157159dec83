//! Per-chain scan pipeline.
//!
//! One [`ChainPipeline`] owns everything needed to index a chain: its client,
//! the shared store, the chunked scanner and the cursor locks it shares with
//! the repair job. A scan cycle walks the contract families in
//! Factory → Campaign → VoteTreasury order, so campaigns registered earlier
//! in the cycle are scanned in the same cycle.

use std::sync::Arc;

use tracing::{info, warn};

use campaignindex_core::config::{ChainConfig, RepairConfig, ScanConfig};
use campaignindex_core::cursor::{resolve_next_block, CursorLocks};
use campaignindex_core::error::IndexerError;
use campaignindex_core::store::{IndexStore, ScanMode};
use campaignindex_core::types::{ChainId, ContractKind};

use crate::scanner::{ChunkedScanner, ScanReport};

/// Result of one live scan cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub confirmed_head: u64,
    pub scanned: ScanReport,
    /// Families skipped because the repair job held their cursor.
    pub skipped: Vec<ContractKind>,
}

pub struct ChainPipeline {
    pub(crate) chain: ChainConfig,
    pub(crate) scan: ScanConfig,
    pub(crate) repair: RepairConfig,
    pub(crate) store: Arc<dyn IndexStore>,
    pub(crate) scanner: ChunkedScanner,
    pub(crate) locks: Arc<CursorLocks>,
}

impl ChainPipeline {
    pub fn chain_id(&self) -> ChainId {
        self.chain.chain_id
    }

    pub fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    pub fn repair_config(&self) -> &RepairConfig {
        &self.repair
    }

    pub fn scan_config(&self) -> &ScanConfig {
        &self.scan
    }

    pub fn scanner(&self) -> &ChunkedScanner {
        &self.scanner
    }

    pub fn locks(&self) -> &Arc<CursorLocks> {
        &self.locks
    }

    /// Observed head minus the confirmation depth.
    pub async fn confirmed_head(&self) -> Result<u64, IndexerError> {
        let head = self.scanner.latest_block().await?;
        Ok(head.saturating_sub(self.chain.confirmations(&self.scan)))
    }

    /// Contracts of `kind` to query on this chain.
    pub async fn addresses(&self, kind: ContractKind) -> Result<Vec<String>, IndexerError> {
        match kind {
            ContractKind::Factory => Ok(self.chain.factory_addresses.clone()),
            ContractKind::Campaign => self.store.campaign_addresses(self.chain.chain_id).await,
            ContractKind::VoteTreasury => Ok(self.chain.vote_treasury_addresses.clone()),
        }
    }

    /// Highest block `kind` may be scanned to. Campaign contracts never run
    /// ahead of the factory cursor, or trades of campaigns the factory scan
    /// hasn't registered yet would be passed over.
    async fn upper_bound(&self, kind: ContractKind, confirmed_head: u64) -> Result<Option<u64>, IndexerError> {
        if kind == ContractKind::Campaign && !self.chain.factory_addresses.is_empty() {
            let factory = self
                .store
                .load_cursor(self.chain.chain_id, ContractKind::Factory)
                .await?;
            return Ok(factory.map(|c| c.last_scanned_block.min(confirmed_head)));
        }
        Ok(Some(confirmed_head))
    }

    /// One live pass over every family. Any family error aborts the cycle;
    /// sub-ranges committed before the error stay committed.
    pub async fn scan_cycle(&self) -> Result<CycleReport, IndexerError> {
        let chain_id = self.chain.chain_id;
        let confirmed_head = self.confirmed_head().await?;
        let mut report = CycleReport {
            confirmed_head,
            ..Default::default()
        };

        for kind in ContractKind::ALL {
            let lock = self.locks.handle(chain_id, kind);
            let Ok(_guard) = lock.try_lock() else {
                warn!(chain_id, %kind, "cursor held by repair, skipping family this cycle");
                report.skipped.push(kind);
                continue;
            };

            let Some(to) = self.upper_bound(kind, confirmed_head).await? else {
                continue;
            };
            let cursor = self.store.load_cursor(chain_id, kind).await?;
            let from = resolve_next_block(
                cursor.as_ref(),
                self.chain.start_block,
                self.chain.lookback_from_head,
                confirmed_head,
            );
            if from > to {
                continue;
            }

            let addresses = self.addresses(kind).await?;
            let scanned = self
                .scanner
                .scan_range(kind, &addresses, from, to, ScanMode::Live)
                .await?;
            report.scanned.merge(&scanned);
        }

        info!(
            chain_id,
            confirmed_head,
            sub_ranges = report.scanned.sub_ranges,
            inserted = report.scanned.inserted,
            published = report.scanned.published,
            skipped = report.skipped.len(),
            "scan cycle complete"
        );
        Ok(report)
    }
}
