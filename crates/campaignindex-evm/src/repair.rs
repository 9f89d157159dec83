//! Reorg repair job.
//!
//! On a slower cadence than live scanning, rescans a short window behind each
//! cursor so that logs whose block-level fields changed in a shallow reorg
//! are corrected in place, logs that vanished are orphaned, and the candle
//! buckets of the window are rebuilt. The job holds the family's cursor lock
//! for the whole rescan; live scanning skips that family meanwhile.

use std::sync::Arc;

use tracing::{debug, info};

use campaignindex_core::error::IndexerError;
use campaignindex_core::store::ScanMode;
use campaignindex_core::types::ContractKind;

use crate::pipeline::ChainPipeline;
use crate::scanner::ScanReport;

/// Block range a repair pass rescans, or `None` when there is nothing to do.
///
/// `from = max(start_floor, confirmed_head - lookback, cursor - rewind)` and
/// `to = min(cursor, confirmed_head)`.
pub fn repair_window(
    start_floor: u64,
    confirmed_head: u64,
    lookback_depth: u64,
    rewind_depth: u64,
    cursor: u64,
) -> Option<(u64, u64)> {
    let from = start_floor
        .max(confirmed_head.saturating_sub(lookback_depth))
        .max(cursor.saturating_sub(rewind_depth));
    let to = cursor.min(confirmed_head);
    (from <= to).then_some((from, to))
}

pub struct RepairJob {
    pipeline: Arc<ChainPipeline>,
}

impl RepairJob {
    pub fn new(pipeline: Arc<ChainPipeline>) -> Self {
        Self { pipeline }
    }

    /// One repair pass over every family that has a cursor.
    pub async fn run_once(&self) -> Result<ScanReport, IndexerError> {
        let p = &self.pipeline;
        let chain_id = p.chain_id();
        let confirmed_head = p.confirmed_head().await?;
        let mut total = ScanReport::default();

        for kind in ContractKind::ALL {
            let lock = p.locks.handle(chain_id, kind);
            let _guard = lock.lock().await;

            // re-read under the lock; the scanner may have just moved it
            let Some(cursor) = p.store.load_cursor(chain_id, kind).await? else {
                continue;
            };
            let Some((from, to)) = repair_window(
                p.chain.start_floor(),
                confirmed_head,
                p.repair.lookback_depth,
                p.repair.rewind_depth,
                cursor.last_scanned_block,
            ) else {
                debug!(chain_id, %kind, cursor = cursor.last_scanned_block, "repair window empty");
                continue;
            };

            let addresses = p.addresses(kind).await?;
            let report = p
                .scanner
                .scan_range(kind, &addresses, from, to, ScanMode::Repair)
                .await?;
            info!(
                chain_id,
                %kind,
                from,
                to,
                updated = report.updated,
                orphaned = report.orphaned,
                "repair pass complete"
            );
            total.merge(&report);
        }
        Ok(total)
    }
}
