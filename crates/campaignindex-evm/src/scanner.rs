//! Chunked log scanner.
//!
//! Walks `from..=to` in sub-ranges no wider than the current window. Each
//! sub-range is fetched (with retry), decoded, committed together with the
//! cursor advance and then published. A range-too-large response halves the
//! window and retries the same start block; sustained success grows it back
//! toward the ceiling.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use campaignindex_core::candle::Timeframe;
use campaignindex_core::config::ScanConfig;
use campaignindex_core::decoder::decode_batch;
use campaignindex_core::error::IndexerError;
use campaignindex_core::publisher::Publisher;
use campaignindex_core::store::{IndexStore, ScanBatch, ScanMode};
use campaignindex_core::types::{ContractKind, RawLog};

use crate::client::ChainClient;
use crate::retry::RetryPolicy;

// ─── ChunkWindow ─────────────────────────────────────────────────────────────

/// Adaptive `eth_getLogs` block-range width.
#[derive(Debug, Clone)]
pub struct ChunkWindow {
    size: u64,
    floor: u64,
    ceiling: u64,
    growth_factor: f64,
    growth_after: u32,
    streak: u32,
}

impl ChunkWindow {
    pub fn new(config: &ScanConfig) -> Self {
        let floor = config.chunk_floor.max(1);
        let ceiling = config.chunk_ceiling.max(floor);
        Self {
            size: config.initial_chunk().clamp(floor, ceiling),
            floor,
            ceiling,
            growth_factor: config.growth_factor.max(1.0),
            growth_after: config.growth_after_successes.max(1),
            streak: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Halve the window. Returns `false` when it is already at the floor.
    pub fn shrink(&mut self) -> bool {
        self.streak = 0;
        if self.size <= self.floor {
            return false;
        }
        self.size = (self.size / 2).max(self.floor);
        true
    }

    /// Count a successful sub-range; grows the window after enough of them.
    pub fn record_success(&mut self) {
        self.streak += 1;
        if self.streak >= self.growth_after && self.size < self.ceiling {
            let grown = (self.size as f64 * self.growth_factor).ceil() as u64;
            self.size = grown.max(self.size + 1).min(self.ceiling);
            self.streak = 0;
        }
    }
}

// ─── ScanReport ──────────────────────────────────────────────────────────────

/// Totals for one `scan_range` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub sub_ranges: usize,
    pub logs: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub orphaned: usize,
    pub published: usize,
    /// Last block committed, if any sub-range completed.
    pub last_block: Option<u64>,
}

impl ScanReport {
    pub fn merge(&mut self, other: &ScanReport) {
        self.sub_ranges += other.sub_ranges;
        self.logs += other.logs;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.orphaned += other.orphaned;
        self.published += other.published;
        if other.last_block.is_some() {
            self.last_block = other.last_block;
        }
    }
}

// ─── ChunkedScanner ──────────────────────────────────────────────────────────

/// Fetch → decode → commit → publish over a block range for one chain.
pub struct ChunkedScanner {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn IndexStore>,
    publisher: Publisher,
    timeframes: Vec<Timeframe>,
    retry: RetryPolicy,
    rpc_timeout: Duration,
    window: Mutex<ChunkWindow>,
}

impl ChunkedScanner {
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: Arc<dyn IndexStore>,
        publisher: Publisher,
        timeframes: Vec<Timeframe>,
        scan: &ScanConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            store,
            publisher,
            timeframes,
            retry,
            rpc_timeout: scan.rpc_timeout(),
            window: Mutex::new(ChunkWindow::new(scan)),
        }
    }

    pub fn window_size(&self) -> u64 {
        self.window.lock().unwrap_or_else(|p| p.into_inner()).size()
    }

    fn with_window<R>(&self, f: impl FnOnce(&mut ChunkWindow) -> R) -> R {
        let mut window = self.window.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut *window)
    }

    /// Head block, with the per-call timeout and retry budget.
    pub async fn latest_block(&self) -> Result<u64, IndexerError> {
        let chain_id = self.client.chain_id();
        let mut failures = 0u32;
        loop {
            let err = match tokio::time::timeout(self.rpc_timeout, self.client.latest_block()).await {
                Ok(Ok(head)) => return Ok(head),
                Ok(Err(e)) => e,
                Err(_) => self.timeout_error(),
            };
            if !err.is_retryable() {
                return Err(err);
            }
            failures += 1;
            match self.retry.next_delay(failures) {
                Some(delay) => {
                    warn!(chain_id, attempt = failures, delay_ms = delay.as_millis() as u64, error = %err, "retrying eth_blockNumber");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            }
        }
    }

    fn timeout_error(&self) -> IndexerError {
        IndexerError::Timeout {
            ms: self.rpc_timeout.as_millis() as u64,
        }
    }

    /// Fetch logs for the sub-range starting at `start`, shrinking the window
    /// on range-too-large. Returns the logs and the inclusive end block used.
    async fn fetch_sub_range(
        &self,
        kind: ContractKind,
        addresses: &[String],
        start: u64,
        to: u64,
    ) -> Result<(Vec<RawLog>, u64), IndexerError> {
        let chain_id = self.client.chain_id();
        let mut failures = 0u32;
        loop {
            let width = self.with_window(|w| w.size());
            let end = start.saturating_add(width - 1).min(to);

            let result = match tokio::time::timeout(
                self.rpc_timeout,
                self.client.get_logs(start, end, addresses),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(self.timeout_error()),
            };

            let err = match result {
                Ok(logs) => return Ok((logs, end)),
                Err(e) => e,
            };

            if err.is_range_too_large() {
                if self.with_window(|w| w.shrink()) {
                    warn!(
                        chain_id,
                        %kind,
                        from = start,
                        to = end,
                        chunk = self.window_size(),
                        "range too large, shrinking window"
                    );
                    continue;
                }
            } else if !err.is_retryable() {
                return Err(err);
            }

            // transient failure, or range-too-large at the floor
            failures += 1;
            match self.retry.next_delay(failures) {
                Some(delay) => {
                    warn!(
                        chain_id,
                        %kind,
                        from = start,
                        to = end,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "eth_getLogs failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(
                        chain_id,
                        %kind,
                        from = start,
                        to = end,
                        attempt = failures,
                        error = %err,
                        "eth_getLogs retries exhausted"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Scan `from..=to` for the `kind` contracts at `addresses`.
    ///
    /// The cursor advances after every committed sub-range, so an error part
    /// way through keeps the progress made so far and leaves the failing
    /// sub-range for the next cycle.
    pub async fn scan_range(
        &self,
        kind: ContractKind,
        addresses: &[String],
        from: u64,
        to: u64,
        mode: ScanMode,
    ) -> Result<ScanReport, IndexerError> {
        let chain_id = self.client.chain_id();
        let mut report = ScanReport::default();
        if from > to {
            return Ok(report);
        }

        // nothing to ask the node for; just move the cursor
        if addresses.is_empty() {
            let batch = ScanBatch::new(chain_id, kind, from, to).with_mode(mode);
            self.store.commit_batch(&batch, &self.timeframes).await?;
            report.sub_ranges = 1;
            report.last_block = Some(to);
            debug!(chain_id, %kind, from, to, "no addresses, cursor advanced");
            return Ok(report);
        }

        let mut start = from;
        while start <= to {
            let (logs, end) = self.fetch_sub_range(kind, addresses, start, to).await?;
            let events = decode_batch(kind, &logs);

            let batch = ScanBatch::new(chain_id, kind, start, end)
                .with_events(events)
                .with_mode(mode);
            let outcome = self.store.commit_batch(&batch, &self.timeframes).await?;
            self.with_window(|w| w.record_success());

            let published = self.publisher.publish_all(&outcome.changed).await;

            debug!(
                chain_id,
                %kind,
                from = start,
                to = end,
                logs = logs.len(),
                inserted = outcome.inserted,
                updated = outcome.updated,
                orphaned = outcome.orphaned,
                "sub-range committed"
            );

            report.sub_ranges += 1;
            report.logs += logs.len();
            report.inserted += outcome.inserted;
            report.updated += outcome.updated;
            report.unchanged += outcome.unchanged;
            report.orphaned += outcome.orphaned;
            report.published += published;
            report.last_block = Some(end);

            start = end + 1;
        }

        info!(
            chain_id,
            %kind,
            ?mode,
            from,
            to,
            sub_ranges = report.sub_ranges,
            inserted = report.inserted,
            updated = report.updated,
            orphaned = report.orphaned,
            "range scanned"
        );
        Ok(report)
    }
}
