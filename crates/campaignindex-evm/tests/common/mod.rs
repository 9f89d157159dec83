//! Shared fixtures for the pipeline and scheduler tests: a scripted chain
//! client, log builders and a preconfigured pipeline.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use campaignindex_core::candle::{Candle, Timeframe};
use campaignindex_core::config::{ChainConfig, RepairConfig, RetryConfig, ScanConfig};
use campaignindex_core::cursor::ChainCursor;
use campaignindex_core::decoder::{
    address_topic, encode_words, event_topic, AbiWord, CAMPAIGN_CREATED, TOKENS_PURCHASED,
    TOKENS_SOLD, VOTE_CAST,
};
use campaignindex_core::error::IndexerError;
use campaignindex_core::publisher::BroadcastHub;
use campaignindex_core::store::{CommitOutcome, IndexStore, ScanBatch};
use campaignindex_core::types::{
    CampaignSummary, ChainId, ContractKind, RawLog, TradeEvent, TradeSide, VoteEvent,
};
use campaignindex_evm::{ChainClient, ChainPipeline, PipelineBuilder};
use campaignindex_storage::MemoryStore;

pub const CHAIN: ChainId = 8453;
pub const FACTORY: &str = "0x00000000000000000000000000000000000000f0";
pub const CAMPAIGN: &str = "0x0000000000000000000000000000000000000abc";
pub const TREASURY: &str = "0x00000000000000000000000000000000000000e0";
pub const CREATOR: &str = "0x000000000000000000000000000000000000c0de";
pub const TOKEN: &str = "0x0000000000000000000000000000000000007070";
pub const WALLET: &str = "0x1111111111111111111111111111111111111111";
pub const VOTER: &str = "0x2222222222222222222222222222222222222222";

// ─── MockChainClient ─────────────────────────────────────────────────────────

/// Scripted chain: a fixed set of logs, a settable head, injectable failures
/// and an optional node-side block range limit.
pub struct MockChainClient {
    head: AtomicU64,
    logs: Mutex<Vec<RawLog>>,
    errors: Mutex<VecDeque<IndexerError>>,
    range_limit: Mutex<Option<u64>>,
    head_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<(u64, u64)>>,
    head_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockChainClient {
    pub fn new(head: u64, logs: Vec<RawLog>) -> Self {
        Self {
            head: AtomicU64::new(head),
            logs: Mutex::new(logs),
            errors: Mutex::new(VecDeque::new()),
            range_limit: Mutex::new(None),
            head_delay: Mutex::new(None),
            calls: Mutex::new(vec![]),
            head_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// Replace the chain's logs, as after a reorg.
    pub fn set_logs(&self, logs: Vec<RawLog>) {
        *self.logs.lock().unwrap() = logs;
    }

    /// Fail the next `get_logs` calls with these errors, in order.
    pub fn fail_with(&self, errors: Vec<IndexerError>) {
        self.errors.lock().unwrap().extend(errors);
    }

    /// Reject `get_logs` ranges wider than `blocks`.
    pub fn limit_range(&self, blocks: u64) {
        *self.range_limit.lock().unwrap() = Some(blocks);
    }

    /// Make `latest_block` take this long.
    pub fn slow_head(&self, delay: Duration) {
        *self.head_delay.lock().unwrap() = Some(delay);
    }

    /// Every `get_logs` range requested, successful or not.
    pub fn calls(&self) -> Vec<(u64, u64)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn chain_id(&self) -> ChainId {
        CHAIN
    }

    async fn latest_block(&self) -> Result<u64, IndexerError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.head_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[String],
    ) -> Result<Vec<RawLog>, IndexerError> {
        self.calls.lock().unwrap().push((from, to));

        if let Some(err) = self.errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        let limit = *self.range_limit.lock().unwrap();
        if let Some(limit) = limit {
            if to - from + 1 > limit {
                return Err(IndexerError::RangeTooLarge {
                    from,
                    to,
                    message: format!("query exceeds {limit} blocks"),
                });
            }
        }

        let logs = self.logs.lock().unwrap();
        Ok(logs
            .iter()
            .filter(|l| l.block_number >= from && l.block_number <= to)
            .filter(|l| addresses.iter().any(|a| a == &l.address))
            .cloned()
            .collect())
    }
}

// ─── FlakyStore ──────────────────────────────────────────────────────────────

/// A [`MemoryStore`] whose commits can be switched to fail.
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            failing: AtomicBool::new(false),
        }
    }

    pub fn fail_commits(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl IndexStore for FlakyStore {
    async fn load_cursor(
        &self,
        chain_id: ChainId,
        kind: ContractKind,
    ) -> Result<Option<ChainCursor>, IndexerError> {
        self.inner.load_cursor(chain_id, kind).await
    }

    async fn cursors(&self) -> Result<Vec<ChainCursor>, IndexerError> {
        self.inner.cursors().await
    }

    async fn commit_batch(
        &self,
        batch: &ScanBatch,
        timeframes: &[Timeframe],
    ) -> Result<CommitOutcome, IndexerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IndexerError::Storage("disk full".into()));
        }
        self.inner.commit_batch(batch, timeframes).await
    }

    async fn campaign_addresses(&self, chain_id: ChainId) -> Result<Vec<String>, IndexerError> {
        self.inner.campaign_addresses(chain_id).await
    }

    async fn campaign_summary(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
    ) -> Result<Option<CampaignSummary>, IndexerError> {
        self.inner.campaign_summary(chain_id, campaign_address).await
    }

    async fn recent_trades(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        limit: usize,
    ) -> Result<Vec<TradeEvent>, IndexerError> {
        self.inner.recent_trades(chain_id, campaign_address, limit).await
    }

    async fn recent_votes(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        limit: usize,
    ) -> Result<Vec<VoteEvent>, IndexerError> {
        self.inner.recent_votes(chain_id, campaign_address, limit).await
    }

    async fn recent_candles(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, IndexerError> {
        self.inner
            .recent_candles(chain_id, campaign_address, timeframe, limit)
            .await
    }
}

// ─── Log builders ────────────────────────────────────────────────────────────

fn raw(address: &str, tx: &str, log_index: u32, block: u64, time: i64, topics: Vec<String>, data: String) -> RawLog {
    RawLog {
        chain_id: CHAIN,
        block_number: block,
        block_time: time,
        tx_hash: tx.into(),
        log_index,
        address: address.into(),
        topics,
        data,
        removed: false,
    }
}

pub fn created_log(tx: &str, block: u64, campaign: &str) -> RawLog {
    raw(
        FACTORY,
        tx,
        0,
        block,
        block as i64,
        vec![
            event_topic(CAMPAIGN_CREATED),
            address_topic(campaign),
            address_topic(CREATOR),
        ],
        encode_words(&[AbiWord::Address(TOKEN)]),
    )
}

/// A trade of 1000 token units at `price` native per token.
pub fn trade_log(side: TradeSide, tx: &str, log_index: u32, block: u64, time: i64, price: f64) -> RawLog {
    let signature = match side {
        TradeSide::Buy => TOKENS_PURCHASED,
        TradeSide::Sell => TOKENS_SOLD,
    };
    let native = (price * 1000.0).round() as u128;
    raw(
        CAMPAIGN,
        tx,
        log_index,
        block,
        time,
        vec![event_topic(signature), address_topic(WALLET)],
        encode_words(&[AbiWord::Uint(1000), AbiWord::Uint(native)]),
    )
}

pub fn vote_log(tx: &str, block: u64, amount: u128) -> RawLog {
    raw(
        TREASURY,
        tx,
        0,
        block,
        block as i64,
        vec![
            event_topic(VOTE_CAST),
            address_topic(CAMPAIGN),
            address_topic(VOTER),
        ],
        encode_words(&[AbiWord::Address(TOKEN), AbiWord::Uint(amount)]),
    )
}

/// Registration at block 2, four trades at blocks 10..=13 (two candle
/// buckets of 100s) and one vote at block 15.
pub fn scenario_logs() -> Vec<RawLog> {
    vec![
        created_log("0xc1", 2, CAMPAIGN),
        trade_log(TradeSide::Buy, "0xa1", 0, 10, 100, 1.0),
        trade_log(TradeSide::Buy, "0xa2", 0, 11, 101, 1.2),
        trade_log(TradeSide::Buy, "0xa3", 0, 12, 102, 0.9),
        trade_log(TradeSide::Sell, "0xa4", 0, 13, 250, 1.1),
        vote_log("0xb1", 15, 5_000),
    ]
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

pub fn tf() -> Timeframe {
    Timeframe::from_secs(100).unwrap()
}

pub fn chain_config() -> ChainConfig {
    let mut chain = ChainConfig::new(CHAIN, "http://mock");
    chain.factory_addresses = vec![FACTORY.into()];
    chain.vote_treasury_addresses = vec![TREASURY.into()];
    chain.start_block = Some(1);
    chain.confirmations = Some(0);
    chain
}

pub fn scan_config() -> ScanConfig {
    ScanConfig {
        chunk_ceiling: 1_000,
        chunk_floor: 100,
        interval_ms: 20,
        ..ScanConfig::default()
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        multiplier: 2.0,
    }
}

pub fn builder(client: Arc<MockChainClient>, store: Arc<dyn IndexStore>, hub: Arc<BroadcastHub>) -> PipelineBuilder {
    PipelineBuilder::new(chain_config())
        .client(client)
        .store(store)
        .hub(hub)
        .scan(scan_config())
        .retry(fast_retry())
        .repair(RepairConfig {
            enabled: false,
            ..RepairConfig::default()
        })
        .timeframes(vec![tf()])
}

pub fn pipeline(client: Arc<MockChainClient>, store: Arc<dyn IndexStore>, hub: Arc<BroadcastHub>) -> ChainPipeline {
    builder(client, store, hub).build().unwrap()
}
