//! Durable store contract and the commit planning shared by every backend.
//!
//! A scan range is written through [`IndexStore::commit_batch`], which is the
//! single writer: events, campaign registrations, candle rebuilds and the
//! cursor advance all land in one transaction. Backends load the rows a batch
//! touches, hand them to [`plan_commit`], apply the resulting [`CommitPlan`]
//! and then rebuild each affected candle bucket with
//! [`recompute_bucket`](crate::candle::recompute_bucket).

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::candle::{BucketKey, Candle, Timeframe};
use crate::cursor::ChainCursor;
use crate::error::IndexerError;
use crate::types::{
    CampaignCreated, CampaignSummary, ChainId, ContractKind, DecodedEvent, EventStatus,
    NaturalKey, TradeEvent, TradeSide, VoteEvent,
};

/// Why a batch is being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Forward scanning from the cursor.
    Live,
    /// Rescan of an already-indexed window. Rows inside the window that the
    /// rescan no longer observes are orphaned, and every candle bucket the
    /// window covers is rebuilt.
    Repair,
}

/// One sub-range of decoded events, ready to persist.
#[derive(Debug, Clone)]
pub struct ScanBatch {
    pub chain_id: ChainId,
    pub kind: ContractKind,
    pub from_block: u64,
    pub to_block: u64,
    /// Events in ascending `(block_number, log_index)` order.
    pub events: Vec<DecodedEvent>,
    pub mode: ScanMode,
}

impl ScanBatch {
    pub fn new(chain_id: ChainId, kind: ContractKind, from_block: u64, to_block: u64) -> Self {
        Self {
            chain_id,
            kind,
            from_block,
            to_block,
            events: vec![],
            mode: ScanMode::Live,
        }
    }

    pub fn with_events(mut self, mut events: Vec<DecodedEvent>) -> Self {
        events.sort_by_key(|e| e.position());
        self.events = events;
        self
    }

    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    /// The cursor value written by this batch.
    pub fn cursor(&self) -> ChainCursor {
        ChainCursor::new(self.chain_id, self.kind, self.to_block)
    }
}

/// What a commit changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub orphaned: usize,
    pub candles_rebuilt: usize,
    /// Trades and votes that were inserted or changed, in chain order.
    pub changed: Vec<DecodedEvent>,
}

/// The durable store.
///
/// Implementations: `MemoryStore` and `SqliteStore` (campaignindex-storage).
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Persisted cursor for a `(chain, family)` pair.
    async fn load_cursor(
        &self,
        chain_id: ChainId,
        kind: ContractKind,
    ) -> Result<Option<ChainCursor>, IndexerError>;

    /// All cursors, ordered by chain then family.
    async fn cursors(&self) -> Result<Vec<ChainCursor>, IndexerError>;

    /// Persist a batch and advance the cursor to `batch.to_block`, atomically.
    /// Candles for `timeframes` are rebuilt for every affected bucket.
    async fn commit_batch(
        &self,
        batch: &ScanBatch,
        timeframes: &[Timeframe],
    ) -> Result<CommitOutcome, IndexerError>;

    /// Addresses of every registered campaign on a chain.
    async fn campaign_addresses(&self, chain_id: ChainId) -> Result<Vec<String>, IndexerError>;

    /// `None` when the campaign is neither registered nor has any activity.
    async fn campaign_summary(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
    ) -> Result<Option<CampaignSummary>, IndexerError>;

    /// Most recent confirmed trades, newest first.
    async fn recent_trades(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        limit: usize,
    ) -> Result<Vec<TradeEvent>, IndexerError>;

    /// Most recent confirmed votes, newest first.
    async fn recent_votes(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        limit: usize,
    ) -> Result<Vec<VoteEvent>, IndexerError>;

    /// The latest `limit` candles, oldest first.
    async fn recent_candles(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, IndexerError>;
}

// ─── Commit planning ─────────────────────────────────────────────────────────

/// Stored rows relevant to one batch: every row sharing a natural key with a
/// batch event, plus (for repair batches) every row of the batch's family
/// inside `[from_block, to_block]`.
#[derive(Debug, Clone, Default)]
pub struct PriorRows {
    pub trades: HashMap<NaturalKey, TradeEvent>,
    pub votes: HashMap<NaturalKey, VoteEvent>,
}

impl PriorRows {
    pub fn with_trades(mut self, trades: impl IntoIterator<Item = TradeEvent>) -> Self {
        self.trades.extend(trades.into_iter().map(|t| (t.key(), t)));
        self
    }

    pub fn with_votes(mut self, votes: impl IntoIterator<Item = VoteEvent>) -> Self {
        self.votes.extend(votes.into_iter().map(|v| (v.key(), v)));
        self
    }
}

/// Result of comparing an incoming row with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
    Unchanged,
}

pub fn classify<T: PartialEq>(prior: Option<&T>, incoming: &T) -> WriteKind {
    match prior {
        None => WriteKind::Insert,
        Some(old) if old == incoming => WriteKind::Unchanged,
        Some(_) => WriteKind::Update,
    }
}

/// Writes a backend must apply for one batch, in order.
#[derive(Debug, Clone, Default)]
pub struct CommitPlan {
    pub campaigns: Vec<CampaignCreated>,
    /// Trades to upsert (inserted, changed or re-confirmed).
    pub trades: Vec<TradeEvent>,
    pub votes: Vec<VoteEvent>,
    /// Rows to flip to [`EventStatus::Orphaned`].
    pub orphan_trades: Vec<NaturalKey>,
    pub orphan_votes: Vec<NaturalKey>,
    /// Buckets to rebuild after the writes above.
    pub buckets: BTreeSet<BucketKey>,
    pub outcome: CommitOutcome,
}

/// Work out which rows change, which get orphaned and which candle buckets
/// must be rebuilt.
pub fn plan_commit(batch: &ScanBatch, prior: &PriorRows, timeframes: &[Timeframe]) -> CommitPlan {
    let mut plan = CommitPlan::default();
    let mut seen: HashSet<NaturalKey> = HashSet::new();
    let repair = batch.mode == ScanMode::Repair;

    let touch = |buckets: &mut BTreeSet<BucketKey>, trade: &TradeEvent| {
        for &tf in timeframes {
            buckets.insert(BucketKey::for_trade(trade, tf));
        }
    };

    for event in &batch.events {
        match event {
            DecodedEvent::CampaignCreated(c) => plan.campaigns.push(c.clone()),
            DecodedEvent::Trade(t) => {
                let key = t.key();
                let old = prior.trades.get(&key);
                match classify(old, t) {
                    WriteKind::Unchanged => plan.outcome.unchanged += 1,
                    kind => {
                        if kind == WriteKind::Insert {
                            plan.outcome.inserted += 1;
                        } else {
                            plan.outcome.updated += 1;
                        }
                        if let Some(old) = old {
                            touch(&mut plan.buckets, old);
                        }
                        touch(&mut plan.buckets, t);
                        plan.trades.push(t.clone());
                        plan.outcome.changed.push(event.clone());
                    }
                }
                if repair {
                    touch(&mut plan.buckets, t);
                }
                seen.insert(key);
            }
            DecodedEvent::Vote(v) => {
                let key = v.key();
                match classify(prior.votes.get(&key), v) {
                    WriteKind::Unchanged => plan.outcome.unchanged += 1,
                    kind => {
                        if kind == WriteKind::Insert {
                            plan.outcome.inserted += 1;
                        } else {
                            plan.outcome.updated += 1;
                        }
                        plan.votes.push(v.clone());
                        plan.outcome.changed.push(event.clone());
                    }
                }
                seen.insert(key);
            }
        }
    }

    if repair {
        let in_window = |block: u64| block >= batch.from_block && block <= batch.to_block;

        let mut orphan_trades: Vec<&TradeEvent> = prior
            .trades
            .values()
            .filter(|t| t.chain_id == batch.chain_id && in_window(t.block_number))
            .collect();
        orphan_trades.sort_by_key(|t| t.position());
        for t in orphan_trades {
            // every stored trade in the window covers a bucket of the rewound range
            touch(&mut plan.buckets, t);
            if t.is_confirmed() && !seen.contains(&t.key()) {
                plan.orphan_trades.push(t.key());
                plan.outcome.orphaned += 1;
            }
        }

        let mut orphan_votes: Vec<&VoteEvent> = prior
            .votes
            .values()
            .filter(|v| {
                v.chain_id == batch.chain_id
                    && in_window(v.block_number)
                    && v.status == EventStatus::Confirmed
                    && !seen.contains(&v.key())
            })
            .collect();
        orphan_votes.sort_by_key(|v| v.position());
        for v in orphan_votes {
            plan.orphan_votes.push(v.key());
            plan.outcome.orphaned += 1;
        }
    }

    plan.outcome.candles_rebuilt = plan.buckets.len();
    plan
}

/// Summary fold over a campaign's rows. Only confirmed trades and votes count.
pub fn summarize<'a>(
    chain_id: ChainId,
    campaign_address: &str,
    registration: Option<&CampaignCreated>,
    trades: impl IntoIterator<Item = &'a TradeEvent>,
    votes: impl IntoIterator<Item = &'a VoteEvent>,
) -> CampaignSummary {
    let mut summary = CampaignSummary::empty(chain_id, campaign_address);
    if let Some(reg) = registration {
        summary.creator = Some(reg.creator.clone());
        summary.token_address = Some(reg.token_address.clone());
        summary.created_block = Some(reg.block_number);
    }

    let mut last: Option<&TradeEvent> = None;
    for trade in trades.into_iter().filter(|t| t.is_confirmed()) {
        summary.trade_count += 1;
        match trade.side {
            TradeSide::Buy => summary.buy_count += 1,
            TradeSide::Sell => summary.sell_count += 1,
        }
        summary.volume_native = summary.volume_native.saturating_add(trade.native_amount);
        if last.map_or(true, |l| trade.position() > l.position()) {
            last = Some(trade);
        }
    }
    if let Some(last) = last {
        summary.last_price_native = Some(last.price_native);
        summary.last_trade_time = Some(last.block_time);
    }

    let mut voters = HashSet::new();
    for vote in votes.into_iter().filter(|v| v.status == EventStatus::Confirmed) {
        summary.vote_count += 1;
        voters.insert(vote.voter_address.as_str());
    }
    summary.voter_count = voters.len() as u64;
    summary
}
