//! In-memory storage backend.
//!
//! Keeps cursors, campaigns, trades, votes and candles in RAM behind one
//! mutex, so a commit is applied all-or-nothing. Useful for tests and
//! short-lived indexers that don't need persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use campaignindex_core::candle::{recompute_bucket, BucketKey, Candle, Timeframe};
use campaignindex_core::cursor::ChainCursor;
use campaignindex_core::error::IndexerError;
use campaignindex_core::store::{plan_commit, summarize, CommitOutcome, IndexStore, PriorRows, ScanBatch, ScanMode};
use campaignindex_core::types::{
    CampaignCreated, CampaignSummary, ChainId, ContractKind, DecodedEvent, EventStatus, NaturalKey,
    TradeEvent, VoteEvent,
};

#[derive(Debug, Default)]
struct State {
    cursors: BTreeMap<(ChainId, ContractKind), ChainCursor>,
    campaigns: BTreeMap<(ChainId, String), CampaignCreated>,
    trades: HashMap<NaturalKey, TradeEvent>,
    votes: HashMap<NaturalKey, VoteEvent>,
    candles: BTreeMap<BucketKey, Candle>,
}

impl State {
    fn prior_rows(&self, batch: &ScanBatch) -> PriorRows {
        let mut prior = PriorRows::default();
        for event in &batch.events {
            match event {
                DecodedEvent::Trade(t) => {
                    if let Some(old) = self.trades.get(&t.key()) {
                        prior.trades.insert(old.key(), old.clone());
                    }
                }
                DecodedEvent::Vote(v) => {
                    if let Some(old) = self.votes.get(&v.key()) {
                        prior.votes.insert(old.key(), old.clone());
                    }
                }
                DecodedEvent::CampaignCreated(_) => {}
            }
        }

        if batch.mode == ScanMode::Repair {
            let in_window = |chain: ChainId, block: u64| {
                chain == batch.chain_id && block >= batch.from_block && block <= batch.to_block
            };
            match batch.kind {
                ContractKind::Campaign => prior = prior.with_trades(
                    self.trades
                        .values()
                        .filter(|t| in_window(t.chain_id, t.block_number))
                        .cloned(),
                ),
                ContractKind::VoteTreasury => prior = prior.with_votes(
                    self.votes
                        .values()
                        .filter(|v| in_window(v.chain_id, v.block_number))
                        .cloned(),
                ),
                ContractKind::Factory => {}
            }
        }
        prior
    }

    fn rebuild_candle(&mut self, key: &BucketKey) {
        let trades: Vec<TradeEvent> = self
            .trades
            .values()
            .filter(|t| key.contains(t))
            .cloned()
            .collect();
        match recompute_bucket(key, &trades) {
            Some(candle) => {
                self.candles.insert(key.clone(), candle);
            }
            None => {
                self.candles.remove(key);
            }
        }
    }
}

/// In-memory index store.
///
/// All data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Every stored trade for a campaign regardless of status, in chain order.
    pub fn trades_for(&self, chain_id: ChainId, campaign_address: &str) -> Vec<TradeEvent> {
        let mut trades: Vec<TradeEvent> = self
            .lock()
            .trades
            .values()
            .filter(|t| t.chain_id == chain_id && t.campaign_address == campaign_address)
            .cloned()
            .collect();
        trades.sort_by_key(|t| t.position());
        trades
    }

    /// Every stored candle, ordered by bucket key.
    pub fn candles(&self) -> Vec<Candle> {
        self.lock().candles.values().cloned().collect()
    }

    pub fn trade_count(&self) -> usize {
        self.lock().trades.len()
    }

    pub fn vote_count(&self) -> usize {
        self.lock().votes.len()
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn load_cursor(
        &self,
        chain_id: ChainId,
        kind: ContractKind,
    ) -> Result<Option<ChainCursor>, IndexerError> {
        Ok(self.lock().cursors.get(&(chain_id, kind)).cloned())
    }

    async fn cursors(&self) -> Result<Vec<ChainCursor>, IndexerError> {
        Ok(self.lock().cursors.values().cloned().collect())
    }

    async fn commit_batch(
        &self,
        batch: &ScanBatch,
        timeframes: &[Timeframe],
    ) -> Result<CommitOutcome, IndexerError> {
        let mut state = self.lock();
        let prior = state.prior_rows(batch);
        let plan = plan_commit(batch, &prior, timeframes);

        for c in plan.campaigns {
            state
                .campaigns
                .insert((c.chain_id, c.campaign_address.clone()), c);
        }
        for t in plan.trades {
            state.trades.insert(t.key(), t);
        }
        for v in plan.votes {
            state.votes.insert(v.key(), v);
        }
        for key in &plan.orphan_trades {
            if let Some(t) = state.trades.get_mut(key) {
                t.status = EventStatus::Orphaned;
            }
        }
        for key in &plan.orphan_votes {
            if let Some(v) = state.votes.get_mut(key) {
                v.status = EventStatus::Orphaned;
            }
        }
        for key in &plan.buckets {
            state.rebuild_candle(key);
        }
        state.cursors.insert((batch.chain_id, batch.kind), batch.cursor());

        debug!(
            chain_id = batch.chain_id,
            kind = %batch.kind,
            to = batch.to_block,
            inserted = plan.outcome.inserted,
            updated = plan.outcome.updated,
            "memory commit"
        );
        Ok(plan.outcome)
    }

    async fn campaign_addresses(&self, chain_id: ChainId) -> Result<Vec<String>, IndexerError> {
        Ok(self
            .lock()
            .campaigns
            .keys()
            .filter(|(chain, _)| *chain == chain_id)
            .map(|(_, addr)| addr.clone())
            .collect())
    }

    async fn campaign_summary(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
    ) -> Result<Option<CampaignSummary>, IndexerError> {
        let state = self.lock();
        let registration = state.campaigns.get(&(chain_id, campaign_address.to_string()));
        let of_campaign = |chain: ChainId, addr: &str| chain == chain_id && addr == campaign_address;
        let trades: Vec<&TradeEvent> = state
            .trades
            .values()
            .filter(|t| of_campaign(t.chain_id, &t.campaign_address))
            .collect();
        let votes: Vec<&VoteEvent> = state
            .votes
            .values()
            .filter(|v| of_campaign(v.chain_id, &v.campaign_address))
            .collect();

        if registration.is_none() && trades.is_empty() && votes.is_empty() {
            return Ok(None);
        }
        Ok(Some(summarize(chain_id, campaign_address, registration, trades, votes)))
    }

    async fn recent_trades(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        limit: usize,
    ) -> Result<Vec<TradeEvent>, IndexerError> {
        let mut trades: Vec<TradeEvent> = self
            .lock()
            .trades
            .values()
            .filter(|t| {
                t.chain_id == chain_id && t.campaign_address == campaign_address && t.is_confirmed()
            })
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.position().cmp(&a.position()));
        trades.truncate(limit);
        Ok(trades)
    }

    async fn recent_votes(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        limit: usize,
    ) -> Result<Vec<VoteEvent>, IndexerError> {
        let mut votes: Vec<VoteEvent> = self
            .lock()
            .votes
            .values()
            .filter(|v| {
                v.chain_id == chain_id
                    && v.campaign_address == campaign_address
                    && v.status == EventStatus::Confirmed
            })
            .cloned()
            .collect();
        votes.sort_by(|a, b| b.position().cmp(&a.position()));
        votes.truncate(limit);
        Ok(votes)
    }

    async fn recent_candles(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, IndexerError> {
        let state = self.lock();
        let matching: Vec<&Candle> = state
            .candles
            .values()
            .filter(|c| {
                c.chain_id == chain_id
                    && c.campaign_address == campaign_address
                    && c.timeframe == timeframe
            })
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }
}
