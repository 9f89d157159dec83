//! Read-only facade over the durable store, consumed by the HTTP layer.

use std::sync::Arc;
use std::time::Duration;

use crate::candle::{Candle, Timeframe};
use crate::error::IndexerError;
use crate::publisher::{channel_name, RealtimeHub, SubscribeCredential};
use crate::store::IndexStore;
use crate::types::{normalize_address, CampaignSummary, ChainId, TradeEvent, VoteEvent};

/// Upper bound on `list_trades` / `list_votes`.
pub const MAX_TRADES: usize = 200;
/// Upper bound on `list_candles`.
pub const MAX_CANDLES: usize = 2_000;

/// Snapshot queries plus realtime credential issuance. Holds no state of its
/// own.
#[derive(Clone)]
pub struct QueryFacade {
    store: Arc<dyn IndexStore>,
    hub: Arc<dyn RealtimeHub>,
    token_ttl: Duration,
}

impl QueryFacade {
    pub fn new(store: Arc<dyn IndexStore>, hub: Arc<dyn RealtimeHub>, token_ttl: Duration) -> Self {
        Self { store, hub, token_ttl }
    }

    pub async fn get_campaign_summary(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
    ) -> Result<Option<CampaignSummary>, IndexerError> {
        self.store
            .campaign_summary(chain_id, &normalize_address(campaign_address))
            .await
    }

    /// Most recent trades first. `limit` is clamped to `1..=200`.
    pub async fn list_trades(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        limit: usize,
    ) -> Result<Vec<TradeEvent>, IndexerError> {
        self.store
            .recent_trades(chain_id, &normalize_address(campaign_address), limit.clamp(1, MAX_TRADES))
            .await
    }

    /// Most recent votes first. `limit` is clamped to `1..=200`.
    pub async fn list_votes(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        limit: usize,
    ) -> Result<Vec<VoteEvent>, IndexerError> {
        self.store
            .recent_votes(chain_id, &normalize_address(campaign_address), limit.clamp(1, MAX_TRADES))
            .await
    }

    /// Chronological candles. `limit` is clamped to `1..=2000`.
    pub async fn list_candles(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, IndexerError> {
        self.store
            .recent_candles(
                chain_id,
                &normalize_address(campaign_address),
                timeframe,
                limit.clamp(1, MAX_CANDLES),
            )
            .await
    }

    pub async fn get_realtime_subscribe_credential(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
    ) -> Result<SubscribeCredential, IndexerError> {
        let channel = channel_name(chain_id, campaign_address);
        Ok(self.hub.issue_subscribe_token(&channel, self.token_ttl).await?)
    }
}
