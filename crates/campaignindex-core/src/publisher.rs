//! Realtime publishing.
//!
//! Newly committed trades and votes are pushed to a channel scoped to their
//! `(chain, campaign)`. Publishing is best effort: a failure is logged and
//! never touches persisted state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::PublishError;
use crate::types::{ChainId, DecodedEvent};

/// Channel for one campaign's live updates.
pub fn channel_name(chain_id: ChainId, campaign_address: &str) -> String {
    format!("campaign:{chain_id}:{}", campaign_address.to_ascii_lowercase())
}

/// A subscribe-only credential bound to a single channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeCredential {
    pub token: String,
    pub channel: String,
    pub capability: Vec<String>,
    /// Unix timestamp after which the token is rejected.
    pub expires_at: i64,
}

/// Boundary to the realtime hub.
#[async_trait]
pub trait RealtimeHub: Send + Sync {
    /// Fire-and-forget publish.
    async fn publish(&self, channel: &str, payload: serde_json::Value) -> Result<(), PublishError>;

    /// Issue a credential that may only subscribe to `channel`.
    async fn issue_subscribe_token(
        &self,
        channel: &str,
        ttl: Duration,
    ) -> Result<SubscribeCredential, PublishError>;
}

// ─── Publisher ───────────────────────────────────────────────────────────────

/// Pushes committed events to the hub in the order they were persisted.
#[derive(Clone)]
pub struct Publisher {
    hub: Arc<dyn RealtimeHub>,
}

impl Publisher {
    pub fn new(hub: Arc<dyn RealtimeHub>) -> Self {
        Self { hub }
    }

    /// Publish every trade and vote in `events`. Returns how many were
    /// delivered to the hub; failures are logged and skipped.
    pub async fn publish_all(&self, events: &[DecodedEvent]) -> usize {
        let mut delivered = 0;
        for event in events {
            if matches!(event, DecodedEvent::CampaignCreated(_)) {
                continue;
            }
            let channel = channel_name(event.chain_id(), event.campaign_address());
            let payload = match serde_json::to_value(event) {
                Ok(v) => v,
                Err(e) => {
                    warn!(%channel, error = %e, "failed to serialise realtime payload");
                    continue;
                }
            };
            match self.hub.publish(&channel, payload).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(%channel, error = %e, "realtime publish failed"),
            }
        }
        delivered
    }
}

// ─── BroadcastHub ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Grant {
    channel: String,
    /// Unix milliseconds.
    expires_at_ms: i64,
}

/// In-process hub: one `tokio::sync::broadcast` sender per channel, with
/// subscribe tokens kept in memory.
pub struct BroadcastHub {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<serde_json::Value>>>,
    grants: Mutex<HashMap<String, Grant>>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
            grants: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<serde_json::Value> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Redeem a token for a receiver on its channel.
    pub fn subscribe(&self, token: &str) -> Result<broadcast::Receiver<serde_json::Value>, PublishError> {
        let grant = {
            let mut grants = self.grants.lock().unwrap_or_else(|p| p.into_inner());
            let now = chrono::Utc::now().timestamp_millis();
            grants.retain(|_, g| g.expires_at_ms > now);
            grants.get(token).cloned().ok_or(PublishError::InvalidToken)?
        };
        Ok(self.sender(&grant.channel).subscribe())
    }

    /// Like [`subscribe`](Self::subscribe) but also checks the token was
    /// issued for `channel`.
    pub fn subscribe_to(
        &self,
        channel: &str,
        token: &str,
    ) -> Result<broadcast::Receiver<serde_json::Value>, PublishError> {
        let bound = {
            let grants = self.grants.lock().unwrap_or_else(|p| p.into_inner());
            grants.get(token).map(|g| g.channel.clone())
        };
        match bound {
            Some(ch) if ch != channel => Err(PublishError::WrongChannel(channel.to_string())),
            _ => self.subscribe(token),
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels.get(channel).map_or(0, |tx| tx.receiver_count())
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(1_024)
    }
}

#[async_trait]
impl RealtimeHub for BroadcastHub {
    async fn publish(&self, channel: &str, payload: serde_json::Value) -> Result<(), PublishError> {
        // no subscribers is not an error
        let receivers = self.sender(channel).send(payload).unwrap_or(0);
        debug!(channel, receivers, "published");
        Ok(())
    }

    async fn issue_subscribe_token(
        &self,
        channel: &str,
        ttl: Duration,
    ) -> Result<SubscribeCredential, PublishError> {
        let token = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at_ms = now.saturating_add(ttl_ms);
        // reported in whole seconds, rounded up
        let expires_at = expires_at_ms.div_euclid(1_000) + i64::from(expires_at_ms.rem_euclid(1_000) > 0);

        let mut grants = self.grants.lock().unwrap_or_else(|p| p.into_inner());
        grants.retain(|_, g| g.expires_at_ms > now);
        grants.insert(
            token.clone(),
            Grant {
                channel: channel.to_string(),
                expires_at_ms,
            },
        );
        drop(grants);

        Ok(SubscribeCredential {
            token,
            channel: channel.to_string(),
            capability: vec!["subscribe".into()],
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventStatus, TradeEvent, TradeSide};

    fn trade(campaign: &str, block: u64) -> DecodedEvent {
        DecodedEvent::Trade(TradeEvent {
            chain_id: 8453,
            campaign_address: campaign.into(),
            tx_hash: format!("0x{block:064x}"),
            log_index: 0,
            block_number: block,
            block_time: 1_700_000_000,
            side: TradeSide::Buy,
            wallet: "0x00000000000000000000000000000000000000aa".into(),
            token_amount: 10,
            native_amount: 20,
            price_native: 2.0,
            status: EventStatus::Confirmed,
        })
    }

    struct FailingHub;

    #[async_trait]
    impl RealtimeHub for FailingHub {
        async fn publish(&self, _: &str, _: serde_json::Value) -> Result<(), PublishError> {
            Err(PublishError::Unavailable("down".into()))
        }
        async fn issue_subscribe_token(
            &self,
            _: &str,
            _: Duration,
        ) -> Result<SubscribeCredential, PublishError> {
            Err(PublishError::Unavailable("down".into()))
        }
    }

    #[test]
    fn channel_is_scoped_to_chain_and_campaign() {
        assert_eq!(channel_name(8453, "0xABC"), "campaign:8453:0xabc");
    }

    #[tokio::test]
    async fn subscribers_receive_in_publish_order() {
        let hub = Arc::new(BroadcastHub::new(16));
        let channel = channel_name(8453, "0xabc");
        let cred = hub
            .issue_subscribe_token(&channel, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cred.capability, vec!["subscribe".to_string()]);
        let mut rx = hub.subscribe(&cred.token).unwrap();

        let publisher = Publisher::new(hub.clone());
        let sent = publisher
            .publish_all(&[trade("0xabc", 1), trade("0xdef", 2), trade("0xabc", 3)])
            .await;
        assert_eq!(sent, 3);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first["type"], "trade");
        assert_eq!(first["blockNumber"], 1);
        assert_eq!(second["blockNumber"], 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn tokens_are_bound_to_one_channel() {
        let hub = BroadcastHub::default();
        let cred = hub
            .issue_subscribe_token("campaign:1:0xabc", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(hub.subscribe_to("campaign:1:0xabc", &cred.token).is_ok());
        assert_eq!(
            hub.subscribe_to("campaign:1:0xdef", &cred.token).unwrap_err(),
            PublishError::WrongChannel("campaign:1:0xdef".into())
        );
        assert_eq!(hub.subscribe("nope").unwrap_err(), PublishError::InvalidToken);
    }

    #[tokio::test]
    async fn expired_tokens_are_rejected() {
        let hub = BroadcastHub::default();
        let cred = hub
            .issue_subscribe_token("campaign:1:0xabc", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(hub.subscribe(&cred.token).unwrap_err(), PublishError::InvalidToken);
    }

    #[tokio::test]
    async fn sub_second_ttl_is_still_redeemable() {
        let hub = BroadcastHub::default();
        let cred = hub
            .issue_subscribe_token("campaign:1:0xabc", Duration::from_millis(500))
            .await
            .unwrap();
        assert!(hub.subscribe(&cred.token).is_ok());
    }

    #[tokio::test]
    async fn issuing_prunes_expired_grants() {
        let hub = BroadcastHub::default();
        for _ in 0..5 {
            hub.issue_subscribe_token("campaign:1:0xabc", Duration::ZERO)
                .await
                .unwrap();
        }
        let live = hub
            .issue_subscribe_token("campaign:1:0xabc", Duration::from_secs(60))
            .await
            .unwrap();

        let grants = hub.grants.lock().unwrap();
        assert_eq!(grants.len(), 1);
        assert!(grants.contains_key(&live.token));
    }

    #[tokio::test]
    async fn publish_failures_are_swallowed() {
        let publisher = Publisher::new(Arc::new(FailingHub));
        assert_eq!(publisher.publish_all(&[trade("0xabc", 1)]).await, 0);
    }
}
