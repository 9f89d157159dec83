//! campaignindex-core: domain model and pure pipeline stages for the
//! campaign event indexer.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (campaignindex-evm)
//!   └── ChainPipeline ── per tick, per contract family
//!         ├── ChainClient     latest block / eth_getLogs
//!         ├── decoder         RawLog → Trade | Vote | CampaignCreated
//!         ├── IndexStore      transactional upsert + candle rebuild + cursor
//!         └── Publisher       best-effort push to RealtimeHub
//!   └── RepairJob ── slower cadence, rewinds and rescans under the cursor lock
//!
//! QueryFacade ── read-only view over IndexStore for the HTTP layer
//! ```

pub mod candle;
pub mod config;
pub mod cursor;
pub mod decoder;
pub mod error;
pub mod publisher;
pub mod query;
pub mod store;
pub mod types;

pub use candle::{bucket_start, recompute_bucket, BucketKey, Candle, CandleAggregator, Timeframe};
pub use config::{ChainConfig, ConfigError, IndexerConfig};
pub use cursor::{ChainCursor, CursorLocks};
pub use error::{DecodeError, IndexerError, PublishError};
pub use publisher::{BroadcastHub, Publisher, RealtimeHub, SubscribeCredential};
pub use query::QueryFacade;
pub use store::{CommitOutcome, IndexStore, ScanBatch, ScanMode};
pub use types::{
    CampaignCreated, CampaignSummary, ChainId, ContractKind, DecodedEvent, EventStatus, RawLog,
    TradeEvent, TradeSide, VoteEvent,
};
