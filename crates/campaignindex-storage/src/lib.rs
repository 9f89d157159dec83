//! campaignindex-storage: durable store backends for CampaignIndex.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both implement [`IndexStore`](campaignindex_core::store::IndexStore) and
//! share the commit planning in `campaignindex_core::store`, so they agree on
//! upsert, orphaning and candle rebuild semantics.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(test)]
mod fixtures;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
