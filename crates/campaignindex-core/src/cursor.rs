//! Chain cursor: tracks how far each contract family has been scanned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::types::{ChainId, ContractKind};

/// Persisted scan position for one `(chain, contract family)` pair.
///
/// Only advanced by a store commit, in the same transaction as the events of
/// the range it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCursor {
    pub chain_id: ChainId,
    pub kind: ContractKind,
    /// Last block whose logs are durably persisted.
    pub last_scanned_block: u64,
    /// Unix timestamp of the last update.
    pub updated_at: i64,
}

impl ChainCursor {
    pub fn new(chain_id: ChainId, kind: ContractKind, last_scanned_block: u64) -> Self {
        Self {
            chain_id,
            kind,
            last_scanned_block,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Returns the next block to scan (cursor + 1).
    pub fn next_block(&self) -> u64 {
        self.last_scanned_block + 1
    }

    /// First block a rewind of `depth` blocks would rescan, never below
    /// `floor` (the family's start block).
    pub fn rewound(&self, depth: u64, floor: u64) -> u64 {
        self.last_scanned_block.saturating_sub(depth).max(floor)
    }
}

/// First block to scan for a family, given its cursor (if any).
///
/// Without a cursor the configured start block wins; without either the scan
/// begins `lookback` blocks behind the confirmed head.
pub fn resolve_next_block(
    cursor: Option<&ChainCursor>,
    start_block: Option<u64>,
    lookback: u64,
    confirmed_head: u64,
) -> u64 {
    match (cursor, start_block) {
        (Some(c), Some(start)) => c.next_block().max(start),
        (Some(c), None) => c.next_block(),
        (None, Some(start)) => start,
        (None, None) => confirmed_head.saturating_sub(lookback),
    }
}

/// Exclusive-access handles for cursors.
///
/// The live scanner uses `try_lock` and skips a family whose cursor is held;
/// the repair job waits for the lock, so the two never run over the same
/// cursor at once.
#[derive(Debug, Default)]
pub struct CursorLocks {
    inner: Mutex<HashMap<(ChainId, ContractKind), Arc<tokio::sync::Mutex<()>>>>,
}

impl CursorLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle for the `(chain, kind)` cursor lock.
    pub fn handle(&self, chain_id: ChainId, kind: ContractKind) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.entry((chain_id, kind)).or_default().clone()
    }
}
