//! Storage contract for the ledger

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Request, RequestId};

/// Current on-disk snapshot format
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything the ledger persists, in one piece
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Format version
    pub version: u32,
    /// When this snapshot was written
    pub updated_at: DateTime<Utc>,
    /// Every request, in submission order
    pub requests: Vec<Request>,
}

impl LedgerSnapshot {
    /// Snapshot of `requests` stamped with `now`
    pub fn new(requests: Vec<Request>, now: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            updated_at: now,
            requests,
        }
    }
}

/// Persisted queue order
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Pending ids in dequeue order
    pub pending: Vec<RequestId>,
}

/// Durable backend for ledger snapshots
///
/// `save` and `save_queue` must replace the stored state atomically: a
/// concurrent `load` sees either the old or the new snapshot, never a mix.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Read the stored ledger
    ///
    /// `Ok(None)` when nothing was ever saved; `Err(CorruptState)` when stored
    /// data exists but cannot be parsed.
    async fn load(&self) -> Result<Option<LedgerSnapshot>>;

    /// Replace the stored ledger
    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<()>;

    /// Read the stored queue order
    async fn load_queue(&self) -> Result<Option<QueueSnapshot>>;

    /// Replace the stored queue order
    async fn save_queue(&self, snapshot: &QueueSnapshot) -> Result<()>;

    /// Move unreadable state out of the way so the next `save` cannot
    /// overwrite it; returns where it went
    async fn quarantine(&self, now: DateTime<Utc>) -> Result<Option<String>>;

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}
