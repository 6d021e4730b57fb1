//! State ledger
//!
//! Durable record of every request ever submitted: status, resolved range and
//! windowing checkpoint. The in-memory map is the working copy; every mutation
//! the manager makes is followed by [`Ledger::persist`], which hands a full
//! snapshot to the configured [`LedgerStore`].
//!
//! ## Submodules
//!
//! - [`store`] - the storage contract and snapshot types
//! - [`json_file`] - JSON files replaced by atomic rename (default)
//! - [`sqlite`] - SQLite via sqlx

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{Priority, Request, RequestId, Status, StatusFilter};

pub mod json_file;
pub mod sqlite;
pub mod store;

pub use json_file::JsonFileStore;
pub use sqlite::SqliteStore;
pub use store::{LedgerSnapshot, LedgerStore, QueueSnapshot};

/// In-memory ledger backed by a [`LedgerStore`]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    requests: BTreeMap<RequestId, Request>,
    next_seq: u64,
}

impl Ledger {
    /// Empty ledger writing to `store`
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            requests: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Replace the in-memory state with what the store holds
    ///
    /// Returns the number of requests loaded. On `CorruptState` the in-memory
    /// ledger is left empty.
    pub async fn load(&mut self) -> Result<usize> {
        self.requests.clear();
        self.next_seq = 0;

        let Some(snapshot) = self.store.load().await? else {
            return Ok(0);
        };
        for request in snapshot.requests {
            self.next_seq = self.next_seq.max(request.seq + 1);
            self.requests.insert(request.id.clone(), request);
        }
        Ok(self.requests.len())
    }

    /// Move unreadable stored state aside
    pub async fn quarantine(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        self.store.quarantine(now).await
    }

    /// Insert or overwrite by id
    pub fn upsert(&mut self, request: Request) {
        self.next_seq = self.next_seq.max(request.seq + 1);
        self.requests.insert(request.id.clone(), request);
    }

    /// Look up a request
    pub fn get(&self, id: &RequestId) -> Option<&Request> {
        self.requests.get(id)
    }

    /// Look up a request for mutation
    pub fn get_mut(&mut self, id: &RequestId) -> Option<&mut Request> {
        self.requests.get_mut(id)
    }

    /// Whether `id` was ever submitted
    pub fn contains(&self, id: &RequestId) -> bool {
        self.requests.contains_key(id)
    }

    /// Requests passing `filter`, in submission order
    pub fn list(&self, filter: &StatusFilter) -> Vec<&Request> {
        let mut requests: Vec<_> = self
            .requests
            .values()
            .filter(|request| filter.matches(request.status))
            .collect();
        requests.sort_by_key(|request| request.seq);
        requests
    }

    /// Non-terminal requests as queue entries, by priority then submission
    pub fn active_ids(&self) -> Vec<(RequestId, Priority, u64)> {
        let mut active: Vec<_> = self
            .requests
            .values()
            .filter(|request| request.status.is_active())
            .map(|request| (request.id.clone(), request.priority, request.seq))
            .collect();
        active.sort_by_key(|(_, priority, seq)| (*priority, *seq));
        active
    }

    /// Allocate the next submission sequence number
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Number of requests per status
    pub fn count_by_status(&self) -> BTreeMap<&'static str, usize> {
        let mut counts: BTreeMap<&'static str, usize> =
            Status::ALL.iter().map(|status| (status.as_str(), 0)).collect();
        for request in self.requests.values() {
            *counts.entry(request.status.as_str()).or_default() += 1;
        }
        counts
    }

    /// Number of requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// True when nothing was ever submitted
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Write the full ledger to the store
    pub async fn persist(&self) -> Result<()> {
        let mut requests: Vec<Request> = self.requests.values().cloned().collect();
        requests.sort_by_key(|request| request.seq);
        self.store
            .save(&LedgerSnapshot::new(requests, Utc::now()))
            .await
    }

    /// Write the queue order to the store
    pub async fn persist_queue(&self, pending: Vec<RequestId>) -> Result<()> {
        self.store.save_queue(&QueueSnapshot { pending }).await
    }

    /// Read the stored queue order
    pub async fn load_queue(&self) -> Result<Option<QueueSnapshot>> {
        self.store.load_queue().await
    }

    /// Adopt cancellations written to the store by another process
    ///
    /// Re-reads the stored ledger; any request that is active here but stored
    /// as `cancelled` is cancelled in memory too. Returns the adopted ids.
    pub async fn adopt_external_cancellations(&mut self) -> Result<Vec<RequestId>> {
        let Some(snapshot) = self.store.load().await? else {
            return Ok(Vec::new());
        };

        let mut adopted = Vec::new();
        for stored in snapshot.requests {
            if stored.status != Status::Cancelled {
                continue;
            }
            let Some(local) = self.requests.get_mut(&stored.id) else {
                continue;
            };
            if local.status.is_active() {
                let at = stored.finished_at.unwrap_or_else(Utc::now);
                local.transition(Status::Cancelled, at)?;
                adopted.push(stored.id);
            }
        }
        Ok(adopted)
    }

    /// Where the ledger lives, for logs
    pub fn describe(&self) -> String {
        self.store.describe()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
