//! In-memory priority queue of pending request ids
//!
//! Lower priority values are served first; equal priorities keep submission
//! order via the ledger's sequence number. The queue is never trusted across
//! restarts: the manager rebuilds it from the ledger's active requests.

use std::collections::{BinaryHeap, HashSet};

use crate::error::{Error, Result};
use crate::types::{Priority, RequestId};

#[derive(Clone, Debug, PartialEq, Eq)]
struct QueuedRequest {
    id: RequestId,
    priority: Priority,
    seq: u64,
}

// BinaryHeap is a max-heap, so both comparisons are reversed
impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match other.priority.cmp(&self.priority) {
            std::cmp::Ordering::Equal => other.seq.cmp(&self.seq),
            ordering => ordering,
        }
    }
}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of request ids with O(1) membership checks
#[derive(Debug, Default)]
pub struct RequestQueue {
    heap: BinaryHeap<QueuedRequest>,
    members: HashSet<RequestId>,
}

impl RequestQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id`; returns false (and changes nothing) when it is already queued
    pub fn enqueue(&mut self, id: RequestId, priority: Priority, seq: u64) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.heap.push(QueuedRequest { id, priority, seq });
        true
    }

    /// Pop the highest-priority id
    pub fn dequeue(&mut self) -> Result<RequestId> {
        let next = self.heap.pop().ok_or(Error::EmptyQueue)?;
        self.members.remove(&next.id);
        Ok(next.id)
    }

    /// Id that `dequeue` would return
    pub fn peek(&self) -> Option<&RequestId> {
        self.heap.peek().map(|item| &item.id)
    }

    /// Drop `id` from the queue; returns whether it was present
    pub fn remove(&mut self, id: &RequestId) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        let items: Vec<_> = self.heap.drain().filter(|item| &item.id != id).collect();
        self.heap = items.into_iter().collect();
        true
    }

    /// Replace the contents with `entries`
    pub fn rebuild<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (RequestId, Priority, u64)>,
    {
        self.heap.clear();
        self.members.clear();
        for (id, priority, seq) in entries {
            self.enqueue(id, priority, seq);
        }
    }

    /// Ids in dequeue order
    pub fn snapshot(&self) -> Vec<RequestId> {
        let mut items: Vec<_> = self.heap.iter().collect();
        // descending heap order is dequeue order
        items.sort_by(|a, b| b.cmp(a));
        items.into_iter().map(|item| item.id.clone()).collect()
    }

    /// Whether `id` is queued
    pub fn contains(&self, id: &RequestId) -> bool {
        self.members.contains(id)
    }

    /// Number of queued ids
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
