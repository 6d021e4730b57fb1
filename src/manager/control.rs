//! Listing, inspection and cancellation.

use chrono::Utc;
use std::sync::atomic::Ordering;

use super::RequestManager;
use crate::error::{Error, Result};
use crate::types::{
    ClearOutcome, ClearResult, ClearTarget, Event, QueueStats, Request, RequestId, RequestSummary,
    Status, StatusFilter,
};

impl RequestManager {
    /// Summaries of requests passing `filter`, in submission order
    ///
    /// Reads the ledger only; never touches the queue. Use
    /// [`get_request`](Self::get_request) for the full record.
    pub async fn list_requests(&self, filter: &StatusFilter) -> Vec<RequestSummary> {
        let state = self.state.lock().await;
        state
            .ledger
            .list(filter)
            .into_iter()
            .map(Request::summary)
            .collect()
    }

    /// One request by id
    pub async fn get_request(&self, id: &RequestId) -> Result<Request> {
        let state = self.state.lock().await;
        state
            .ledger
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    /// Cancel requests
    ///
    /// Each targeted id is reported separately: `cancelled` when it was
    /// queued or in progress, `already_terminal` when it had already finished
    /// (its record is left exactly as it was), `not_found` when unknown. A
    /// cancelled running request stops at its next window boundary, and any
    /// wait it is in is cut short.
    pub async fn clear_requests(&self, target: ClearTarget) -> Result<Vec<ClearOutcome>> {
        let now = Utc::now();
        let mut outcomes = Vec::new();
        let mut events = Vec::new();

        let mut state = self.state.lock().await;
        state.adopt_external_cancellations().await;
        let ids = match target {
            ClearTarget::Ids(ids) => ids,
            ClearTarget::AllActive => {
                let mut ids: Vec<RequestId> = state.running.iter().cloned().collect();
                ids.extend(
                    state
                        .ledger
                        .active_ids()
                        .into_iter()
                        .map(|(id, _, _)| id)
                        .filter(|id| Some(id) != state.running.as_ref()),
                );
                ids
            }
        };

        for id in ids {
            let Some(request) = state.ledger.get_mut(&id) else {
                outcomes.push(ClearOutcome {
                    id,
                    result: ClearResult::NotFound,
                });
                continue;
            };

            let result = if request.status == Status::Cancelled {
                ClearResult::AlreadyTerminal
            } else {
                match request.transition(Status::Cancelled, now) {
                    Ok(()) => ClearResult::Cancelled,
                    Err(Error::InvalidTransition { from, .. }) => {
                        tracing::debug!(request_id = %id, status = %from, "request already terminal");
                        ClearResult::AlreadyTerminal
                    }
                    Err(e) => return Err(e),
                }
            };

            if result == ClearResult::Cancelled {
                state.queue.remove(&id);
                if state.running.as_ref() == Some(&id)
                    && let Some(token) = &state.running_token
                {
                    token.cancel();
                }
                tracing::info!(request_id = %id, "request cancelled");
                events.push(Event::Cancelled { id: id.clone() });
            }
            outcomes.push(ClearOutcome { id, result });
        }

        if !events.is_empty() {
            state.persist().await?;
        }
        drop(state);

        for event in events {
            self.emit_event(event);
        }
        Ok(outcomes)
    }

    /// Pending ids in service order, the running request first
    pub async fn queue_snapshot(&self) -> Vec<RequestId> {
        self.state.lock().await.pending()
    }

    /// Ledger and queue counters
    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let counts = state.ledger.count_by_status();
        let count = |status: Status| counts.get(status.as_str()).copied().unwrap_or(0);

        QueueStats {
            total: state.ledger.len(),
            queued: count(Status::Queued),
            in_progress: count(Status::InProgress),
            completed: count(Status::Completed),
            failed: count(Status::Failed),
            cancelled: count(Status::Cancelled),
            queue_len: state.queue.len(),
            running: state.running.clone(),
            accepting_new: self.accepting_new.load(Ordering::SeqCst),
        }
    }
}
