//! Accepting new requests.

use chrono::Utc;
use std::sync::atomic::Ordering;

use super::RequestManager;
use crate::error::{Error, Result};
use crate::types::{
    Event, NewRequest, Priority, Request, Status, SubmitOutcome, SubmitResult,
};

impl RequestManager {
    /// Submit one request
    ///
    /// See [`submit_batch`](Self::submit_batch).
    pub async fn submit(&self, request: NewRequest) -> Result<SubmitOutcome> {
        self.submit_batch(vec![request])
            .await?
            .pop()
            .ok_or_else(|| Error::Other("submission produced no outcome".to_string()))
    }

    /// Merge new requests into the ledger and queue
    ///
    /// Per item:
    /// - an id already in the ledger (whatever its status) is left untouched
    ///   and reported as `already_exists`
    /// - an unknown source adapter is `rejected`
    /// - otherwise the request is recorded `queued` with its range fixed
    ///   relative to now, and enqueued
    ///
    /// The ledger is persisted once, before any outcome is returned.
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] once shutdown has started; storage errors from
    /// persisting.
    pub async fn submit_batch(&self, batch: Vec<NewRequest>) -> Result<Vec<SubmitOutcome>> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let now = Utc::now();
        let mut outcomes = Vec::with_capacity(batch.len());
        let mut events = Vec::new();

        let mut state = self.state.lock().await;
        for new in batch {
            let id = new.resolve_id()?;

            if id.as_str().trim().is_empty() {
                outcomes.push(SubmitOutcome {
                    id,
                    result: SubmitResult::Rejected {
                        reason: "id must not be empty".to_string(),
                    },
                });
                continue;
            }

            if let Some(existing) = state.ledger.get(&id) {
                tracing::debug!(request_id = %id, status = %existing.status, "request already in ledger");
                outcomes.push(SubmitOutcome {
                    id,
                    result: SubmitResult::AlreadyExists {
                        status: existing.status,
                    },
                });
                continue;
            }

            if !self.registry.contains(&new.source_adapter) {
                let reason = Error::UnknownAdapter(new.source_adapter.clone()).to_string();
                tracing::warn!(request_id = %id, reason = %reason, "rejecting request");
                outcomes.push(SubmitOutcome {
                    id,
                    result: SubmitResult::Rejected { reason },
                });
                continue;
            }

            let priority = new.priority.unwrap_or(Priority::DEFAULT);
            let seq = state.ledger.next_seq();
            let range = self.windower.resolve_range(&new.params, now);
            let request = Request {
                id: id.clone(),
                source_adapter: new.source_adapter,
                endpoint: new.endpoint,
                params: new.params,
                priority,
                status: Status::Queued,
                range,
                progress: None,
                error: None,
                submitted_at: now,
                started_at: None,
                finished_at: None,
                seq,
            };

            state.ledger.upsert(request);
            state.queue.enqueue(id.clone(), priority, seq);
            tracing::info!(
                request_id = %id,
                priority = priority.0,
                since = %range.since,
                until = %range.until,
                "request queued"
            );
            events.push(Event::Queued {
                id: id.clone(),
                priority,
            });
            outcomes.push(SubmitOutcome {
                id,
                result: SubmitResult::Queued,
            });
        }

        if !events.is_empty() {
            state.persist().await?;
        }
        drop(state);

        if !events.is_empty() {
            self.work_available.notify_one();
        }
        for event in events {
            self.emit_event(event);
        }
        Ok(outcomes)
    }
}
