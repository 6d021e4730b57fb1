//! Queue draining: one request at a time, one sub-window at a time.

use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::RequestManager;
use crate::error::{Error, Result};
use crate::fetch::{Classification, FetchRequest};
use crate::retry::RetryDecision;
use crate::types::{Event, Progress, RequestError, RequestId, Status};

/// Tally of one worker run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Requests that finished every window
    pub completed: usize,
    /// Requests that hit a fatal error
    pub failed: usize,
    /// Requests found or made cancelled while being worked on
    pub cancelled: usize,
    /// Dequeued ids that were already terminal
    pub skipped: usize,
    /// Requests abandoned because of an internal error
    pub errors: usize,
    /// Whether shutdown stopped the run
    pub interrupted: bool,
}

impl RunSummary {
    fn absorb(&mut self, other: RunSummary) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.interrupted |= other.interrupted;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RequestOutcome {
    Completed,
    Failed,
    Cancelled,
    Skipped,
    Interrupted,
}

impl RequestManager {
    /// Work until the queue is empty or shutdown is requested
    ///
    /// Requests are served strictly by priority, one at a time. A failing
    /// request never stops the run.
    ///
    /// # Errors
    ///
    /// Fails if another worker loop is already active on this manager.
    pub async fn run(&self) -> Result<RunSummary> {
        let _worker = self.run_lock.try_lock().map_err(|_| {
            Error::Other("a worker loop is already running on this manager".to_string())
        })?;
        self.drain().await
    }

    /// Like [`run`](Self::run), but waits for new submissions instead of
    /// returning when the queue empties; returns after shutdown
    pub async fn run_until_shutdown(&self) -> Result<RunSummary> {
        let _worker = self.run_lock.try_lock().map_err(|_| {
            Error::Other("a worker loop is already running on this manager".to_string())
        })?;

        let mut total = RunSummary::default();
        loop {
            total.absorb(self.drain().await?);
            if self.shutdown_token.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = self.work_available.notified() => {}
                _ = self.shutdown_token.cancelled() => break,
            }
        }
        total.interrupted = true;
        Ok(total)
    }

    async fn drain(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        loop {
            if self.shutdown_token.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            let next = {
                let mut state = self.state.lock().await;
                match state.queue.dequeue() {
                    Ok(id) => {
                        let token = self.shutdown_token.child_token();
                        state.running = Some(id.clone());
                        state.running_token = Some(token.clone());
                        Some((id, token))
                    }
                    Err(Error::EmptyQueue) => None,
                    Err(e) => return Err(e),
                }
            };
            let Some((id, token)) = next else {
                break;
            };

            let outcome = self.process_request(&id, &token).await;

            let mut state = self.state.lock().await;
            state.running = None;
            state.running_token = None;

            match outcome {
                Ok(RequestOutcome::Completed) => summary.completed += 1,
                Ok(RequestOutcome::Failed) => summary.failed += 1,
                Ok(RequestOutcome::Cancelled) => summary.cancelled += 1,
                Ok(RequestOutcome::Skipped) => summary.skipped += 1,
                Ok(RequestOutcome::Interrupted) => {
                    if let Some(request) = state.ledger.get(&id)
                        && request.status.is_active()
                    {
                        let (priority, seq) = (request.priority, request.seq);
                        state.queue.enqueue(id.clone(), priority, seq);
                    }
                    tracing::info!(request_id = %id, "request interrupted, will resume from checkpoint");
                    summary.interrupted = true;
                }
                Err(e) => {
                    tracing::error!(request_id = %id, error = %e, "request processing failed");
                    summary.errors += 1;
                    let now = Utc::now();
                    if let Some(request) = state.ledger.get_mut(&id)
                        && request.status.is_active()
                    {
                        let error = RequestError {
                            class: None,
                            message: e.to_string(),
                            http_status: None,
                            window: None,
                            at: now,
                        };
                        request.error = Some(error.clone());
                        if request.transition(Status::Failed, now).is_ok() {
                            self.emit_event(Event::Failed {
                                id: id.clone(),
                                error,
                            });
                        }
                    }
                }
            }

            if let Err(e) = state.persist().await {
                tracing::error!(error = %e, "failed to persist ledger after request");
            }
            if summary.interrupted {
                break;
            }
        }

        Ok(summary)
    }

    async fn process_request(
        &self,
        id: &RequestId,
        token: &CancellationToken,
    ) -> Result<RequestOutcome> {
        let request = {
            let mut state = self.state.lock().await;
            state.adopt_external_cancellations().await;
            state
                .ledger
                .get(id)
                .cloned()
                .ok_or_else(|| Error::NotFound(id.clone()))?
        };
        match request.status {
            Status::Cancelled => {
                tracing::info!(request_id = %id, "request cancelled before it started");
                return Ok(RequestOutcome::Cancelled);
            }
            status if status.is_terminal() => {
                tracing::debug!(request_id = %id, status = %status, "skipping finished request");
                return Ok(RequestOutcome::Skipped);
            }
            _ => {}
        }

        let adapter = match self.registry.get(&request.source_adapter) {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::error!(request_id = %id, error = %e, "no adapter for request");
                let error = RequestError {
                    class: None,
                    message: e.to_string(),
                    http_status: None,
                    window: None,
                    at: Utc::now(),
                };
                return self.fail_request(id, error, 0).await;
            }
        };

        let windows = self
            .windower
            .resume_from(&request.range, request.progress.as_ref());

        {
            let mut state = self.state.lock().await;
            let now = Utc::now();
            let entry = state
                .ledger
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(id.clone()))?;
            if entry.status == Status::Cancelled {
                return Ok(RequestOutcome::Cancelled);
            }
            if entry.progress.is_none() {
                let total = self.windower.windows(&entry.range).len();
                entry.progress = Some(Progress::new(
                    u32::try_from(total).unwrap_or(u32::MAX),
                    windows.first().copied(),
                    now,
                ));
            }
            entry.transition(Status::InProgress, now)?;
            state.persist().await?;
        }

        self.emit_event(Event::Started {
            id: id.clone(),
            windows_remaining: u32::try_from(windows.len()).unwrap_or(u32::MAX),
        });
        tracing::info!(
            request_id = %id,
            adapter = %request.source_adapter,
            windows_remaining = windows.len(),
            "processing request"
        );

        for (index, window) in windows.iter().enumerate() {
            if let Some(stop) = self.check_stop(id, token).await? {
                return Ok(stop);
            }

            let fetch_request = FetchRequest {
                request_id: id.clone(),
                endpoint: request.endpoint.clone(),
                params: request.params.clone(),
                window: *window,
            };

            let mut failures = 0u32;
            let mut calls = 0u64;
            let items = loop {
                let outcome = adapter.fetch(&fetch_request).await;
                calls += 1;

                let failure = match outcome.classification {
                    Classification::Success => break outcome.items,
                    Classification::Failure(failure) => failure,
                };
                failures += 1;

                match self.retry.decide(failure.class, failures) {
                    RetryDecision::Retry { attempt, wait } => {
                        tracing::warn!(
                            request_id = %id,
                            window_start = %window.start,
                            class = %failure.class,
                            attempt,
                            wait_secs = wait.as_secs_f64(),
                            error = %failure.message,
                            "fetch failed, retrying"
                        );
                        self.emit_event(Event::RetryScheduled {
                            id: id.clone(),
                            class: failure.class,
                            attempt,
                            wait_secs: wait.as_secs_f64(),
                        });
                        self.pause(self.retry.sleep_duration(wait), token).await;
                        if let Some(stop) = self.check_stop(id, token).await? {
                            return Ok(stop);
                        }
                    }
                    RetryDecision::Fatal(reason) => {
                        tracing::error!(
                            request_id = %id,
                            window_start = %window.start,
                            class = %failure.class,
                            failures,
                            reason = %reason,
                            error = %failure.message,
                            "fetch failed permanently"
                        );
                        let error = RequestError {
                            class: Some(failure.class),
                            message: format!("{} ({reason})", failure.message),
                            http_status: failure.http_status,
                            window: Some(*window),
                            at: Utc::now(),
                        };
                        return self.fail_request(id, error, calls).await;
                    }
                }
            };

            let item_count = items.len() as u64;
            if let Err(e) = self.sink.store(id, window, &items).await {
                tracing::error!(request_id = %id, window = %window, error = %e, "item sink failed");
                let error = RequestError {
                    class: None,
                    message: format!("item sink rejected window: {e}"),
                    http_status: None,
                    window: Some(*window),
                    at: Utc::now(),
                };
                return self.fail_request(id, error, calls).await;
            }

            let next = windows.get(index + 1).copied();
            let (percent, status) = {
                let mut state = self.state.lock().await;
                state.adopt_external_cancellations().await;
                let now = Utc::now();
                let entry = state
                    .ledger
                    .get_mut(id)
                    .ok_or_else(|| Error::NotFound(id.clone()))?;
                let progress = entry
                    .progress
                    .get_or_insert_with(|| Progress::new(0, Some(*window), now));
                progress.advance(next, item_count, calls, now)?;
                let percent = progress.percent();
                let status = entry.status;
                state.persist().await?;
                (percent, status)
            };

            self.emit_event(Event::WindowCompleted {
                id: id.clone(),
                window: *window,
                items: item_count,
                percent,
            });
            tracing::debug!(
                request_id = %id,
                window_start = %window.start,
                window_end = %window.end,
                items = item_count,
                api_calls = calls,
                "window completed"
            );

            if status == Status::Cancelled {
                return Ok(RequestOutcome::Cancelled);
            }
            self.pause(self.retry.success_wait(), token).await;
        }

        self.complete_request(id).await
    }

    /// Stop reason at a window boundary, if any
    async fn check_stop(
        &self,
        id: &RequestId,
        token: &CancellationToken,
    ) -> Result<Option<RequestOutcome>> {
        let mut state = self.state.lock().await;
        state.adopt_external_cancellations().await;

        let status = state
            .ledger
            .get(id)
            .map(|request| request.status)
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        if status == Status::Cancelled {
            tracing::info!(request_id = %id, "stopping cancelled request");
            return Ok(Some(RequestOutcome::Cancelled));
        }
        if token.is_cancelled() {
            return Ok(Some(RequestOutcome::Interrupted));
        }
        Ok(None)
    }

    async fn fail_request(
        &self,
        id: &RequestId,
        error: RequestError,
        calls: u64,
    ) -> Result<RequestOutcome> {
        let mut state = self.state.lock().await;
        state.adopt_external_cancellations().await;

        let entry = state
            .ledger
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        if entry.status == Status::Cancelled {
            return Ok(RequestOutcome::Cancelled);
        }
        if let Some(progress) = entry.progress.as_mut() {
            progress.api_calls += calls;
            progress.updated_at = error.at;
        }
        entry.error = Some(error.clone());
        entry.transition(Status::Failed, error.at)?;
        state.persist().await?;
        drop(state);

        self.emit_event(Event::Failed {
            id: id.clone(),
            error,
        });
        Ok(RequestOutcome::Failed)
    }

    async fn complete_request(&self, id: &RequestId) -> Result<RequestOutcome> {
        let mut state = self.state.lock().await;
        state.adopt_external_cancellations().await;

        let entry = state
            .ledger
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        if entry.status == Status::Cancelled {
            return Ok(RequestOutcome::Cancelled);
        }
        let now = Utc::now();
        if let Some(progress) = entry.progress.as_mut() {
            progress.current_window = None;
            progress.updated_at = now;
        }
        entry.transition(Status::Completed, now)?;
        let items_retrieved = entry
            .progress
            .as_ref()
            .map(|progress| progress.items_retrieved)
            .unwrap_or(0);
        state.persist().await?;
        drop(state);

        tracing::info!(request_id = %id, items_retrieved, "request completed");
        self.emit_event(Event::Completed {
            id: id.clone(),
            items_retrieved,
        });
        Ok(RequestOutcome::Completed)
    }

    /// Sleep unless the token fires first
    async fn pause(&self, duration: Duration, token: &CancellationToken) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = token.cancelled() => {}
        }
    }
}
