//! Startup reconciliation and shutdown coordination.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;
use utoipa::ToSchema;

use super::{ManagerState, RequestManager};
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::queue::RequestQueue;
use crate::types::{Event, RequestId};

/// How long shutdown waits for the worker to reach a window boundary
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Details of an unreadable ledger found at startup
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct CorruptStateReport {
    /// Where the unreadable state was
    pub location: String,
    /// Parser or I/O message
    pub reason: String,
    /// Where it was moved to, if it could be moved
    pub quarantined_to: Option<String>,
}

/// What the manager found when it started
#[derive(Clone, Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct StartupReport {
    /// Requests read from the ledger
    pub loaded: usize,
    /// Active requests put back on the queue, in service order
    pub restored: Vec<RequestId>,
    /// Set when the ledger was unreadable and the manager started empty
    pub corrupt_state: Option<CorruptStateReport>,
    /// Whether the stored queue order disagreed with the ledger
    pub queue_mismatch: bool,
}

/// Load the ledger and rebuild the queue from it
///
/// The queue is always derived from the ledger's active requests. The stored
/// queue order is only compared, and a disagreement is logged.
pub(super) async fn restore(
    mut ledger: Ledger,
    event_tx: &broadcast::Sender<Event>,
) -> Result<(ManagerState, StartupReport)> {
    tracing::info!(location = %ledger.describe(), "Restoring request ledger");
    let mut report = StartupReport::default();

    match ledger.load().await {
        Ok(loaded) => report.loaded = loaded,
        Err(Error::CorruptState { location, reason }) => {
            tracing::error!(
                location = %location,
                reason = %reason,
                "Ledger is unreadable, starting with an empty ledger"
            );
            let quarantined_to = ledger.quarantine(Utc::now()).await?;
            event_tx
                .send(Event::StateCorrupted {
                    reason: reason.clone(),
                })
                .ok();
            report.corrupt_state = Some(CorruptStateReport {
                location,
                reason,
                quarantined_to,
            });
        }
        Err(e) => return Err(e),
    }

    let mut queue = RequestQueue::new();
    queue.rebuild(ledger.active_ids());
    report.restored = queue.snapshot();

    match ledger.load_queue().await {
        Ok(Some(stored)) if stored.pending != report.restored => {
            report.queue_mismatch = true;
            tracing::warn!(
                stored = stored.pending.len(),
                rebuilt = report.restored.len(),
                "Stored queue order disagrees with the ledger, using the ledger"
            );
        }
        Ok(_) => {}
        Err(e) => {
            report.queue_mismatch = true;
            tracing::warn!(error = %e, "Stored queue order is unreadable, using the ledger");
        }
    }

    let mut state = ManagerState {
        ledger,
        queue,
        running: None,
        running_token: None,
        event_tx: event_tx.clone(),
    };
    state.persist().await?;

    tracing::info!(
        loaded = report.loaded,
        restored = report.restored.len(),
        "Ledger restored"
    );
    Ok((state, report))
}

impl RequestManager {
    /// Gracefully shut down the manager
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting submissions
    /// 2. Signals the worker, which stops at the next window boundary or wait
    /// 3. Waits for the worker to return (up to 30 seconds)
    /// 4. Persists the final ledger and queue order
    /// 5. Emits [`Event::Shutdown`]
    ///
    /// An interrupted request stays `in_progress` and resumes from its
    /// checkpoint on the next start.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new requests");

        self.shutdown_token.cancel();
        self.work_available.notify_waiters();

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.run_lock.lock()).await {
            Ok(_guard) => tracing::info!("Worker stopped"),
            Err(_) => tracing::warn!("Timeout waiting for the worker, proceeding with shutdown"),
        }

        let persisted = {
            let mut state = self.state.lock().await;
            state.persist().await
        };
        match persisted {
            Ok(()) => tracing::info!("Final state persisted"),
            Err(e) => {
                // continue with shutdown even if persistence fails
                tracing::error!(error = %e, "Failed to persist final state during shutdown");
            }
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether submissions are accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }

    /// Whether shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }
}
