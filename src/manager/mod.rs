//! Request manager split into focused submodules.
//!
//! The [`RequestManager`] owns the ledger, the priority queue and the single
//! worker loop. Its methods are organized by concern:
//! - [`submit`] - accepting new requests
//! - [`control`] - listing, inspection and cancellation
//! - [`worker`] - draining the queue one sub-window at a time
//! - [`lifecycle`] - startup reconciliation and shutdown

mod control;
mod lifecycle;
mod submit;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use lifecycle::{CorruptStateReport, StartupReport};
pub use worker::RunSummary;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, LedgerBackend};
use crate::error::Result;
use crate::fetch::{FetchRegistry, FileSink, ItemSink};
use crate::ledger::{JsonFileStore, Ledger, LedgerStore, SqliteStore};
use crate::queue::RequestQueue;
use crate::retry::RetryPolicy;
use crate::types::{Event, RequestId};
use crate::window::Windower;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Orchestrates durable, prioritized, windowed retrieval
///
/// Cheap to clone: every clone shares the same ledger, queue and worker, so an
/// API server can submit and cancel while [`run`](Self::run) is active.
#[derive(Clone)]
pub struct RequestManager {
    /// Configuration the manager was built with
    pub(crate) config: Arc<Config>,
    /// Ledger, queue and the request currently being worked on
    pub(crate) state: Arc<Mutex<ManagerState>>,
    /// Fetch adapters by name
    pub(crate) registry: Arc<FetchRegistry>,
    /// Where retrieved items go
    pub(crate) sink: Arc<dyn ItemSink>,
    /// Backoff decisions
    pub(crate) retry: Arc<RetryPolicy>,
    /// Range splitting
    pub(crate) windower: Arc<Windower>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Fires on shutdown; stops the worker and interrupts its waits
    pub(crate) shutdown_token: CancellationToken,
    /// Cleared on shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Signalled when a submission adds work
    pub(crate) work_available: Arc<Notify>,
    /// Held by the active worker loop
    pub(crate) run_lock: Arc<Mutex<()>>,
    /// What startup found
    pub(crate) startup: Arc<StartupReport>,
}

/// Mutable state behind the manager's lock
pub(crate) struct ManagerState {
    pub(crate) ledger: Ledger,
    pub(crate) queue: RequestQueue,
    /// Dequeued request the worker is on
    pub(crate) running: Option<RequestId>,
    /// Cancels waits of the running request only
    pub(crate) running_token: Option<CancellationToken>,
    /// Shared with the manager, for cancellations adopted from the store
    pub(crate) event_tx: broadcast::Sender<Event>,
}

impl ManagerState {
    /// Pending ids in service order, the running request first
    pub(crate) fn pending(&self) -> Vec<RequestId> {
        let mut pending: Vec<RequestId> = self.running.iter().cloned().collect();
        pending.extend(self.queue.snapshot());
        pending
    }

    /// Pick up cancellations another process wrote to the stored ledger
    ///
    /// Adopted requests leave the queue, and the running one has its token
    /// cancelled. A store that cannot be re-read is logged and skipped.
    pub(crate) async fn adopt_external_cancellations(&mut self) -> Vec<RequestId> {
        let adopted = match self.ledger.adopt_external_cancellations().await {
            Ok(adopted) => adopted,
            Err(e) => {
                tracing::warn!(error = %e, "could not re-read stored ledger for cancellations");
                return Vec::new();
            }
        };

        for id in &adopted {
            self.queue.remove(id);
            if self.running.as_ref() == Some(id)
                && let Some(token) = &self.running_token
            {
                token.cancel();
            }
            tracing::info!(request_id = %id, "adopted cancellation from stored ledger");
            self.event_tx.send(Event::Cancelled { id: id.clone() }).ok();
        }
        adopted
    }

    /// Write ledger and queue order
    ///
    /// The stored ledger is re-read first, so a cancellation another process
    /// wrote since our last write is kept rather than overwritten.
    pub(crate) async fn persist(&mut self) -> Result<()> {
        self.adopt_external_cancellations().await;
        self.ledger.persist().await?;
        self.ledger.persist_queue(self.pending()).await
    }
}

impl RequestManager {
    /// Create a manager with the configured ledger backend, storing items as
    /// JSON files under `persistence.data_dir`
    ///
    /// Loads the ledger, rebuilds the queue from its active requests and
    /// persists the reconciled state. A corrupt ledger is moved aside and the
    /// manager starts empty; see [`startup_report`](Self::startup_report).
    pub async fn new(config: Config, registry: FetchRegistry) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn LedgerStore> = match config.persistence.backend {
            LedgerBackend::JsonFile => Arc::new(JsonFileStore::from_config(&config.persistence)),
            LedgerBackend::Sqlite => {
                Arc::new(SqliteStore::new(&config.persistence.database_path).await?)
            }
        };
        let sink = Arc::new(FileSink::from_config(&config.persistence));
        Self::with_components(config, registry, store, sink).await
    }

    /// Create a manager from explicit parts
    pub async fn with_components(
        config: Config,
        registry: FetchRegistry,
        store: Arc<dyn LedgerStore>,
        sink: Arc<dyn ItemSink>,
    ) -> Result<Self> {
        config.validate()?;
        let windower = Windower::new(&config.window)?;
        let retry = RetryPolicy::new(config.retry.clone());
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let (state, startup) = lifecycle::restore(Ledger::new(store), &event_tx).await?;

        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
            registry: Arc::new(registry),
            sink,
            retry: Arc::new(retry),
            windower: Arc::new(windower),
            event_tx,
            shutdown_token: CancellationToken::new(),
            accepting_new: Arc::new(AtomicBool::new(true)),
            work_available: Arc::new(Notify::new()),
            run_lock: Arc::new(Mutex::new(())),
            startup: Arc::new(startup),
        })
    }

    /// Subscribe to lifecycle events
    ///
    /// Slow receivers miss events once the channel holds 1000 unread ones.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The configuration this manager runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// What startup found
    pub fn startup_report(&self) -> &StartupReport {
        &self.startup
    }

    /// Registered fetch adapter names
    pub fn adapters(&self) -> Vec<String> {
        self.registry.names()
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}

impl std::fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestManager")
            .field("registry", &self.registry)
            .field("startup", &self.startup)
            .finish_non_exhaustive()
    }
}
