//! # socialsweep
//!
//! Durable, priority-ordered orchestration of time-windowed retrieval from
//! rate-limited APIs.
//!
//! ## Design Philosophy
//!
//! - **Durable** - every state change is persisted before it is acted on, so a
//!   crash or restart resumes at the last completed sub-window
//! - **Polite** - rate limits and outages are absorbed by per-class exponential
//!   backoff instead of failing the request
//! - **Library-first** - bring your own [`Fetch`] adapters and [`ItemSink`];
//!   an optional REST API is included
//! - **Event-driven** - consumers subscribe to lifecycle events
//!
//! ## Quick Start
//!
//! ```no_run
//! use socialsweep::{Config, FetchRegistry, HttpSourceConfig, NewRequest, RequestManager, RequestParams};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         http_source: Some(HttpSourceConfig::new("https://api.example.com/v1/")),
//!         ..Default::default()
//!     };
//!     let registry = FetchRegistry::from_config(&config)?;
//!     let manager = RequestManager::new(config, registry).await?;
//!
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     manager
//!         .submit(NewRequest::new("http", "search", RequestParams::query("#rustlang")).with_priority(1))
//!         .await?;
//!     let summary = manager.run().await?;
//!     println!("completed {} requests", summary.completed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Fetch adapters and item sinks
pub mod fetch;
/// Durable request ledger
pub mod ledger;
/// Request manager (decomposed into focused submodules)
pub mod manager;
/// Priority queue of pending requests
pub mod queue;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types
pub mod types;
/// Date-range windowing
pub mod window;

pub use config::{
    ApiConfig, Config, HttpSourceConfig, InitialWaits, LedgerBackend, PersistenceConfig,
    RetryConfig, WindowConfig,
};
pub use error::{ApiError, Error, Result};
pub use fetch::{
    Classification, Fetch, FetchFailure, FetchOutcome, FetchRegistry, FetchRequest, FileSink,
    HttpFetcher, Item, ItemSink, NullSink,
};
pub use ledger::{JsonFileStore, Ledger, LedgerStore, SqliteStore};
pub use manager::{CorruptStateReport, RequestManager, RunSummary, StartupReport};
pub use queue::RequestQueue;
pub use retry::{RetryDecision, RetryPolicy};
pub use types::{
    ClearOutcome, ClearResult, ClearTarget, DateRange, ErrorClass, Event, NewRequest, Priority,
    Progress, QueueStats, Request, RequestError, RequestId, RequestParams, RequestSummary, Status,
    StatusFilter, SubmitOutcome, SubmitResult, Window,
};
pub use window::Windower;

/// Work the queue until SIGTERM or SIGINT, then shut down gracefully
///
/// Runs [`RequestManager::run_until_shutdown`] in a background task, waits
/// for a termination signal, calls [`RequestManager::shutdown`] and returns
/// what the worker did. A request interrupted by the signal stays
/// `in_progress` and resumes from its checkpoint on the next start.
///
/// # Example
///
/// ```no_run
/// use socialsweep::{Config, FetchRegistry, RequestManager, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let registry = FetchRegistry::from_config(&config)?;
///     let manager = RequestManager::new(config, registry).await?;
///
///     run_with_shutdown(manager).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(manager: RequestManager) -> Result<RunSummary> {
    let worker = manager.clone();
    let handle = tokio::spawn(async move { worker.run_until_shutdown().await });

    wait_for_signal().await;
    manager.shutdown().await?;

    handle
        .await
        .map_err(|e| Error::Other(format!("worker task failed: {e}")))?
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // registration can fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
