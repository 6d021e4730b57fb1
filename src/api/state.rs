//! Application state for the API server

use crate::{Config, RequestManager};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned per request; the manager itself is a bundle of `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// The request manager behind every route
    pub manager: RequestManager,

    /// Configuration, read-only
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(manager: RequestManager, config: Arc<Config>) -> Self {
        Self { manager, config }
    }
}
