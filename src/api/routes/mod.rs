//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`requests`] - submission, listing and cancellation
//! - [`system`] - queue view, stats, health, events, OpenAPI, shutdown

use serde::{Deserialize, Serialize};

use crate::types::{NewRequest, RequestId};

mod requests;
mod system;

pub use requests::*;
pub use system::*;

// ============================================================================
// Query/Request Types (shared across handlers)
// ============================================================================

/// Body of POST /requests: one request or an array of them
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
#[serde(untagged)]
pub enum SubmitBody {
    /// Several requests, answered with one outcome each
    Batch(Vec<NewRequest>),
    /// A single request
    Single(NewRequest),
}

/// Query parameters for GET /requests
#[derive(Debug, Default, Deserialize, Serialize, utoipa::ToSchema, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Comma-separated statuses, or "all" (default: all)
    pub status: Option<String>,
}

/// Body of POST /requests/clear
#[derive(Debug, Default, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ClearBody {
    /// Ids to cancel
    #[serde(default)]
    pub ids: Option<Vec<RequestId>>,
    /// Cancel every queued or in-progress request instead
    #[serde(default)]
    pub all_active: bool,
}

/// Response of GET /queue
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct QueueView {
    /// Pending ids, the running request first
    pub pending: Vec<RequestId>,
}
