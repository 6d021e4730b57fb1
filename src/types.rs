//! Core types for socialsweep

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::error::{Error, Result};

/// Unique identifier for a request
///
/// Assigned once at submission and never changed. Unless the submitter supplies
/// one, it is derived from the request content (see [`NewRequest::content_id`]),
/// so resubmitting the same request maps onto the same ledger entry.
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Create a new RequestId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Request status
///
/// `Completed`, `Failed` and `Cancelled` are terminal: once reached, the request
/// is never processed again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Submitted and waiting in the queue
    Queued,
    /// At least one sub-window has been attempted
    InProgress,
    /// Every sub-window was fetched
    Completed,
    /// A non-retryable or retry-exhausted error occurred
    Failed,
    /// Explicitly cleared while still active
    Cancelled,
}

impl Status {
    /// All statuses, in lifecycle order
    pub const ALL: [Status; 5] = [
        Status::Queued,
        Status::InProgress,
        Status::Completed,
        Status::Failed,
        Status::Cancelled,
    ];

    /// True for completed, failed and cancelled
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }

    /// True for queued and in_progress
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    ///
    /// Terminal statuses have no outgoing transitions.
    pub fn can_transition_to(&self, next: Status) -> bool {
        match (self, next) {
            (Status::Queued, Status::InProgress) => true,
            (Status::Queued | Status::InProgress, Status::Completed) => true,
            (Status::Queued | Status::InProgress, Status::Failed) => true,
            (Status::Queued | Status::InProgress, Status::Cancelled) => true,
            _ => false,
        }
    }

    /// Wire name, as used in JSON and query strings
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Other(format!("unknown status: {s}")))
    }
}

/// Request priority (lower value is served first)
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct Priority(pub i64);

impl Priority {
    /// Priority used when a submission does not specify one
    pub const DEFAULT: Priority = Priority(100);
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a failed fetch attempt
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transport-level failure (connect, reset, DNS)
    Network,
    /// The API asked us to slow down (HTTP 429)
    RateLimited,
    /// The external worker pool is exhausted (HTTP 417)
    NoCapacity,
    /// Upstream gateway timed out (HTTP 504)
    GatewayTimeout,
    /// Any other non-success API response
    ApiError,
}

impl ErrorClass {
    /// Every classification
    pub const ALL: [ErrorClass; 5] = [
        ErrorClass::Network,
        ErrorClass::RateLimited,
        ErrorClass::NoCapacity,
        ErrorClass::GatewayTimeout,
        ErrorClass::ApiError,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Network => "network",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::NoCapacity => "no_capacity",
            ErrorClass::GatewayTimeout => "gateway_timeout",
            ErrorClass::ApiError => "api_error",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open time slice `[start, end)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct Window {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
}

impl Window {
    /// Create a window
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Length of the window
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// The overall span a request covers, fixed at submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DateRange {
    /// Inclusive lower bound
    pub since: DateTime<Utc>,
    /// Exclusive upper bound
    pub until: DateTime<Utc>,
}

impl DateRange {
    /// Length of the range (zero when inverted)
    pub fn span(&self) -> TimeDelta {
        if self.until > self.since {
            self.until - self.since
        } else {
            TimeDelta::zero()
        }
    }
}

/// Opaque query parameters handed to the fetch adapter
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RequestParams {
    /// Search query, passed through untouched
    pub query: String,

    /// Result cap per external call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// Explicit lower bound (`YYYY-MM-DD` or RFC 3339)
    #[serde(
        default,
        with = "flexible_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>, example = "2024-01-01")]
    pub since: Option<DateTime<Utc>>,

    /// Explicit upper bound (`YYYY-MM-DD` or RFC 3339)
    #[serde(
        default,
        with = "flexible_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>, example = "2024-01-03")]
    pub until: Option<DateTime<Utc>>,

    /// Adapter-specific extras
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schema(value_type = Object)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RequestParams {
    /// Params with just a query
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Windower checkpoint stored with each request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Progress {
    /// Next sub-window to process (`None` once every window is done)
    pub current_window: Option<Window>,
    /// Sub-windows fully fetched and acknowledged
    pub windows_completed: u32,
    /// Sub-windows in the whole range
    pub windows_total: u32,
    /// Items handed to the sink so far
    pub items_retrieved: u64,
    /// External calls made, retries included
    pub api_calls: u64,
    /// Last checkpoint time
    pub updated_at: DateTime<Utc>,
}

impl Progress {
    /// Fresh checkpoint pointing at the first window
    pub fn new(windows_total: u32, first: Option<Window>, now: DateTime<Utc>) -> Self {
        Self {
            current_window: first,
            windows_completed: 0,
            windows_total,
            items_retrieved: 0,
            api_calls: 0,
            updated_at: now,
        }
    }

    /// Percentage of windows done, 0.0 to 100.0
    pub fn percent(&self) -> f32 {
        if self.windows_total == 0 {
            return 100.0;
        }
        (self.windows_completed as f32 / self.windows_total as f32 * 100.0).min(100.0)
    }

    /// Record a fully fetched window and move the checkpoint to `next`
    ///
    /// The checkpoint only moves forward: a `next` window starting before the
    /// current one is rejected.
    pub fn advance(
        &mut self,
        next: Option<Window>,
        items: u64,
        api_calls: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let (Some(current), Some(next)) = (self.current_window, next)
            && next.start < current.start
        {
            return Err(Error::Other(format!(
                "checkpoint would move backward from {} to {}",
                current, next
            )));
        }
        self.current_window = next;
        self.windows_completed = (self.windows_completed + 1).min(self.windows_total);
        self.items_retrieved += items;
        self.api_calls += api_calls;
        self.updated_at = now;
        Ok(())
    }
}

/// Error recorded on a failed request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RequestError {
    /// Fetch classification; `None` when the failure did not come from a fetch
    /// (e.g. the item sink rejected a batch)
    pub class: Option<ErrorClass>,
    /// Human-readable message
    pub message: String,
    /// HTTP status of the last response, when there was one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Window that was being fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<Window>,
    /// When the failure was recorded
    pub at: DateTime<Utc>,
}

/// A unit of work in the ledger
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Request {
    /// Immutable id
    pub id: RequestId,
    /// Name of the fetch adapter
    pub source_adapter: String,
    /// Adapter endpoint
    pub endpoint: String,
    /// Query parameters
    pub params: RequestParams,
    /// Lower value is served first
    pub priority: Priority,
    /// Lifecycle status
    pub status: Status,
    /// Resolved time span
    pub range: DateRange,
    /// Windower checkpoint (unset until the first attempt)
    #[serde(default)]
    pub progress: Option<Progress>,
    /// Last error, present when failed
    #[serde(default)]
    pub error: Option<RequestError>,
    /// Submission time
    pub submitted_at: DateTime<Utc>,
    /// First attempt
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal status reached
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Submission sequence number (FIFO tie-break)
    pub seq: u64,
}

impl Request {
    /// Move to `next`, enforcing the lifecycle
    ///
    /// Stamps `started_at` / `finished_at` as appropriate. Re-applying the
    /// current status is a no-op.
    pub fn transition(&mut self, next: Status, now: DateTime<Utc>) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        if next == Status::InProgress && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Percentage done according to the checkpoint
    pub fn progress_percent(&self) -> f32 {
        match (&self.progress, self.status) {
            (Some(progress), _) => progress.percent(),
            (None, Status::Completed) => 100.0,
            (None, _) => 0.0,
        }
    }

    /// Listing view of this request
    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            id: self.id.clone(),
            status: self.status,
            priority: self.priority,
            progress_percent: self.progress_percent(),
            source_adapter: self.source_adapter.clone(),
            endpoint: self.endpoint.clone(),
            query: self.params.query.clone(),
            items_retrieved: self
                .progress
                .as_ref()
                .map(|p| p.items_retrieved)
                .unwrap_or(0),
            submitted_at: self.submitted_at,
            finished_at: self.finished_at,
        }
    }
}

/// A request as submitted, before the ledger assigns status and range
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NewRequest {
    /// Explicit id; derived from content when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Name of the fetch adapter
    pub source_adapter: String,
    /// Adapter endpoint
    pub endpoint: String,
    /// Query parameters
    pub params: RequestParams,
    /// Defaults to [`Priority::DEFAULT`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl NewRequest {
    /// Submission with default priority
    pub fn new(
        source_adapter: impl Into<String>,
        endpoint: impl Into<String>,
        params: RequestParams,
    ) -> Self {
        Self {
            id: None,
            source_adapter: source_adapter.into(),
            endpoint: endpoint.into(),
            params,
            priority: None,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(Priority(priority));
        self
    }

    /// Set an explicit id
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Lowercase hex SHA-256 of the submission body (explicit id excluded)
    pub fn content_id(&self) -> Result<RequestId> {
        let mut body = self.clone();
        body.id = None;
        let canonical = serde_json::to_vec(&body)?;
        let digest = Sha256::digest(&canonical);
        Ok(RequestId(format!("{:x}", digest)))
    }

    /// Explicit id, or the content id
    pub fn resolve_id(&self) -> Result<RequestId> {
        match &self.id {
            Some(id) => Ok(id.clone()),
            None => self.content_id(),
        }
    }
}

/// Listing row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RequestSummary {
    /// Request id
    pub id: RequestId,
    /// Status
    pub status: Status,
    /// Priority
    pub priority: Priority,
    /// Windows done, 0.0 to 100.0
    pub progress_percent: f32,
    /// Adapter name
    pub source_adapter: String,
    /// Adapter endpoint
    pub endpoint: String,
    /// Query text
    pub query: String,
    /// Items handed to the sink
    pub items_retrieved: u64,
    /// Submission time
    pub submitted_at: DateTime<Utc>,
    /// Terminal time
    pub finished_at: Option<DateTime<Utc>>,
}

/// Which statuses a listing should include
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StatusFilter {
    /// Every request
    #[default]
    All,
    /// Only these statuses
    Only(Vec<Status>),
}

impl StatusFilter {
    /// Whether `status` passes the filter
    pub fn matches(&self, status: Status) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(statuses) => statuses.contains(&status),
        }
    }

    /// Parse `"all"` or a comma-separated list of status names
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
            return Ok(StatusFilter::All);
        }
        let statuses = raw
            .split(',')
            .map(|s| s.trim().parse::<Status>())
            .collect::<Result<Vec<_>>>()?;
        Ok(StatusFilter::Only(statuses))
    }
}

/// Which requests a clear operation targets
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClearTarget {
    /// These ids
    Ids(Vec<RequestId>),
    /// Every queued or in-progress request
    AllActive,
}

/// Per-id result of a clear operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClearResult {
    /// Moved to cancelled
    Cancelled,
    /// Already completed, failed or cancelled; left untouched
    AlreadyTerminal,
    /// No such id
    NotFound,
}

/// Clear outcome for one id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ClearOutcome {
    /// Target id
    pub id: RequestId,
    /// What happened
    pub result: ClearResult,
}

/// Per-item result of a submission
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmitResult {
    /// New ledger entry, enqueued
    Queued,
    /// The id was already in the ledger; nothing changed
    AlreadyExists {
        /// Status of the existing entry
        status: Status,
    },
    /// Not accepted
    Rejected {
        /// Why
        reason: String,
    },
}

/// Submission outcome for one request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SubmitOutcome {
    /// Assigned (or existing) id
    pub id: RequestId,
    /// What happened
    #[serde(flatten)]
    pub result: SubmitResult,
}

/// Ledger and queue counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QueueStats {
    /// Requests in the ledger
    pub total: usize,
    /// Waiting
    pub queued: usize,
    /// Started, not finished
    pub in_progress: usize,
    /// Finished successfully
    pub completed: usize,
    /// Finished with an error
    pub failed: usize,
    /// Cleared
    pub cancelled: usize,
    /// Ids waiting in the priority queue
    pub queue_len: usize,
    /// Request the worker is on right now
    pub running: Option<RequestId>,
    /// Whether submissions are accepted
    pub accepting_new: bool,
}

/// Event emitted during the request lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Request accepted and enqueued
    Queued {
        /// Request id
        id: RequestId,
        /// Priority
        priority: Priority,
    },

    /// Worker picked the request up
    Started {
        /// Request id
        id: RequestId,
        /// Windows left to fetch
        windows_remaining: u32,
    },

    /// One sub-window fetched and checkpointed
    WindowCompleted {
        /// Request id
        id: RequestId,
        /// The window
        window: Window,
        /// Items in this window
        items: u64,
        /// Progress percentage (0.0 to 100.0)
        percent: f32,
    },

    /// A failed attempt will be retried after `wait_secs`
    RetryScheduled {
        /// Request id
        id: RequestId,
        /// Classification of the failure
        class: ErrorClass,
        /// Retry number (1-based)
        attempt: u32,
        /// Computed wait before the retry
        wait_secs: f64,
    },

    /// Request finished successfully
    Completed {
        /// Request id
        id: RequestId,
        /// Items retrieved over the whole request
        items_retrieved: u64,
    },

    /// Request failed permanently
    Failed {
        /// Request id
        id: RequestId,
        /// Recorded error
        error: RequestError,
    },

    /// Request cancelled
    Cancelled {
        /// Request id
        id: RequestId,
    },

    /// The persisted ledger was unreadable; started empty
    StateCorrupted {
        /// What went wrong
        reason: String,
    },

    /// Manager shutting down
    Shutdown,
}

impl Event {
    /// Short name used as the SSE event type
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Queued { .. } => "queued",
            Event::Started { .. } => "started",
            Event::WindowCompleted { .. } => "window_completed",
            Event::RetryScheduled { .. } => "retry_scheduled",
            Event::Completed { .. } => "completed",
            Event::Failed { .. } => "failed",
            Event::Cancelled { .. } => "cancelled",
            Event::StateCorrupted { .. } => "state_corrupted",
            Event::Shutdown => "shutdown",
        }
    }
}

// Accepts `YYYY-MM-DD` (midnight UTC) or RFC 3339; writes RFC 3339
mod flexible_datetime {
    use chrono::{DateTime, NaiveDate, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }

    pub(super) fn parse(s: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| format!("invalid date '{s}': expected YYYY-MM-DD or RFC 3339"))
    }
}
