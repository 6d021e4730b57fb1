//! Fetch adapters
//!
//! A fetch adapter retrieves the items of one sub-window from an external
//! source. Adapters never raise for ordinary API failures: they return a
//! [`FetchOutcome`] whose classification the retry policy acts on.
//!
//! Adapters are registered by name in a [`FetchRegistry`]; each request names
//! the adapter it needs (`source_adapter`).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{ErrorClass, RequestId, RequestParams, Window};

pub mod http;
pub mod sink;

pub use http::HttpFetcher;
pub use sink::{FileSink, ItemSink, NullSink};

/// One retrieved item, passed through to the sink untouched
pub type Item = serde_json::Value;

/// Everything an adapter needs for one call
#[derive(Clone, Debug, PartialEq)]
pub struct FetchRequest {
    /// Request being served
    pub request_id: RequestId,
    /// Adapter endpoint
    pub endpoint: String,
    /// Query parameters
    pub params: RequestParams,
    /// Sub-window to fetch
    pub window: Window,
}

/// A classified failed attempt
#[derive(Clone, Debug, PartialEq)]
pub struct FetchFailure {
    /// Classification the retry policy keys on
    pub class: ErrorClass,
    /// Human-readable description
    pub message: String,
    /// HTTP status, when a response was received
    pub http_status: Option<u16>,
}

/// Result of one attempt
#[derive(Clone, Debug, PartialEq)]
pub enum Classification {
    /// Items were retrieved (possibly none)
    Success,
    /// The attempt failed
    Failure(FetchFailure),
}

/// What an adapter returns for one call
#[derive(Clone, Debug, PartialEq)]
pub struct FetchOutcome {
    /// Retrieved items (empty on failure)
    pub items: Vec<Item>,
    /// Success or classified failure
    pub classification: Classification,
}

impl FetchOutcome {
    /// Successful call
    pub fn success(items: Vec<Item>) -> Self {
        Self {
            items,
            classification: Classification::Success,
        }
    }

    /// Failed call
    pub fn failure(class: ErrorClass, message: impl Into<String>, http_status: Option<u16>) -> Self {
        Self {
            items: Vec::new(),
            classification: Classification::Failure(FetchFailure {
                class,
                message: message.into(),
                http_status,
            }),
        }
    }

    /// True for [`Classification::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self.classification, Classification::Success)
    }
}

/// External data source
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Retrieve the items of `request.window`
    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome;
}

/// Adapter lookup by name
#[derive(Clone, Default)]
pub struct FetchRegistry {
    adapters: HashMap<String, Arc<dyn Fetch>>,
}

impl FetchRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the HTTP source from `config`, when one is configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        if let Some(http) = &config.http_source {
            registry.register(http.name.clone(), Arc::new(HttpFetcher::new(http)?));
        }
        Ok(registry)
    }

    /// Add or replace an adapter
    pub fn register(&mut self, name: impl Into<String>, adapter: Arc<dyn Fetch>) {
        let name = name.into();
        tracing::debug!(adapter = %name, "registered fetch adapter");
        self.adapters.insert(name, adapter);
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, name: impl Into<String>, adapter: Arc<dyn Fetch>) -> Self {
        self.register(name, adapter);
        self
    }

    /// Resolve an adapter
    pub fn get(&self, name: &str) -> Result<Arc<dyn Fetch>> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownAdapter(name.to_string()))
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FetchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}
